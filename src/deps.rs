//! Dependency extraction for view and handler expressions.
//!
//! A dependency is a component field read by an expression. Loop variables
//! and method locals shadow fields and are never dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ast::{Expr, TemplatePart};

/// A read of `object.member` where `object` is a component field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDep {
    pub object: String,
    pub member: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepSet {
    pub vars: BTreeSet<String>,
    pub members: BTreeSet<MemberDep>,
}

impl DepSet {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn extend(&mut self, other: DepSet) {
        self.vars.extend(other.vars);
        self.members.extend(other.members);
    }
}

/// Resolves which identifiers are component fields at a given point.
pub struct DepScope<'a> {
    fields: &'a BTreeSet<String>,
    shadowed: Vec<String>,
}

impl<'a> DepScope<'a> {
    pub fn new(fields: &'a BTreeSet<String>) -> Self {
        Self {
            fields,
            shadowed: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &str) {
        self.shadowed.push(name.to_string());
    }

    pub fn pop(&mut self) {
        self.shadowed.pop();
    }

    pub fn is_field(&self, name: &str) -> bool {
        self.fields.contains(name) && !self.shadowed.iter().any(|s| s == name)
    }

    pub fn collect(&self, expr: &Expr) -> DepSet {
        let mut deps = DepSet::default();
        self.walk(expr, &mut deps);
        deps
    }

    fn walk(&self, expr: &Expr, deps: &mut DepSet) {
        match expr {
            Expr::Int { .. } | Expr::Float { .. } | Expr::Bool { .. } | Expr::Str { .. } => {}
            Expr::Template { parts } => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.walk(e, deps);
                    }
                }
            }
            Expr::Ident { name } => {
                if self.is_field(name) {
                    deps.vars.insert(name.clone());
                }
            }
            Expr::Member { object, field } => {
                if let Expr::Ident { name } = object.as_ref() {
                    if self.is_field(name) {
                        deps.members.insert(MemberDep {
                            object: name.clone(),
                            member: field.clone(),
                        });
                    }
                }
                self.walk(object, deps);
            }
            Expr::Index { target, index } => {
                self.walk(target, deps);
                self.walk(index, deps);
            }
            Expr::Unary { operand, .. } => self.walk(operand, deps),
            Expr::Binary { left, right, .. } => {
                self.walk(left, deps);
                self.walk(right, deps);
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.walk(condition, deps);
                self.walk(then, deps);
                self.walk(otherwise, deps);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.walk(arg, deps);
                }
            }
            Expr::MethodCall { receiver, args, .. } => {
                self.walk(receiver, deps);
                for arg in args {
                    self.walk(arg, deps);
                }
            }
            Expr::Array { elements } => {
                for e in elements {
                    self.walk(e, deps);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_vars_are_fields_only() {
        let f = fields(&["count", "label"]);
        let scope = DepScope::new(&f);
        let expr = Expr::binary(BinaryOp::Add, Expr::ident("count"), Expr::ident("unknown"));
        let deps = scope.collect(&expr);
        assert_eq!(deps.vars, fields(&["count"]));
    }

    #[test]
    fn test_loop_var_shadows_field() {
        let f = fields(&["i", "items"]);
        let mut scope = DepScope::new(&f);
        scope.push("i");
        let expr = Expr::Index {
            target: Box::new(Expr::ident("items")),
            index: Box::new(Expr::ident("i")),
        };
        let deps = scope.collect(&expr);
        assert_eq!(deps.vars, fields(&["items"]));
        scope.pop();
        assert!(scope.is_field("i"));
    }

    #[test]
    fn test_member_dependency_recorded() {
        let f = fields(&["player"]);
        let scope = DepScope::new(&f);
        let deps = scope.collect(&Expr::member(Expr::ident("player"), "score"));
        assert!(deps.vars.contains("player"));
        assert_eq!(
            deps.members.iter().next(),
            Some(&MemberDep {
                object: "player".into(),
                member: "score".into()
            })
        );
    }
}
