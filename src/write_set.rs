//! Static write-set analysis of method bodies.
//!
//! A write is attributed to the root variable of the assigned place. Method
//! params, `let` locals and loop variables are tracked lexically and never
//! count as component writes.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::ast::{Expr, Method, Place, Stmt, TemplatePart};

lazy_static! {
    static ref MUTATING_METHODS: HashSet<&'static str> = [
        "push", "append", "pop", "insert", "remove", "clear", "sort", "reverse", "truncate",
        "swap", "fill", "resize", "extend", "retain",
    ]
    .into_iter()
    .collect();
}

/// Methods that add exactly one item at the end of a collection.
pub fn is_single_append(method: &str, args: &[Expr]) -> bool {
    matches!(method, "push" | "append") && args.len() == 1
}

/// `items.push(x);` as a whole statement: the only shape that is patched in
/// place. Returns the appended variable. A push nested in a larger
/// expression is an ordinary mutation.
pub fn statement_append(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::MethodCall {
            receiver,
            method,
            args,
        } if is_single_append(method, args) => match receiver.as_ref() {
            Expr::Ident { name } => Some(name),
            _ => None,
        },
        _ => None,
    }
}

pub fn is_mutating_method(method: &str) -> bool {
    MUTATING_METHODS.contains(method)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    /// `x = ..`, `x += ..`, `x++`, `x.f = ..`, `x[i] = ..`
    Assign,
    /// A mutating collection call other than a single append.
    Mutate,
    /// `x.push(item)`
    Append,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSet {
    pub writes: BTreeMap<String, BTreeSet<WriteKind>>,
}

impl WriteSet {
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.writes.keys().map(String::as_str)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.writes.contains_key(var)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// True when every write to `var` is a single-item append.
    pub fn only_appended(&self, var: &str) -> bool {
        self.writes
            .get(var)
            .map(|kinds| kinds.len() == 1 && kinds.contains(&WriteKind::Append))
            .unwrap_or(false)
    }

    fn record(&mut self, var: &str, kind: WriteKind) {
        self.writes.entry(var.to_string()).or_default().insert(kind);
    }
}

pub fn analyze_method(method: &Method, fields: &BTreeSet<String>) -> WriteSet {
    let mut analyzer = WriteAnalyzer {
        fields,
        frames: vec![method.params.iter().map(|p| p.name.clone()).collect()],
        writes: WriteSet::default(),
    };
    analyzer.block(&method.body);
    analyzer.writes
}

struct WriteAnalyzer<'a> {
    fields: &'a BTreeSet<String>,
    frames: Vec<Vec<String>>,
    writes: WriteSet,
}

impl<'a> WriteAnalyzer<'a> {
    fn is_field(&self, name: &str) -> bool {
        self.fields.contains(name) && !self.frames.iter().flatten().any(|local| local == name)
    }

    fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(name.to_string());
        }
    }

    fn scoped(&mut self, bound: Option<&str>, body: &[Stmt]) {
        self.frames.push(bound.map(|b| vec![b.to_string()]).unwrap_or_default());
        self.block(body);
        self.frames.pop();
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, init } => {
                if let Some(init) = init {
                    self.expr(init);
                }
                self.declare(name);
            }
            Stmt::Assign { target, value, .. } => {
                self.place(target);
                self.expr(value);
                self.write(target.root(), WriteKind::Assign);
            }
            Stmt::Increment { target } | Stmt::Decrement { target } => {
                self.place(target);
                self.write(target.root(), WriteKind::Assign);
            }
            Stmt::Expr { expr } => match (statement_append(expr), expr) {
                (Some(var), Expr::MethodCall { args, .. }) => {
                    for arg in args {
                        self.expr(arg);
                    }
                    self.write(var, WriteKind::Append);
                }
                _ => self.expr(expr),
            },
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.scoped(None, then_branch);
                self.scoped(None, else_branch);
            }
            Stmt::ForRange {
                var,
                start,
                end,
                body,
            } => {
                self.expr(start);
                self.expr(end);
                self.scoped(Some(var.as_str()), body);
            }
            Stmt::ForEach { var, source, body } => {
                self.expr(source);
                self.scoped(Some(var.as_str()), body);
            }
            Stmt::Block { body } => self.scoped(None, body),
            Stmt::Return { value } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
        }
    }

    fn write(&mut self, root: &str, kind: WriteKind) {
        if self.is_field(root) {
            self.writes.record(root, kind);
        }
    }

    fn place(&mut self, place: &Place) {
        match place {
            Place::Var { .. } => {}
            Place::Field { object, .. } => self.place(object),
            Place::Element { target, index } => {
                self.place(target);
                self.expr(index);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Int { .. }
            | Expr::Float { .. }
            | Expr::Bool { .. }
            | Expr::Str { .. }
            | Expr::Ident { .. } => {}
            Expr::Template { parts } => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { target, index } => {
                self.expr(target);
                self.expr(index);
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition);
                self.expr(then);
                self.expr(otherwise);
            }
            Expr::Call { args, .. } | Expr::Array { elements: args } => {
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                self.expr(receiver);
                for arg in args {
                    self.expr(arg);
                }
                if is_mutating_method(method) {
                    if let Some(root) = expr_root(receiver) {
                        self.write(root, WriteKind::Mutate);
                    }
                }
            }
        }
    }
}

/// Root identifier of a field/index access chain.
pub fn expr_root(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Ident { name } => Some(name),
        Expr::Member { object, .. } => expr_root(object),
        Expr::Index { target, .. } => expr_root(target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignOp, MethodParam};

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn method(params: &[&str], body: Vec<Stmt>) -> Method {
        Method {
            name: "m".into(),
            params: params
                .iter()
                .map(|p| MethodParam {
                    name: p.to_string(),
                    ty: "int".into(),
                })
                .collect(),
            returns: None,
            body,
        }
    }

    #[test]
    fn test_nested_assignments_collected() {
        let body = vec![Stmt::If {
            condition: Expr::boolean(true),
            then_branch: vec![Stmt::ForRange {
                var: "i".into(),
                start: Expr::int(0),
                end: Expr::int(3),
                body: vec![Stmt::Increment {
                    target: Place::var("count"),
                }],
            }],
            else_branch: vec![Stmt::assign("label", AssignOp::Set, Expr::str("x"))],
        }];
        let ws = analyze_method(&method(&[], body), &fields(&["count", "label", "other"]));
        let vars: Vec<&str> = ws.vars().collect();
        assert_eq!(vars, vec!["count", "label"]);
    }

    #[test]
    fn test_locals_and_params_excluded() {
        let body = vec![
            Stmt::Let {
                name: "count".into(),
                init: Some(Expr::int(0)),
            },
            Stmt::assign("count", AssignOp::Add, Expr::int(1)),
            Stmt::assign("delta", AssignOp::Set, Expr::int(2)),
            Stmt::ForEach {
                var: "score".into(),
                source: Expr::ident("items"),
                body: vec![Stmt::Increment {
                    target: Place::var("score"),
                }],
            },
        ];
        let ws = analyze_method(
            &method(&["delta"], body),
            &fields(&["count", "delta", "score", "items"]),
        );
        assert!(ws.is_empty());
    }

    #[test]
    fn test_let_scope_ends_with_block() {
        let body = vec![
            Stmt::Block {
                body: vec![Stmt::Let {
                    name: "count".into(),
                    init: None,
                }],
            },
            Stmt::Increment {
                target: Place::var("count"),
            },
        ];
        let ws = analyze_method(&method(&[], body), &fields(&["count"]));
        assert!(ws.contains("count"));
    }

    #[test]
    fn test_collection_writes_classified() {
        let body = vec![
            Stmt::expr(Expr::method_call(Expr::ident("todos"), "push", vec![Expr::str("a")])),
            Stmt::expr(Expr::method_call(Expr::ident("done"), "clear", vec![])),
            Stmt::Assign {
                target: Place::Field {
                    object: Box::new(Place::Element {
                        target: Box::new(Place::var("rows")),
                        index: Box::new(Expr::int(0)),
                    }),
                    field: "label".into(),
                },
                op: AssignOp::Set,
                value: Expr::str("x"),
            },
        ];
        let ws = analyze_method(&method(&[], body), &fields(&["todos", "done", "rows"]));
        assert!(ws.only_appended("todos"));
        assert!(!ws.only_appended("done"));
        assert!(ws.contains("rows"));
    }

    #[test]
    fn test_push_then_reassign_is_not_append_only() {
        let body = vec![
            Stmt::expr(Expr::method_call(Expr::ident("todos"), "push", vec![Expr::str("a")])),
            Stmt::assign("todos", AssignOp::Set, Expr::Array { elements: vec![] }),
        ];
        let ws = analyze_method(&method(&[], body), &fields(&["todos"]));
        assert!(!ws.only_appended("todos"));
    }

    #[test]
    fn test_nested_push_is_a_mutation() {
        let push = || Expr::method_call(Expr::ident("todos"), "push", vec![Expr::str("a")]);
        let bodies = vec![
            vec![Stmt::Let {
                name: "n".into(),
                init: Some(push()),
            }],
            vec![Stmt::expr(Expr::Ternary {
                condition: Box::new(Expr::boolean(true)),
                then: Box::new(push()),
                otherwise: Box::new(Expr::int(0)),
            })],
            vec![Stmt::expr(Expr::call("log", vec![push()]))],
        ];
        for body in bodies {
            let ws = analyze_method(&method(&[], body), &fields(&["todos"]));
            assert!(ws.contains("todos"));
            assert!(!ws.only_appended("todos"));
        }
    }

    #[test]
    fn test_statement_append_shape() {
        let push = Expr::method_call(Expr::ident("todos"), "push", vec![Expr::str("a")]);
        assert_eq!(statement_append(&push), Some("todos"));
        let field_push = Expr::method_call(
            Expr::member(Expr::ident("board"), "todos"),
            "push",
            vec![Expr::str("a")],
        );
        assert_eq!(statement_append(&field_push), None);
        let pop = Expr::method_call(Expr::ident("todos"), "pop", vec![]);
        assert_eq!(statement_append(&pop), None);
    }

    #[test]
    fn test_non_mutating_calls_ignored() {
        let body = vec![Stmt::Let {
            name: "n".into(),
            init: Some(Expr::method_call(Expr::ident("todos"), "len", vec![])),
        }];
        let ws = analyze_method(&method(&[], body), &fields(&["todos"]));
        assert!(ws.is_empty());
    }
}
