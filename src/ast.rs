//! Input model for a single component.
//!
//! The front-end that tokenizes and parses component source is an external
//! collaborator; it hands us this tree as JSON. Everything here is an
//! immutable input to one compilation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub state: Vec<StateField>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub view: Vec<ViewNode>,
    /// Opaque payloads owned by other passes.
    #[serde(default)]
    pub style: Option<serde_json::Value>,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub enums: Vec<serde_json::Value>,
    #[serde(default)]
    pub router: Option<RouteTable>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub callback: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub mutable: bool,
    /// `pub` fields are readable by the parent and notify it on change.
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub params: Vec<MethodParam>,
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Name of the pre-render initializer. It runs before any node exists.
pub const INIT_METHOD: &str = "init";
/// Optional hook that runs once the initial render is attached.
pub const MOUNT_METHOD: &str = "mount";
/// Per-frame hook. Receives the elapsed time when it declares a parameter.
pub const TICK_METHOD: &str = "tick";

impl Component {
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn state_field(&self, name: &str) -> Option<&StateField> {
        self.state.iter().find(|s| s.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Names a view expression may read reactively: params then state fields.
    pub fn field_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.state.iter().map(|s| s.name.as_str()))
            .collect()
    }

    pub fn is_field(&self, name: &str) -> bool {
        self.param(name).is_some() || self.state_field(name).is_some()
    }

    /// Declared type of a param or state field.
    pub fn field_type(&self, name: &str) -> Option<&str> {
        self.param(name)
            .map(|p| p.ty.as_str())
            .or_else(|| self.state_field(name).map(|s| s.ty.as_str()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewNode {
    Element(ElementNode),
    Text(TextNode),
    Expression(ExpressionNode),
    /// Children rendered as raw markup into a wrapper element.
    Raw(RawNode),
    Component(ComponentNode),
    /// `<{member}/>`: renders an existing component instance without constructing it.
    MemberRender(MemberRenderNode),
    Conditional(ConditionalNode),
    RangeLoop(RangeLoopNode),
    KeyedLoop(KeyedLoopNode),
    RoutePlaceholder(RoutePlaceholderNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: Vec<AttributeNode>,
    #[serde(default)]
    pub children: Vec<ViewNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextNode {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub expr: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    #[serde(default)]
    pub children: Vec<ViewNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeNode {
    pub name: String,
    pub value: AttributeValue,
}

/// `"text"` is static, `{...}` an expression, `[...]` an inline handler body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Static(String),
    Dynamic(Expr),
    Handler(Vec<Stmt>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub name: String,
    #[serde(default)]
    pub props: Vec<PropNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropNode {
    pub name: String,
    pub value: Expr,
    /// `&name={var}` passes the caller's storage by reference.
    #[serde(default)]
    pub reference: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRenderNode {
    pub member: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalNode {
    pub condition: Expr,
    #[serde(default)]
    pub then_branch: Vec<ViewNode>,
    #[serde(default)]
    pub else_branch: Vec<ViewNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeLoopNode {
    pub var: String,
    pub start: Expr,
    pub end: Expr,
    #[serde(default)]
    pub body: Vec<ViewNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedLoopNode {
    pub var: String,
    pub source: Expr,
    #[serde(default)]
    pub key: Option<Expr>,
    #[serde(default)]
    pub body: Vec<ViewNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlaceholderNode {
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub path: String,
    pub component: String,
    #[serde(default)]
    pub props: Vec<PropNode>,
    #[serde(default)]
    pub default: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATEMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Stmt {
    Let {
        name: String,
        #[serde(default)]
        init: Option<Expr>,
    },
    Assign {
        target: Place,
        #[serde(default)]
        op: AssignOp,
        value: Expr,
    },
    Increment {
        target: Place,
    },
    Decrement {
        target: Place,
    },
    Expr {
        expr: Expr,
    },
    If {
        condition: Expr,
        #[serde(default, rename = "then")]
        then_branch: Vec<Stmt>,
        #[serde(default, rename = "else")]
        else_branch: Vec<Stmt>,
    },
    ForRange {
        var: String,
        start: Expr,
        end: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    ForEach {
        var: String,
        source: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Block {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
}

/// Assignable location. Writes are attributed to the root variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Place {
    Var { name: String },
    Field { object: Box<Place>, field: String },
    Element { target: Box<Place>, index: Box<Expr> },
}

impl Place {
    pub fn var(name: &str) -> Self {
        Place::Var {
            name: name.to_string(),
        }
    }

    pub fn root(&self) -> &str {
        match self {
            Place::Var { name } => name,
            Place::Field { object, .. } => object.root(),
            Place::Element { target, .. } => target.root(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    #[default]
    #[serde(rename = "=")]
    Set,
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
    #[serde(rename = "%=")]
    Rem,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
        }
    }

    /// The binary operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Expr {
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    Bool {
        value: bool,
    },
    Str {
        value: String,
    },
    /// Interpolated string; also the concatenation of mixed text children.
    Template {
        parts: Vec<TemplatePart>,
    },
    Ident {
        name: String,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Call of a component method.
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Array {
        #[serde(default)]
        elements: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "!")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "===",
            BinaryOp::Ne => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int { value }
    }

    pub fn boolean(value: bool) -> Self {
        Expr::Bool { value }
    }

    pub fn str(value: &str) -> Self {
        Expr::Str {
            value: value.to_string(),
        }
    }

    pub fn ident(name: &str) -> Self {
        Expr::Ident {
            name: name.to_string(),
        }
    }

    pub fn member(object: Expr, field: &str) -> Self {
        Expr::Member {
            object: Box::new(object),
            field: field.to_string(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.to_string(),
            args,
        }
    }

    pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Self {
        Expr::MethodCall {
            receiver: Box::new(receiver),
            method: method.to_string(),
            args,
        }
    }

    /// True when the value can never change after compilation.
    pub fn is_static(&self) -> bool {
        match self {
            Expr::Int { .. } | Expr::Float { .. } | Expr::Bool { .. } | Expr::Str { .. } => true,
            Expr::Template { parts } => parts.iter().all(|p| match p {
                TemplatePart::Text(_) => true,
                TemplatePart::Expr(e) => e.is_static(),
            }),
            Expr::Unary { operand, .. } => operand.is_static(),
            Expr::Binary { left, right, .. } => left.is_static() && right.is_static(),
            Expr::Array { elements } => elements.iter().all(Expr::is_static),
            _ => false,
        }
    }

    /// Literal text of a static string-like expression.
    pub fn static_text(&self) -> Option<String> {
        match self {
            Expr::Str { value } => Some(value.clone()),
            Expr::Int { value } => Some(value.to_string()),
            Expr::Float { value } => Some(value.to_string()),
            Expr::Bool { value } => Some(value.to_string()),
            Expr::Template { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Expr(e) => out.push_str(&e.static_text()?),
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }
}

impl Stmt {
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr { expr }
    }

    pub fn assign(target: &str, op: AssignOp, value: Expr) -> Self {
        Stmt::Assign {
            target: Place::var(target),
            op,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_component_from_json() {
        let value = json!({
            "name": "Counter",
            "state": [
                { "name": "count", "type": "int", "mutable": true, "init": { "kind": "int", "value": 0 } }
            ],
            "methods": [
                {
                    "name": "increment",
                    "body": [
                        { "kind": "assign", "target": { "kind": "var", "name": "count" }, "op": "+=", "value": { "kind": "int", "value": 1 } }
                    ]
                }
            ],
            "view": [
                {
                    "type": "element",
                    "tag": "button",
                    "attributes": [
                        { "name": "class", "value": "btn" },
                        { "name": "onclick", "value": { "kind": "ident", "name": "increment" } },
                        { "name": "title", "value": [ { "kind": "increment", "target": { "kind": "var", "name": "count" } } ] }
                    ],
                    "children": [ { "type": "expression", "expr": { "kind": "ident", "name": "count" } } ]
                }
            ]
        });

        let component: Component = serde_json::from_value(value).unwrap();
        assert_eq!(component.name, "Counter");
        assert!(component.is_field("count"));
        let ViewNode::Element(button) = &component.view[0] else {
            panic!("expected element");
        };
        assert!(matches!(button.attributes[0].value, AttributeValue::Static(_)));
        assert!(matches!(button.attributes[1].value, AttributeValue::Dynamic(Expr::Ident { .. })));
        assert!(matches!(button.attributes[2].value, AttributeValue::Handler(ref body) if body.len() == 1));
        assert_eq!(
            component.methods[0].body[0],
            Stmt::assign("count", AssignOp::Add, Expr::int(1))
        );
    }

    #[test]
    fn test_place_root() {
        let place = Place::Field {
            object: Box::new(Place::Element {
                target: Box::new(Place::var("items")),
                index: Box::new(Expr::int(0)),
            }),
            field: "done".to_string(),
        };
        assert_eq!(place.root(), "items");
    }

    #[test]
    fn test_static_detection() {
        assert!(Expr::str("a").is_static());
        assert!(!Expr::ident("a").is_static());
        let tpl = Expr::Template {
            parts: vec![TemplatePart::Text("n=".into()), TemplatePart::Expr(Expr::int(3))],
        };
        assert_eq!(tpl.static_text().as_deref(), Some("n=3"));
    }
}
