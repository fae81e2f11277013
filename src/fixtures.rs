//! Components shared by the test modules, built directly as trees.

use crate::ast::{
    AssignOp, AttributeNode, AttributeValue, BinaryOp, Component, ComponentNode, ConditionalNode,
    ElementNode, Expr, ExpressionNode, KeyedLoopNode, MemberRenderNode, Method, MethodParam, Param,
    Place, PropNode, RangeLoopNode, RouteEntry, RoutePlaceholderNode, RouteTable, SourceLocation,
    StateField, Stmt, TextNode, UnaryOp, ViewNode,
};
use crate::session::ComponentRegistry;

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDERS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn component(name: &str) -> Component {
    Component {
        name: name.to_string(),
        params: Vec::new(),
        state: Vec::new(),
        methods: Vec::new(),
        view: Vec::new(),
        style: None,
        data: Vec::new(),
        enums: Vec::new(),
        router: None,
        location: SourceLocation::default(),
    }
}

pub fn element(tag: &str, attributes: Vec<AttributeNode>, children: Vec<ViewNode>) -> ViewNode {
    ViewNode::Element(ElementNode {
        tag: tag.to_string(),
        attributes,
        children,
        location: SourceLocation::default(),
    })
}

pub fn static_attr(name: &str, value: &str) -> AttributeNode {
    AttributeNode {
        name: name.to_string(),
        value: AttributeValue::Static(value.to_string()),
    }
}

pub fn dynamic_attr(name: &str, value: Expr) -> AttributeNode {
    AttributeNode {
        name: name.to_string(),
        value: AttributeValue::Dynamic(value),
    }
}

pub fn text(value: &str) -> ViewNode {
    ViewNode::Text(TextNode {
        value: value.to_string(),
    })
}

pub fn expr(value: Expr) -> ViewNode {
    ViewNode::Expression(ExpressionNode { expr: value })
}

pub fn child(name: &str, props: Vec<PropNode>) -> ViewNode {
    ViewNode::Component(ComponentNode {
        name: name.to_string(),
        props,
        location: SourceLocation::default(),
    })
}

pub fn prop(name: &str, value: Expr) -> PropNode {
    PropNode {
        name: name.to_string(),
        value,
        reference: false,
    }
}

pub fn ref_prop(name: &str, var: &str) -> PropNode {
    PropNode {
        name: name.to_string(),
        value: Expr::ident(var),
        reference: true,
    }
}

pub fn member_render(member: &str) -> ViewNode {
    ViewNode::MemberRender(MemberRenderNode {
        member: member.to_string(),
        location: SourceLocation::default(),
    })
}

pub fn conditional(condition: Expr, then_branch: Vec<ViewNode>, else_branch: Vec<ViewNode>) -> ViewNode {
    ViewNode::Conditional(ConditionalNode {
        condition,
        then_branch,
        else_branch,
        location: SourceLocation::default(),
    })
}

pub fn range_loop(var: &str, start: Expr, end: Expr, body: Vec<ViewNode>) -> ViewNode {
    ViewNode::RangeLoop(RangeLoopNode {
        var: var.to_string(),
        start,
        end,
        body,
        location: SourceLocation::default(),
    })
}

pub fn keyed_loop(var: &str, source: Expr, body: Vec<ViewNode>) -> ViewNode {
    ViewNode::KeyedLoop(KeyedLoopNode {
        var: var.to_string(),
        source,
        key: Some(Expr::ident(var)),
        body,
        location: SourceLocation::default(),
    })
}

pub fn state(name: &str, ty: &str, init: Option<Expr>) -> StateField {
    StateField {
        name: name.to_string(),
        ty: ty.to_string(),
        mutable: true,
        public: false,
        init,
    }
}

pub fn param(name: &str, ty: &str) -> Param {
    Param {
        name: name.to_string(),
        ty: ty.to_string(),
        mutable: false,
        reference: false,
        callback: false,
        public: false,
        default: None,
    }
}

pub fn method(name: &str, params: &[&str], body: Vec<Stmt>) -> Method {
    Method {
        name: name.to_string(),
        params: params
            .iter()
            .map(|p| MethodParam {
                name: p.to_string(),
                ty: "auto".to_string(),
            })
            .collect(),
        returns: None,
        body,
    }
}

fn not(operand: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Not,
        operand: Box::new(operand),
    }
}

fn toggle(var: &str) -> Stmt {
    Stmt::Assign {
        target: Place::var(var),
        op: AssignOp::Set,
        value: not(Expr::ident(var)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// `<button onclick={increment}>{count}</button>`
pub fn counter() -> Component {
    let mut c = component("Counter");
    c.state.push(state("count", "int", Some(Expr::int(0))));
    c.methods.push(method(
        "increment",
        &[],
        vec![Stmt::assign("count", AssignOp::Add, Expr::int(1))],
    ));
    c.view = vec![element(
        "button",
        vec![dynamic_attr("onclick", Expr::ident("increment"))],
        vec![expr(Expr::ident("count"))],
    )];
    c
}

/// Slots: div 0, p 1, then-span 2, reset button 3, else-span 4, add button 5.
/// Region 0 is the `score >= 10` conditional.
pub fn scoreboard() -> Component {
    let mut c = component("Scoreboard");
    c.state.push(state("score", "int", Some(Expr::int(0))));
    c.methods.push(method(
        "add_point",
        &[],
        vec![Stmt::assign("score", AssignOp::Add, Expr::int(1))],
    ));
    c.methods.push(method(
        "reset",
        &[],
        vec![Stmt::assign("score", AssignOp::Set, Expr::int(0))],
    ));
    c.methods.push(method(
        "set_score",
        &["value"],
        vec![Stmt::assign("score", AssignOp::Set, Expr::ident("value"))],
    ));
    c.view = vec![element(
        "div",
        vec![],
        vec![
            element("p", vec![], vec![expr(Expr::ident("score"))]),
            conditional(
                Expr::binary(BinaryOp::Ge, Expr::ident("score"), Expr::int(10)),
                vec![
                    element("span", vec![], vec![text("Winner")]),
                    element(
                        "button",
                        vec![dynamic_attr("onclick", Expr::ident("reset"))],
                        vec![text("Reset")],
                    ),
                ],
                vec![element("span", vec![], vec![text("Keep going")])],
            ),
            element(
                "button",
                vec![dynamic_attr("onclick", Expr::ident("add_point"))],
                vec![text("+")],
            ),
        ],
    )];
    c
}

/// Slots: ul 0, count p 1, selected p 2. Region 0 is keyed over `items`.
pub fn todos() -> Component {
    let mut c = component("Todos");
    c.state.push(state("items", "string[]", Some(Expr::Array { elements: vec![] })));
    c.state.push(state("selected", "string", Some(Expr::str(""))));
    c.methods.push(method(
        "add_item",
        &["text"],
        vec![Stmt::expr(Expr::method_call(
            Expr::ident("items"),
            "push",
            vec![Expr::ident("text")],
        ))],
    ));
    c.methods.push(method(
        "add_counted",
        &["text"],
        vec![Stmt::Let {
            name: "count".to_string(),
            init: Some(Expr::method_call(
                Expr::ident("items"),
                "push",
                vec![Expr::ident("text")],
            )),
        }],
    ));
    c.methods.push(method(
        "reset_items",
        &[],
        vec![Stmt::assign("items", AssignOp::Set, Expr::Array { elements: vec![] })],
    ));
    c.methods.push(method(
        "select",
        &["item"],
        vec![Stmt::assign("selected", AssignOp::Set, Expr::ident("item"))],
    ));
    c.view = vec![
        element(
            "ul",
            vec![],
            vec![keyed_loop(
                "item",
                Expr::ident("items"),
                vec![element(
                    "li",
                    vec![dynamic_attr(
                        "onclick",
                        Expr::call("select", vec![Expr::ident("item")]),
                    )],
                    vec![expr(Expr::ident("item"))],
                )],
            )],
        ),
        element(
            "p",
            vec![],
            vec![expr(Expr::method_call(Expr::ident("items"), "len", vec![]))],
        ),
        element("p", vec![], vec![expr(Expr::ident("selected"))]),
    ];
    c
}

/// `<div>{for i in 0..rows}<span>{i}</span>{/for}</div>`
pub fn grid() -> Component {
    let mut c = component("Grid");
    c.state.push(state("rows", "int", Some(Expr::int(2))));
    c.methods.push(method(
        "set_rows",
        &["n"],
        vec![Stmt::assign("rows", AssignOp::Set, Expr::ident("n"))],
    ));
    c.view = vec![element(
        "div",
        vec![],
        vec![range_loop(
            "i",
            Expr::int(0),
            Expr::ident("rows"),
            vec![element("span", vec![], vec![expr(Expr::ident("i"))])],
        )],
    )];
    c
}

/// Takes `&mut value` from its owner.
pub fn stepper() -> Component {
    let mut c = component("Stepper");
    let mut value = param("value", "int");
    value.mutable = true;
    value.reference = true;
    c.params.push(value);
    c.methods.push(method(
        "bump",
        &[],
        vec![Stmt::assign("value", AssignOp::Add, Expr::int(1))],
    ));
    c.view = vec![element(
        "button",
        vec![dynamic_attr("onclick", Expr::ident("bump"))],
        vec![expr(Expr::ident("value"))],
    )];
    c
}

/// Exposes `pub mut score`.
pub fn player() -> Component {
    let mut c = component("Player");
    let mut score = state("score", "int", Some(Expr::int(0)));
    score.public = true;
    c.state.push(score);
    c.methods.push(method(
        "score_point",
        &[],
        vec![Stmt::assign("score", AssignOp::Add, Expr::int(1))],
    ));
    c.view = vec![element("span", vec![], vec![expr(Expr::ident("score"))])];
    c
}

/// Slots: div 0, total p 1, score h2 2, reset button 3. Child 0 is the
/// stepper bound to `total`; `player` is a default-constructed member.
pub fn dashboard() -> Component {
    let mut c = component("Dashboard");
    c.state.push(state("total", "int", Some(Expr::int(5))));
    c.state.push(state("player", "Player", None));
    c.methods.push(method(
        "reset_total",
        &[],
        vec![Stmt::assign("total", AssignOp::Set, Expr::int(0))],
    ));
    c.methods.push(method(
        "reward",
        &[],
        vec![Stmt::expr(Expr::method_call(
            Expr::ident("player"),
            "score_point",
            vec![],
        ))],
    ));
    c.view = vec![element(
        "div",
        vec![],
        vec![
            child("Stepper", vec![ref_prop("value", "total")]),
            element("p", vec![], vec![expr(Expr::ident("total"))]),
            element(
                "h2",
                vec![],
                vec![expr(Expr::member(Expr::ident("player"), "score"))],
            ),
            member_render("player"),
            element(
                "button",
                vec![dynamic_attr("onclick", Expr::ident("reset_total"))],
                vec![text("Reset")],
            ),
        ],
    )];
    c
}

/// Invokes its `onSave` callback prop.
pub fn toolbar() -> Component {
    let mut c = component("Toolbar");
    let mut on_save = param("onSave", "callback");
    on_save.callback = true;
    c.params.push(on_save);
    c.view = vec![element(
        "button",
        vec![dynamic_attr("onclick", Expr::ident("onSave"))],
        vec![text("Save")],
    )];
    c
}

/// Slots: saves p 0.
pub fn editor() -> Component {
    let mut c = component("Editor");
    c.state.push(state("saves", "int", Some(Expr::int(0))));
    c.methods.push(method(
        "save",
        &[],
        vec![Stmt::assign("saves", AssignOp::Add, Expr::int(1))],
    ));
    c.view = vec![
        child("Toolbar", vec![prop("onSave", Expr::ident("save"))]),
        element("p", vec![], vec![expr(Expr::ident("saves"))]),
    ];
    c
}

/// Region 0 (`open`) holds a heading, loose text, a nested region 1
/// (`detail`) and a child `Player`.
pub fn panel() -> Component {
    let mut c = component("Panel");
    c.state.push(state("open", "bool", Some(Expr::boolean(true))));
    c.state.push(state("detail", "bool", Some(Expr::boolean(true))));
    c.methods.push(method("toggle", &[], vec![toggle("open")]));
    c.methods.push(method("toggle_detail", &[], vec![toggle("detail")]));
    c.methods.push(method(
        "refresh",
        &[],
        vec![Stmt::assign("open", AssignOp::Set, Expr::ident("open"))],
    ));
    c.view = vec![conditional(
        Expr::ident("open"),
        vec![
            element("h3", vec![], vec![text("Title")]),
            text("Intro"),
            conditional(
                Expr::ident("detail"),
                vec![element("p", vec![], vec![text("Detail")])],
                vec![],
            ),
            child("Player", vec![]),
        ],
        vec![],
    )];
    c
}

/// Region 0 builds Toolbars wired to `save`; region 1 passes the item
/// index to `pick`.
pub fn shelf() -> Component {
    let mut c = component("Shelf");
    c.state.push(state("saves", "int", Some(Expr::int(0))));
    c.state.push(state("picked", "int", Some(Expr::int(-1))));
    c.methods.push(method(
        "save",
        &[],
        vec![Stmt::assign("saves", AssignOp::Add, Expr::int(1))],
    ));
    c.methods.push(method(
        "pick",
        &["index"],
        vec![Stmt::assign("picked", AssignOp::Set, Expr::ident("index"))],
    ));
    c.view = vec![
        element(
            "div",
            vec![],
            vec![range_loop(
                "i",
                Expr::int(0),
                Expr::int(2),
                vec![child("Toolbar", vec![prop("onSave", Expr::ident("save"))])],
            )],
        ),
        element(
            "div",
            vec![],
            vec![range_loop(
                "j",
                Expr::int(0),
                Expr::int(3),
                vec![child(
                    "Toolbar",
                    vec![prop("onSave", Expr::call("pick", vec![Expr::ident("j")]))],
                )],
            )],
        ),
        element("p", vec![], vec![expr(Expr::ident("saves"))]),
        element("p", vec![], vec![expr(Expr::ident("picked"))]),
    ];
    c
}

/// Region 0 builds two Steppers bound to `total`.
pub fn ledger() -> Component {
    let mut c = component("Ledger");
    c.state.push(state("total", "int", Some(Expr::int(5))));
    c.view = vec![
        element(
            "div",
            vec![],
            vec![range_loop(
                "i",
                Expr::int(0),
                Expr::int(2),
                vec![child("Stepper", vec![ref_prop("value", "total")])],
            )],
        ),
        element("p", vec![], vec![expr(Expr::ident("total"))]),
    ];
    c
}

/// Counts frames and keeps the last elapsed time.
pub fn clock() -> Component {
    let mut c = component("Clock");
    c.state.push(state("frames", "int", Some(Expr::int(0))));
    c.state.push(state("last", "float", Some(Expr::Float { value: 0.0 })));
    c.methods.push(method(
        "tick",
        &["dt"],
        vec![
            Stmt::assign("frames", AssignOp::Add, Expr::int(1)),
            Stmt::assign("last", AssignOp::Set, Expr::ident("dt")),
        ],
    ));
    c.view = vec![element("p", vec![], vec![expr(Expr::ident("frames"))])];
    c
}

/// Child 0 is a Clock; region 0 builds `count` more.
pub fn wall() -> Component {
    let mut c = component("Wall");
    c.state.push(state("count", "int", Some(Expr::int(2))));
    c.view = vec![
        child("Clock", vec![]),
        element(
            "div",
            vec![],
            vec![range_loop(
                "i",
                Expr::int(0),
                Expr::ident("count"),
                vec![child("Clock", vec![])],
            )],
        ),
    ];
    c
}

/// Holds a Clock member and renders it.
pub fn tower() -> Component {
    let mut c = component("Tower");
    c.state.push(state("clock", "Clock", None));
    c.view = vec![element("div", vec![], vec![member_render("clock")])];
    c
}

pub fn home() -> Component {
    let mut c = component("Home");
    c.view = vec![element("h1", vec![], vec![text("Home")])];
    c
}

pub fn about() -> Component {
    let mut c = component("About");
    c.view = vec![element("h1", vec![], vec![text("About")])];
    c
}

/// `<nav/>` followed by the route placeholder; `/` is the default route.
pub fn app() -> Component {
    let mut c = component("App");
    c.router = Some(RouteTable {
        routes: vec![
            RouteEntry {
                path: "/".to_string(),
                component: "Home".to_string(),
                props: Vec::new(),
                default: true,
            },
            RouteEntry {
                path: "/about".to_string(),
                component: "About".to_string(),
                props: Vec::new(),
                default: false,
            },
        ],
    });
    c.view = vec![
        element("nav", vec![], vec![text("Menu")]),
        ViewNode::RoutePlaceholder(RoutePlaceholderNode::default()),
    ];
    c
}

pub fn all() -> Vec<Component> {
    vec![
        counter(),
        scoreboard(),
        todos(),
        grid(),
        stepper(),
        player(),
        dashboard(),
        toolbar(),
        editor(),
        shelf(),
        ledger(),
        clock(),
        wall(),
        tower(),
        panel(),
        home(),
        about(),
        app(),
    ]
}

pub fn registry() -> ComponentRegistry {
    ComponentRegistry::from_components(&all())
}
