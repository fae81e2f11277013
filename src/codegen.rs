//! Codegen module for the reactive compiler
//!
//! Renders a `CompiledComponent` into one JavaScript class. The class talks to
//! two collaborators: `rt` (tree primitives, imported from the runtime module)
//! and `this.ctx` (dispatch tables and the flush depth counter, owned by the
//! root instance and passed down to every child).

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

use crate::aggregate::UpdateProcedure;
use crate::ast::{
    Expr, Place, Stmt, TemplatePart, UnaryOp, INIT_METHOD, MOUNT_METHOD, TICK_METHOD,
};
use crate::compile::CompiledComponent;
use crate::epilogue::{EpilogueStep, MethodPlan};
use crate::events::EventKind;
use crate::regions::{
    BindingKind, Branch, BranchOwnership, ChildRef, ConditionalRegion, ContentKind, CreateOp,
    NodeRef, Parent, PropInit, RegionId, RepetitionForm, RepetitionRegion, SlotId,
    StructuralRegion,
};
use crate::wiring::WireSource;
use crate::write_set::statement_append;

lazy_static! {
    static ref JS_IDENT: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

pub fn emit_component(plan: &CompiledComponent, runtime_module: &str) -> String {
    let mut emitter = Emitter {
        plan,
        w: JsWriter::default(),
        item_region: None,
    };
    emitter.emit(runtime_module);
    emitter.w.out
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct JsWriter {
    out: String,
    indent: usize,
}

impl JsWriter {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

fn escape_template_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

/// The user's `tick` is renamed so the generated `tick(dt)` can wrap it.
const USER_TICK: &str = "_user_tick";

fn method_ident(name: &str) -> &str {
    if name == TICK_METHOD {
        USER_TICK
    } else {
        name
    }
}

fn js_key(name: &str) -> String {
    if JS_IDENT.is_match(name) {
        name.to_string()
    } else {
        format!("\"{}\"", escape_js_string(name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves identifiers: locals stay bare, fields go through `this`, and
/// reference params through their `.value` accessor.
struct JsScope<'a> {
    plan: &'a CompiledComponent,
    locals: Vec<String>,
}

impl<'a> JsScope<'a> {
    fn new(plan: &'a CompiledComponent, locals: impl IntoIterator<Item = String>) -> Self {
        Self {
            plan,
            locals: locals.into_iter().collect(),
        }
    }

    fn ident(&self, name: &str) -> String {
        if self.locals.iter().any(|l| l == name) {
            return name.to_string();
        }
        if let Some(param) = self.plan.param(name) {
            return if param.reference {
                format!("this.{}.value", name)
            } else {
                format!("this.{}", name)
            };
        }
        if self.plan.state.iter().any(|s| s.name == name) {
            return format!("this.{}", name);
        }
        name.to_string()
    }

    fn args(&self, args: &[Expr]) -> String {
        args.iter()
            .map(|a| self.expr(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Int { value } => value.to_string(),
            Expr::Float { value } => format!("{:?}", value),
            Expr::Bool { value } => value.to_string(),
            Expr::Str { value } => format!("\"{}\"", escape_js_string(value)),
            Expr::Template { parts } => {
                let mut out = String::from("`");
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(&escape_template_text(t)),
                        TemplatePart::Expr(e) => {
                            out.push_str("${");
                            out.push_str(&self.expr(e));
                            out.push('}');
                        }
                    }
                }
                out.push('`');
                out
            }
            Expr::Ident { name } => self.ident(name),
            Expr::Member { object, field } => format!("{}.{}", self.expr(object), field),
            Expr::Index { target, index } => {
                format!("{}[{}]", self.expr(target), self.expr(index))
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => format!("(-{})", self.expr(operand)),
                UnaryOp::Not => format!("(!{})", self.expr(operand)),
            },
            Expr::Binary { op, left, right } => {
                format!("({} {} {})", self.expr(left), op.as_str(), self.expr(right))
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => format!(
                "({} ? {} : {})",
                self.expr(condition),
                self.expr(then),
                self.expr(otherwise)
            ),
            Expr::Call { callee, args } => {
                if self.plan.method(callee).is_some() {
                    format!("this.{}({})", method_ident(callee), self.args(args))
                } else if self.plan.param(callee).map(|p| p.callback).unwrap_or(false) {
                    format!("this.{}?.({})", callee, self.args(args))
                } else {
                    format!("{}({})", callee, self.args(args))
                }
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.expr(receiver);
                match method.as_str() {
                    "len" | "size" | "length" if args.is_empty() => format!("{}.length", receiver),
                    "append" => format!("{}.push({})", receiver, self.args(args)),
                    _ => format!("{}.{}({})", receiver, method, self.args(args)),
                }
            }
            Expr::Array { elements } => format!("[{}]", self.args(elements)),
        }
    }

    fn place(&self, place: &Place) -> String {
        match place {
            Place::Var { name } => self.ident(name),
            Place::Field { object, field } => format!("{}.{}", self.place(object), field),
            Place::Element { target, index } => {
                format!("{}[{}]", self.place(target), self.expr(index))
            }
        }
    }

    fn is_method(&self, name: &str) -> bool {
        self.plan.method(name).is_some() && !self.locals.iter().any(|l| l == name)
    }

    /// Method callbacks become closures so they run when the child calls
    /// them; loop variables are captured by the closure.
    fn props(&self, props: &[PropInit]) -> String {
        let entries: Vec<String> = props
            .iter()
            .map(|p| {
                let callback = p.method_callback(|name| self.is_method(name));
                let value = match (callback, &p.value, p.reference) {
                    (Some((method, args)), _, _) => {
                        format!("() => this.{}({})", method_ident(method), self.args(args))
                    }
                    (None, Expr::Ident { .. }, true) => {
                        let target = self.expr(&p.value);
                        format!("rt.ref(() => {}, (v) => {{ {} = v; }})", target, target)
                    }
                    _ => self.expr(&p.value),
                };
                format!("{}: {}", js_key(&p.name), value)
            })
            .collect();
        format!("{{ {} }}", entries.join(", "))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS
// ═══════════════════════════════════════════════════════════════════════════════

struct Emitter<'a> {
    plan: &'a CompiledComponent,
    w: JsWriter,
    /// The repetition whose item template is being emitted.
    item_region: Option<RegionId>,
}

impl<'a> Emitter<'a> {
    fn region_prefix(&self, id: RegionId) -> String {
        match self.plan.view.region(id) {
            Some(StructuralRegion::Repetition(_)) => format!("_loop_{}", id.0),
            _ => format!("_if_{}", id.0),
        }
    }

    fn parent_js(&self, parent: Parent) -> (String, String) {
        match parent {
            Parent::Mount => ("parent".to_string(), "before".to_string()),
            Parent::Node(NodeRef::Slot(s)) => (format!("this.el[{}]", s.0), "null".to_string()),
            Parent::Node(NodeRef::Local(k)) => (format!("n{}", k), "null".to_string()),
            Parent::Region(r) => {
                let prefix = self.region_prefix(r);
                (
                    format!("this.{}_parent", prefix),
                    format!("this.{}_anchor", prefix),
                )
            }
        }
    }

    fn mask_kinds(&self, slot: SlotId) -> Vec<EventKind> {
        self.plan
            .dispatch
            .iter()
            .filter(|d| d.mask.contains(slot))
            .map(|d| d.kind)
            .collect()
    }

    fn emit(&mut self, runtime_module: &str) {
        let plan = self.plan;
        self.w.line(format!(
            "import {{ rt }} from \"{}\";",
            escape_js_string(runtime_module)
        ));
        self.w.blank();
        self.w.open(format!("export class {} {{", plan.name));
        for dispatch in &plan.dispatch {
            self.w.line(format!(
                "static {}_MASK = {};",
                dispatch.kind.name().to_uppercase(),
                dispatch.mask.to_js_literal()
            ));
        }
        self.w.blank();
        self.emit_constructor();
        for procedure in &plan.procedures {
            self.emit_procedure(procedure);
        }
        for refresh in &plan.wiring.refreshes {
            self.w.open(format!("{}() {{", refresh.name));
            self.emit_steps(&refresh.steps);
            self.w.close("}");
        }
        for method in &plan.methods {
            self.emit_method(method);
        }
        self.emit_tick();
        self.emit_render();
        for region in &plan.view.regions {
            match region {
                StructuralRegion::Conditional(c) => self.emit_conditional(c),
                StructuralRegion::Repetition(r) => self.emit_repetition(r),
            }
        }
        self.emit_destroy_item();
        self.emit_rebind();
        for dispatch in &plan.dispatch {
            self.w.open(format!("_dispatch_{}(i, event) {{", dispatch.kind));
            self.w.line("this.ctx.begin();");
            self.w.open("try {");
            self.w.open("switch (i) {");
            let scope = JsScope::new(plan, ["event".to_string()]);
            for case in &dispatch.cases {
                let args = if case.call.pass_event {
                    "event".to_string()
                } else {
                    scope.args(&case.call.args)
                };
                self.w.line(format!(
                    "case {}: this.{}({}); break;",
                    case.slot.0,
                    method_ident(&case.call.method),
                    args
                ));
            }
            self.w.close("}");
            self.w.close("} finally {");
            self.w.indent += 1;
            self.w.line("this.ctx.end();");
            self.w.close("}");
            self.w.close("}");
        }
        self.emit_router();
        self.emit_remove_view();
        self.w.close("}");
    }

    fn emit_constructor(&mut self) {
        let plan = self.plan;
        self.w.open("constructor(ctx, props = {}) {");
        self.w.line("this.ctx = ctx;");
        self.w.line(format!(
            "this.el = new Array({}).fill(null);",
            plan.slot_count()
        ));
        self.w.line("this._roots = [];");
        self.w.line("this._root_views = [];");
        let scope = JsScope::new(plan, Vec::<String>::new());
        for param in &plan.params {
            let default = param
                .default
                .as_ref()
                .map(|d| scope.expr(d))
                .unwrap_or_else(|| "null".to_string());
            self.w.line(format!(
                "this.{} = props.{} ?? {};",
                param.name, param.name, default
            ));
        }
        let notified: BTreeSet<String> = plan
            .methods
            .iter()
            .flat_map(|m| m.epilogue.iter())
            .chain(plan.wiring.wires.iter().flat_map(|w| w.steps.iter()))
            .filter_map(|s| match s {
                EpilogueStep::NotifyParent { callback, .. } => Some(callback.clone()),
                _ => None,
            })
            .collect();
        for callback in &notified {
            self.w
                .line(format!("this.{} = props.{} ?? null;", callback, callback));
        }
        for state in &plan.state {
            let init = state
                .init
                .as_ref()
                .map(|e| scope.expr(e))
                .unwrap_or_else(|| "null".to_string());
            self.w.line(format!("this.{} = {};", state.name, init));
        }
        for region in &plan.view.regions {
            let prefix = self.region_prefix(region.id());
            self.w.line(format!("this.{}_parent = null;", prefix));
            self.w.line(format!("this.{}_anchor = null;", prefix));
            match region {
                StructuralRegion::Conditional(_) => {
                    self.w.line(format!("this.{}_state = null;", prefix))
                }
                StructuralRegion::Repetition(_) => {
                    self.w.line(format!("this.{}_items = [];", prefix))
                }
            }
        }
        for child in &plan.view.children {
            self.w.line(format!("this._child_{} = null;", child.id.0));
        }
        if plan.router.is_some() {
            self.w.line("this._route_current = null;");
            self.w.line("this._route_child = null;");
            self.w.line("this._route_parent = null;");
            self.w.line("this._route_anchor = null;");
        }
        if plan.method(INIT_METHOD).is_some() {
            self.w.line(format!("this.{}();", INIT_METHOD));
        }
        self.w.close("}");
        self.w.blank();
    }

    fn guard_js(&self, region: RegionId, branch: Branch) -> String {
        format!(
            "if (this._if_{}_state !== {}) return;",
            region.0,
            branch == Branch::Then
        )
    }

    fn emit_procedure(&mut self, procedure: &UpdateProcedure) {
        let scope = JsScope::new(self.plan, Vec::<String>::new());
        self.w.open(format!("{}() {{", procedure.name));
        if let Some(owner) = procedure.guard {
            let guard = self.guard_js(owner.region, owner.branch);
            self.w.line(guard);
        }
        self.w.line(format!("const node = this.el[{}];", procedure.slot.0));
        self.w.line("if (node === null) return;");
        let value = scope.expr(&procedure.source);
        match &procedure.kind {
            BindingKind::Attribute { name } => self.w.line(format!(
                "rt.setAttr(node, \"{}\", {});",
                escape_js_string(name),
                value
            )),
            BindingKind::Property { name } => self.w.line(format!(
                "rt.setProp(node, \"{}\", {});",
                escape_js_string(name),
                value
            )),
            BindingKind::Text => self.w.line(format!("rt.setText(node, String({}));", value)),
            BindingKind::Markup => self.w.line(format!("rt.setHtml(node, String({}));", value)),
        }
        self.w.close("}");
    }

    fn emit_steps(&mut self, steps: &[EpilogueStep]) {
        for step in steps {
            match step {
                EpilogueStep::Update { procedure } => {
                    if let Some(p) = self.plan.procedure(*procedure) {
                        self.w.line(format!("this.{}();", p.name));
                    }
                }
                EpilogueStep::RefreshChild { child, param } => self.w.line(format!(
                    "if (this._child_{} !== null) this._child_{}._update_{}();",
                    child.0, child.0, param
                )),
                EpilogueStep::SyncConditional { region } => {
                    self.w.line(format!("this._sync_if_{}();", region.0))
                }
                EpilogueStep::SyncRepetition { region } => {
                    self.w.line(format!("this._sync_loop_{}();", region.0))
                }
                EpilogueStep::NotifyParent { callback, .. } => {
                    self.w.line(format!("if (this.{}) this.{}();", callback, callback))
                }
            }
        }
    }

    fn emit_method(&mut self, method: &MethodPlan) {
        let mut scope = JsScope::new(self.plan, method.params.clone());
        self.w.open(format!(
            "{}({}) {{",
            method_ident(&method.name),
            method.params.join(", ")
        ));
        let wrap = !method.epilogue.is_empty() && contains_return(&method.body);
        if wrap {
            self.w.open("try {");
        }
        self.emit_block(&method.body, &mut scope, method);
        if wrap {
            self.w.close("} finally {");
            self.w.indent += 1;
            self.emit_steps(&method.epilogue);
            self.w.close("}");
        } else {
            self.emit_steps(&method.epilogue);
        }
        self.w.close("}");
    }

    fn emit_block(&mut self, body: &[Stmt], scope: &mut JsScope<'a>, method: &MethodPlan) {
        let mark = scope.locals.len();
        for stmt in body {
            self.emit_stmt(stmt, scope, method);
        }
        scope.locals.truncate(mark);
    }

    fn emit_stmt(&mut self, stmt: &Stmt, scope: &mut JsScope<'a>, method: &MethodPlan) {
        match stmt {
            Stmt::Let { name, init } => {
                let value = init
                    .as_ref()
                    .map(|e| scope.expr(e))
                    .unwrap_or_else(|| "null".to_string());
                self.w.line(format!("let {} = {};", name, value));
                scope.locals.push(name.clone());
            }
            Stmt::Assign { target, op, value } => self.w.line(format!(
                "{} {} {};",
                scope.place(target),
                op.as_str(),
                scope.expr(value)
            )),
            Stmt::Increment { target } => self.w.line(format!("{}++;", scope.place(target))),
            Stmt::Decrement { target } => self.w.line(format!("{}--;", scope.place(target))),
            Stmt::Expr { expr } => {
                self.w.line(format!("{};", scope.expr(expr)));
                let appended = statement_append(expr)
                    .filter(|var| !scope.locals.iter().any(|l| l == var))
                    .and_then(|var| method.append_patch(var));
                if let Some(patch) = appended {
                    for region in &patch.regions {
                        self.w.line(format!("this._append_loop_{}();", region.0));
                    }
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.w.open(format!("if ({}) {{", scope.expr(condition)));
                self.emit_block(then_branch, scope, method);
                if !else_branch.is_empty() {
                    self.w.close("} else {");
                    self.w.indent += 1;
                    self.emit_block(else_branch, scope, method);
                }
                self.w.close("}");
            }
            Stmt::ForRange {
                var,
                start,
                end,
                body,
            } => {
                self.w.open(format!(
                    "for (let {v} = {}; {v} < {}; {v}++) {{",
                    scope.expr(start),
                    scope.expr(end),
                    v = var
                ));
                scope.locals.push(var.clone());
                self.emit_block(body, scope, method);
                scope.locals.pop();
                self.w.close("}");
            }
            Stmt::ForEach { var, source, body } => {
                self.w
                    .open(format!("for (const {} of {}) {{", var, scope.expr(source)));
                scope.locals.push(var.clone());
                self.emit_block(body, scope, method);
                scope.locals.pop();
                self.w.close("}");
            }
            Stmt::Block { body } => {
                self.w.open("{");
                self.emit_block(body, scope, method);
                self.w.close("}");
            }
            Stmt::Return { value } => match value {
                Some(v) => self.w.line(format!("return {};", scope.expr(v))),
                None => self.w.line("return;"),
            },
        }
    }

    fn emit_tick(&mut self) {
        let plan = self.plan;
        let Some(tick) = &plan.tick else {
            return;
        };
        self.w.open("tick(dt) {");
        self.w.line("this.ctx.begin();");
        self.w.open("try {");
        if tick.user {
            let dt = if tick.takes_dt { "dt" } else { "" };
            self.w.line(format!("this.{}({});", USER_TICK, dt));
        }
        for child in &tick.children {
            self.w.line(format!(
                "if (this._child_{c} !== null) this._child_{c}.tick(dt);",
                c = child.0
            ));
        }
        for member in &tick.members {
            if member.collection {
                self.w
                    .line(format!("for (const m of this.{} ?? []) m.tick(dt);", member.name));
            } else {
                self.w.line(format!("this.{}?.tick(dt);", member.name));
            }
        }
        for region in &tick.item_regions {
            self.w.line(format!(
                "for (const item of this._loop_{}_items) for (const child of item.children) child.tick?.(dt);",
                region.0
            ));
        }
        if tick.route {
            self.w
                .line("if (this._route_child !== null) this._route_child.tick?.(dt);");
        }
        self.w.close("} finally {");
        self.w.indent += 1;
        self.w.line("this.ctx.end();");
        self.w.close("}");
        self.w.close("}");
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Creation
    // ───────────────────────────────────────────────────────────────────────────

    fn emit_render(&mut self) {
        let plan = self.plan;
        self.w.open("render(parent, before = null) {");
        self.w.line("this.ctx.begin();");
        let mut scope = JsScope::new(plan, Vec::<String>::new());
        self.emit_ops(&plan.view.mount_ops, &mut scope, OpSite::Root);
        self.w.line("this._rebind();");
        self.w.line("this.ctx.end();");
        if plan.method(MOUNT_METHOD).is_some() {
            self.w.line(format!("this.{}();", MOUNT_METHOD));
        }
        self.w.close("}");
    }

    fn emit_ops(&mut self, ops: &[CreateOp], scope: &mut JsScope<'a>, site: OpSite) {
        for op in ops {
            self.emit_op(op, scope, site);
        }
    }

    /// Records a node created directly under the mount parent or an item's region.
    fn track_top(&mut self, parent: Parent, site: OpSite, node: &str, view: bool) {
        let list = match (site, parent) {
            (OpSite::Root, Parent::Mount) if view => "this._root_views",
            (OpSite::Root, Parent::Mount) => "this._roots",
            (OpSite::Item, Parent::Region(_)) if view => "item.views",
            (OpSite::Item, Parent::Region(_)) => "item.nodes",
            _ => return,
        };
        self.w.line(format!("{}.push({});", list, node));
    }

    fn emit_op(&mut self, op: &CreateOp, scope: &mut JsScope<'a>, site: OpSite) {
        match op {
            CreateOp::Element {
                node,
                tag,
                parent,
                attributes,
                content,
                handlers,
            } => {
                let target = match node {
                    NodeRef::Slot(s) => {
                        let t = format!("this.el[{}]", s.0);
                        self.w.line(format!(
                            "{} = rt.create(\"{}\");",
                            t,
                            escape_js_string(tag)
                        ));
                        t
                    }
                    NodeRef::Local(k) => {
                        self.w.line(format!(
                            "const n{} = rt.create(\"{}\");",
                            k,
                            escape_js_string(tag)
                        ));
                        format!("n{}", k)
                    }
                };
                for attr in attributes {
                    let call = if attr.property { "setProp" } else { "setAttr" };
                    self.w.line(format!(
                        "rt.{}({}, \"{}\", {});",
                        call,
                        target,
                        escape_js_string(&attr.name),
                        scope.expr(&attr.value)
                    ));
                }
                if let Some(content) = content {
                    let call = match content.kind {
                        ContentKind::Text => "setText",
                        ContentKind::Markup => "setHtml",
                    };
                    self.w.line(format!(
                        "rt.{}({}, String({}));",
                        call,
                        target,
                        scope.expr(&content.value)
                    ));
                }
                for handler in handlers {
                    let args = scope.args(&handler.call.args);
                    let (params, args) = if handler.call.pass_event {
                        ("event", "event".to_string())
                    } else {
                        ("", args)
                    };
                    self.w.line(format!(
                        "this.ctx.dispatch.{}.set({}, ({}) => {{ this.ctx.begin(); try {{ this.{}({}); }} finally {{ this.ctx.end(); }} }});",
                        handler.kind,
                        target,
                        params,
                        method_ident(&handler.call.method),
                        args
                    ));
                    self.w.line(format!(
                        "item.handlers.push([\"{}\", {}]);",
                        handler.kind, target
                    ));
                }
                let (p, b) = self.parent_js(*parent);
                self.w.line(format!("rt.insert({}, {}, {});", p, target, b));
                self.track_top(*parent, site, &target, false);
            }
            CreateOp::Text {
                node,
                parent,
                value,
            } => {
                let (p, b) = self.parent_js(*parent);
                let value = scope.expr(value);
                let target = match node {
                    Some(NodeRef::Slot(s)) => {
                        let t = format!("this.el[{}]", s.0);
                        self.w.line(format!("{} = rt.text(String({}));", t, value));
                        t
                    }
                    Some(NodeRef::Local(k)) => {
                        self.w
                            .line(format!("const n{} = rt.text(String({}));", k, value));
                        format!("n{}", k)
                    }
                    None => {
                        // Unnamed text gets its own block so sibling texts do not clash.
                        self.w.open("{");
                        self.w.line(format!("const t = rt.text(String({}));", value));
                        "t".to_string()
                    }
                };
                self.w.line(format!("rt.insert({}, {}, {});", p, target, b));
                self.track_top(*parent, site, &target, false);
                if node.is_none() {
                    self.w.close("}");
                }
            }
            CreateOp::Child {
                child,
                component,
                props,
                parent,
            } => {
                let (p, b) = self.parent_js(*parent);
                let props = scope.props(props);
                match child {
                    ChildRef::Field(id) => {
                        let target = format!("this._child_{}", id.0);
                        self.w.line(format!(
                            "{} = new {}(this.ctx, {});",
                            target, component, props
                        ));
                        self.w.line(format!("{}.render({}, {});", target, p, b));
                        self.track_top(*parent, site, &target, true);
                    }
                    ChildRef::Item => {
                        self.w.open("{");
                        self.w.line(format!(
                            "const child = new {}(this.ctx, {});",
                            component, props
                        ));
                        self.emit_item_wires(component);
                        self.w.line(format!("child.render({}, {});", p, b));
                        self.w.line("item.children.push(child);");
                        self.w.close("}");
                    }
                }
            }
            CreateOp::MemberRender { member, parent } => {
                let (p, b) = self.parent_js(*parent);
                let target = scope.expr(member);
                self.w.line(format!("{}.render({}, {});", target, p, b));
                self.track_top(*parent, site, &target, true);
            }
            CreateOp::Region { region, parent } => {
                let prefix = self.region_prefix(*region);
                let (p, b) = self.parent_js(*parent);
                self.w.line(format!("this.{}_parent = {};", prefix, p));
                self.w.line(format!("this.{}_anchor = rt.anchor();", prefix));
                self.w.line(format!(
                    "rt.insert({}, this.{}_anchor, {});",
                    p, prefix, b
                ));
                self.track_top(*parent, site, &format!("this.{}_anchor", prefix), false);
                match self.plan.view.region(*region) {
                    Some(StructuralRegion::Repetition(_)) => {
                        self.w.line(format!("this._sync_loop_{}();", region.0))
                    }
                    _ => self.w.line(format!("this._sync_if_{}();", region.0)),
                }
            }
            CreateOp::RouteAnchor { parent } => {
                let (p, b) = self.parent_js(*parent);
                self.w.line(format!("this._route_parent = {};", p));
                self.w.line("this._route_anchor = rt.anchor();");
                self.w
                    .line(format!("rt.insert({}, this._route_anchor, {});", p, b));
                self.track_top(*parent, site, "this._route_anchor", false);
                self.w.line("this._sync_route();");
            }
            CreateOp::Conditional {
                condition,
                then_ops,
                else_ops,
            } => {
                self.w.open(format!("if ({}) {{", scope.expr(condition)));
                self.emit_ops(then_ops, scope, site);
                if !else_ops.is_empty() {
                    self.w.close("} else {");
                    self.w.indent += 1;
                    self.emit_ops(else_ops, scope, site);
                }
                self.w.close("}");
            }
            CreateOp::Range {
                var,
                start,
                end,
                ops,
            } => {
                self.w.open(format!(
                    "for (let {v} = {}; {v} < {}; {v}++) {{",
                    scope.expr(start),
                    scope.expr(end),
                    v = var
                ));
                scope.locals.push(var.clone());
                self.emit_ops(ops, scope, site);
                scope.locals.pop();
                self.w.close("}");
            }
            CreateOp::Each { var, source, ops } => {
                self.w
                    .open(format!("for (const {} of {}) {{", var, scope.expr(source)));
                scope.locals.push(var.clone());
                self.emit_ops(ops, scope, site);
                scope.locals.pop();
                self.w.close("}");
            }
        }
    }

    /// Installs the owner-side callbacks for reference props of a child built
    /// by an item; they are set before the child's first render.
    fn emit_item_wires(&mut self, component: &str) {
        let Some(region) = self.item_region else {
            return;
        };
        let plan = self.plan;
        for wire in &plan.wiring.wires {
            let WireSource::Item {
                region: r,
                component: c,
                ..
            } = &wire.source
            else {
                continue;
            };
            if *r != region || c != component {
                continue;
            }
            self.w.open(format!("child.{} = () => {{", wire.callback));
            self.emit_steps(&wire.steps);
            self.w.close("};");
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Regions
    // ───────────────────────────────────────────────────────────────────────────

    fn emit_conditional(&mut self, region: &ConditionalRegion) {
        let id = region.id.0;
        let scope = JsScope::new(self.plan, Vec::<String>::new());
        self.w.open(format!("_sync_if_{}() {{", id));
        self.w
            .line(format!("if (this._if_{}_anchor === null) return;", id));
        self.w
            .line(format!("const next = !!{};", scope.expr(&region.condition)));
        self.w
            .line(format!("if (this._if_{}_state === next) return;", id));
        self.w.line("this.ctx.begin();");
        self.w.line(format!("this._teardown_if_{}();", id));
        self.w.line(format!("this._if_{}_state = next;", id));
        self.w.open("if (next) {");
        let mut scope = JsScope::new(self.plan, Vec::<String>::new());
        self.emit_ops(&region.then_branch.ops, &mut scope, OpSite::Branch);
        self.w.close("} else {");
        self.w.indent += 1;
        self.emit_ops(&region.else_branch.ops, &mut scope, OpSite::Branch);
        self.w.close("}");
        self.w.line("this._rebind();");
        self.w.line("this.ctx.end();");
        self.w.close("}");

        self.w.open(format!("_teardown_if_{}() {{", id));
        self.w.line(format!("const state = this._if_{}_state;", id));
        self.w.line("if (state === null) return;");
        self.w.open("if (state) {");
        self.emit_branch_teardown(&region.then_branch.owns);
        self.w.close("} else {");
        self.w.indent += 1;
        self.emit_branch_teardown(&region.else_branch.owns);
        self.w.close("}");
        self.w.line(format!("this._if_{}_state = null;", id));
        self.w.close("}");
    }

    fn emit_branch_teardown(&mut self, owns: &BranchOwnership) {
        for slot in &owns.slots {
            self.w
                .open(format!("if (this.el[{}] !== null) {{", slot.0));
            for kind in self.mask_kinds(*slot) {
                self.w.line(format!(
                    "this.ctx.dispatch.{}.delete(this.el[{}]);",
                    kind, slot.0
                ));
            }
            self.w.line(format!("rt.remove(this.el[{}]);", slot.0));
            self.w.line(format!("this.el[{}] = null;", slot.0));
            self.w.close("}");
        }
        for child in &owns.children {
            self.w.line(format!(
                "if (this._child_{c} !== null) {{ this._child_{c}._destroy(); this._child_{c} = null; }}",
                c = child.0
            ));
        }
        for member in &owns.member_renders {
            self.w.line(format!("this.{}._remove_view();", member));
        }
        for region in &owns.repetitions {
            self.w.line(format!("this._clear_loop_{}();", region.0));
            self.emit_drop_anchor(&format!("_loop_{}", region.0));
        }
        for region in &owns.conditionals {
            self.w.line(format!("this._teardown_if_{}();", region.0));
            self.emit_drop_anchor(&format!("_if_{}", region.0));
        }
    }

    fn emit_drop_anchor(&mut self, prefix: &str) {
        self.w.line(format!(
            "if (this.{p}_anchor !== null) {{ rt.remove(this.{p}_anchor); this.{p}_anchor = null; }}",
            p = prefix
        ));
    }

    fn emit_repetition(&mut self, region: &RepetitionRegion) {
        let id = region.id.0;
        let scope = JsScope::new(self.plan, Vec::<String>::new());
        let prefix = format!("_loop_{}", id);

        self.w.open(format!("_sync_{}() {{", prefix));
        self.w
            .line(format!("if (this.{}_anchor === null) return;", prefix));
        self.w.line("this.ctx.begin();");
        self.w.line(format!("const items = this.{}_items;", prefix));
        match &region.form {
            RepetitionForm::Range { start, end } => {
                self.w.line(format!("const start = {};", scope.expr(start)));
                self.w.line(format!(
                    "const count = Math.max(0, {} - start);",
                    scope.expr(end)
                ));
                self.w
                    .line("while (items.length > count) this._destroy_item(items.pop());");
                self.w.line(format!(
                    "for (let n = items.length; n < count; n++) items.push(this._create_{}_item(start + n));",
                    prefix
                ));
            }
            RepetitionForm::Collection { source, .. } => {
                self.w
                    .line("while (items.length > 0) this._destroy_item(items.pop());");
                self.w.line(format!(
                    "for (const entry of {}) items.push(this._create_{}_item(entry));",
                    scope.expr(source),
                    prefix
                ));
            }
        }
        self.w.line("this._rebind();");
        self.w.line("this.ctx.end();");
        self.w.close("}");

        if let RepetitionForm::Collection { source, .. } = &region.form {
            self.w.open(format!("_append_{}() {{", prefix));
            self.w
                .line(format!("if (this.{}_anchor === null) return;", prefix));
            self.w.line(format!("const source = {};", scope.expr(source)));
            self.w.line("if (source.length === 0) return;");
            self.w.line("this.ctx.begin();");
            self.w.line(format!(
                "this.{p}_items.push(this._create_{p}_item(source[source.length - 1]));",
                p = prefix
            ));
            self.w.line("this.ctx.end();");
            self.w.close("}");
        }

        self.w.open(format!("_clear_{}() {{", prefix));
        self.w.line(format!("const items = this.{}_items;", prefix));
        self.w
            .line("while (items.length > 0) this._destroy_item(items.pop());");
        self.w.close("}");

        self.w
            .open(format!("_create_{}_item({}) {{", prefix, region.var));
        self.w
            .line("const item = { nodes: [], views: [], children: [], handlers: [] };");
        let mut scope = JsScope::new(self.plan, [region.var.clone()]);
        self.item_region = Some(region.id);
        self.emit_ops(&region.template.ops, &mut scope, OpSite::Item);
        self.item_region = None;
        self.w.line("return item;");
        self.w.close("}");
    }

    fn emit_destroy_item(&mut self) {
        if self.plan.view.repetitions().next().is_none() {
            return;
        }
        self.w.open("_destroy_item(item) {");
        self.w
            .line("for (const [kind, node] of item.handlers) this.ctx.dispatch[kind].delete(node);");
        self.w.line("for (const child of item.children) child._destroy();");
        self.w.line("for (const view of item.views) view._remove_view();");
        self.w.line("for (const node of item.nodes) rt.remove(node);");
        self.w.close("}");
    }

    fn emit_rebind(&mut self) {
        let plan = self.plan;
        self.w.open("_rebind() {");
        if !plan.dispatch.is_empty() {
            self.w
                .open(format!("for (let i = 0; i < {}; i++) {{", plan.slot_count()));
            self.w.line("const node = this.el[i];");
            self.w.line("if (node === null) continue;");
            self.w.line("const bit = 1n << BigInt(i);");
            for dispatch in &plan.dispatch {
                self.w.line(format!(
                    "if ({}.{}_MASK & bit) this.ctx.dispatch.{}.set(node, (event) => this._dispatch_{}(i, event));",
                    plan.name,
                    dispatch.kind.name().to_uppercase(),
                    dispatch.kind,
                    dispatch.kind
                ));
            }
            self.w.close("}");
        }
        for wire in &plan.wiring.wires {
            let target = match &wire.source {
                WireSource::Member { field, .. } => format!("this.{}", field),
                WireSource::Child { child, .. } => format!("this._child_{}", child.0),
                WireSource::Item { .. } => continue,
            };
            self.w.open(format!(
                "if ({t} !== null) {t}.{} = () => {{",
                wire.callback,
                t = target
            ));
            self.emit_steps(&wire.steps);
            self.w.close("};");
        }
        self.w.close("}");
    }

    fn emit_router(&mut self) {
        let Some(router) = &self.plan.router else {
            return;
        };
        let scope = JsScope::new(self.plan, Vec::<String>::new());
        self.w.open("navigate(path) {");
        self.w.line("if (this._route_current === path) return;");
        self.w.line("this._route_current = path;");
        self.w.line("rt.pushState(path);");
        self.w.line("this._sync_route();");
        self.w.close("}");

        self.w.open("_handle_popstate(path) {");
        self.w.line("if (this._route_current === path) return;");
        self.w.line("this._route_current = path;");
        self.w.line("this._sync_route();");
        self.w.close("}");

        self.w.open("_sync_route() {");
        self.w.line("if (this._route_anchor === null) return;");
        self.w.line("this.ctx.begin();");
        self.w.line(
            "if (this._route_child !== null) { this._route_child._destroy(); this._route_child = null; }",
        );
        let initial = router.initial_path().unwrap_or("/");
        self.w.line(format!(
            "const path = this._route_current ?? rt.currentPath() ?? \"{}\";",
            escape_js_string(initial)
        ));
        self.w.line("this._route_current = path;");
        self.w.open("switch (path) {");
        for route in &router.routes {
            self.w.line(format!(
                "case \"{}\": this._route_child = new {}(this.ctx, {}); break;",
                escape_js_string(&route.path),
                route.component,
                scope.props(&route.props)
            ));
        }
        match router.default.and_then(|i| router.routes.get(i)) {
            Some(route) => self.w.line(format!(
                "default: this._route_child = new {}(this.ctx, {});",
                route.component,
                scope.props(&route.props)
            )),
            None => self.w.line("default: break;"),
        }
        self.w.close("}");
        self.w.line(
            "if (this._route_child !== null) this._route_child.render(this._route_parent, this._route_anchor);",
        );
        self.w.line("this.ctx.end();");
        self.w.close("}");
    }

    fn emit_remove_view(&mut self) {
        let plan = self.plan;
        self.w.open("_remove_view() {");
        for region in plan.view.regions.iter().filter(|r| r.owner().is_none()) {
            match region {
                StructuralRegion::Conditional(c) => {
                    self.w.line(format!("this._teardown_if_{}();", c.id.0));
                    self.w.line(format!("this._if_{}_anchor = null;", c.id.0));
                }
                StructuralRegion::Repetition(r) => {
                    self.w.line(format!("this._clear_loop_{}();", r.id.0));
                    self.w.line(format!("this._loop_{}_anchor = null;", r.id.0));
                }
            }
        }
        if plan.router.is_some() {
            self.w.line(
                "if (this._route_child !== null) { this._route_child._destroy(); this._route_child = null; }",
            );
            self.w.line("this._route_anchor = null;");
        }
        for child in plan.view.children.iter().filter(|c| c.owner.is_none()) {
            self.w.line(format!(
                "if (this._child_{c} !== null) {{ this._child_{c}._destroy(); this._child_{c} = null; }}",
                c = child.id.0
            ));
        }
        for slot in plan.view.slots.iter().filter(|s| s.owner.is_none()) {
            for kind in self.mask_kinds(slot.id) {
                self.w.line(format!(
                    "if (this.el[{s}] !== null) this.ctx.dispatch.{}.delete(this.el[{s}]);",
                    kind,
                    s = slot.id.0
                ));
            }
        }
        self.w.line("for (const view of this._root_views) if (view) view._remove_view();");
        self.w.line("for (const node of this._roots) rt.remove(node);");
        self.w.line("this._roots = [];");
        self.w.line("this._root_views = [];");
        self.w.line("this.el.fill(null);");
        self.w.close("}");

        self.w.open("_destroy() {");
        self.w.line("this._remove_view();");
        self.w.close("}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpSite {
    Root,
    Branch,
    Item,
}

fn contains_return(body: &[Stmt]) -> bool {
    body.iter().any(|s| match s {
        Stmt::Return { .. } => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => contains_return(then_branch) || contains_return(else_branch),
        Stmt::ForRange { body, .. } | Stmt::ForEach { body, .. } | Stmt::Block { body } => {
            contains_return(body)
        }
        _ => false,
    })
}
