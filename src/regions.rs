//! View Region Compiler.
//!
//! One depth-first pass over the view tree that:
//! - assigns dense slot ids to every node the component keeps a handle to,
//! - extracts bindings, event handlers and structural regions,
//! - records, per conditional branch, what the branch directly owns,
//! - produces the creation plan (`CreateOp`s) consumed by both the emitter
//!   and the runtime.
//!
//! Region ids share one counter for conditionals and repetitions and are
//! allocated in preorder, so an enclosing region always has the smaller id.
//! Repetition bodies compile once into an `ItemTemplate`; content inside
//! them is evaluated at item creation and never bound reactively.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ast::{
    AttributeValue, Component, ComponentNode, ConditionalNode, ElementNode, Expr, KeyedLoopNode,
    Method, MethodParam, PropNode, RangeLoopNode, RawNode, SourceLocation, Stmt, TemplatePart,
    ViewNode,
};
use crate::deps::{DepScope, DepSet};
use crate::error::{CompileResult, CompilerError, INV_SLOT_UNASSIGNED};
use crate::events::EventKind;
use crate::validate::event_attribute;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTITIES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Then,
    Else,
}

impl Branch {
    pub fn from_condition(value: bool) -> Self {
        if value {
            Branch::Then
        } else {
            Branch::Else
        }
    }
}

/// The conditional branch a slot, binding or nested region lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub region: RegionId,
    pub branch: Branch,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDINGS AND HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BindingKind {
    Attribute { name: String },
    /// `value`, `checked` and `selected` are written as DOM properties.
    Property { name: String },
    Text,
    Markup,
}

impl BindingKind {
    /// Suffix of the generated update procedure name.
    pub fn suffix(&self) -> String {
        match self {
            BindingKind::Attribute { name } | BindingKind::Property { name } => {
                name.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
            }
            BindingKind::Text => "text".to_string(),
            BindingKind::Markup => "html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub slot: SlotId,
    pub kind: BindingKind,
    pub source: Expr,
    pub deps: DepSet,
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerForm {
    /// `onclick={save}`
    Reference,
    /// `onclick={remove(i)}`
    Call,
    /// Statement list or any other expression, compiled into a private method.
    Inline,
}

/// What a delivered event invokes: always a method of the component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerCall {
    pub method: String,
    pub args: Vec<Expr>,
    /// Pass the event payload (input value, key) as the only argument.
    pub pass_event: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub slot: SlotId,
    pub kind: EventKind,
    pub call: HandlerCall,
    pub form: HandlerForm,
    pub owner: Option<Owner>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    pub id: SlotId,
    pub tag: String,
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropInit {
    pub name: String,
    pub value: Expr,
    pub reference: bool,
}

const NO_ARGS: &[Expr] = &[];

impl PropInit {
    /// `onSave={save}` or `onRemove={remove(i)}`: a prop the child invokes to
    /// run one of the owner's methods. Returns the method and its arguments,
    /// which are evaluated when the child calls back, not at construction.
    pub fn method_callback(&self, is_method: impl Fn(&str) -> bool) -> Option<(&str, &[Expr])> {
        if self.reference {
            return None;
        }
        match &self.value {
            Expr::Ident { name } if is_method(name) => Some((name.as_str(), NO_ARGS)),
            Expr::Call { callee, args } if is_method(callee) => Some((callee.as_str(), args.as_slice())),
            _ => None,
        }
    }
}

impl From<&PropNode> for PropInit {
    fn from(prop: &PropNode) -> Self {
        PropInit {
            name: prop.name.clone(),
            value: prop.value.clone(),
            reference: prop.reference,
        }
    }
}

/// A child component constructed outside any repetition body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInstance {
    pub id: ChildId,
    pub component: String,
    pub props: Vec<PropInit>,
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRenderInfo {
    pub member: String,
    pub owner: Option<Owner>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CREATION PLAN
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum NodeRef {
    Slot(SlotId),
    /// Node local to one repetition item.
    Local(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Parent {
    /// The element the component is mounted into.
    Mount,
    Node(NodeRef),
    /// The region's parent, inserted before the region's anchor.
    Region(RegionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ChildRef {
    Field(ChildId),
    Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeInit {
    pub name: String,
    pub value: Expr,
    pub property: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Markup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub kind: ContentKind,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemHandler {
    pub kind: EventKind,
    pub call: HandlerCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum CreateOp {
    Element {
        node: NodeRef,
        tag: String,
        parent: Parent,
        attributes: Vec<AttributeInit>,
        content: Option<Content>,
        /// Only item-local nodes carry handlers here; slot handlers go through masks.
        handlers: Vec<ItemHandler>,
    },
    Text {
        node: Option<NodeRef>,
        parent: Parent,
        value: Expr,
    },
    Child {
        child: ChildRef,
        component: String,
        props: Vec<PropInit>,
        parent: Parent,
    },
    MemberRender {
        member: Expr,
        parent: Parent,
    },
    Region {
        region: RegionId,
        parent: Parent,
    },
    RouteAnchor {
        parent: Parent,
    },
    // Item-only flow, evaluated once at item creation.
    Conditional {
        condition: Expr,
        then_ops: Vec<CreateOp>,
        else_ops: Vec<CreateOp>,
    },
    Range {
        var: String,
        start: Expr,
        end: Expr,
        ops: Vec<CreateOp>,
    },
    Each {
        var: String,
        source: Expr,
        ops: Vec<CreateOp>,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL REGIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// What one branch owns directly. Contents of a nested conditional belong
/// to that conditional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchOwnership {
    pub slots: Vec<SlotId>,
    pub children: Vec<ChildId>,
    pub member_renders: Vec<String>,
    pub repetitions: Vec<RegionId>,
    pub conditionals: Vec<RegionId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPlan {
    pub ops: Vec<CreateOp>,
    pub owns: BranchOwnership,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalRegion {
    pub id: RegionId,
    pub condition: Expr,
    pub deps: DepSet,
    pub then_branch: BranchPlan,
    pub else_branch: BranchPlan,
    pub owner: Option<Owner>,
    pub location: SourceLocation,
}

impl ConditionalRegion {
    pub fn branch(&self, branch: Branch) -> &BranchPlan {
        match branch {
            Branch::Then => &self.then_branch,
            Branch::Else => &self.else_branch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RepetitionForm {
    Range { start: Expr, end: Expr },
    Collection { source: Expr, key: Option<Expr> },
}

/// Determines item teardown: constructed components are destroyed, member
/// references only lose their view, markup is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ItemKind {
    Markup,
    Component { name: String },
    MemberRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTemplate {
    pub ops: Vec<CreateOp>,
    pub locals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepetitionRegion {
    pub id: RegionId,
    pub var: String,
    pub form: RepetitionForm,
    pub item_kind: ItemKind,
    pub deps: DepSet,
    pub template: ItemTemplate,
    pub owner: Option<Owner>,
    pub location: SourceLocation,
}

impl RepetitionRegion {
    pub fn is_keyed(&self) -> bool {
        matches!(self.form, RepetitionForm::Collection { key: Some(_), .. })
    }

    /// The state variable a collection region iterates, when it is a plain name.
    pub fn source_var(&self) -> Option<&str> {
        match &self.form {
            RepetitionForm::Collection {
                source: Expr::Ident { name },
                ..
            } => Some(name),
            _ => None,
        }
    }
}

/// A component constructed inside an item template, with the loop variables
/// visible where it is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChildSite<'a> {
    pub component: &'a str,
    pub props: &'a [PropInit],
    pub scope: Vec<&'a str>,
}

impl RepetitionRegion {
    pub fn item_children(&self) -> Vec<ItemChildSite<'_>> {
        let mut sites = Vec::new();
        collect_item_children(&self.template.ops, vec![self.var.as_str()], &mut sites);
        sites
    }
}

fn collect_item_children<'a>(
    ops: &'a [CreateOp],
    scope: Vec<&'a str>,
    sites: &mut Vec<ItemChildSite<'a>>,
) {
    for op in ops {
        match op {
            CreateOp::Child {
                child: ChildRef::Item,
                component,
                props,
                ..
            } => sites.push(ItemChildSite {
                component,
                props,
                scope: scope.clone(),
            }),
            CreateOp::Conditional {
                then_ops, else_ops, ..
            } => {
                collect_item_children(then_ops, scope.clone(), sites);
                collect_item_children(else_ops, scope.clone(), sites);
            }
            CreateOp::Range { var, ops, .. } | CreateOp::Each { var, ops, .. } => {
                let mut inner = scope.clone();
                inner.push(var);
                collect_item_children(ops, inner, sites);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "region", rename_all = "kebab-case")]
pub enum StructuralRegion {
    Conditional(ConditionalRegion),
    Repetition(RepetitionRegion),
}

impl StructuralRegion {
    pub fn id(&self) -> RegionId {
        match self {
            StructuralRegion::Conditional(c) => c.id,
            StructuralRegion::Repetition(r) => r.id,
        }
    }

    pub fn deps(&self) -> &DepSet {
        match self {
            StructuralRegion::Conditional(c) => &c.deps,
            StructuralRegion::Repetition(r) => &r.deps,
        }
    }

    pub fn owner(&self) -> Option<Owner> {
        match self {
            StructuralRegion::Conditional(c) => c.owner,
            StructuralRegion::Repetition(r) => r.owner,
        }
    }

    pub fn location(&self) -> SourceLocation {
        match self {
            StructuralRegion::Conditional(c) => c.location,
            StructuralRegion::Repetition(r) => r.location,
        }
    }

    pub fn as_conditional(&self) -> Option<&ConditionalRegion> {
        match self {
            StructuralRegion::Conditional(c) => Some(c),
            StructuralRegion::Repetition(_) => None,
        }
    }

    pub fn as_repetition(&self) -> Option<&RepetitionRegion> {
        match self {
            StructuralRegion::Repetition(r) => Some(r),
            StructuralRegion::Conditional(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewAnalysis {
    pub slot_count: u32,
    pub slots: Vec<SlotInfo>,
    pub bindings: Vec<Binding>,
    pub handlers: Vec<EventHandler>,
    /// Indexed by `RegionId`.
    pub regions: Vec<StructuralRegion>,
    /// Indexed by `ChildId`.
    pub children: Vec<ChildInstance>,
    pub member_renders: Vec<MemberRenderInfo>,
    pub mount_ops: Vec<CreateOp>,
    /// Private methods compiled from inline handlers.
    pub synthesized: Vec<Method>,
    pub has_route_anchor: bool,
}

impl ViewAnalysis {
    pub fn region(&self, id: RegionId) -> Option<&StructuralRegion> {
        self.regions.get(id.0 as usize)
    }

    pub fn conditional(&self, id: RegionId) -> Option<&ConditionalRegion> {
        self.region(id).and_then(StructuralRegion::as_conditional)
    }

    pub fn repetition(&self, id: RegionId) -> Option<&RepetitionRegion> {
        self.region(id).and_then(StructuralRegion::as_repetition)
    }

    pub fn conditionals(&self) -> impl Iterator<Item = &ConditionalRegion> {
        self.regions.iter().filter_map(StructuralRegion::as_conditional)
    }

    pub fn repetitions(&self) -> impl Iterator<Item = &RepetitionRegion> {
        self.regions.iter().filter_map(StructuralRegion::as_repetition)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

const PROPERTY_ATTRIBUTES: [&str; 3] = ["value", "checked", "selected"];

pub fn analyze_view(component: &Component) -> CompileResult<ViewAnalysis> {
    let fields: BTreeSet<String> = component
        .field_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut compiler = RegionCompiler {
        component,
        fields: &fields,
        next_slot: 0,
        next_child: 0,
        next_item_handler: 0,
        slots: Vec::new(),
        bindings: Vec::new(),
        handlers: Vec::new(),
        regions: Vec::new(),
        children: Vec::new(),
        member_renders: Vec::new(),
        synthesized: Vec::new(),
        owner: None,
        owned: Vec::new(),
        item: None,
        has_route_anchor: false,
    };
    let mount_ops = compiler.compile_nodes(&component.view, Parent::Mount);
    compiler.finish(mount_ops)
}

struct ItemContext {
    next_local: u32,
    /// Loop variables visible at this point of the item body.
    scope: Vec<String>,
}

struct RegionCompiler<'a> {
    component: &'a Component,
    fields: &'a BTreeSet<String>,
    next_slot: u32,
    next_child: u32,
    next_item_handler: u32,
    slots: Vec<SlotInfo>,
    bindings: Vec<Binding>,
    handlers: Vec<EventHandler>,
    regions: Vec<Option<StructuralRegion>>,
    children: Vec<ChildInstance>,
    member_renders: Vec<MemberRenderInfo>,
    synthesized: Vec<Method>,
    owner: Option<Owner>,
    owned: Vec<BranchOwnership>,
    item: Option<ItemContext>,
    has_route_anchor: bool,
}

impl<'a> RegionCompiler<'a> {
    fn finish(self, mount_ops: Vec<CreateOp>) -> CompileResult<ViewAnalysis> {
        let component = self.component;
        let name = &component.name;
        let mut regions = Vec::with_capacity(self.regions.len());
        for (index, region) in self.regions.into_iter().enumerate() {
            match region {
                Some(region) => regions.push(region),
                None => {
                    return Err(CompilerError::new(
                        INV_SLOT_UNASSIGNED,
                        &format!("Region {} was allocated but never compiled", index),
                        name,
                        component.location,
                    ))
                }
            }
        }
        let slot_count = self.next_slot;
        let dangling = self
            .bindings
            .iter()
            .map(|b| b.slot)
            .chain(self.handlers.iter().map(|h| h.slot))
            .find(|slot| slot.0 >= slot_count);
        if let Some(slot) = dangling {
            return Err(CompilerError::new(
                INV_SLOT_UNASSIGNED,
                &format!("Slot {} is referenced before it is assigned", slot.0),
                name,
                component.location,
            ));
        }

        Ok(ViewAnalysis {
            slot_count,
            slots: self.slots,
            bindings: self.bindings,
            handlers: self.handlers,
            regions,
            children: self.children,
            member_renders: self.member_renders,
            mount_ops,
            synthesized: self.synthesized,
            has_route_anchor: self.has_route_anchor,
        })
    }

    fn dep_scope(&self) -> DepScope<'a> {
        let mut scope = DepScope::new(self.fields);
        if let Some(item) = &self.item {
            for var in &item.scope {
                scope.push(var);
            }
        }
        scope
    }

    fn alloc_node(&mut self, tag: &str) -> NodeRef {
        if let Some(item) = self.item.as_mut() {
            let local = item.next_local;
            item.next_local += 1;
            return NodeRef::Local(local);
        }
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.push(SlotInfo {
            id,
            tag: tag.to_string(),
            owner: self.owner,
        });
        if let Some(owns) = self.owned.last_mut() {
            owns.slots.push(id);
        }
        NodeRef::Slot(id)
    }

    fn alloc_region(&mut self) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(None);
        id
    }

    fn push_binding(&mut self, slot: SlotId, kind: BindingKind, source: Expr) {
        let deps = self.dep_scope().collect(&source);
        tracing::trace!(slot = slot.0, ?kind, deps = ?deps.vars, "binding");
        self.bindings.push(Binding {
            slot,
            kind,
            source,
            deps,
            owner: self.owner,
        });
    }

    fn compile_nodes(&mut self, nodes: &[ViewNode], parent: Parent) -> Vec<CreateOp> {
        let mut ops = Vec::new();
        for node in nodes {
            self.compile_node(node, parent, &mut ops);
        }
        ops
    }

    fn compile_node(&mut self, node: &ViewNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        match node {
            ViewNode::Element(el) => self.compile_element(el, parent, ops),
            ViewNode::Raw(raw) => self.compile_raw(raw, parent, ops),
            ViewNode::Text(text) => {
                let node = self.branch_text_node(parent);
                ops.push(CreateOp::Text {
                    node,
                    parent,
                    value: Expr::str(&text.value),
                });
            }
            ViewNode::Expression(e) => self.compile_text_expression(&e.expr, parent, ops),
            ViewNode::Component(c) => self.compile_component(c, parent, ops),
            ViewNode::MemberRender(m) => {
                if self.item.is_none() {
                    self.member_renders.push(MemberRenderInfo {
                        member: m.member.clone(),
                        owner: self.owner,
                    });
                    if let Some(owns) = self.owned.last_mut() {
                        owns.member_renders.push(m.member.clone());
                    }
                }
                ops.push(CreateOp::MemberRender {
                    member: Expr::ident(&m.member),
                    parent,
                });
            }
            ViewNode::Conditional(c) if self.item.is_some() => {
                let then_ops = self.compile_nodes(&c.then_branch, parent);
                let else_ops = self.compile_nodes(&c.else_branch, parent);
                ops.push(CreateOp::Conditional {
                    condition: c.condition.clone(),
                    then_ops,
                    else_ops,
                });
            }
            ViewNode::Conditional(c) => self.compile_conditional(c, parent, ops),
            ViewNode::RangeLoop(r) if self.item.is_some() => {
                let body = self.with_scope_var(&r.var, |this| this.compile_nodes(&r.body, parent));
                ops.push(CreateOp::Range {
                    var: r.var.clone(),
                    start: r.start.clone(),
                    end: r.end.clone(),
                    ops: body,
                });
            }
            ViewNode::RangeLoop(r) => self.compile_range(r, parent, ops),
            ViewNode::KeyedLoop(k) if self.item.is_some() => {
                let body = self.with_scope_var(&k.var, |this| this.compile_nodes(&k.body, parent));
                ops.push(CreateOp::Each {
                    var: k.var.clone(),
                    source: k.source.clone(),
                    ops: body,
                });
            }
            ViewNode::KeyedLoop(k) => self.compile_keyed(k, parent, ops),
            ViewNode::RoutePlaceholder(_) => {
                self.has_route_anchor = true;
                ops.push(CreateOp::RouteAnchor { parent });
            }
        }
    }

    fn with_scope_var<T>(&mut self, var: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        if let Some(item) = self.item.as_mut() {
            item.scope.push(var.to_string());
        }
        let out = f(self);
        if let Some(item) = self.item.as_mut() {
            item.scope.pop();
        }
        out
    }

    fn compile_element(&mut self, el: &ElementNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        let node = self.alloc_node(&el.tag);
        let mut attributes = Vec::new();
        let mut item_handlers = Vec::new();

        for attr in &el.attributes {
            if let Ok(Some(kind)) = event_attribute(&attr.name) {
                let (call, form) = self.compile_handler(node, kind, &attr.value);
                match node {
                    NodeRef::Slot(slot) => {
                        tracing::trace!(slot = slot.0, %kind, method = %call.method, "handler");
                        self.handlers.push(EventHandler {
                            slot,
                            kind,
                            call,
                            form,
                            owner: self.owner,
                            location: el.location,
                        });
                    }
                    NodeRef::Local(_) => item_handlers.push(ItemHandler { kind, call }),
                }
                continue;
            }

            let value = match &attr.value {
                AttributeValue::Static(s) => Expr::str(s),
                AttributeValue::Dynamic(e) => e.clone(),
                AttributeValue::Handler(_) => continue,
            };
            let property = PROPERTY_ATTRIBUTES.contains(&attr.name.as_str());
            if let NodeRef::Slot(slot) = node {
                if !value.is_static() {
                    let kind = if property {
                        BindingKind::Property {
                            name: attr.name.clone(),
                        }
                    } else {
                        BindingKind::Attribute {
                            name: attr.name.clone(),
                        }
                    };
                    self.push_binding(slot, kind, value.clone());
                }
            }
            attributes.push(AttributeInit {
                name: attr.name.clone(),
                value,
                property,
            });
        }

        let text_only = !el.children.is_empty()
            && el
                .children
                .iter()
                .all(|c| matches!(c, ViewNode::Text(_) | ViewNode::Expression(_)));
        let content = if text_only {
            let value = concat_text(&el.children);
            if let NodeRef::Slot(slot) = node {
                if !value.is_static() {
                    self.push_binding(slot, BindingKind::Text, value.clone());
                }
            }
            Some(Content {
                kind: ContentKind::Text,
                value,
            })
        } else {
            None
        };

        ops.push(CreateOp::Element {
            node,
            tag: el.tag.clone(),
            parent,
            attributes,
            content,
            handlers: item_handlers,
        });

        if !text_only {
            for child in &el.children {
                self.compile_node(child, Parent::Node(node), ops);
            }
        }
    }

    fn compile_raw(&mut self, raw: &RawNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        let node = self.alloc_node("span");
        let value = concat_text(&raw.children);
        if let NodeRef::Slot(slot) = node {
            if !value.is_static() {
                self.push_binding(slot, BindingKind::Markup, value.clone());
            }
        }
        ops.push(CreateOp::Element {
            node,
            tag: "span".to_string(),
            parent,
            attributes: Vec::new(),
            content: Some(Content {
                kind: ContentKind::Markup,
                value,
            }),
            handlers: Vec::new(),
        });
    }

    /// An expression child among element siblings becomes its own text node.
    fn compile_text_expression(&mut self, expr: &Expr, parent: Parent, ops: &mut Vec<CreateOp>) {
        if expr.is_static() || self.item.is_some() {
            let node = self.branch_text_node(parent);
            ops.push(CreateOp::Text {
                node,
                parent,
                value: expr.clone(),
            });
            return;
        }
        let node = self.alloc_node("#text");
        if let NodeRef::Slot(slot) = node {
            self.push_binding(slot, BindingKind::Text, expr.clone());
        }
        ops.push(CreateOp::Text {
            node: Some(node),
            parent,
            value: expr.clone(),
        });
    }

    /// Static text placed directly in a conditional branch still needs a slot so
    /// the branch can remove it on teardown.
    fn branch_text_node(&mut self, parent: Parent) -> Option<NodeRef> {
        match parent {
            Parent::Region(_) if self.item.is_none() => Some(self.alloc_node("#text")),
            _ => None,
        }
    }

    fn compile_component(&mut self, c: &ComponentNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        let props: Vec<PropInit> = c.props.iter().map(PropInit::from).collect();
        let child = if self.item.is_some() {
            ChildRef::Item
        } else {
            let id = ChildId(self.next_child);
            self.next_child += 1;
            self.children.push(ChildInstance {
                id,
                component: c.name.clone(),
                props: props.clone(),
                owner: self.owner,
            });
            if let Some(owns) = self.owned.last_mut() {
                owns.children.push(id);
            }
            ChildRef::Field(id)
        };
        ops.push(CreateOp::Child {
            child,
            component: c.name.clone(),
            props,
            parent,
        });
    }

    fn compile_conditional(
        &mut self,
        c: &ConditionalNode,
        parent: Parent,
        ops: &mut Vec<CreateOp>,
    ) {
        let id = self.alloc_region();
        if let Some(owns) = self.owned.last_mut() {
            owns.conditionals.push(id);
        }
        let deps = self.dep_scope().collect(&c.condition);
        let owner = self.owner;
        let then_branch = self.compile_branch(id, Branch::Then, &c.then_branch);
        let else_branch = self.compile_branch(id, Branch::Else, &c.else_branch);
        tracing::trace!(region = id.0, deps = ?deps.vars, "conditional region");
        self.regions[id.0 as usize] = Some(StructuralRegion::Conditional(ConditionalRegion {
            id,
            condition: c.condition.clone(),
            deps,
            then_branch,
            else_branch,
            owner,
            location: c.location,
        }));
        ops.push(CreateOp::Region { region: id, parent });
    }

    fn compile_branch(&mut self, id: RegionId, branch: Branch, nodes: &[ViewNode]) -> BranchPlan {
        let saved = self.owner.replace(Owner { region: id, branch });
        self.owned.push(BranchOwnership::default());
        let ops = self.compile_nodes(nodes, Parent::Region(id));
        let owns = self.owned.pop().unwrap_or_default();
        self.owner = saved;
        BranchPlan { ops, owns }
    }

    fn compile_range(&mut self, r: &RangeLoopNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        let id = self.alloc_region();
        if let Some(owns) = self.owned.last_mut() {
            owns.repetitions.push(id);
        }
        let scope = self.dep_scope();
        let mut deps = scope.collect(&r.start);
        deps.extend(scope.collect(&r.end));
        let template = self.compile_item_template(id, &r.var, &r.body);
        tracing::trace!(region = id.0, deps = ?deps.vars, "range region");
        self.regions[id.0 as usize] = Some(StructuralRegion::Repetition(RepetitionRegion {
            id,
            var: r.var.clone(),
            form: RepetitionForm::Range {
                start: r.start.clone(),
                end: r.end.clone(),
            },
            item_kind: classify_items(&r.body, &r.var),
            deps,
            template,
            owner: self.owner,
            location: r.location,
        }));
        ops.push(CreateOp::Region { region: id, parent });
    }

    fn compile_keyed(&mut self, k: &KeyedLoopNode, parent: Parent, ops: &mut Vec<CreateOp>) {
        let id = self.alloc_region();
        if let Some(owns) = self.owned.last_mut() {
            owns.repetitions.push(id);
        }
        let deps = self.dep_scope().collect(&k.source);
        let template = self.compile_item_template(id, &k.var, &k.body);
        tracing::trace!(region = id.0, deps = ?deps.vars, keyed = k.key.is_some(), "collection region");
        self.regions[id.0 as usize] = Some(StructuralRegion::Repetition(RepetitionRegion {
            id,
            var: k.var.clone(),
            form: RepetitionForm::Collection {
                source: k.source.clone(),
                key: k.key.clone(),
            },
            item_kind: classify_items(&k.body, &k.var),
            deps,
            template,
            owner: self.owner,
            location: k.location,
        }));
        ops.push(CreateOp::Region { region: id, parent });
    }

    fn compile_item_template(&mut self, id: RegionId, var: &str, body: &[ViewNode]) -> ItemTemplate {
        let saved = self.item.replace(ItemContext {
            next_local: 0,
            scope: vec![var.to_string()],
        });
        let ops = self.compile_nodes(body, Parent::Region(id));
        let locals = self.item.take().map(|i| i.next_local).unwrap_or(0);
        self.item = saved;
        ItemTemplate { ops, locals }
    }

    fn compile_handler(
        &mut self,
        node: NodeRef,
        kind: EventKind,
        value: &AttributeValue,
    ) -> (HandlerCall, HandlerForm) {
        match value {
            AttributeValue::Static(name) => (self.reference_call(name), HandlerForm::Reference),
            AttributeValue::Dynamic(Expr::Ident { name }) if self.component.method(name).is_some() => {
                (self.reference_call(name), HandlerForm::Reference)
            }
            AttributeValue::Dynamic(Expr::Call { callee, args })
                if self.component.method(callee).is_some() =>
            {
                (
                    HandlerCall {
                        method: callee.clone(),
                        args: args.clone(),
                        pass_event: false,
                    },
                    HandlerForm::Call,
                )
            }
            AttributeValue::Dynamic(Expr::Ident { name }) => {
                // A bare callback param is invoked, not evaluated.
                let body = vec![Stmt::expr(Expr::call(name, vec![]))];
                self.synthesize_handler(node, kind, body)
            }
            AttributeValue::Dynamic(expr) => {
                self.synthesize_handler(node, kind, vec![Stmt::expr(expr.clone())])
            }
            AttributeValue::Handler(body) => self.synthesize_handler(node, kind, body.clone()),
        }
    }

    fn reference_call(&self, method: &str) -> HandlerCall {
        let pass_event = self
            .component
            .method(method)
            .map(|m| !m.params.is_empty())
            .unwrap_or(false);
        HandlerCall {
            method: method.to_string(),
            args: Vec::new(),
            pass_event,
        }
    }

    fn synthesize_handler(
        &mut self,
        node: NodeRef,
        kind: EventKind,
        body: Vec<Stmt>,
    ) -> (HandlerCall, HandlerForm) {
        let scope: Vec<String> = self
            .item
            .as_ref()
            .map(|i| i.scope.clone())
            .unwrap_or_default();
        let name = match node {
            NodeRef::Slot(slot) => format!("_handler_{}_{}", slot.0, kind),
            NodeRef::Local(_) => {
                let n = self.next_item_handler;
                self.next_item_handler += 1;
                format!("_item_handler_{}_{}", n, kind)
            }
        };
        self.synthesized.push(Method {
            name: name.clone(),
            params: scope
                .iter()
                .map(|v| MethodParam {
                    name: v.clone(),
                    ty: "auto".to_string(),
                })
                .collect(),
            returns: None,
            body,
        });
        let call = HandlerCall {
            method: name,
            args: scope.iter().map(|v| Expr::ident(v)).collect(),
            pass_event: false,
        };
        (call, HandlerForm::Inline)
    }
}

/// Text and expression children joined into one value.
fn concat_text(children: &[ViewNode]) -> Expr {
    let parts: Vec<TemplatePart> = children
        .iter()
        .filter_map(|c| match c {
            ViewNode::Text(t) => Some(TemplatePart::Text(t.value.clone())),
            ViewNode::Expression(e) => Some(TemplatePart::Expr(e.expr.clone())),
            _ => None,
        })
        .collect();
    match parts.as_slice() {
        [TemplatePart::Expr(e)] => e.clone(),
        [TemplatePart::Text(t)] => Expr::str(t),
        _ => Expr::Template { parts },
    }
}

fn classify_items(body: &[ViewNode], var: &str) -> ItemKind {
    let significant: Vec<&ViewNode> = body
        .iter()
        .filter(|n| !matches!(n, ViewNode::Text(t) if t.value.trim().is_empty()))
        .collect();
    match significant.as_slice() {
        [ViewNode::Component(c)] => ItemKind::Component {
            name: c.name.clone(),
        },
        [ViewNode::MemberRender(m)] if m.member == var => ItemKind::MemberRef,
        _ => ItemKind::Markup,
    }
}
