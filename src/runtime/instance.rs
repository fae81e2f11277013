//! Executes a compiled plan: one `Instance` per live component.
//!
//! Mutations happen inside method bodies; the method's epilogue runs before
//! the call returns. Children report upward only through the callback they
//! were constructed with, which queues a `Notice` the owner drains after the
//! call into the child returns.

use indexmap::IndexMap;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::context::{DispatchEntry, InstanceId, RenderContext};
use super::eval::{
    as_index, as_instance_ref, as_int, binary, builtin, instance_ref, mutate, to_text, truthy,
    unary, Locals, RuntimeError, RuntimeResult,
};
use super::host::{NodeHandle, RenderHost};
use super::regions::{CollectionState, ConditionalState, RangeState, Resize, Transition};
use crate::aggregate::ProcId;
use crate::ast::{
    BinaryOp, Expr, Place, Stmt, TemplatePart, INIT_METHOD, MOUNT_METHOD, TICK_METHOD,
};
use crate::compile::CompiledComponent;
use crate::epilogue::{callback_name, EpilogueStep, MethodPlan};
use crate::events::EventKind;
use crate::regions::{
    BindingKind, Branch, ChildId, ChildRef, ConditionalRegion, ContentKind, CreateOp, NodeRef,
    Parent, PropInit, RegionId, RepetitionForm, RepetitionRegion, StructuralRegion,
};
use crate::wiring::WireSource;
use crate::write_set::{is_mutating_method, statement_append};

/// Compiled components available to the runtime, by name.
#[derive(Debug, Clone, Default)]
pub struct Program {
    components: IndexMap<String, Rc<CompiledComponent>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_compiled(compiled: impl IntoIterator<Item = CompiledComponent>) -> Self {
        let mut program = Self::new();
        for component in compiled {
            program.insert(component);
        }
        program
    }

    pub fn insert(&mut self, component: CompiledComponent) {
        self.components
            .insert(component.name.clone(), Rc::new(component));
    }

    pub fn get(&self, name: &str) -> Option<&Rc<CompiledComponent>> {
        self.components.get(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Everything an instance operation needs besides the instance itself.
pub struct Env<'a> {
    pub host: &'a mut dyn RenderHost,
    pub ctx: &'a mut RenderContext,
    pub program: &'a Program,
}

impl Env<'_> {
    fn begin(&mut self) {
        self.ctx.begin();
    }

    fn end(&mut self) {
        self.ctx.end(&mut *self.host);
    }
}

/// A change reported by a child to its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub callback: String,
    pub var: String,
    pub value: Value,
}

pub type ParentCallback = Box<dyn FnMut(Notice)>;

struct Link {
    instance: Instance,
    outbox: Rc<RefCell<Vec<Notice>>>,
}

impl Link {
    fn new(
        env: &mut Env<'_>,
        plan: Rc<CompiledComponent>,
        props: Vec<(String, Value)>,
    ) -> RuntimeResult<Self> {
        let outbox = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outbox);
        let notify: ParentCallback = Box::new(move |notice| sink.borrow_mut().push(notice));
        let instance = Instance::new(env, plan, props, Some(notify))?;
        Ok(Self { instance, outbox })
    }

    fn drain(&self) -> Vec<Notice> {
        self.outbox.borrow_mut().drain(..).collect()
    }
}

/// Where an item child came from: its props and the loop scope they were
/// evaluated in, so callbacks resolve against the right item.
#[derive(Clone)]
struct ItemSource {
    region: RegionId,
    props: Vec<PropInit>,
    scope: Vec<(String, Value)>,
}

struct ItemChild {
    link: Link,
    source: ItemSource,
}

#[derive(Default)]
struct Item {
    nodes: Vec<NodeHandle>,
    children: Vec<ItemChild>,
    views: Vec<u64>,
    handlers: Vec<(EventKind, NodeHandle)>,
}

struct ItemBuild {
    region: RegionId,
    item: Item,
    locals: Vec<Option<NodeHandle>>,
}

/// Where creation ops are running, which decides what gets tracked.
enum Site<'s> {
    Root,
    Branch,
    Item(&'s mut ItemBuild),
}

enum RegionState {
    Conditional(ConditionalState),
    Range {
        state: RangeState,
        items: Vec<Item>,
    },
    Collection {
        state: CollectionState,
        items: Vec<Item>,
    },
}

struct RegionRuntime {
    parent: Option<NodeHandle>,
    anchor: Option<NodeHandle>,
    state: RegionState,
}

impl RegionRuntime {
    fn new(region: &StructuralRegion) -> Self {
        let state = match region {
            StructuralRegion::Conditional(_) => RegionState::Conditional(ConditionalState::default()),
            StructuralRegion::Repetition(r) => match r.form {
                RepetitionForm::Range { .. } => RegionState::Range {
                    state: RangeState::default(),
                    items: Vec::new(),
                },
                RepetitionForm::Collection { .. } => RegionState::Collection {
                    state: CollectionState::default(),
                    items: Vec::new(),
                },
            },
        };
        Self {
            parent: None,
            anchor: None,
            state,
        }
    }
}

#[derive(Default)]
struct RouteRuntime {
    current: Option<String>,
    parent: Option<NodeHandle>,
    anchor: Option<NodeHandle>,
    child: Option<Box<Instance>>,
}

enum Flow {
    Normal,
    Return(Value),
}

enum Segment {
    Field(String),
    Index(usize),
}

struct PlacePath {
    root: String,
    segments: Vec<Segment>,
}

pub struct Instance {
    id: InstanceId,
    plan: Rc<CompiledComponent>,
    fields: IndexMap<String, Value>,
    nodes: Vec<Option<NodeHandle>>,
    mount_point: Option<(NodeHandle, Option<NodeHandle>)>,
    roots: Vec<NodeHandle>,
    root_members: Vec<u64>,
    regions: Vec<RegionRuntime>,
    children: Vec<Option<Link>>,
    members: BTreeMap<u64, Link>,
    next_member: u64,
    route: RouteRuntime,
    installed_wires: Vec<usize>,
    notify: Option<ParentCallback>,
}

impl Instance {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONSTRUCTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn new(
        env: &mut Env<'_>,
        plan: Rc<CompiledComponent>,
        props: Vec<(String, Value)>,
        notify: Option<ParentCallback>,
    ) -> RuntimeResult<Self> {
        let mut instance = Instance {
            id: env.ctx.next_instance_id(),
            plan: Rc::clone(&plan),
            fields: IndexMap::new(),
            nodes: vec![None; plan.slot_count() as usize],
            mount_point: None,
            roots: Vec::new(),
            root_members: Vec::new(),
            regions: plan.view.regions.iter().map(RegionRuntime::new).collect(),
            children: plan.view.children.iter().map(|_| None).collect(),
            members: BTreeMap::new(),
            next_member: 0,
            route: RouteRuntime::default(),
            installed_wires: Vec::new(),
            notify,
        };

        let mut props: IndexMap<String, Value> = props.into_iter().collect();
        let mut locals = Locals::new();
        for param in &plan.params {
            let value = match (props.shift_remove(&param.name), &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => instance.eval(env, default, &mut locals)?,
                (None, None) => Value::Null,
            };
            instance.fields.insert(param.name.clone(), value);
        }
        for state in &plan.state {
            let value = match &state.init {
                Some(init) => instance.eval(env, init, &mut locals)?,
                None => match env.program.get(&state.ty).cloned() {
                    Some(member) => instance.construct_member(env, member, Vec::new())?,
                    None => Value::Null,
                },
            };
            instance.fields.insert(state.name.clone(), value);
        }
        if !props.is_empty() {
            tracing::debug!(component = %plan.name, unknown = props.len(), "ignored unknown props");
        }

        if plan.method(INIT_METHOD).is_some() {
            instance.call_method(env, INIT_METHOD, Vec::new())?;
        }
        tracing::debug!(component = %plan.name, id = instance.id.0, "constructed instance");
        Ok(instance)
    }

    fn construct_member(
        &mut self,
        env: &mut Env<'_>,
        plan: Rc<CompiledComponent>,
        props: Vec<(String, Value)>,
    ) -> RuntimeResult<Value> {
        let link = Link::new(env, plan, props)?;
        let handle = self.next_member;
        self.next_member += 1;
        self.members.insert(handle, link);
        Ok(instance_ref(handle))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn plan(&self) -> &CompiledComponent {
        &self.plan
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn node(&self, slot: u32) -> Option<NodeHandle> {
        self.nodes.get(slot as usize).copied().flatten()
    }

    pub fn branch(&self, region: RegionId) -> Option<Branch> {
        match self.regions.get(region.0 as usize).map(|r| &r.state) {
            Some(RegionState::Conditional(state)) => state.active(),
            _ => None,
        }
    }

    pub fn item_count(&self, region: RegionId) -> usize {
        match self.regions.get(region.0 as usize).map(|r| &r.state) {
            Some(RegionState::Range { items, .. }) | Some(RegionState::Collection { items, .. }) => {
                items.len()
            }
            _ => 0,
        }
    }

    /// Root nodes of each item of a repetition, in order.
    pub fn item_nodes(&self, region: RegionId) -> Vec<Vec<NodeHandle>> {
        match self.regions.get(region.0 as usize).map(|r| &r.state) {
            Some(RegionState::Range { items, .. }) | Some(RegionState::Collection { items, .. }) => {
                items.iter().map(|i| i.nodes.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Components built by the items of a repetition, in item order.
    pub fn item_children(&self, region: RegionId) -> Vec<&Instance> {
        match self.regions.get(region.0 as usize).map(|r| &r.state) {
            Some(RegionState::Range { items, .. }) | Some(RegionState::Collection { items, .. }) => {
                items
                    .iter()
                    .flat_map(|i| i.children.iter().map(|c| &c.link.instance))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn child(&self, id: ChildId) -> Option<&Instance> {
        self.children
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .map(|link| &link.instance)
    }

    /// The instance a component-typed field points at.
    pub fn member(&self, field: &str) -> Option<&Instance> {
        let handle = self.fields.get(field).and_then(as_instance_ref)?;
        self.members.get(&handle).map(|link| &link.instance)
    }

    pub fn route_child(&self) -> Option<&Instance> {
        self.route.child.as_deref()
    }

    pub fn current_route(&self) -> Option<&str> {
        self.route.current.as_deref()
    }

    fn region(&self, id: RegionId) -> RuntimeResult<&RegionRuntime> {
        self.regions
            .get(id.0 as usize)
            .ok_or(RuntimeError::UnknownRegion(id.0))
    }

    fn region_mut(&mut self, id: RegionId) -> RuntimeResult<&mut RegionRuntime> {
        self.regions
            .get_mut(id.0 as usize)
            .ok_or(RuntimeError::UnknownRegion(id.0))
    }

    fn items_mut(&mut self, id: RegionId) -> RuntimeResult<&mut Vec<Item>> {
        match &mut self.region_mut(id)?.state {
            RegionState::Range { items, .. } | RegionState::Collection { items, .. } => Ok(items),
            RegionState::Conditional(_) => Err(RuntimeError::UnknownRegion(id.0)),
        }
    }

    fn guarded<'e, T>(
        &mut self,
        env: &mut Env<'e>,
        f: impl FnOnce(&mut Self, &mut Env<'e>) -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        env.begin();
        let result = f(self, env);
        env.end();
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MOUNT AND TEARDOWN
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn mount(
        &mut self,
        env: &mut Env<'_>,
        parent: NodeHandle,
        before: Option<NodeHandle>,
    ) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        self.mount_point = Some((parent, before));
        self.guarded(env, |this, env| {
            this.create(env, &plan.view.mount_ops, &mut Locals::new(), &mut Site::Root)?;
            this.rebind(env);
            Ok(())
        })?;
        if plan.method(MOUNT_METHOD).is_some() {
            self.call_method(env, MOUNT_METHOD, Vec::new())?;
        }
        Ok(())
    }

    /// Removes every node this instance put in the tree, keeping its state so
    /// it can be mounted again.
    pub fn remove_view(&mut self, env: &mut Env<'_>) {
        let plan = Rc::clone(&self.plan);
        for region in plan.view.regions.iter().filter(|r| r.owner().is_none()) {
            match region {
                StructuralRegion::Conditional(c) => self.teardown_conditional(env, c.id),
                StructuralRegion::Repetition(r) => self.clear_repetition(env, r.id),
            }
            if let Some(rt) = self.regions.get_mut(region.id().0 as usize) {
                rt.parent = None;
                rt.anchor = None;
            }
        }
        if let Some(mut child) = self.route.child.take() {
            child.destroy(env);
        }
        self.route.parent = None;
        self.route.anchor = None;
        for (index, info) in plan.view.children.iter().enumerate() {
            if info.owner.is_some() {
                continue;
            }
            if let Some(mut link) = self.children.get_mut(index).and_then(Option::take) {
                link.instance.destroy(env);
            }
        }
        for node in self.nodes.iter_mut().filter_map(Option::take) {
            env.ctx.deregister(node);
        }
        for handle in std::mem::take(&mut self.root_members) {
            if let Some(link) = self.members.get_mut(&handle) {
                link.instance.remove_view(env);
            }
        }
        for node in std::mem::take(&mut self.roots) {
            env.host.remove(node);
        }
        self.mount_point = None;
        self.installed_wires.clear();
    }

    pub fn destroy(&mut self, env: &mut Env<'_>) {
        self.remove_view(env);
        for (_, mut link) in std::mem::take(&mut self.members) {
            link.instance.destroy(env);
        }
        tracing::debug!(component = %self.plan.name, id = self.id.0, "destroyed instance");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CREATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn create(
        &mut self,
        env: &mut Env<'_>,
        ops: &[CreateOp],
        locals: &mut Locals,
        site: &mut Site<'_>,
    ) -> RuntimeResult<()> {
        for op in ops {
            self.create_op(env, op, locals, site)?;
        }
        Ok(())
    }

    fn resolve_parent(
        &self,
        parent: Parent,
        site: &Site<'_>,
    ) -> RuntimeResult<(NodeHandle, Option<NodeHandle>)> {
        match parent {
            Parent::Mount => self.mount_point.ok_or(RuntimeError::NotMounted),
            Parent::Node(NodeRef::Slot(slot)) => self
                .node(slot.0)
                .map(|n| (n, None))
                .ok_or(RuntimeError::MissingNode(slot.0)),
            Parent::Node(NodeRef::Local(local)) => match site {
                Site::Item(build) => build
                    .locals
                    .get(local as usize)
                    .copied()
                    .flatten()
                    .map(|n| (n, None))
                    .ok_or(RuntimeError::MissingNode(local)),
                _ => Err(RuntimeError::MissingNode(local)),
            },
            Parent::Region(region) => {
                let rt = self.region(region)?;
                rt.parent
                    .map(|p| (p, rt.anchor))
                    .ok_or(RuntimeError::NotMounted)
            }
        }
    }

    fn store_node(&mut self, site: &mut Site<'_>, node: NodeRef, handle: NodeHandle) {
        match node {
            NodeRef::Slot(slot) => {
                if let Some(entry) = self.nodes.get_mut(slot.0 as usize) {
                    *entry = Some(handle);
                }
            }
            NodeRef::Local(local) => {
                if let Site::Item(build) = site {
                    if let Some(entry) = build.locals.get_mut(local as usize) {
                        *entry = Some(handle);
                    }
                }
            }
        }
    }

    /// Nodes placed directly at the mount point or directly in an item.
    fn track_node(&mut self, site: &mut Site<'_>, parent: Parent, handle: NodeHandle) {
        match (site, parent) {
            (Site::Root, Parent::Mount) => self.roots.push(handle),
            (Site::Item(build), Parent::Region(_)) => build.item.nodes.push(handle),
            _ => {}
        }
    }

    fn create_op(
        &mut self,
        env: &mut Env<'_>,
        op: &CreateOp,
        locals: &mut Locals,
        site: &mut Site<'_>,
    ) -> RuntimeResult<()> {
        match op {
            CreateOp::Element {
                node,
                tag,
                parent,
                attributes,
                content,
                handlers,
            } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let handle = env.host.create_element(tag);
                for attr in attributes {
                    let value = self.eval(env, &attr.value, locals)?;
                    if attr.property {
                        env.host.set_property(handle, &attr.name, &value);
                    } else {
                        env.host.set_attribute(handle, &attr.name, &to_text(&value));
                    }
                }
                if let Some(content) = content {
                    let value = to_text(&self.eval(env, &content.value, locals)?);
                    match content.kind {
                        ContentKind::Text => env.host.set_text(handle, &value),
                        ContentKind::Markup => env.host.set_markup(handle, &value),
                    }
                }
                if let Site::Item(build) = site {
                    for handler in handlers {
                        env.ctx.table_mut(handler.kind).set(
                            handle,
                            DispatchEntry::Item {
                                instance: self.id,
                                call: handler.call.clone(),
                                scope: locals.snapshot(),
                            },
                        );
                        build.item.handlers.push((handler.kind, handle));
                    }
                }
                env.host.insert(p, handle, before);
                self.store_node(site, *node, handle);
                self.track_node(site, *parent, handle);
            }
            CreateOp::Text {
                node,
                parent,
                value,
            } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let text = to_text(&self.eval(env, value, locals)?);
                let handle = env.host.create_text(&text);
                env.host.insert(p, handle, before);
                if let Some(node) = node {
                    self.store_node(site, *node, handle);
                }
                self.track_node(site, *parent, handle);
            }
            CreateOp::Child {
                child,
                component,
                props,
                parent,
            } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let plan = env
                    .program
                    .get(component)
                    .cloned()
                    .ok_or_else(|| RuntimeError::UnknownComponent(component.clone()))?;
                let values = self.eval_props(env, props, locals)?;
                match child {
                    ChildRef::Field(id) => {
                        let mut link = Link::new(env, plan, values)?;
                        link.instance.mount(env, p, before)?;
                        let stale = link.drain();
                        if !stale.is_empty() {
                            tracing::trace!(child = id.0, count = stale.len(), "dropped notices from mount");
                        }
                        if let Some(entry) = self.children.get_mut(id.0 as usize) {
                            *entry = Some(link);
                        }
                    }
                    ChildRef::Item => {
                        let mut link = Link::new(env, plan, values)?;
                        link.instance.mount(env, p, before)?;
                        link.drain();
                        match site {
                            Site::Item(build) => build.item.children.push(ItemChild {
                                link,
                                source: ItemSource {
                                    region: build.region,
                                    props: props.clone(),
                                    scope: locals.snapshot(),
                                },
                            }),
                            _ => link.instance.destroy(env),
                        }
                    }
                }
            }
            CreateOp::MemberRender { member, parent } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let value = self.eval(env, member, locals)?;
                let handle = as_instance_ref(&value).ok_or_else(|| {
                    RuntimeError::TypeMismatch(format!("{} is not a component instance", value))
                })?;
                let link = self
                    .members
                    .get_mut(&handle)
                    .ok_or_else(|| RuntimeError::UnknownVariable(format!("member #{}", handle)))?;
                link.instance.mount(env, p, before)?;
                link.drain();
                match site {
                    Site::Root => self.root_members.push(handle),
                    Site::Item(build) => build.item.views.push(handle),
                    Site::Branch => {}
                }
            }
            CreateOp::Region { region, parent } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let anchor = env.host.create_anchor();
                env.host.insert(p, anchor, before);
                let rt = self.region_mut(*region)?;
                rt.parent = Some(p);
                rt.anchor = Some(anchor);
                self.track_node(site, *parent, anchor);
                self.sync_region(env, *region)?;
            }
            CreateOp::RouteAnchor { parent } => {
                let (p, before) = self.resolve_parent(*parent, site)?;
                let anchor = env.host.create_anchor();
                env.host.insert(p, anchor, before);
                self.route.parent = Some(p);
                self.route.anchor = Some(anchor);
                self.track_node(site, *parent, anchor);
                self.sync_route(env)?;
            }
            CreateOp::Conditional {
                condition,
                then_ops,
                else_ops,
            } => {
                let ops = if truthy(&self.eval(env, condition, locals)?) {
                    then_ops
                } else {
                    else_ops
                };
                self.create(env, ops, locals, site)?;
            }
            CreateOp::Range {
                var,
                start,
                end,
                ops,
            } => {
                let start = as_int(&self.eval(env, start, locals)?)?;
                let end = as_int(&self.eval(env, end, locals)?)?;
                for i in start..end {
                    locals.push();
                    locals.declare(var, Value::from(i));
                    let result = self.create(env, ops, locals, site);
                    locals.pop();
                    result?;
                }
            }
            CreateOp::Each { var, source, ops } => {
                let entries = self.eval_collection(env, source, locals)?;
                for entry in entries {
                    locals.push();
                    locals.declare(var, entry);
                    let result = self.create(env, ops, locals, site);
                    locals.pop();
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Props for a constructed child. Method callbacks are routed through
    /// notices and run only when the child calls them, so they carry no value.
    fn eval_props(
        &mut self,
        env: &mut Env<'_>,
        props: &[PropInit],
        locals: &mut Locals,
    ) -> RuntimeResult<Vec<(String, Value)>> {
        let mut values = Vec::with_capacity(props.len());
        for prop in props {
            let plan = &self.plan;
            if prop
                .method_callback(|name| plan.method(name).is_some() && !locals.contains(name))
                .is_some()
            {
                continue;
            }
            values.push((prop.name.clone(), self.eval(env, &prop.value, locals)?));
        }
        Ok(values)
    }

    fn eval_collection(
        &mut self,
        env: &mut Env<'_>,
        source: &Expr,
        locals: &mut Locals,
    ) -> RuntimeResult<Vec<Value>> {
        match self.eval(env, source, locals)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(RuntimeError::TypeMismatch(format!(
                "{} is not a collection",
                other
            ))),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn sync_region(&mut self, env: &mut Env<'_>, region: RegionId) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        match plan.view.region(region) {
            Some(StructuralRegion::Conditional(_)) => self.sync_conditional(env, region),
            Some(StructuralRegion::Repetition(_)) => self.sync_repetition(env, region),
            None => Err(RuntimeError::UnknownRegion(region.0)),
        }
    }

    pub fn sync_conditional(&mut self, env: &mut Env<'_>, id: RegionId) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(region) = plan.view.conditional(id) else {
            return Err(RuntimeError::UnknownRegion(id.0));
        };
        if self.region(id)?.anchor.is_none() {
            return Ok(());
        }
        let value = truthy(&self.eval(env, &region.condition, &mut Locals::new())?);
        let transition = match &mut self.region_mut(id)?.state {
            RegionState::Conditional(state) => state.transition(value),
            _ => return Err(RuntimeError::UnknownRegion(id.0)),
        };
        let (from, to) = match transition {
            Transition::Unchanged => return Ok(()),
            Transition::Mount(to) => (None, to),
            Transition::Flip { from, to } => (Some(from), to),
        };
        tracing::trace!(region = id.0, ?to, "conditional resync");
        self.guarded(env, |this, env| {
            if let Some(from) = from {
                this.teardown_branch(env, region, from);
            }
            this.create(env, &region.branch(to).ops, &mut Locals::new(), &mut Site::Branch)?;
            this.rebind(env);
            Ok(())
        })
    }

    fn teardown_branch(&mut self, env: &mut Env<'_>, region: &ConditionalRegion, branch: Branch) {
        let owns = &region.branch(branch).owns;
        let nodes: Vec<NodeHandle> = owns
            .slots
            .iter()
            .filter_map(|slot| self.nodes.get_mut(slot.0 as usize).and_then(Option::take))
            .collect();
        for node in &nodes {
            env.ctx.deregister(*node);
        }
        for node in nodes {
            env.host.remove(node);
        }
        for child in &owns.children {
            if let Some(mut link) = self.children.get_mut(child.0 as usize).and_then(Option::take) {
                link.instance.destroy(env);
            }
        }
        for member in &owns.member_renders {
            let handle = self.fields.get(member).and_then(as_instance_ref);
            if let Some(link) = handle.and_then(|h| self.members.get_mut(&h)) {
                link.instance.remove_view(env);
            }
        }
        for nested in &owns.repetitions {
            self.clear_repetition(env, *nested);
            self.drop_anchor(env, *nested);
        }
        for nested in &owns.conditionals {
            self.teardown_conditional(env, *nested);
            self.drop_anchor(env, *nested);
        }
    }

    /// Unmounts a conditional: only its active branch is torn down.
    fn teardown_conditional(&mut self, env: &mut Env<'_>, id: RegionId) {
        let plan = Rc::clone(&self.plan);
        let Some(region) = plan.view.conditional(id) else {
            return;
        };
        let active = match self.regions.get_mut(id.0 as usize).map(|r| &mut r.state) {
            Some(RegionState::Conditional(state)) => state.clear(),
            _ => None,
        };
        if let Some(branch) = active {
            self.teardown_branch(env, region, branch);
        }
    }

    fn drop_anchor(&mut self, env: &mut Env<'_>, id: RegionId) {
        if let Some(rt) = self.regions.get_mut(id.0 as usize) {
            rt.parent = None;
            if let Some(anchor) = rt.anchor.take() {
                env.host.remove(anchor);
            }
        }
    }

    pub fn sync_repetition(&mut self, env: &mut Env<'_>, id: RegionId) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(region) = plan.view.repetition(id) else {
            return Err(RuntimeError::UnknownRegion(id.0));
        };
        if self.region(id)?.anchor.is_none() {
            return Ok(());
        }
        match &region.form {
            RepetitionForm::Range { start, end } => {
                let start = as_int(&self.eval(env, start, &mut Locals::new())?)?;
                let end = as_int(&self.eval(env, end, &mut Locals::new())?)?;
                let count = end.saturating_sub(start).max(0) as usize;
                let resize = match &mut self.region_mut(id)?.state {
                    RegionState::Range { state, .. } => state.resize(count),
                    _ => return Err(RuntimeError::UnknownRegion(id.0)),
                };
                tracing::trace!(region = id.0, ?resize, "range resync");
                if resize == Resize::Unchanged {
                    return Ok(());
                }
                self.guarded(env, |this, env| {
                    match resize {
                        Resize::Unchanged => {}
                        Resize::Grow(range) => {
                            for n in range {
                                let value = Value::from(start + n as i64);
                                let item = this.create_item(env, region, value)?;
                                this.items_mut(id)?.push(item);
                            }
                        }
                        Resize::Shrink(range) => {
                            for _ in range {
                                if let Some(item) = this.items_mut(id)?.pop() {
                                    this.destroy_item(env, item);
                                }
                            }
                        }
                    }
                    this.rebind(env);
                    Ok(())
                })
            }
            RepetitionForm::Collection { source, .. } => {
                let entries = self.eval_collection(env, source, &mut Locals::new())?;
                let rebuild = match &mut self.region_mut(id)?.state {
                    RegionState::Collection { state, .. } => state.rebuild(entries.len()),
                    _ => return Err(RuntimeError::UnknownRegion(id.0)),
                };
                tracing::trace!(
                    region = id.0,
                    destroyed = rebuild.destroyed,
                    created = rebuild.created,
                    "collection rebuild"
                );
                self.guarded(env, |this, env| {
                    let old = std::mem::take(this.items_mut(id)?);
                    for item in old.into_iter().rev() {
                        this.destroy_item(env, item);
                    }
                    for entry in entries {
                        let item = this.create_item(env, region, entry)?;
                        this.items_mut(id)?.push(item);
                    }
                    this.rebind(env);
                    Ok(())
                })
            }
        }
    }

    /// Creates the item for the last element of the source, leaving every
    /// existing item alone.
    pub fn append_repetition(&mut self, env: &mut Env<'_>, id: RegionId) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(region) = plan.view.repetition(id) else {
            return Err(RuntimeError::UnknownRegion(id.0));
        };
        let RepetitionForm::Collection { source, .. } = &region.form else {
            return self.sync_repetition(env, id);
        };
        if self.region(id)?.anchor.is_none() {
            return Ok(());
        }
        let entries = self.eval_collection(env, source, &mut Locals::new())?;
        let Some(last) = entries.last().cloned() else {
            return Ok(());
        };
        if let RegionState::Collection { state, .. } = &mut self.region_mut(id)?.state {
            state.append();
        }
        tracing::trace!(region = id.0, "append patch");
        self.guarded(env, |this, env| {
            let item = this.create_item(env, region, last)?;
            this.items_mut(id)?.push(item);
            Ok(())
        })
    }

    fn clear_repetition(&mut self, env: &mut Env<'_>, id: RegionId) {
        let items = match self.regions.get_mut(id.0 as usize).map(|r| &mut r.state) {
            Some(RegionState::Range { state, items }) => {
                state.clear();
                std::mem::take(items)
            }
            Some(RegionState::Collection { state, items }) => {
                state.clear();
                std::mem::take(items)
            }
            _ => return,
        };
        for item in items.into_iter().rev() {
            self.destroy_item(env, item);
        }
    }

    fn create_item(
        &mut self,
        env: &mut Env<'_>,
        region: &RepetitionRegion,
        value: Value,
    ) -> RuntimeResult<Item> {
        let mut locals = Locals::from_bindings(vec![(region.var.clone(), value)]);
        let mut build = ItemBuild {
            region: region.id,
            item: Item::default(),
            locals: vec![None; region.template.locals as usize],
        };
        self.create(env, &region.template.ops, &mut locals, &mut Site::Item(&mut build))?;
        Ok(build.item)
    }

    fn destroy_item(&mut self, env: &mut Env<'_>, item: Item) {
        for (kind, node) in item.handlers {
            env.ctx.table_mut(kind).delete(node);
        }
        for mut child in item.children {
            child.link.instance.destroy(env);
        }
        for handle in item.views {
            if let Some(link) = self.members.get_mut(&handle) {
                link.instance.remove_view(env);
            }
        }
        for node in item.nodes {
            env.host.remove(node);
        }
    }

    /// Re-registers slot listeners from the masks and re-issues wires.
    fn rebind(&mut self, env: &mut Env<'_>) {
        let plan = Rc::clone(&self.plan);
        for dispatch in &plan.dispatch {
            for slot in dispatch.mask.slots() {
                if let Some(node) = self.node(slot.0) {
                    env.ctx.table_mut(dispatch.kind).set(
                        node,
                        DispatchEntry::Slot {
                            instance: self.id,
                            slot,
                        },
                    );
                }
            }
        }
        self.installed_wires = plan
            .wiring
            .wires
            .iter()
            .enumerate()
            .filter(|(_, wire)| match &wire.source {
                WireSource::Member { field, .. } => {
                    self.fields.get(field).and_then(as_instance_ref).is_some()
                }
                WireSource::Child { child, .. } => self.child(*child).is_some(),
                WireSource::Item { .. } => false,
            })
            .map(|(index, _)| index)
            .collect();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ROUTER
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn navigate(&mut self, env: &mut Env<'_>, path: &str) -> RuntimeResult<()> {
        if self.route.current.as_deref() == Some(path) {
            return Ok(());
        }
        self.route.current = Some(path.to_string());
        env.host.push_history(path);
        self.sync_route(env)
    }

    fn sync_route(&mut self, env: &mut Env<'_>) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(router) = &plan.router else {
            return Ok(());
        };
        let (Some(parent), Some(anchor)) = (self.route.parent, self.route.anchor) else {
            return Ok(());
        };
        self.guarded(env, |this, env| {
            if let Some(mut child) = this.route.child.take() {
                child.destroy(env);
            }
            let path = this
                .route
                .current
                .clone()
                .or_else(|| router.initial_path().map(str::to_string))
                .unwrap_or_else(|| "/".to_string());
            this.route.current = Some(path.clone());
            let Some(route) = router.resolve(&path) else {
                tracing::debug!(%path, "no route matched");
                return Ok(());
            };
            let child_plan = env
                .program
                .get(&route.component)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownComponent(route.component.clone()))?;
            let props = this.eval_props(env, &route.props, &mut Locals::new())?;
            let mut child = Instance::new(env, child_plan, props, None)?;
            child.mount(env, parent, Some(anchor))?;
            this.route.child = Some(Box::new(child));
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Runs this instance's own `tick`, then forwards the frame to field
    /// children, members, item children and the route child, in that order.
    pub fn tick(&mut self, env: &mut Env<'_>, dt: f64) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(tick) = &plan.tick else {
            return Ok(());
        };
        self.guarded(env, |this, env| {
            if tick.user {
                let args = if tick.takes_dt {
                    vec![Value::from(dt)]
                } else {
                    Vec::new()
                };
                this.call_method(env, TICK_METHOD, args)?;
            }
            for id in &tick.children {
                let notices = match this.children.get_mut(id.0 as usize).and_then(Option::as_mut) {
                    Some(link) => {
                        link.instance.tick(env, dt)?;
                        link.drain()
                    }
                    None => continue,
                };
                for notice in notices {
                    this.handle_child_notice(env, *id, notice)?;
                }
            }
            if !tick.members.is_empty() {
                let handles: Vec<u64> = this.members.keys().copied().collect();
                for handle in handles {
                    let notices = match this.members.get_mut(&handle) {
                        Some(link) => {
                            link.instance.tick(env, dt)?;
                            link.drain()
                        }
                        None => continue,
                    };
                    for notice in notices {
                        this.handle_member_notice(env, handle, notice)?;
                    }
                }
            }
            let mut pending = Vec::new();
            for region in &tick.item_regions {
                for item in this.items_mut(*region)?.iter_mut() {
                    for child in item.children.iter_mut() {
                        child.link.instance.tick(env, dt)?;
                        let notices = child.link.drain();
                        if !notices.is_empty() {
                            let name = child.link.instance.name().to_string();
                            pending.push((name, child.source.clone(), notices));
                        }
                    }
                }
            }
            for (component, source, notices) in pending {
                for notice in notices {
                    this.handle_item_notice(env, &component, &source, notice)?;
                }
            }
            if tick.route {
                if let Some(child) = this.route.child.as_mut() {
                    child.tick(env, dt)?;
                }
            }
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // METHODS AND EPILOGUES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Runs a method and then its epilogue, inside one nesting level.
    pub fn call_method(
        &mut self,
        env: &mut Env<'_>,
        name: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let plan = Rc::clone(&self.plan);
        let method = plan.method(name).ok_or_else(|| RuntimeError::UnknownMethod {
            component: plan.name.clone(),
            method: name.to_string(),
        })?;
        let bindings = method
            .params
            .iter()
            .cloned()
            .zip(args.into_iter().chain(std::iter::repeat(Value::Null)))
            .collect();
        let mut locals = Locals::from_bindings(bindings);
        tracing::trace!(component = %plan.name, method = name, "invoke");
        self.guarded(env, |this, env| {
            let flow = this.exec_block(env, method, &method.body, &mut locals)?;
            this.run_steps(env, &method.epilogue)?;
            Ok(match flow {
                Flow::Return(value) => value,
                Flow::Normal => Value::Null,
            })
        })
    }

    fn run_steps(&mut self, env: &mut Env<'_>, steps: &[EpilogueStep]) -> RuntimeResult<()> {
        for step in steps {
            match step {
                EpilogueStep::Update { procedure } => self.run_procedure(env, *procedure)?,
                EpilogueStep::RefreshChild { child, param } => {
                    self.refresh_child(env, *child, param)?
                }
                EpilogueStep::SyncConditional { region } => self.sync_conditional(env, *region)?,
                EpilogueStep::SyncRepetition { region } => self.sync_repetition(env, *region)?,
                EpilogueStep::NotifyParent { var, callback } => {
                    let value = self.fields.get(var).cloned().unwrap_or(Value::Null);
                    self.notify_parent(callback, var, value);
                }
            }
        }
        Ok(())
    }

    fn run_procedure(&mut self, env: &mut Env<'_>, id: ProcId) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(procedure) = plan.procedure(id) else {
            return Ok(());
        };
        if let Some(owner) = procedure.guard {
            if self.branch(owner.region) != Some(owner.branch) {
                return Ok(());
            }
        }
        let Some(node) = self.node(procedure.slot.0) else {
            return Ok(());
        };
        let value = self.eval(env, &procedure.source, &mut Locals::new())?;
        match &procedure.kind {
            BindingKind::Attribute { name } => env.host.set_attribute(node, name, &to_text(&value)),
            BindingKind::Property { name } => env.host.set_property(node, name, &value),
            BindingKind::Text => env.host.set_text(node, &to_text(&value)),
            BindingKind::Markup => env.host.set_markup(node, &to_text(&value)),
        }
        Ok(())
    }

    fn notify_parent(&mut self, callback: &str, var: &str, value: Value) {
        if let Some(notify) = self.notify.as_mut() {
            notify(Notice {
                callback: callback.to_string(),
                var: var.to_string(),
                value,
            });
        }
    }

    /// Pushes the current value of a reference prop into the child and runs
    /// the child's refresh for that param.
    fn refresh_child(&mut self, env: &mut Env<'_>, id: ChildId, param: &str) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(prop) = plan
            .view
            .children
            .get(id.0 as usize)
            .and_then(|info| info.props.iter().find(|p| p.name == param))
        else {
            return Ok(());
        };
        if self.child(id).is_none() {
            return Ok(());
        }
        let value = self.eval(env, &prop.value, &mut Locals::new())?;
        let notices = match self.children.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(link) => {
                link.instance.refresh(env, param, value)?;
                link.drain()
            }
            None => Vec::new(),
        };
        for notice in notices {
            self.handle_child_notice(env, id, notice)?;
        }
        Ok(())
    }

    /// Called by the owner after it changed storage this instance reads
    /// through `param`.
    pub fn refresh(&mut self, env: &mut Env<'_>, param: &str, value: Value) -> RuntimeResult<()> {
        self.fields.insert(param.to_string(), value);
        let plan = Rc::clone(&self.plan);
        let Some(refresh) = plan.wiring.refresh(param) else {
            return Ok(());
        };
        self.guarded(env, |this, env| this.run_steps(env, &refresh.steps))
    }

    fn handle_child_notice(
        &mut self,
        env: &mut Env<'_>,
        child: ChildId,
        notice: Notice,
    ) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let wire = plan.wiring.wires.iter().enumerate().find(|(_, w)| {
            w.callback == notice.callback
                && matches!(&w.source, WireSource::Child { child: c, .. } if *c == child)
        });
        if let Some((index, wire)) = wire {
            if self.installed_wires.contains(&index) {
                if let WireSource::Child { var, .. } = &wire.source {
                    self.fields.insert(var.clone(), notice.value);
                }
                return self.guarded(env, |this, env| this.run_steps(env, &wire.steps));
            }
        }
        let Some(info) = plan.view.children.get(child.0 as usize) else {
            return Ok(());
        };
        self.run_prop_callback(env, &info.props, &notice.callback, &mut Locals::new())
    }

    /// A notice from a component built by a repetition item. Reference writes
    /// go through the item wire; anything else is a callback prop.
    fn handle_item_notice(
        &mut self,
        env: &mut Env<'_>,
        component: &str,
        source: &ItemSource,
        notice: Notice,
    ) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let written = source
            .props
            .iter()
            .find(|p| p.reference && callback_name(&p.name) == notice.callback);
        if let Some(prop) = written {
            let wire = match &prop.value {
                Expr::Ident { name } => {
                    plan.wiring
                        .wire_for_item(source.region, component, &prop.name, name)
                }
                _ => None,
            };
            let Some(wire) = wire else {
                tracing::trace!(param = %prop.name, "item reference is loop-local");
                return Ok(());
            };
            if let WireSource::Item { var, .. } = &wire.source {
                self.fields.insert(var.clone(), notice.value);
            }
            return self.guarded(env, |this, env| this.run_steps(env, &wire.steps));
        }
        let mut locals = Locals::from_bindings(source.scope.clone());
        self.run_prop_callback(env, &source.props, &notice.callback, &mut locals)
    }

    /// `<Child onSave={save}/>`: the child invoking `onSave` calls `save` here.
    /// Call-form arguments are evaluated now, in the scope the child was built in.
    fn run_prop_callback(
        &mut self,
        env: &mut Env<'_>,
        props: &[PropInit],
        callback: &str,
        locals: &mut Locals,
    ) -> RuntimeResult<()> {
        let plan = Rc::clone(&self.plan);
        let Some(prop) = props.iter().find(|p| p.name == callback) else {
            return Ok(());
        };
        let Some((method, args)) = prop.method_callback(|name| plan.method(name).is_some()) else {
            return Ok(());
        };
        let args = self.eval_all(env, args, locals)?;
        self.call_method(env, method, args)?;
        Ok(())
    }

    fn handle_member_notice(
        &mut self,
        env: &mut Env<'_>,
        handle: u64,
        notice: Notice,
    ) -> RuntimeResult<()> {
        let Some(field) = self
            .fields
            .iter()
            .find(|(_, v)| as_instance_ref(v) == Some(handle))
            .map(|(name, _)| name.clone())
        else {
            return Ok(());
        };
        let plan = Rc::clone(&self.plan);
        let wire = plan.wiring.wires.iter().enumerate().find(|(_, w)| {
            w.callback == notice.callback
                && matches!(&w.source, WireSource::Member { field: f, .. } if *f == field)
        });
        match wire {
            Some((index, wire)) if self.installed_wires.contains(&index) => {
                self.guarded(env, |this, env| this.run_steps(env, &wire.steps))
            }
            _ => Ok(()),
        }
    }

    fn call_member(
        &mut self,
        env: &mut Env<'_>,
        handle: u64,
        method: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let (result, notices) = {
            let link = self
                .members
                .get_mut(&handle)
                .ok_or_else(|| RuntimeError::UnknownVariable(format!("member #{}", handle)))?;
            let result = link.instance.call_method(env, method, args)?;
            (result, link.drain())
        };
        for notice in notices {
            self.handle_member_notice(env, handle, notice)?;
        }
        Ok(result)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Routes an event to the instance that registered it. Returns false when
    /// that instance is not in this subtree.
    pub fn deliver(
        &mut self,
        env: &mut Env<'_>,
        kind: EventKind,
        entry: &DispatchEntry,
        payload: &Value,
    ) -> RuntimeResult<bool> {
        let target = entry.instance();
        if self.id == target {
            self.handle_event(env, kind, entry, payload)?;
            return Ok(true);
        }

        for index in 0..self.children.len() {
            let Some(link) = self.children[index].as_mut() else {
                continue;
            };
            if !link.instance.deliver(env, kind, entry, payload)? {
                continue;
            }
            let notices = link.drain();
            for notice in notices {
                self.handle_child_notice(env, ChildId(index as u32), notice)?;
            }
            return Ok(true);
        }

        let handles: Vec<u64> = self.members.keys().copied().collect();
        for handle in handles {
            let Some(link) = self.members.get_mut(&handle) else {
                continue;
            };
            if !link.instance.deliver(env, kind, entry, payload)? {
                continue;
            }
            let notices = link.drain();
            for notice in notices {
                self.handle_member_notice(env, handle, notice)?;
            }
            return Ok(true);
        }

        let mut delivered = None;
        'regions: for region in &mut self.regions {
            let items = match &mut region.state {
                RegionState::Range { items, .. } | RegionState::Collection { items, .. } => items,
                RegionState::Conditional(_) => continue,
            };
            for item in items.iter_mut() {
                for child in item.children.iter_mut() {
                    if child.link.instance.deliver(env, kind, entry, payload)? {
                        delivered = Some((
                            child.link.instance.name().to_string(),
                            child.source.clone(),
                            child.link.drain(),
                        ));
                        break 'regions;
                    }
                }
            }
        }
        if let Some((component, source, notices)) = delivered {
            for notice in notices {
                self.handle_item_notice(env, &component, &source, notice)?;
            }
            return Ok(true);
        }

        if let Some(child) = self.route.child.as_mut() {
            return child.deliver(env, kind, entry, payload);
        }
        Ok(false)
    }

    fn handle_event(
        &mut self,
        env: &mut Env<'_>,
        kind: EventKind,
        entry: &DispatchEntry,
        payload: &Value,
    ) -> RuntimeResult<()> {
        match entry {
            DispatchEntry::Slot { slot, .. } => {
                let plan = Rc::clone(&self.plan);
                let Some(case) = plan.dispatch_for(kind).and_then(|d| d.case(*slot)) else {
                    return Ok(());
                };
                let args = if case.call.pass_event {
                    vec![payload.clone()]
                } else {
                    self.eval_all(env, &case.call.args, &mut Locals::new())?
                };
                self.call_method(env, &case.call.method, args)?;
            }
            DispatchEntry::Item { call, scope, .. } => {
                let args = if call.pass_event {
                    vec![payload.clone()]
                } else {
                    let mut locals = Locals::from_bindings(scope.clone());
                    self.eval_all(env, &call.args, &mut locals)?
                };
                self.call_method(env, &call.method, args)?;
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn exec_block(
        &mut self,
        env: &mut Env<'_>,
        method: &MethodPlan,
        body: &[Stmt],
        locals: &mut Locals,
    ) -> RuntimeResult<Flow> {
        locals.push();
        let mut flow = Flow::Normal;
        for stmt in body {
            match self.exec_stmt(env, method, stmt, locals) {
                Ok(Flow::Normal) => {}
                Ok(ret) => {
                    flow = ret;
                    break;
                }
                Err(e) => {
                    locals.pop();
                    return Err(e);
                }
            }
        }
        locals.pop();
        Ok(flow)
    }

    fn exec_stmt(
        &mut self,
        env: &mut Env<'_>,
        method: &MethodPlan,
        stmt: &Stmt,
        locals: &mut Locals,
    ) -> RuntimeResult<Flow> {
        match stmt {
            Stmt::Let { name, init } => {
                let value = match init {
                    Some(init) => self.eval(env, init, locals)?,
                    None => Value::Null,
                };
                locals.declare(name, value);
            }
            Stmt::Assign { target, op, value } => {
                let value = self.eval(env, value, locals)?;
                let path = self.resolve_place(env, target, locals)?;
                let slot = self.place_mut(&path, locals)?;
                *slot = match op.binary() {
                    Some(op) => binary(op, slot, &value)?,
                    None => value,
                };
            }
            Stmt::Increment { target } | Stmt::Decrement { target } => {
                let op = if matches!(stmt, Stmt::Increment { .. }) {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let path = self.resolve_place(env, target, locals)?;
                let slot = self.place_mut(&path, locals)?;
                *slot = binary(op, slot, &Value::from(1))?;
            }
            Stmt::Expr { expr } => {
                self.eval(env, expr, locals)?;
                if let Some(var) = statement_append(expr).filter(|v| !locals.contains(v)) {
                    if let Some(patch) = method.append_patch(var) {
                        for region in &patch.regions {
                            self.append_repetition(env, *region)?;
                        }
                    }
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let body = if truthy(&self.eval(env, condition, locals)?) {
                    then_branch
                } else {
                    else_branch
                };
                return self.exec_block(env, method, body, locals);
            }
            Stmt::ForRange {
                var,
                start,
                end,
                body,
            } => {
                let start = as_int(&self.eval(env, start, locals)?)?;
                let end = as_int(&self.eval(env, end, locals)?)?;
                for i in start..end {
                    locals.push();
                    locals.declare(var, Value::from(i));
                    let flow = self.exec_block(env, method, body, locals);
                    locals.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::ForEach { var, source, body } => {
                for entry in self.eval_collection(env, source, locals)? {
                    locals.push();
                    locals.declare(var, entry);
                    let flow = self.exec_block(env, method, body, locals);
                    locals.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Block { body } => return self.exec_block(env, method, body, locals),
            Stmt::Return { value } => {
                let value = match value {
                    Some(v) => self.eval(env, v, locals)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn resolve_place(
        &mut self,
        env: &mut Env<'_>,
        place: &Place,
        locals: &mut Locals,
    ) -> RuntimeResult<PlacePath> {
        match place {
            Place::Var { name } => Ok(PlacePath {
                root: name.clone(),
                segments: Vec::new(),
            }),
            Place::Field { object, field } => {
                let mut path = self.resolve_place(env, object, locals)?;
                path.segments.push(Segment::Field(field.clone()));
                Ok(path)
            }
            Place::Element { target, index } => {
                let mut path = self.resolve_place(env, target, locals)?;
                let index = as_index(&self.eval(env, index, locals)?)?;
                path.segments.push(Segment::Index(index));
                Ok(path)
            }
        }
    }

    /// The place an expression denotes, when it is a variable path.
    fn resolve_expr_place(
        &mut self,
        env: &mut Env<'_>,
        expr: &Expr,
        locals: &mut Locals,
    ) -> RuntimeResult<Option<PlacePath>> {
        match expr {
            Expr::Ident { name } => Ok(Some(PlacePath {
                root: name.clone(),
                segments: Vec::new(),
            })),
            Expr::Member { object, field } => {
                let path = self.resolve_expr_place(env, object, locals)?;
                Ok(path.map(|mut p| {
                    p.segments.push(Segment::Field(field.clone()));
                    p
                }))
            }
            Expr::Index { target, index } => {
                let Some(mut path) = self.resolve_expr_place(env, target, locals)? else {
                    return Ok(None);
                };
                let index = as_index(&self.eval(env, index, locals)?)?;
                path.segments.push(Segment::Index(index));
                Ok(Some(path))
            }
            _ => Ok(None),
        }
    }

    fn place_mut<'v>(
        &'v mut self,
        path: &PlacePath,
        locals: &'v mut Locals,
    ) -> RuntimeResult<&'v mut Value> {
        let mut current = match locals.get_mut(&path.root) {
            Some(value) => value,
            None => self
                .fields
                .get_mut(&path.root)
                .ok_or_else(|| RuntimeError::UnknownVariable(path.root.clone()))?,
        };
        for segment in &path.segments {
            current = match segment {
                Segment::Field(field) => {
                    if current.is_null() {
                        *current = Value::Object(serde_json::Map::new());
                    }
                    match current {
                        Value::Object(map) => map.entry(field.clone()).or_insert(Value::Null),
                        _ => {
                            return Err(RuntimeError::TypeMismatch(format!(
                                "cannot write field `{}` of {}",
                                field, path.root
                            )))
                        }
                    }
                }
                Segment::Index(index) => match current {
                    Value::Array(items) => items.get_mut(*index).ok_or_else(|| {
                        RuntimeError::TypeMismatch(format!(
                            "index {} out of bounds in {}",
                            index, path.root
                        ))
                    })?,
                    _ => {
                        return Err(RuntimeError::TypeMismatch(format!(
                            "{} is not indexable",
                            path.root
                        )))
                    }
                },
            };
        }
        Ok(current)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn eval_all(
        &mut self,
        env: &mut Env<'_>,
        exprs: &[Expr],
        locals: &mut Locals,
    ) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(env, expr, locals)?);
        }
        Ok(values)
    }

    pub(crate) fn eval(
        &mut self,
        env: &mut Env<'_>,
        expr: &Expr,
        locals: &mut Locals,
    ) -> RuntimeResult<Value> {
        match expr {
            Expr::Int { value } => Ok(Value::from(*value)),
            Expr::Float { value } => Ok(serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            Expr::Bool { value } => Ok(Value::Bool(*value)),
            Expr::Str { value } => Ok(Value::String(value.clone())),
            Expr::Template { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(e) => out.push_str(&to_text(&self.eval(env, e, locals)?)),
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Ident { name } => locals
                .get(name)
                .or_else(|| self.fields.get(name))
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownVariable(name.clone())),
            Expr::Member { object, field } => {
                let object = self.eval(env, object, locals)?;
                self.read_member(&object, field)
            }
            Expr::Index { target, index } => {
                let target = self.eval(env, target, locals)?;
                let index = self.eval(env, index, locals)?;
                match &target {
                    Value::Array(items) => Ok(items
                        .get(as_index(&index)?)
                        .cloned()
                        .unwrap_or(Value::Null)),
                    Value::Object(map) => Ok(map.get(&to_text(&index)).cloned().unwrap_or(Value::Null)),
                    Value::String(s) => Ok(s
                        .chars()
                        .nth(as_index(&index)?)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Null)),
                    _ => Err(RuntimeError::TypeMismatch(format!("{} is not indexable", target))),
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(env, operand, locals)?;
                unary(*op, &value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(env, left, locals)?;
                match op {
                    BinaryOp::And if !truthy(&left) => Ok(Value::Bool(false)),
                    BinaryOp::Or if truthy(&left) => Ok(Value::Bool(true)),
                    _ => {
                        let right = self.eval(env, right, locals)?;
                        binary(*op, &left, &right)
                    }
                }
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(env, condition, locals)?) {
                    self.eval(env, then, locals)
                } else {
                    self.eval(env, otherwise, locals)
                }
            }
            Expr::Call { callee, args } => {
                let values = self.eval_all(env, args, locals)?;
                self.call(env, callee, values)
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => self.method_call(env, receiver, method, args, locals),
            Expr::Array { elements } => Ok(Value::Array(self.eval_all(env, elements, locals)?)),
        }
    }

    fn read_member(&self, object: &Value, field: &str) -> RuntimeResult<Value> {
        if let Some(handle) = as_instance_ref(object) {
            let link = self
                .members
                .get(&handle)
                .ok_or_else(|| RuntimeError::UnknownVariable(format!("member #{}", handle)))?;
            return Ok(link.instance.field(field).cloned().unwrap_or(Value::Null));
        }
        match object {
            Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
            Value::Array(_) | Value::String(_) if field == "length" => builtin(object, field, &[]),
            _ => Err(RuntimeError::TypeMismatch(format!(
                "{} has no field `{}`",
                object, field
            ))),
        }
    }

    fn call(&mut self, env: &mut Env<'_>, callee: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        if self.plan.method(callee).is_some() {
            return self.call_method(env, callee, args);
        }
        if self.plan.param(callee).map(|p| p.callback).unwrap_or(false) {
            self.notify_parent(callee, callee, Value::Null);
            return Ok(Value::Null);
        }
        if let Some(plan) = env.program.get(callee).cloned() {
            let props = plan.params.iter().map(|p| p.name.clone()).zip(args).collect();
            return self.construct_member(env, plan, props);
        }
        Err(RuntimeError::UnknownMethod {
            component: self.plan.name.clone(),
            method: callee.to_string(),
        })
    }

    fn method_call(
        &mut self,
        env: &mut Env<'_>,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        locals: &mut Locals,
    ) -> RuntimeResult<Value> {
        let values = self.eval_all(env, args, locals)?;
        if is_mutating_method(method) {
            if let Some(path) = self.resolve_expr_place(env, receiver, locals)? {
                let target = self.place_mut(&path, locals)?;
                if as_instance_ref(target).is_none() {
                    return mutate(target, method, values);
                }
            }
        }
        let object = self.eval(env, receiver, locals)?;
        if let Some(handle) = as_instance_ref(&object) {
            return self.call_member(env, handle, method, values);
        }
        builtin(&object, method, &values)
    }
}
