//! Headless execution of compiled components.
//!
//! The runtime interprets the same plans the JavaScript emitter renders:
//! creation ops build the initial tree, method epilogues push changes into
//! it, and events are resolved through per-kind dispatch tables keyed by
//! node. Tree work goes through [`RenderHost`]; [`MemoryHost`] keeps the
//! tree in memory so behaviour can be asserted directly.

pub mod context;
pub mod eval;
pub mod host;
pub mod instance;
pub mod regions;

pub use context::{DispatchEntry, DispatchTable, InstanceId, RenderContext};
pub use eval::{RuntimeError, RuntimeResult};
pub use host::{HostStats, MemoryHost, MemoryNode, MemoryNodeKind, NodeHandle, RenderHost};
pub use instance::{Env, Instance, Notice, ParentCallback, Program};

use serde_json::Value;

use crate::events::EventKind;

/// A mounted root component together with its host and context.
///
/// Every public action is one nesting level, so the host is flushed exactly
/// once per action however many regions it resyncs.
pub struct Runtime<H: RenderHost> {
    program: Program,
    host: H,
    ctx: RenderContext,
    root: Option<Instance>,
}

impl<H: RenderHost> Runtime<H> {
    pub fn new(program: Program, host: H) -> Self {
        Self {
            program,
            host,
            ctx: RenderContext::new(),
            root: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn root(&self) -> Option<&Instance> {
        self.root.as_ref()
    }

    /// Constructs `component` and mounts it under `parent`, replacing any
    /// previous root.
    pub fn mount(
        &mut self,
        component: &str,
        props: Vec<(String, Value)>,
        parent: NodeHandle,
    ) -> RuntimeResult<InstanceId> {
        self.destroy();
        let plan = self
            .program
            .get(component)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownComponent(component.to_string()))?;
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        let result = Instance::new(&mut env, plan, props, None).and_then(|mut instance| {
            instance.mount(&mut env, parent, None)?;
            Ok(instance)
        });
        finish(&mut env, result).map(|instance| {
            let id = instance.id();
            tracing::info!(component, id = id.0, "mounted root");
            *root = Some(instance);
            id
        })
    }

    /// Calls a method on the root from outside, as a host integration would.
    pub fn invoke(&mut self, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let instance = root.as_mut().ok_or(RuntimeError::NotMounted)?;
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        let result = instance.call_method(&mut env, method, args);
        finish(&mut env, result)
    }

    /// Delivers an event of `kind` on `node`. Returns false when no handler
    /// is registered for that node.
    pub fn dispatch(
        &mut self,
        kind: EventKind,
        node: NodeHandle,
        payload: Value,
    ) -> RuntimeResult<bool> {
        let Some(entry) = self.ctx.table(kind).get(node).cloned() else {
            tracing::trace!(%kind, node = node.0, "no listener");
            return Ok(false);
        };
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let instance = root.as_mut().ok_or(RuntimeError::NotMounted)?;
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        let result = instance.deliver(&mut env, kind, &entry, &payload);
        finish(&mut env, result)
    }

    pub fn navigate(&mut self, path: &str) -> RuntimeResult<()> {
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let instance = root.as_mut().ok_or(RuntimeError::NotMounted)?;
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        let result = instance.navigate(&mut env, path);
        finish(&mut env, result)
    }

    /// Advances one frame by `dt`. A root that does not tick ignores it.
    pub fn tick(&mut self, dt: f64) -> RuntimeResult<()> {
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let instance = root.as_mut().ok_or(RuntimeError::NotMounted)?;
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        let result = instance.tick(&mut env, dt);
        finish(&mut env, result)
    }

    pub fn destroy(&mut self) {
        let Runtime {
            program,
            host,
            ctx,
            root,
        } = self;
        let Some(mut instance) = root.take() else {
            return;
        };
        let mut env = Env {
            host,
            ctx,
            program,
        };
        env.ctx.begin();
        instance.destroy(&mut env);
        env.ctx.end(&mut *env.host);
        env.ctx.clear();
    }
}

/// Closes the action's nesting level. A failed action leaves the context at
/// depth zero so the next one starts clean.
fn finish<T>(env: &mut Env<'_>, result: RuntimeResult<T>) -> RuntimeResult<T> {
    env.ctx.end(&mut *env.host);
    if let Err(e) = &result {
        tracing::warn!(error = %e, "action failed");
        env.ctx.reset();
    }
    result
}
