//! Explicit render context: the per-kind dispatch tables and the nesting
//! counter that defers flushing to the outermost call.
//!
//! One context is owned per root and threaded by `&mut` into every instance
//! operation. There is no global state.

use serde_json::Value;
use std::collections::HashMap;

use super::host::{NodeHandle, RenderHost};
use crate::events::EventKind;
use crate::regions::{HandlerCall, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

/// What a delivered event resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEntry {
    /// A slot handler; the instance switches on the slot to find the call.
    Slot { instance: InstanceId, slot: SlotId },
    /// A handler on an item-local node, with the loop variables it captured.
    Item {
        instance: InstanceId,
        call: HandlerCall,
        scope: Vec<(String, Value)>,
    },
}

impl DispatchEntry {
    pub fn instance(&self) -> InstanceId {
        match self {
            DispatchEntry::Slot { instance, .. } | DispatchEntry::Item { instance, .. } => {
                *instance
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<NodeHandle, DispatchEntry>,
}

impl DispatchTable {
    pub fn set(&mut self, node: NodeHandle, entry: DispatchEntry) {
        self.entries.insert(node, entry);
    }

    pub fn delete(&mut self, node: NodeHandle) -> bool {
        self.entries.remove(&node).is_some()
    }

    pub fn get(&self, node: NodeHandle) -> Option<&DispatchEntry> {
        self.entries.get(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RenderContext {
    tables: Vec<DispatchTable>,
    depth: u32,
    flushes: u64,
    next_instance: u64,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            tables: vec![DispatchTable::default(); EventKind::ALL.len()],
            depth: 0,
            flushes: 0,
            next_instance: 0,
        }
    }

    pub fn table(&self, kind: EventKind) -> &DispatchTable {
        &self.tables[kind.index()]
    }

    pub fn table_mut(&mut self, kind: EventKind) -> &mut DispatchTable {
        &mut self.tables[kind.index()]
    }

    /// Drops every registration for `node`, whatever its kind.
    pub fn deregister(&mut self, node: NodeHandle) {
        for table in &mut self.tables {
            table.delete(node);
        }
    }

    pub fn registrations(&self) -> usize {
        self.tables.iter().map(DispatchTable::len).sum()
    }

    pub fn next_instance_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn begin(&mut self) {
        self.depth += 1;
    }

    pub fn end(&mut self, host: &mut dyn RenderHost) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            host.flush();
            self.flushes += 1;
            tracing::trace!(flushes = self.flushes, "flushed");
        }
    }

    /// Back to depth zero, e.g. after an action failed half way.
    pub fn reset(&mut self) {
        self.depth = 0;
    }

    /// Forgets every registration. Used when the root is torn down.
    pub fn clear(&mut self) {
        for table in &mut self.tables {
            *table = DispatchTable::default();
        }
        self.depth = 0;
    }
}
