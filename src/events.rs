//! Event dispatch: one 64-bit mask and one shared dispatch table per event kind.
//!
//! Registration walks slots `0..slot_count` and registers a single entry per
//! set bit, keyed by the slot's node handle. The entry switches on the static
//! slot id to reach the compiled handler.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::SourceLocation;
use crate::error::{CompilerError, CompileResult, EVENT_SLOT_CAPACITY, INV_EVENT_CAPACITY};
use crate::regions::{EventHandler, HandlerCall, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    Input,
    Change,
    Keydown,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Click,
        EventKind::Input,
        EventKind::Change,
        EventKind::Keydown,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "click" => Some(EventKind::Click),
            "input" => Some(EventKind::Input),
            "change" => Some(EventKind::Change),
            "keydown" => Some(EventKind::Keydown),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Input => "input",
            EventKind::Change => "change",
            EventKind::Keydown => "keydown",
        }
    }

    pub fn index(self) -> usize {
        match self {
            EventKind::Click => 0,
            EventKind::Input => 1,
            EventKind::Change => 2,
            EventKind::Keydown => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMask(pub u64);

impl EventMask {
    pub fn contains(self, slot: SlotId) -> bool {
        slot.0 < EVENT_SLOT_CAPACITY && self.0 & (1u64 << slot.0) != 0
    }

    pub fn insert(&mut self, slot: SlotId) {
        if slot.0 < EVENT_SLOT_CAPACITY {
            self.0 |= 1u64 << slot.0;
        }
    }

    pub fn slots(self) -> impl Iterator<Item = SlotId> {
        (0..EVENT_SLOT_CAPACITY)
            .filter(move |bit| self.0 & (1u64 << bit) != 0)
            .map(SlotId)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// BigInt literal used by the emitted class, e.g. `0x5n`.
    pub fn to_js_literal(self) -> String {
        format!("0x{:x}n", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCase {
    pub slot: SlotId,
    pub call: HandlerCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPlan {
    pub kind: EventKind,
    pub mask: EventMask,
    pub cases: Vec<DispatchCase>,
}

impl DispatchPlan {
    pub fn case(&self, slot: SlotId) -> Option<&DispatchCase> {
        self.cases.iter().find(|c| c.slot == slot)
    }
}

/// Builds one plan per event kind that has at least one slot handler.
pub fn build_dispatch(
    component: &str,
    handlers: &[EventHandler],
) -> CompileResult<Vec<DispatchPlan>> {
    let mut plans = Vec::new();
    for kind in EventKind::ALL {
        let mut cases: Vec<DispatchCase> = handlers
            .iter()
            .filter(|h| h.kind == kind)
            .map(|h| DispatchCase {
                slot: h.slot,
                call: h.call.clone(),
            })
            .collect();
        if cases.is_empty() {
            continue;
        }
        cases.sort_by_key(|c| c.slot);

        if let Some(over) = cases.iter().find(|c| c.slot.0 >= EVENT_SLOT_CAPACITY) {
            let loc = handlers
                .iter()
                .find(|h| h.slot == over.slot)
                .map(|h| h.location)
                .unwrap_or(SourceLocation::default());
            return Err(CompilerError::with_details(
                INV_EVENT_CAPACITY,
                &format!(
                    "Slot {} carries a {} handler but only slots 0..{} are addressable",
                    over.slot.0, kind, EVENT_SLOT_CAPACITY
                ),
                component,
                loc,
                Some(format!("{} {} handlers", cases.len(), kind)),
                vec![
                    "Move repeated handlers into a loop body or a child component.".to_string(),
                ],
            ));
        }

        let mut mask = EventMask::default();
        for case in &cases {
            mask.insert(case.slot);
        }
        tracing::trace!(%kind, mask = mask.0, "built dispatch mask");
        plans.push(DispatchPlan { kind, mask, cases });
    }
    Ok(plans)
}
