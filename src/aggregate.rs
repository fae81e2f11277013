//! Binding Aggregator.
//!
//! Bindings that target the same (slot, kind, owner) collapse into one shared
//! update procedure. The dependency map built here is the single source of
//! truth for "what re-runs when X changes".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ast::Expr;
use crate::deps::DepSet;
use crate::error::{CompilerError, WARN_STATIC_REGION};
use crate::regions::{BindingKind, Owner, RegionId, SlotId, StructuralRegion, ViewAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProcedure {
    pub id: ProcId,
    pub name: String,
    pub slot: SlotId,
    pub kind: BindingKind,
    pub source: Expr,
    /// Runs only while this branch is active.
    pub guard: Option<Owner>,
    pub deps: DepSet,
    /// Number of bindings folded into this procedure.
    pub contributors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberTargets {
    pub procedures: BTreeSet<ProcId>,
    pub conditionals: BTreeSet<RegionId>,
    pub repetitions: BTreeSet<RegionId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMap {
    pub procedures: BTreeMap<String, BTreeSet<ProcId>>,
    pub conditionals: BTreeMap<String, BTreeSet<RegionId>>,
    pub repetitions: BTreeMap<String, BTreeSet<RegionId>>,
    /// object field -> member -> targets reading `object.member`.
    pub members: BTreeMap<String, BTreeMap<String, MemberTargets>>,
}

impl DependencyMap {
    pub fn procedures_for(&self, var: &str) -> impl Iterator<Item = ProcId> + '_ {
        self.procedures.get(var).into_iter().flatten().copied()
    }

    pub fn conditionals_for(&self, var: &str) -> impl Iterator<Item = RegionId> + '_ {
        self.conditionals.get(var).into_iter().flatten().copied()
    }

    pub fn repetitions_for(&self, var: &str) -> impl Iterator<Item = RegionId> + '_ {
        self.repetitions.get(var).into_iter().flatten().copied()
    }

    pub fn member_targets(&self, object: &str, member: &str) -> Option<&MemberTargets> {
        self.members.get(object).and_then(|m| m.get(member))
    }

    fn member_entry(&mut self, object: &str, member: &str) -> &mut MemberTargets {
        self.members
            .entry(object.to_string())
            .or_default()
            .entry(member.to_string())
            .or_default()
    }
}

pub fn aggregate(analysis: &ViewAnalysis) -> (Vec<UpdateProcedure>, DependencyMap) {
    let mut groups: BTreeMap<(SlotId, BindingKind, Option<Owner>), UpdateProcedure> =
        BTreeMap::new();
    for binding in &analysis.bindings {
        let key = (binding.slot, binding.kind.clone(), binding.owner);
        match groups.get_mut(&key) {
            // Duplicate attributes resolve the way HTML parsing does: the
            // first one wins and later ones only count as contributors.
            Some(group) => {
                if group.source != binding.source {
                    tracing::debug!(
                        slot = binding.slot.0,
                        kind = %binding.kind.suffix(),
                        "later binding on the same target ignored"
                    );
                }
                group.contributors += 1;
            }
            None => {
                groups.insert(
                    key,
                    UpdateProcedure {
                        id: ProcId(0),
                        name: format!("_update_el{}_{}", binding.slot.0, binding.kind.suffix()),
                        slot: binding.slot,
                        kind: binding.kind.clone(),
                        source: binding.source.clone(),
                        guard: binding.owner,
                        deps: binding.deps.clone(),
                        contributors: 1,
                    },
                );
            }
        }
    }

    let mut map = DependencyMap::default();
    let mut procedures = Vec::with_capacity(groups.len());
    for (index, (_, mut procedure)) in groups.into_iter().enumerate() {
        procedure.id = ProcId(index as u32);
        for var in &procedure.deps.vars {
            map.procedures
                .entry(var.clone())
                .or_default()
                .insert(procedure.id);
        }
        for dep in &procedure.deps.members {
            map.procedures
                .entry(dep.object.clone())
                .or_default()
                .insert(procedure.id);
            map.member_entry(&dep.object, &dep.member)
                .procedures
                .insert(procedure.id);
        }
        procedures.push(procedure);
    }

    for region in &analysis.regions {
        let id = region.id();
        let deps = region.deps();
        let conditional = matches!(region, StructuralRegion::Conditional(_));
        for var in &deps.vars {
            let target = if conditional {
                &mut map.conditionals
            } else {
                &mut map.repetitions
            };
            target.entry(var.clone()).or_default().insert(id);
        }
        for dep in &deps.members {
            let entry = map.member_entry(&dep.object, &dep.member);
            if conditional {
                entry.conditionals.insert(id);
            } else {
                entry.repetitions.insert(id);
            }
        }
    }

    tracing::debug!(
        procedures = procedures.len(),
        variables = map.procedures.len(),
        "aggregated bindings"
    );
    (procedures, map)
}

/// Regions whose dependency set is empty are rendered once and never resynced.
pub fn static_region_warnings(analysis: &ViewAnalysis, component: &str) -> Vec<CompilerError> {
    analysis
        .regions
        .iter()
        .filter(|r| r.deps().is_empty())
        .map(|r| {
            tracing::warn!(component, region = r.id().0, "region has no dependencies");
            CompilerError::warning(
                WARN_STATIC_REGION,
                &format!("Region {} depends on no state and is never resynchronized", r.id().0),
                component,
                r.location(),
            )
        })
        .collect()
}
