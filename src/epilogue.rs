//! Method Epilogue Synthesizer.
//!
//! For every method except the pre-render initializer, the write-set selects
//! what runs after the body, in four global phases:
//!
//! 1. shared update procedures, then child refreshes for reference props
//! 2. conditional resyncs
//! 3. repetition resyncs, minus keyed regions patched by a single append
//! 4. parent notifications
//!
//! Each phase is deduplicated and ordered by id. Conditional ids are
//! preorder, so an outer region resyncs before the regions it owns.
//! Epilogues fire once per call; nothing iterates to a fixed point.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::aggregate::{DependencyMap, ProcId};
use crate::ast::{Component, Method, Stmt, INIT_METHOD};
use crate::regions::{ChildId, RegionId, ViewAnalysis};
use crate::write_set::{analyze_method, WriteSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum EpilogueStep {
    Update { procedure: ProcId },
    RefreshChild { child: ChildId, param: String },
    SyncConditional { region: RegionId },
    SyncRepetition { region: RegionId },
    NotifyParent { var: String, callback: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// Runs before the first render; no epilogue.
    Init,
    User,
    /// Compiled from an inline event handler.
    Handler,
}

/// Keyed regions patched in place after a single-item append to `var`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendPatch {
    pub var: String,
    pub regions: Vec<RegionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodPlan {
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub write_set: WriteSet,
    pub append_patches: Vec<AppendPatch>,
    pub epilogue: Vec<EpilogueStep>,
}

impl MethodPlan {
    pub fn append_patch(&self, var: &str) -> Option<&AppendPatch> {
        self.append_patches.iter().find(|p| p.var == var)
    }
}

/// `score` -> `onScoreChange`
pub fn callback_name(var: &str) -> String {
    let mut chars = var.chars();
    match chars.next() {
        Some(first) => format!("on{}{}Change", first.to_uppercase(), chars.as_str()),
        None => "onChange".to_string(),
    }
}

/// Whether a write to `var` must be reported to the parent.
pub fn notifies_parent(component: &Component, var: &str) -> bool {
    if let Some(state) = component.state_field(var) {
        return state.public && state.mutable;
    }
    component
        .param(var)
        .map(|p| p.reference || (p.public && p.mutable))
        .unwrap_or(false)
}

pub struct EpilogueBuilder<'a> {
    pub component: &'a Component,
    pub analysis: &'a ViewAnalysis,
    pub map: &'a DependencyMap,
}

impl<'a> EpilogueBuilder<'a> {
    /// Steps to run after `vars` changed. Regions in `patched` are skipped in
    /// the repetition phase.
    pub fn steps_for<'v>(
        &self,
        vars: impl IntoIterator<Item = &'v str>,
        patched: &BTreeSet<RegionId>,
        notify: bool,
    ) -> Vec<EpilogueStep> {
        let vars: Vec<&str> = vars.into_iter().collect();
        let mut procedures = BTreeSet::new();
        let mut refreshes = BTreeSet::new();
        let mut conditionals = BTreeSet::new();
        let mut repetitions = BTreeSet::new();
        let mut notifications = BTreeSet::new();

        for var in &vars {
            procedures.extend(self.map.procedures_for(var));
            conditionals.extend(self.map.conditionals_for(var));
            repetitions.extend(
                self.map
                    .repetitions_for(var)
                    .filter(|region| !patched.contains(region)),
            );
            for child in &self.analysis.children {
                for prop in child.props.iter().filter(|p| p.reference) {
                    if matches!(&prop.value, crate::ast::Expr::Ident { name } if name == var) {
                        refreshes.insert((child.id, prop.name.clone()));
                    }
                }
            }
            if notify && notifies_parent(self.component, var) {
                notifications.insert(var.to_string());
            }
        }

        let mut steps = Vec::new();
        steps.extend(
            procedures
                .into_iter()
                .map(|procedure| EpilogueStep::Update { procedure }),
        );
        steps.extend(
            refreshes
                .into_iter()
                .map(|(child, param)| EpilogueStep::RefreshChild { child, param }),
        );
        steps.extend(
            conditionals
                .into_iter()
                .map(|region| EpilogueStep::SyncConditional { region }),
        );
        steps.extend(
            repetitions
                .into_iter()
                .map(|region| EpilogueStep::SyncRepetition { region }),
        );
        steps.extend(notifications.into_iter().map(|var| EpilogueStep::NotifyParent {
            callback: callback_name(&var),
            var,
        }));
        steps
    }

    /// Keyed regions iterating `var` directly.
    fn keyed_regions_of(&self, var: &str) -> Vec<RegionId> {
        self.analysis
            .repetitions()
            .filter(|r| r.is_keyed() && r.source_var() == Some(var))
            .map(|r| r.id)
            .collect()
    }

    pub fn plan(&self, method: &Method, kind: MethodKind, fields: &BTreeSet<String>) -> MethodPlan {
        let write_set = analyze_method(method, fields);
        let mut append_patches = Vec::new();
        let mut epilogue = Vec::new();

        if kind != MethodKind::Init {
            let mut patched = BTreeSet::new();
            for var in write_set.vars() {
                if !write_set.only_appended(var) {
                    continue;
                }
                let regions = self.keyed_regions_of(var);
                if regions.is_empty() {
                    continue;
                }
                patched.extend(regions.iter().copied());
                append_patches.push(AppendPatch {
                    var: var.to_string(),
                    regions,
                });
            }
            epilogue = self.steps_for(write_set.vars(), &patched, true);
        }

        tracing::trace!(
            method = %method.name,
            writes = write_set.writes.len(),
            steps = epilogue.len(),
            "planned method"
        );
        MethodPlan {
            name: method.name.clone(),
            kind,
            params: method.params.iter().map(|p| p.name.clone()).collect(),
            body: method.body.clone(),
            write_set,
            append_patches,
            epilogue,
        }
    }
}

pub fn plan_methods(
    component: &Component,
    analysis: &ViewAnalysis,
    map: &DependencyMap,
) -> Vec<MethodPlan> {
    let fields: BTreeSet<String> = component
        .field_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let builder = EpilogueBuilder {
        component,
        analysis,
        map,
    };
    let user = component.methods.iter().map(|m| {
        let kind = if m.name == INIT_METHOD {
            MethodKind::Init
        } else {
            MethodKind::User
        };
        builder.plan(m, kind, &fields)
    });
    let handlers = analysis
        .synthesized
        .iter()
        .map(|m| builder.plan(m, MethodKind::Handler, &fields));
    user.chain(handlers).collect()
}
