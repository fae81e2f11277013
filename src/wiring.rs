//! Parent–Child Reactivity Wiring.
//!
//! Change notifications are the only upward channel between components.
//! Wires are installed at construction and re-issued by every rebind; the
//! emitted code never assumes a previously installed callback survived a
//! structural change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ast::{Component, Expr};
use crate::epilogue::{callback_name, EpilogueBuilder, EpilogueStep};
use crate::regions::{ChildId, Owner, RegionId};
use crate::session::ComponentRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireSource {
    /// `field.member` read by the view, where `member` notifies on change.
    Member { field: String, member: String },
    /// A child constructed with `&param={var}` where the child writes `param`.
    Child {
        child: ChildId,
        param: String,
        var: String,
    },
    /// The same, for a component constructed by each item of a repetition.
    /// Installed on every item child as it is created.
    Item {
        region: RegionId,
        component: String,
        param: String,
        var: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wire {
    pub source: WireSource,
    pub callback: String,
    pub steps: Vec<EpilogueStep>,
    /// Only installed while this branch is active.
    pub owner: Option<Owner>,
}

/// `_update_{param}`: what the parent calls after it changed storage this
/// component reads through `param`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamRefresh {
    pub param: String,
    pub name: String,
    pub steps: Vec<EpilogueStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberField {
    pub name: String,
    pub component: String,
    pub collection: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiringPlan {
    pub wires: Vec<Wire>,
    pub refreshes: Vec<ParamRefresh>,
    pub member_fields: Vec<MemberField>,
}

impl WiringPlan {
    pub fn wire_for_child(&self, child: ChildId, callback: &str) -> Option<&Wire> {
        self.wires.iter().find(|w| {
            w.callback == callback && matches!(&w.source, WireSource::Child { child: c, .. } if *c == child)
        })
    }

    pub fn wire_for_member(&self, field: &str, callback: &str) -> Option<&Wire> {
        self.wires.iter().find(|w| {
            w.callback == callback
                && matches!(&w.source, WireSource::Member { field: f, .. } if f == field)
        })
    }

    pub fn wire_for_item(
        &self,
        region: RegionId,
        component: &str,
        param: &str,
        var: &str,
    ) -> Option<&Wire> {
        self.wires.iter().find(|w| {
            matches!(&w.source, WireSource::Item { region: r, component: c, param: p, var: v }
                if *r == region && c == component && p == param && v == var)
        })
    }

    pub fn refresh(&self, param: &str) -> Option<&ParamRefresh> {
        self.refreshes.iter().find(|r| r.param == param)
    }
}

pub fn plan_wiring(
    component: &Component,
    registry: &ComponentRegistry,
    builder: &EpilogueBuilder<'_>,
) -> WiringPlan {
    let member_fields: Vec<MemberField> = component
        .params
        .iter()
        .map(|p| (&p.name, &p.ty))
        .chain(component.state.iter().map(|s| (&s.name, &s.ty)))
        .filter_map(|(name, ty)| {
            registry.component_for_type(ty).map(|info| MemberField {
                name: name.clone(),
                component: info.name.clone(),
                collection: ty.contains('['),
            })
        })
        .collect();

    let mut wires = Vec::new();

    for field in member_fields.iter().filter(|f| !f.collection) {
        let Some(info) = registry.get(&field.component) else {
            continue;
        };
        let Some(members) = builder.map.members.get(&field.name) else {
            continue;
        };
        for (member, targets) in members {
            if !info.reactive_fields.contains(member) {
                continue;
            }
            let mut steps: Vec<EpilogueStep> = targets
                .procedures
                .iter()
                .map(|&procedure| EpilogueStep::Update { procedure })
                .collect();
            steps.extend(
                targets
                    .conditionals
                    .iter()
                    .map(|&region| EpilogueStep::SyncConditional { region }),
            );
            steps.extend(
                targets
                    .repetitions
                    .iter()
                    .map(|&region| EpilogueStep::SyncRepetition { region }),
            );
            wires.push(Wire {
                source: WireSource::Member {
                    field: field.name.clone(),
                    member: member.clone(),
                },
                callback: callback_name(member),
                steps,
                owner: None,
            });
        }
    }

    let no_patches = BTreeSet::new();
    for child in &builder.analysis.children {
        let Some(info) = registry.get(&child.component) else {
            continue;
        };
        for prop in child.props.iter().filter(|p| p.reference) {
            let Expr::Ident { name: var } = &prop.value else {
                continue;
            };
            if !info.mutable_reference_params.contains(&prop.name) {
                continue;
            }
            let steps = builder
                .steps_for([var.as_str()], &no_patches, true)
                .into_iter()
                .filter(|s| !matches!(s, EpilogueStep::RefreshChild { child: c, .. } if *c == child.id))
                .collect();
            wires.push(Wire {
                source: WireSource::Child {
                    child: child.id,
                    param: prop.name.clone(),
                    var: var.clone(),
                },
                callback: callback_name(&prop.name),
                steps,
                owner: child.owner,
            });
        }
    }

    for region in builder.analysis.repetitions() {
        for site in region.item_children() {
            let Some(info) = registry.get(site.component) else {
                continue;
            };
            for prop in site.props.iter().filter(|p| p.reference) {
                let Expr::Ident { name: var } = &prop.value else {
                    continue;
                };
                if site.scope.contains(&var.as_str())
                    || !component.is_field(var)
                    || !info.mutable_reference_params.contains(&prop.name)
                {
                    continue;
                }
                let source = WireSource::Item {
                    region: region.id,
                    component: site.component.to_string(),
                    param: prop.name.clone(),
                    var: var.clone(),
                };
                if wires.iter().any(|w: &Wire| w.source == source) {
                    continue;
                }
                wires.push(Wire {
                    source,
                    callback: callback_name(&prop.name),
                    steps: builder.steps_for([var.as_str()], &no_patches, true),
                    owner: region.owner,
                });
            }
        }
    }

    let refreshes = component
        .params
        .iter()
        .map(|p| ParamRefresh {
            param: p.name.clone(),
            name: format!("_update_{}", p.name),
            steps: builder.steps_for([p.name.as_str()], &no_patches, false),
        })
        .collect();

    tracing::debug!(wires = wires.len(), "planned wiring");
    WiringPlan {
        wires,
        refreshes,
        member_fields,
    }
}
