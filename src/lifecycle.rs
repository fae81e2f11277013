//! Per-frame propagation.
//!
//! A component that ticks, directly or through something it builds, gets a
//! `tick(dt)` entry point. The plan lists what that entry point forwards to;
//! the user's own `tick` method stays an ordinary method with its own
//! epilogue.

use serde::{Deserialize, Serialize};

use crate::ast::{Component, TICK_METHOD};
use crate::regions::{ChildId, RegionId, ViewAnalysis};
use crate::session::ComponentRegistry;
use crate::wiring::MemberField;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPlan {
    /// The component declares `tick` itself.
    pub user: bool,
    /// The declared `tick` takes the elapsed time.
    pub takes_dt: bool,
    pub children: Vec<ChildId>,
    pub members: Vec<MemberField>,
    /// Repetitions whose items build ticking components.
    pub item_regions: Vec<RegionId>,
    pub route: bool,
}

impl TickPlan {
    pub fn forwards(&self) -> bool {
        !self.children.is_empty()
            || !self.members.is_empty()
            || !self.item_regions.is_empty()
            || self.route
    }
}

/// Returns `None` when neither the component nor anything it builds ticks.
pub fn plan_tick(
    component: &Component,
    view: &ViewAnalysis,
    registry: &ComponentRegistry,
    member_fields: &[MemberField],
) -> Option<TickPlan> {
    let own = component.method(TICK_METHOD);
    let plan = TickPlan {
        user: own.is_some(),
        takes_dt: own.map(|m| !m.params.is_empty()).unwrap_or(false),
        children: view
            .children
            .iter()
            .filter(|c| registry.ticks(&c.component))
            .map(|c| c.id)
            .collect(),
        members: member_fields
            .iter()
            .filter(|f| registry.ticks(&f.component))
            .cloned()
            .collect(),
        item_regions: view
            .repetitions()
            .filter(|r| {
                r.item_children()
                    .iter()
                    .any(|site| registry.ticks(site.component))
            })
            .map(|r| r.id)
            .collect(),
        route: component
            .router
            .as_ref()
            .map(|router| router.routes.iter().any(|r| registry.ticks(&r.component)))
            .unwrap_or(false),
    };
    if !plan.user && !plan.forwards() {
        return None;
    }
    tracing::debug!(
        component = %component.name,
        user = plan.user,
        children = plan.children.len(),
        members = plan.members.len(),
        item_regions = plan.item_regions.len(),
        route = plan.route,
        "planned tick"
    );
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::regions::analyze_view;
    use crate::wiring::plan_wiring;

    fn tick_plan(component: &Component) -> Option<TickPlan> {
        let registry = fixtures::registry();
        let view = analyze_view(component).unwrap();
        let (_, map) = crate::aggregate::aggregate(&view);
        let builder = crate::epilogue::EpilogueBuilder {
            component,
            analysis: &view,
            map: &map,
        };
        let wiring = plan_wiring(component, &registry, &builder);
        plan_tick(component, &view, &registry, &wiring.member_fields)
    }

    #[test]
    fn test_user_tick_takes_elapsed_time() {
        let plan = tick_plan(&fixtures::clock()).unwrap();
        assert!(plan.user);
        assert!(plan.takes_dt);
        assert!(!plan.forwards());
    }

    #[test]
    fn test_tick_forwards_to_field_child_and_items() {
        let plan = tick_plan(&fixtures::wall()).unwrap();
        assert!(!plan.user);
        assert_eq!(plan.children, vec![ChildId(0)]);
        assert_eq!(plan.item_regions, vec![RegionId(0)]);
        assert!(!plan.route);
    }

    #[test]
    fn test_tick_forwards_to_members() {
        let plan = tick_plan(&fixtures::tower()).unwrap();
        assert_eq!(plan.members.len(), 1);
        assert_eq!(plan.members[0].name, "clock");
    }

    #[test]
    fn test_components_without_tick_have_no_plan() {
        assert!(tick_plan(&fixtures::counter()).is_none());
        assert!(tick_plan(&fixtures::dashboard()).is_none());
    }
}
