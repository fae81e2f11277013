//! Build-wide registry of component shapes.
//!
//! Wiring needs to know, for a field typed as another component, which of
//! that component's fields notify on change. One registry is built per
//! build from every component before any of them is compiled.
//!
//! The registry also decides which components tick: those declaring `tick`
//! and, transitively, those constructing a component that ticks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ast::{Component, ComponentNode, TICK_METHOD};
use crate::visitor::ViewVisitor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub name: String,
    /// `pub mut` state and public mutable params; each has an `on{Name}Change` callback.
    pub reactive_fields: BTreeSet<String>,
    /// Params accepted by reference whose writes notify the caller.
    pub mutable_reference_params: BTreeSet<String>,
    /// Declares its own `tick` method.
    #[serde(default)]
    pub user_tick: bool,
    /// Has a `tick(dt)` entry point, its own or propagated from what it constructs.
    #[serde(default)]
    pub ticks: bool,
}

impl ComponentInfo {
    pub fn from_component(component: &Component) -> Self {
        let mut reactive_fields: BTreeSet<String> = component
            .state
            .iter()
            .filter(|s| s.public && s.mutable)
            .map(|s| s.name.clone())
            .collect();
        reactive_fields.extend(
            component
                .params
                .iter()
                .filter(|p| p.public && p.mutable)
                .map(|p| p.name.clone()),
        );
        let mutable_reference_params = component
            .params
            .iter()
            .filter(|p| p.reference && p.mutable)
            .map(|p| p.name.clone())
            .collect();
        let user_tick = component.method(TICK_METHOD).is_some();
        Self {
            name: component.name.clone(),
            reactive_fields,
            mutable_reference_params,
            user_tick,
            ticks: user_tick,
        }
    }

    pub fn exposes_reactive_fields(&self) -> bool {
        !self.reactive_fields.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentRegistry {
    components: IndexMap<String, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_components(components: &[Component]) -> Self {
        let mut registry = Self::new();
        for component in components {
            registry.register(component);
        }
        registry.propagate_ticks(components);
        registry
    }

    /// Marks every component that constructs a ticking component, until
    /// nothing changes.
    fn propagate_ticks(&mut self, components: &[Component]) {
        let uses: Vec<(String, BTreeSet<String>)> = components
            .iter()
            .map(|c| (c.name.clone(), self.constructed_by(c)))
            .collect();
        loop {
            let mut changed = false;
            for (name, used) in &uses {
                if self.ticks(name) || !used.iter().any(|u| self.ticks(u)) {
                    continue;
                }
                if let Some(info) = self.components.get_mut(name) {
                    info.ticks = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Registered components a component can hold an instance of.
    fn constructed_by(&self, component: &Component) -> BTreeSet<String> {
        let mut collector = ComponentUses::default();
        collector.visit_children(&component.view);
        let mut used = collector.names;
        for ty in component
            .params
            .iter()
            .map(|p| &p.ty)
            .chain(component.state.iter().map(|s| &s.ty))
        {
            if let Some(info) = self.component_for_type(ty) {
                used.insert(info.name.clone());
            }
        }
        if let Some(router) = &component.router {
            used.extend(router.routes.iter().map(|r| r.component.clone()));
        }
        used
    }

    pub fn ticks(&self, name: &str) -> bool {
        self.components.get(name).map(|c| c.ticks).unwrap_or(false)
    }

    pub fn register(&mut self, component: &Component) {
        self.components
            .insert(component.name.clone(), ComponentInfo::from_component(component));
    }

    pub fn get(&self, name: &str) -> Option<&ComponentInfo> {
        self.components.get(name)
    }

    /// Resolves a declared field type to a registered component, looking
    /// through collection suffixes such as `Row[]` or `Row[8]`.
    pub fn component_for_type(&self, ty: &str) -> Option<&ComponentInfo> {
        let base = ty.split('[').next().unwrap_or(ty).trim();
        self.components.get(base)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Stable text that changes whenever any registered shape changes.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(&self.components).unwrap_or_default()
    }
}

#[derive(Default)]
struct ComponentUses {
    names: BTreeSet<String>,
}

impl ViewVisitor for ComponentUses {
    fn visit_component(&mut self, component: &ComponentNode) {
        self.names.insert(component.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Param, StateField};

    fn player() -> Component {
        Component {
            name: "Player".into(),
            params: vec![Param {
                name: "hp".into(),
                ty: "int".into(),
                mutable: true,
                reference: true,
                callback: false,
                public: false,
                default: None,
            }],
            state: vec![
                StateField {
                    name: "score".into(),
                    ty: "int".into(),
                    mutable: true,
                    public: true,
                    init: None,
                },
                StateField {
                    name: "secret".into(),
                    ty: "int".into(),
                    mutable: true,
                    public: false,
                    init: None,
                },
            ],
            methods: vec![],
            view: vec![],
            style: None,
            data: vec![],
            enums: vec![],
            router: None,
            location: Default::default(),
        }
    }

    #[test]
    fn test_reactive_fields_are_pub_mut_only() {
        let registry = ComponentRegistry::from_components(&[player()]);
        let info = registry.get("Player").unwrap();
        assert!(info.reactive_fields.contains("score"));
        assert!(!info.reactive_fields.contains("secret"));
        assert!(info.mutable_reference_params.contains("hp"));
    }

    #[test]
    fn test_ticking_spreads_to_components_that_build_tickers() {
        let registry = crate::fixtures::registry();
        let clock = registry.get("Clock").unwrap();
        assert!(clock.user_tick && clock.ticks);
        assert!(registry.ticks("Wall"));
        assert!(registry.ticks("Tower"));
        assert!(!registry.get("Wall").unwrap().user_tick);
        assert!(!registry.ticks("Counter"));
        assert!(!registry.ticks("Dashboard"));
    }

    #[test]
    fn test_component_for_collection_type() {
        let registry = ComponentRegistry::from_components(&[player()]);
        assert!(registry.component_for_type("Player[]").is_some());
        assert!(registry.component_for_type("Player[4]").is_some());
        assert!(registry.component_for_type("int").is_none());
    }
}
