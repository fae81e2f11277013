//! Compilation pipeline for one component and for a whole build.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::aggregate::{aggregate, static_region_warnings, DependencyMap, ProcId, UpdateProcedure};
use crate::ast::{Component, Param, StateField};
use crate::cache::IncrementalCache;
use crate::codegen::emit_component;
use crate::config::CompileOptions;
use crate::discovery::load_components;
use crate::epilogue::{plan_methods, EpilogueBuilder, MethodPlan};
use crate::error::{CompileResult, CompilerError};
use crate::events::{build_dispatch, DispatchPlan, EventKind};
use crate::lifecycle::{plan_tick, TickPlan};
use crate::regions::{analyze_view, ViewAnalysis};
use crate::router::{plan_router, RoutePlan};
use crate::session::ComponentRegistry;
use crate::validate::validate_component;
use crate::wiring::{plan_wiring, WiringPlan};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledComponent {
    pub name: String,
    pub params: Vec<Param>,
    pub state: Vec<StateField>,
    pub view: ViewAnalysis,
    pub procedures: Vec<UpdateProcedure>,
    pub dependencies: DependencyMap,
    pub methods: Vec<MethodPlan>,
    pub dispatch: Vec<DispatchPlan>,
    pub wiring: WiringPlan,
    pub router: Option<RoutePlan>,
    #[serde(default)]
    pub tick: Option<TickPlan>,
    pub warnings: Vec<CompilerError>,
    pub js: Option<String>,
}

impl CompiledComponent {
    pub fn slot_count(&self) -> u32 {
        self.view.slot_count
    }

    pub fn method(&self, name: &str) -> Option<&MethodPlan> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn procedure(&self, id: ProcId) -> Option<&UpdateProcedure> {
        self.procedures.get(id.0 as usize)
    }

    pub fn procedure_named(&self, name: &str) -> Option<&UpdateProcedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn dispatch_for(&self, kind: EventKind) -> Option<&DispatchPlan> {
        self.dispatch.iter().find(|d| d.kind == kind)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.params
            .iter()
            .map(|p| p.name.clone())
            .chain(self.state.iter().map(|s| s.name.clone()))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

#[tracing::instrument(skip_all, fields(component = %component.name))]
pub fn compile_component(
    component: &Component,
    registry: &ComponentRegistry,
    options: &CompileOptions,
) -> CompileResult<CompiledComponent> {
    validate_component(component, registry)?;

    let view = analyze_view(component)?;
    let (procedures, dependencies) = aggregate(&view);
    let warnings = static_region_warnings(&view, &component.name);
    let methods = plan_methods(component, &view, &dependencies);
    let dispatch = build_dispatch(&component.name, &view.handlers)?;
    let builder = EpilogueBuilder {
        component,
        analysis: &view,
        map: &dependencies,
    };
    let wiring = plan_wiring(component, registry, &builder);
    let router = plan_router(component);
    let tick = plan_tick(component, &view, registry, &wiring.member_fields);

    tracing::debug!(
        slots = view.slot_count,
        regions = view.regions.len(),
        procedures = procedures.len(),
        methods = methods.len(),
        "compiled component"
    );

    let mut compiled = CompiledComponent {
        name: component.name.clone(),
        params: component.params.clone(),
        state: component.state.clone(),
        view,
        procedures,
        dependencies,
        methods,
        dispatch,
        wiring,
        router,
        tick,
        warnings,
        js: None,
    };
    if options.emit_js {
        compiled.js = Some(emit_component(&compiled, &options.runtime_module));
    }
    Ok(compiled)
}

/// Compiles every component of a build. Components are independent once the
/// registry exists, so they compile in parallel.
pub fn compile_all(
    components: &[Component],
    options: &CompileOptions,
) -> Vec<CompileResult<CompiledComponent>> {
    let registry = ComponentRegistry::from_components(components);
    let cache = options
        .use_cache
        .then(|| IncrementalCache::new(&options.cache_dir));

    components
        .par_iter()
        .map(|component| {
            let Some(cache) = &cache else {
                return compile_component(component, &registry, options);
            };
            let hash = IncrementalCache::compute_hash(component, &registry, options);
            if let Some(hit) = cache.get(&component.name, &hash) {
                return Ok(hit);
            }
            let compiled = compile_component(component, &registry, options)?;
            cache.set(&component.name, &hash, &compiled);
            Ok(compiled)
        })
        .collect()
}

/// Discovers `*.component.json` files under `dir` and compiles them together.
pub fn compile_dir(dir: &Path, options: &CompileOptions) -> Vec<CompileResult<CompiledComponent>> {
    let components: Vec<Component> = load_components(dir)
        .into_iter()
        .map(|(_, component)| component)
        .collect();
    compile_all(&components, options)
}
