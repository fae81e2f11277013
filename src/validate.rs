//! Structural checks that run before region analysis.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::ast::{
    AttributeNode, Component, ConditionalNode, ElementNode, KeyedLoopNode, MemberRenderNode,
    RangeLoopNode, RoutePlaceholderNode, SourceLocation,
};
use crate::error::{
    CompilerError, INV_DUPLICATE_NAME, INV_MEMBER_RENDER, INV_ROUTE_PLACEHOLDER,
    INV_UNKNOWN_EVENT,
};
use crate::events::EventKind;
use crate::session::ComponentRegistry;
use crate::visitor::{walk_conditional, walk_keyed_loop, walk_range_loop, ViewVisitor};

lazy_static! {
    static ref EVENT_ATTRIBUTE: Regex = Regex::new(r"^on([a-z]+)$").unwrap();
}

/// Returns the event kind named by an `on<event>` attribute, `Err` for an
/// unsupported event, `Ok(None)` when the attribute is not an event.
pub fn event_attribute(name: &str) -> Result<Option<EventKind>, String> {
    let Some(caps) = EVENT_ATTRIBUTE.captures(name) else {
        return Ok(None);
    };
    let event = &caps[1];
    EventKind::from_name(event)
        .map(Some)
        .ok_or_else(|| event.to_string())
}

pub fn validate_component(
    component: &Component,
    registry: &ComponentRegistry,
) -> Result<(), CompilerError> {
    validate_unique_names(component)?;

    let mut checker = ViewChecker {
        component,
        registry,
        loop_vars: Vec::new(),
        structural_depth: 0,
        placeholders: Vec::new(),
        error: None,
    };
    checker.visit_children(&component.view);
    if let Some(err) = checker.error {
        return Err(err);
    }

    let routed = component
        .router
        .as_ref()
        .map(|r| !r.routes.is_empty())
        .unwrap_or(false);
    match (routed, checker.placeholders.as_slice()) {
        (false, [first, ..]) => Err(CompilerError::new(
            INV_ROUTE_PLACEHOLDER,
            "Route placeholder without a route table",
            &component.name,
            *first,
        )),
        (_, [_, second, ..]) => Err(CompilerError::new(
            INV_ROUTE_PLACEHOLDER,
            "More than one route placeholder",
            &component.name,
            *second,
        )),
        _ => Ok(()),
    }
}

fn validate_unique_names(component: &Component) -> Result<(), CompilerError> {
    let mut seen = HashSet::new();
    let names = component
        .params
        .iter()
        .map(|p| p.name.as_str())
        .chain(component.state.iter().map(|s| s.name.as_str()))
        .chain(component.methods.iter().map(|m| m.name.as_str()));
    for name in names {
        if !seen.insert(name) {
            return Err(CompilerError::with_details(
                INV_DUPLICATE_NAME,
                &format!("'{}' is declared more than once", name),
                &component.name,
                component.location,
                None,
                vec!["Rename the param, state field or method.".to_string()],
            ));
        }
    }
    Ok(())
}

struct ViewChecker<'a> {
    component: &'a Component,
    registry: &'a ComponentRegistry,
    loop_vars: Vec<String>,
    structural_depth: u32,
    placeholders: Vec<SourceLocation>,
    error: Option<CompilerError>,
}

impl<'a> ViewChecker<'a> {
    fn fail(&mut self, err: CompilerError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

impl<'a> ViewVisitor for ViewChecker<'a> {
    fn visit_attribute(&mut self, element: &ElementNode, attribute: &AttributeNode) {
        if let Err(event) = event_attribute(&attribute.name) {
            self.fail(CompilerError::with_details(
                INV_UNKNOWN_EVENT,
                &format!("Unsupported event '{}' on <{}>", event, element.tag),
                &self.component.name,
                element.location,
                Some(attribute.name.clone()),
                vec!["Supported events: onclick, oninput, onchange, onkeydown.".to_string()],
            ));
        }
    }

    fn visit_member_render(&mut self, render: &MemberRenderNode) {
        if self.loop_vars.iter().any(|v| v == &render.member) {
            return;
        }
        let is_component_field = self
            .component
            .field_type(&render.member)
            .map(|ty| self.registry.component_for_type(ty).is_some())
            .unwrap_or(false);
        if !is_component_field {
            self.fail(CompilerError::new(
                INV_MEMBER_RENDER,
                &format!("<{{{}}}/> does not name a component field", render.member),
                &self.component.name,
                render.location,
            ));
        }
    }

    fn visit_conditional(&mut self, conditional: &ConditionalNode) {
        self.structural_depth += 1;
        walk_conditional(self, conditional);
        self.structural_depth -= 1;
    }

    fn visit_range_loop(&mut self, range: &RangeLoopNode) {
        self.structural_depth += 1;
        walk_range_loop(self, range);
        self.structural_depth -= 1;
    }

    fn visit_keyed_loop(&mut self, keyed: &KeyedLoopNode) {
        self.structural_depth += 1;
        self.loop_vars.push(keyed.var.clone());
        walk_keyed_loop(self, keyed);
        self.loop_vars.pop();
        self.structural_depth -= 1;
    }

    fn visit_route_placeholder(&mut self, placeholder: &RoutePlaceholderNode) {
        if self.structural_depth > 0 {
            self.fail(CompilerError::new(
                INV_ROUTE_PLACEHOLDER,
                "Route placeholder inside a conditional or loop",
                &self.component.name,
                placeholder.location,
            ));
        }
        self.placeholders.push(placeholder.location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_event_attribute_parsing() {
        assert_eq!(event_attribute("onclick"), Ok(Some(EventKind::Click)));
        assert_eq!(event_attribute("onkeydown"), Ok(Some(EventKind::Keydown)));
        assert_eq!(event_attribute("class"), Ok(None));
        assert_eq!(event_attribute("onscroll"), Err("scroll".to_string()));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let mut component = fixtures::counter();
        component.view = vec![fixtures::element(
            "div",
            vec![fixtures::static_attr("onscroll", "x")],
            vec![],
        )];
        let err = validate_component(&component, &ComponentRegistry::new()).unwrap_err();
        assert_eq!(err.code, INV_UNKNOWN_EVENT);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut component = fixtures::counter();
        component.methods.push(crate::ast::Method {
            name: "count".into(),
            params: vec![],
            returns: None,
            body: vec![],
        });
        let err = validate_component(&component, &ComponentRegistry::new()).unwrap_err();
        assert_eq!(err.code, INV_DUPLICATE_NAME);
    }

    #[test]
    fn test_placeholder_requires_router() {
        let mut component = fixtures::counter();
        component
            .view
            .push(crate::ast::ViewNode::RoutePlaceholder(Default::default()));
        let err = validate_component(&component, &ComponentRegistry::new()).unwrap_err();
        assert_eq!(err.code, INV_ROUTE_PLACEHOLDER);
    }

    #[test]
    fn test_member_render_of_plain_field_rejected() {
        let mut component = fixtures::counter();
        component
            .view
            .push(crate::ast::ViewNode::MemberRender(MemberRenderNode {
                member: "count".into(),
                location: Default::default(),
            }));
        let err = validate_component(&component, &ComponentRegistry::new()).unwrap_err();
        assert_eq!(err.code, INV_MEMBER_RENDER);
    }

    #[test]
    fn test_fixtures_are_valid() {
        let registry = fixtures::registry();
        for component in fixtures::all() {
            assert!(validate_component(&component, &registry).is_ok(), "{}", component.name);
        }
    }
}
