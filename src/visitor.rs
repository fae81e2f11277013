use crate::ast::{
    AttributeNode, ComponentNode, ConditionalNode, ElementNode, ExpressionNode, KeyedLoopNode,
    MemberRenderNode, RangeLoopNode, RawNode, RoutePlaceholderNode, TextNode, ViewNode,
};

/// The ViewVisitor trait is the single read-only traversal over a view tree.
///
/// Rules:
/// 1. Traversal order is depth-first, children in document order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call `walk_*` functions to continue traversal unless pruning is intended.
pub trait ViewVisitor {
    fn visit_children(&mut self, children: &[ViewNode]) {
        walk_children(self, children);
    }

    fn visit_node(&mut self, node: &ViewNode) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &ElementNode) {
        walk_element(self, element);
    }

    fn visit_attribute(&mut self, _element: &ElementNode, _attribute: &AttributeNode) {}

    fn visit_text(&mut self, _text: &TextNode) {}

    fn visit_expression(&mut self, _expression: &ExpressionNode) {}

    fn visit_raw(&mut self, raw: &RawNode) {
        walk_raw(self, raw);
    }

    fn visit_component(&mut self, _component: &ComponentNode) {}

    fn visit_member_render(&mut self, _render: &MemberRenderNode) {}

    fn visit_conditional(&mut self, conditional: &ConditionalNode) {
        walk_conditional(self, conditional);
    }

    fn visit_range_loop(&mut self, range: &RangeLoopNode) {
        walk_range_loop(self, range);
    }

    fn visit_keyed_loop(&mut self, keyed: &KeyedLoopNode) {
        walk_keyed_loop(self, keyed);
    }

    fn visit_route_placeholder(&mut self, _placeholder: &RoutePlaceholderNode) {}
}

pub fn walk_children<V: ViewVisitor + ?Sized>(visitor: &mut V, children: &[ViewNode]) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: ViewVisitor + ?Sized>(visitor: &mut V, node: &ViewNode) {
    match node {
        ViewNode::Element(el) => visitor.visit_element(el),
        ViewNode::Text(t) => visitor.visit_text(t),
        ViewNode::Expression(e) => visitor.visit_expression(e),
        ViewNode::Raw(r) => visitor.visit_raw(r),
        ViewNode::Component(c) => visitor.visit_component(c),
        ViewNode::MemberRender(m) => visitor.visit_member_render(m),
        ViewNode::Conditional(c) => visitor.visit_conditional(c),
        ViewNode::RangeLoop(r) => visitor.visit_range_loop(r),
        ViewNode::KeyedLoop(k) => visitor.visit_keyed_loop(k),
        ViewNode::RoutePlaceholder(p) => visitor.visit_route_placeholder(p),
    }
}

pub fn walk_element<V: ViewVisitor + ?Sized>(visitor: &mut V, element: &ElementNode) {
    for attribute in &element.attributes {
        visitor.visit_attribute(element, attribute);
    }
    visitor.visit_children(&element.children);
}

pub fn walk_raw<V: ViewVisitor + ?Sized>(visitor: &mut V, raw: &RawNode) {
    visitor.visit_children(&raw.children);
}

pub fn walk_conditional<V: ViewVisitor + ?Sized>(visitor: &mut V, conditional: &ConditionalNode) {
    visitor.visit_children(&conditional.then_branch);
    visitor.visit_children(&conditional.else_branch);
}

pub fn walk_range_loop<V: ViewVisitor + ?Sized>(visitor: &mut V, range: &RangeLoopNode) {
    visitor.visit_children(&range.body);
}

pub fn walk_keyed_loop<V: ViewVisitor + ?Sized>(visitor: &mut V, keyed: &KeyedLoopNode) {
    visitor.visit_children(&keyed.body);
}
