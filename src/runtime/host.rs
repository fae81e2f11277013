//! Tree primitives the runtime drives, and an in-memory tree for tests and
//! headless execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(pub u64);

pub trait RenderHost {
    fn create_element(&mut self, tag: &str) -> NodeHandle;
    fn create_text(&mut self, text: &str) -> NodeHandle;
    /// An empty marker that regions insert their content before.
    fn create_anchor(&mut self) -> NodeHandle;
    /// Inserts `node` under `parent`, before `before` or at the end.
    fn insert(&mut self, parent: NodeHandle, node: NodeHandle, before: Option<NodeHandle>);
    fn remove(&mut self, node: NodeHandle);
    fn set_attribute(&mut self, node: NodeHandle, name: &str, value: &str);
    fn set_property(&mut self, node: NodeHandle, name: &str, value: &Value);
    fn set_text(&mut self, node: NodeHandle, text: &str);
    fn set_markup(&mut self, node: NodeHandle, markup: &str);
    fn push_history(&mut self, _path: &str) {}
    /// Called once when the outermost creation or resync returns.
    fn flush(&mut self);
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY HOST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryNodeKind {
    Element(String),
    Text,
    Anchor,
}

#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub kind: MemoryNodeKind,
    pub parent: Option<NodeHandle>,
    pub children: Vec<NodeHandle>,
    pub attributes: BTreeMap<String, String>,
    pub properties: BTreeMap<String, Value>,
    pub text: String,
    pub markup: Option<String>,
}

impl MemoryNode {
    fn new(kind: MemoryNodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            properties: BTreeMap::new(),
            text: String::new(),
            markup: None,
        }
    }
}

/// Operation counters, read by tests to check how much work an action did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub created: u64,
    pub removed: u64,
    /// Removal of a node that was already detached.
    pub double_removals: u64,
    pub text_writes: u64,
    pub attribute_writes: u64,
    pub flushes: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryHost {
    nodes: HashMap<NodeHandle, MemoryNode>,
    next: u64,
    root: NodeHandle,
    stats: HostStats,
    history: Vec<String>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let root = NodeHandle(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, MemoryNode::new(MemoryNodeKind::Element("root".into())));
        Self {
            nodes,
            next: 1,
            root,
            stats: HostStats::default(),
            history: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = HostStats::default();
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&MemoryNode> {
        self.nodes.get(&handle)
    }

    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.nodes
            .get(&handle)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn attribute(&self, handle: NodeHandle, name: &str) -> Option<&str> {
        self.node(handle)
            .and_then(|n| n.attributes.get(name))
            .map(String::as_str)
    }

    /// Whether `handle` is reachable from the root.
    pub fn is_attached(&self, handle: NodeHandle) -> bool {
        let mut current = Some(handle);
        while let Some(h) = current {
            if h == self.root {
                return true;
            }
            current = self.nodes.get(&h).and_then(|n| n.parent);
        }
        false
    }

    /// Concatenated text of a subtree, markup included verbatim.
    pub fn text_content(&self, handle: NodeHandle) -> String {
        let mut out = String::new();
        self.collect_text(handle, &mut out);
        out
    }

    fn collect_text(&self, handle: NodeHandle, out: &mut String) {
        let Some(node) = self.nodes.get(&handle) else {
            return;
        };
        match (&node.kind, &node.markup) {
            (_, Some(markup)) => out.push_str(markup),
            (MemoryNodeKind::Text, None) => out.push_str(&node.text),
            (MemoryNodeKind::Element(_), None) if node.children.is_empty() => {
                out.push_str(&node.text)
            }
            _ => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Attached elements with the given tag, in document order.
    pub fn find_all(&self, tag: &str) -> Vec<NodeHandle> {
        let mut found = Vec::new();
        self.walk(self.root, &mut |handle, node| {
            if node.kind == MemoryNodeKind::Element(tag.to_string()) {
                found.push(handle);
            }
        });
        found
    }

    fn walk(&self, handle: NodeHandle, f: &mut dyn FnMut(NodeHandle, &MemoryNode)) {
        if let Some(node) = self.nodes.get(&handle) {
            f(handle, node);
            for child in &node.children {
                self.walk(*child, f);
            }
        }
    }

    fn alloc(&mut self, kind: MemoryNodeKind) -> NodeHandle {
        let handle = NodeHandle(self.next);
        self.next += 1;
        self.nodes.insert(handle, MemoryNode::new(kind));
        self.stats.created += 1;
        handle
    }

    fn detach(&mut self, node: NodeHandle) -> bool {
        let Some(parent) = self.nodes.get_mut(&node).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != node);
        }
        true
    }
}

impl RenderHost for MemoryHost {
    fn create_element(&mut self, tag: &str) -> NodeHandle {
        self.alloc(MemoryNodeKind::Element(tag.to_string()))
    }

    fn create_text(&mut self, text: &str) -> NodeHandle {
        let handle = self.alloc(MemoryNodeKind::Text);
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.text = text.to_string();
        }
        handle
    }

    fn create_anchor(&mut self) -> NodeHandle {
        self.alloc(MemoryNodeKind::Anchor)
    }

    fn insert(&mut self, parent: NodeHandle, node: NodeHandle, before: Option<NodeHandle>) {
        self.detach(node);
        let Some(p) = self.nodes.get_mut(&parent) else {
            return;
        };
        let index = before
            .and_then(|b| p.children.iter().position(|c| *c == b))
            .unwrap_or(p.children.len());
        p.children.insert(index, node);
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = Some(parent);
        }
    }

    fn remove(&mut self, node: NodeHandle) {
        if self.detach(node) {
            self.stats.removed += 1;
        } else {
            self.stats.double_removals += 1;
        }
    }

    fn set_attribute(&mut self, node: NodeHandle, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.attributes.insert(name.to_string(), value.to_string());
            self.stats.attribute_writes += 1;
        }
    }

    fn set_property(&mut self, node: NodeHandle, name: &str, value: &Value) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.properties.insert(name.to_string(), value.clone());
            self.stats.attribute_writes += 1;
        }
    }

    fn set_text(&mut self, node: NodeHandle, text: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.text = text.to_string();
            self.stats.text_writes += 1;
        }
    }

    fn set_markup(&mut self, node: NodeHandle, markup: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.markup = Some(markup.to_string());
            self.stats.text_writes += 1;
        }
    }

    fn push_history(&mut self, path: &str) {
        self.history.push(path.to_string());
    }

    fn flush(&mut self) {
        self.stats.flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_before_anchor() {
        let mut host = MemoryHost::new();
        let root = host.root();
        let anchor = host.create_anchor();
        host.insert(root, anchor, None);
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(root, a, Some(anchor));
        host.insert(root, b, Some(anchor));
        assert_eq!(host.children(root), &[a, b, anchor]);
        assert_eq!(host.text_content(root), "ab");
    }

    #[test]
    fn test_double_removal_counted() {
        let mut host = MemoryHost::new();
        let root = host.root();
        let el = host.create_element("div");
        host.insert(root, el, None);
        host.remove(el);
        host.remove(el);
        let stats = host.stats();
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.double_removals, 1);
        assert!(!host.is_attached(el));
    }
}
