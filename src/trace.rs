use std::fmt::{self, Display};

use crate::utils::BitReader;
use crate::Result;

/// One node of a [`TraceTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct TraceNode {
    pub name: String,
    pub value: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Set if parsing failed inside this node
    pub failed: bool,
}

/// Arena of parsed syntax elements.
///
/// Node 0 is the root. Every unit gets a child of the root, and the fields
/// decoded from it hang below that node.
#[derive(Debug, Clone)]
pub struct TraceTree {
    nodes: Vec<TraceNode>,
}

impl Default for TraceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TraceNode {
                name: "stream".into(),
                value: None,
                parent: None,
                children: Vec::new(),
                failed: false,
            }],
        }
    }

    pub const ROOT: usize = 0;

    pub fn add_child(&mut self, parent: usize, name: &str, value: Option<String>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(TraceNode {
            name: name.to_string(),
            value,
            parent: Some(parent),
            children: Vec::new(),
            failed: false,
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub fn node(&self, index: usize) -> Option<&TraceNode> {
        self.nodes.get(index)
    }

    pub fn children(&self, index: usize) -> impl Iterator<Item = &TraceNode> + '_ {
        self.nodes
            .get(index)
            .into_iter()
            .flat_map(move |n| n.children.iter().map(move |&c| &self.nodes[c]))
    }

    pub fn set_value(&mut self, index: usize, value: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.value = Some(value.into());
        }
    }

    /// Marks a node and all its ancestors as failed.
    pub fn mark_failed(&mut self, index: usize) {
        let mut current = Some(index);
        while let Some(i) = current {
            match self.nodes.get_mut(i) {
                Some(node) => {
                    node.failed = true;
                    current = node.parent;
                }
                None => break,
            }
        }
    }

    /// Finds a direct child of `index` by name.
    pub fn find_child(&self, index: usize, name: &str) -> Option<&TraceNode> {
        self.children(index).find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, index: usize, depth: usize) -> fmt::Result {
        let node = &self.nodes[index];
        write!(f, "{:indent$}{}", "", node.name, indent = depth * 2)?;
        if let Some(value) = &node.value {
            write!(f, " = {}", value)?;
        }
        if node.failed {
            f.write_str(" (failed)")?;
        }
        writeln!(f)?;
        for &child in &node.children {
            self.fmt_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl Display for TraceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, Self::ROOT, 0)
    }
}

/// Write handle to one node of a trace tree.
///
/// A disabled scope ignores every call, so parsers can log fields
/// unconditionally.
pub struct TraceScope<'a> {
    tree: Option<&'a mut TraceTree>,
    node: usize,
}

impl<'a> TraceScope<'a> {
    pub fn new(tree: &'a mut TraceTree, node: usize) -> Self {
        Self {
            tree: Some(tree),
            node,
        }
    }

    pub fn disabled() -> TraceScope<'static> {
        TraceScope {
            tree: None,
            node: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.tree.is_some()
    }

    /// Records a decoded value below this node.
    pub fn field(&mut self, name: &str, value: impl Display) {
        if let Some(tree) = self.tree.as_deref_mut() {
            tree.add_child(self.node, name, Some(value.to_string()));
        }
    }

    /// Opens a child node for a nested syntax structure.
    pub fn child(&mut self, name: &str) -> TraceScope<'_> {
        match self.tree.as_deref_mut() {
            Some(tree) => {
                let node = tree.add_child(self.node, name, None);
                TraceScope {
                    tree: Some(tree),
                    node,
                }
            }
            None => TraceScope {
                tree: None,
                node: 0,
            },
        }
    }

    pub fn fail(&mut self, message: impl Display) {
        if let Some(tree) = self.tree.as_deref_mut() {
            let node = tree.add_child(self.node, "error", Some(message.to_string()));
            tree.mark_failed(node);
        }
    }

    /// Reads `u(n)` and records it.
    pub fn bits(&mut self, reader: &mut BitReader<'_>, n: u32, name: &str) -> Result<u32> {
        let value = reader.read_u32(n)?;
        self.field(name, value);
        Ok(value)
    }

    pub fn flag(&mut self, reader: &mut BitReader<'_>, name: &str) -> Result<bool> {
        let value = reader.read_flag()?;
        self.field(name, value as u8);
        Ok(value)
    }

    /// Reads `ue(v)` and records it.
    pub fn ue(&mut self, reader: &mut BitReader<'_>, name: &str) -> Result<u32> {
        let value = reader.read_golomb()?;
        self.field(name, value);
        Ok(value)
    }

    /// Reads `se(v)` and records it.
    pub fn se(&mut self, reader: &mut BitReader<'_>, name: &str) -> Result<i32> {
        let value = reader.read_signed_golomb()?;
        self.field(name, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_builds_tree() {
        let mut tree = TraceTree::new();
        let unit = tree.add_child(TraceTree::ROOT, "unit 0", None);
        {
            let mut scope = TraceScope::new(&mut tree, unit);
            scope.field("nal_unit_type", 7);
            let mut sps = scope.child("seq_parameter_set_rbsp");
            sps.field("profile_idc", 100);
            sps.fail("reached end of data");
        }

        let unit_node = tree.node(unit).unwrap();
        assert!(unit_node.failed);
        assert!(tree.node(TraceTree::ROOT).unwrap().failed);
        assert_eq!(
            tree.find_child(unit, "nal_unit_type").and_then(|n| n.value.clone()),
            Some("7".to_string())
        );
        let text = tree.to_string();
        assert!(text.contains("    profile_idc = 100"));
    }

    #[test]
    fn test_read_helpers_record_fields() {
        let data = [0b1_010_011_1];
        let mut reader = BitReader::new(&data);
        let mut tree = TraceTree::new();
        let mut scope = TraceScope::new(&mut tree, TraceTree::ROOT);
        assert!(scope.flag(&mut reader, "flag").unwrap());
        assert_eq!(scope.ue(&mut reader, "ue").unwrap(), 1);
        assert_eq!(scope.bits(&mut reader, 3, "bits").unwrap(), 0b011);
        assert_eq!(scope.se(&mut reader, "se").unwrap(), 0);
        drop(scope);
        assert_eq!(tree.children(TraceTree::ROOT).count(), 4);
        assert_eq!(
            tree.find_child(TraceTree::ROOT, "bits").and_then(|n| n.value.clone()),
            Some("3".to_string())
        );
    }

    #[test]
    fn test_disabled_scope_is_noop() {
        let mut scope = TraceScope::disabled();
        scope.field("x", 1);
        let mut child = scope.child("y");
        child.fail("z");
        assert!(!scope.enabled());
    }
}
