//! The test tree: Feature nodes at the root, Scenario nodes below them.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// Separator between a feature id and a scenario title in a scenario id.
pub const SCENARIO_SEPARATOR: &str = "::";

/// A zero-based line/column position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// A start/end span in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A span covering columns `0..len` of a single line.
    pub fn line(line: usize, len: usize) -> Self {
        Self::new(Position::new(line, 0), Position::new(line, len))
    }
}

/// A Feature or a Scenario / Scenario Outline in the test tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestNode {
    /// Absolute file path for features, `{feature_id}::{title}` for scenarios.
    pub id: String,
    pub label: String,
    pub uri: Option<PathBuf>,
    pub range: Option<Range>,
    /// Whether children are populated lazily (true for features only).
    pub resolvable: bool,
    children: Vec<TestNode>,
}

impl TestNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, uri: Option<PathBuf>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            uri,
            range: None,
            resolvable: false,
            children: Vec::new(),
        }
    }

    /// Create the placeholder Feature node for a file, before it has been parsed.
    ///
    /// The label is the file's base name until the parser replaces it.
    pub fn feature(path: &Path) -> Self {
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let mut node = Self::new(path.to_string_lossy(), label, Some(path.to_path_buf()));
        node.resolvable = true;
        node
    }

    /// Scenario nodes carry the separator in their id; features never do.
    pub fn is_scenario(&self) -> bool {
        self.id.contains(SCENARIO_SEPARATOR)
    }

    pub fn children(&self) -> &[TestNode] {
        &self.children
    }

    /// Add a child, replacing any existing child with the same id in place.
    pub fn add_child(&mut self, child: TestNode) {
        match self.children.iter_mut().find(|c| c.id == child.id) {
            Some(existing) => *existing = child,
            None => self.children.push(child),
        }
    }

    pub fn replace_children(&mut self, children: Vec<TestNode>) {
        self.children.clear();
        for child in children {
            self.add_child(child);
        }
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    /// Find this node or one of its descendants by id.
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Root collection of Feature nodes, keyed by id, in insertion order.
#[derive(Debug, Default)]
pub struct TestTree {
    items: IndexMap<String, TestNode>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every root and insert `nodes` instead.
    pub fn replace(&mut self, nodes: Vec<TestNode>) {
        self.items.clear();
        for node in nodes {
            self.add(node);
        }
    }

    /// Insert a root node. An existing node with the same id is replaced.
    pub fn add(&mut self, node: TestNode) {
        self.items.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&TestNode> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TestNode> {
        self.items.get_mut(id)
    }

    /// Remove a root node. Unknown ids are ignored.
    pub fn delete(&mut self, id: &str) -> Option<TestNode> {
        self.items.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestNode> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TestNode> {
        self.items.values_mut()
    }

    /// Find any node, root or scenario, by id.
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        self.items.values().find_map(|n| n.find(id))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
