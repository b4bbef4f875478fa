//! Row-level node tree for chat transcript rows.

use std::sync::atomic::{AtomicU64, Ordering};

use ratatui::text::Line;
use thiserror::Error;

use crate::markdown::lines_to_plain_text;

/// Process-unique node identity. Two handles name the same node iff their
/// ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomNode {
    pub id: NodeId,
    pub lines: Vec<Line<'static>>,
}

impl DomNode {
    pub fn new(lines: Vec<Line<'static>>) -> Self {
        Self {
            id: NodeId::next(),
            lines,
        }
    }

    pub fn height(&self) -> usize {
        self.lines.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} is not a child of this container")]
    NotAChild(NodeId),
}

/// Ordered children of one transcript row.
#[derive(Debug, Default)]
pub struct RowContainer {
    children: Vec<DomNode>,
}

impl RowContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, node: DomNode) {
        self.children.push(node);
    }

    /// Insert `node` right after `anchor`, or first when `anchor` is `None`.
    pub fn insert_after(&mut self, anchor: Option<NodeId>, node: DomNode) -> Result<(), DomError> {
        let index = match anchor {
            None => 0,
            Some(anchor) => self.position(anchor)? + 1,
        };
        self.children.insert(index, node);
        Ok(())
    }

    pub fn replace_with(&mut self, old: NodeId, node: DomNode) -> Result<(), DomError> {
        let index = self.position(old)?;
        self.children[index] = node;
        Ok(())
    }

    /// Refresh the lines of a node already in the container.
    pub fn update(&mut self, node: &DomNode) -> Result<(), DomError> {
        let index = self.position(node.id)?;
        self.children[index].lines.clone_from(&node.lines);
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Result<DomNode, DomError> {
        let index = self.position(id)?;
        Ok(self.children.remove(index))
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.children.iter().any(|child| child.id == id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.children.iter().map(|child| child.id).collect()
    }

    pub fn children(&self) -> &[DomNode] {
        &self.children
    }

    pub fn lines(&self) -> Vec<Line<'static>> {
        self.children
            .iter()
            .flat_map(|child| child.lines.iter().cloned())
            .collect()
    }

    pub fn plain_text(&self) -> String {
        lines_to_plain_text(&self.lines())
    }

    pub fn height(&self) -> usize {
        self.children.iter().map(DomNode::height).sum()
    }

    fn position(&self, id: NodeId) -> Result<usize, DomError> {
        self.children
            .iter()
            .position(|child| child.id == id)
            .ok_or(DomError::NotAChild(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(text: &str) -> DomNode {
        DomNode::new(vec![Line::from(text.to_string())])
    }

    #[test]
    fn splicing_keeps_order() {
        let mut row = RowContainer::new();
        let a = node("a");
        let c = node("c");
        row.append(a.clone());
        row.append(c.clone());
        row.insert_after(Some(a.id), node("b")).unwrap();
        row.insert_after(None, node("start")).unwrap();
        assert_eq!(row.plain_text(), "start\na\nb\nc");

        let replacement = node("C");
        row.replace_with(c.id, replacement.clone()).unwrap();
        assert!(!row.contains(c.id));
        assert!(row.contains(replacement.id));
        assert_eq!(row.height(), 4);
    }

    #[test]
    fn foreign_nodes_are_rejected() {
        let mut row = RowContainer::new();
        let stranger = node("x");
        assert_eq!(
            row.replace_with(stranger.id, node("y")),
            Err(DomError::NotAChild(stranger.id))
        );
        assert_eq!(row.remove(stranger.id), Err(DomError::NotAChild(stranger.id)));
        assert!(row.insert_after(Some(stranger.id), node("z")).is_err());
    }

    #[test]
    fn update_refreshes_lines_in_place() {
        let mut row = RowContainer::new();
        let mut a = node("a");
        row.append(a.clone());
        a.lines.push(Line::from("a2"));
        row.update(&a).unwrap();
        assert_eq!(row.node_ids(), vec![a.id]);
        assert_eq!(row.height(), 2);
    }
}
