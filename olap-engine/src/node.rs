//! FILENAME: olap-engine/src/node.rs
//! Key Tree - memoizes group keys while records are scanned.
//!
//! Nodes live in one arena and refer to each other by index. Walking the
//! tree with a record's field values yields the canonical key for every
//! prefix of that record, so a scan of N records over D levels builds at
//! most N x D keys. Each row node can host a separate column sub-tree,
//! which makes column keys distinct per row while sharing structure within
//! one row.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::definition::PivotField;
use crate::key::{AxisFields, GroupKey};
use crate::value::{Record, ValueKey};

/// Index of a node inside its [`KeyTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// What a child edge is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Value(ValueKey),
    ValueField(usize),
}

#[derive(Debug)]
pub struct GroupNode {
    key: Arc<GroupKey>,
    children: FxHashMap<NodeKey, NodeId>,
    parent: Option<NodeId>,
    /// Root of the column sub-tree scoped to this row node.
    tree: Option<NodeId>,
}

/// Arena of group nodes. Rebuilt from scratch on every rebuild.
#[derive(Debug)]
pub struct KeyTree {
    nodes: Vec<GroupNode>,
}

impl KeyTree {
    /// Creates a tree whose root is the grand total of `axis`.
    pub fn new(axis: &Arc<AxisFields>) -> Self {
        let mut tree = KeyTree { nodes: Vec::new() };
        tree.push(Arc::new(GroupKey::grand_total(axis)), None);
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn key(&self, id: NodeId) -> &Arc<GroupKey> {
        &self.nodes[id.0].key
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Walks from `from` down to `depth` fields using the values of `item`,
    /// creating nodes as needed. When `value_field` is given, one more step
    /// reaches the terminal node carrying that value field.
    pub fn get_node(
        &mut self,
        from: NodeId,
        depth: usize,
        value_field: Option<(&Arc<Vec<PivotField>>, usize)>,
        item: &Record,
    ) -> NodeId {
        let mut node = from;
        let start = self.key(from).field_count();

        for i in start..depth {
            let value = {
                let key = self.key(node);
                item.get(&key.fields()[i].binding).clone()
            };
            let edge = NodeKey::Value(ValueKey::from(&value));
            node = match self.nodes[node.0].children.get(&edge) {
                Some(&child) => child,
                None => {
                    let key = Arc::new(self.key(node).child(value));
                    self.push_child(node, edge, key)
                }
            };
        }

        if let Some((fields, index)) = value_field {
            let edge = NodeKey::ValueField(index);
            node = match self.nodes[node.0].children.get(&edge) {
                Some(&child) => child,
                None => {
                    let key = Arc::new(self.key(node).with_value_field(fields, index));
                    self.push_child(node, edge, key)
                }
            };
        }

        node
    }

    /// The column sub-tree root for `row_node`, created on first use.
    pub fn subtree(&mut self, row_node: NodeId, axis: &Arc<AxisFields>) -> NodeId {
        if let Some(root) = self.nodes[row_node.0].tree {
            return root;
        }
        let root = self.push(Arc::new(GroupKey::grand_total(axis)), Some(row_node));
        self.nodes[row_node.0].tree = Some(root);
        root
    }

    fn push(&mut self, key: Arc<GroupKey>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GroupNode {
            key,
            children: FxHashMap::default(),
            parent,
            tree: None,
        });
        id
    }

    fn push_child(&mut self, parent: NodeId, edge: NodeKey, key: Arc<GroupKey>) -> NodeId {
        let id = self.push(key, Some(parent));
        self.nodes[parent.0].children.insert(edge, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes() -> (Arc<AxisFields>, Arc<AxisFields>) {
        let rows = AxisFields::new(
            vec![PivotField::new("Country", "C"), PivotField::new("City", "T")],
            false,
        );
        let cols = AxisFields::new(vec![PivotField::new("Year", "Y")], false);
        (rows, cols)
    }

    #[test]
    fn test_walk_reuses_prefixes() {
        let (rows, _) = axes();
        let mut tree = KeyTree::new(&rows);
        let root = tree.root();

        let nyc = Record::new().with("C", "US").with("T", "NYC");
        let la = Record::new().with("C", "US").with("T", "LA");

        let a = tree.get_node(root, 2, None, &nyc);
        let b = tree.get_node(root, 2, None, &la);
        assert_ne!(a, b);
        assert_eq!(tree.parent(a), tree.parent(b));
        assert_eq!(tree.len(), 4);

        let again = tree.get_node(root, 2, None, &nyc);
        assert_eq!(a, again);
        assert!(Arc::ptr_eq(tree.key(a), tree.key(again)));
        assert_eq!(tree.key(a).as_str(), "Country:US;City:NYC;");
    }

    #[test]
    fn test_depth_zero_is_root() {
        let (rows, _) = axes();
        let mut tree = KeyTree::new(&rows);
        let root = tree.root();
        let node = tree.get_node(root, 0, None, &Record::new().with("C", "US"));
        assert_eq!(node, root);
        assert!(tree.key(node).is_grand_total());
    }

    #[test]
    fn test_value_field_step() {
        let (_, cols) = axes();
        let value_fields = Arc::new(vec![PivotField::new("Sales", "S"), PivotField::new("Qty", "Q")]);
        let mut tree = KeyTree::new(&cols);
        let root = tree.root();
        let item = Record::new().with("Y", 2024);

        let sales = tree.get_node(root, 1, Some((&value_fields, 0)), &item);
        let qty = tree.get_node(root, 1, Some((&value_fields, 1)), &item);
        assert_ne!(sales, qty);
        assert_eq!(tree.key(sales).as_str(), "Year:2024;Sales:");
        assert_eq!(tree.key(qty).value_field_index(), Some(1));
    }

    #[test]
    fn test_subtrees_are_scoped_per_row() {
        let (rows, cols) = axes();
        let value_fields = Arc::new(vec![PivotField::new("Sales", "S")]);
        let mut tree = KeyTree::new(&rows);
        let root = tree.root();

        let us = Record::new().with("C", "US").with("Y", 2024);
        let uk = Record::new().with("C", "UK").with("Y", 2024);
        let us_row = tree.get_node(root, 1, None, &us);
        let uk_row = tree.get_node(root, 1, None, &uk);

        let us_cols = tree.subtree(us_row, &cols);
        assert_eq!(tree.subtree(us_row, &cols), us_cols);
        let uk_cols = tree.subtree(uk_row, &cols);
        assert_ne!(us_cols, uk_cols);

        let a = tree.get_node(us_cols, 1, Some((&value_fields, 0)), &us);
        let b = tree.get_node(uk_cols, 1, Some((&value_fields, 0)), &uk);
        assert_ne!(a, b);
        assert!(!Arc::ptr_eq(tree.key(a), tree.key(b)));
        // same column combination, so the key strings agree
        assert_eq!(tree.key(a), tree.key(b));
    }

    #[test]
    fn test_null_values_group_together() {
        let (rows, _) = axes();
        let mut tree = KeyTree::new(&rows);
        let root = tree.root();
        let a = tree.get_node(root, 1, None, &Record::new());
        let b = tree.get_node(root, 1, None, &Record::new().with("T", "x"));
        assert_eq!(a, b);
        assert!(tree.key(a).raw_value(0).is_some_and(|v| v.is_null()));
    }
}
