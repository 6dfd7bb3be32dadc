//! Pure expansion-state traversal for tree rendering.
//!
//! The view layer keeps a set of expanded ids and renders whatever this
//! module returns; no show/hide logic lives on its side. Children of a
//! collapsed node are simply absent from the row list.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::node::{EntityId, EntityNode};
use crate::health::HealthStatus;

/// One renderable row of the entity tree.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleRow {
    pub id: EntityId,
    pub name: String,
    pub depth: usize,
    pub has_children: bool,
    pub expanded: bool,
    pub status: HealthStatus,
}

/// Flatten the tree into rows, descending only into expanded nodes. Row order
/// follows the tree's render order (children already sorted by name, then id).
pub fn visible_rows(roots: &[Arc<EntityNode>], expanded: &HashSet<EntityId>) -> Vec<VisibleRow> {
    let mut rows = Vec::new();
    for root in roots {
        push_rows(root, 0, expanded, &mut rows);
    }
    rows
}

fn push_rows(
    node: &Arc<EntityNode>,
    depth: usize,
    expanded: &HashSet<EntityId>,
    rows: &mut Vec<VisibleRow>,
) {
    let children = node.children();
    let is_expanded = expanded.contains(node.id());
    rows.push(VisibleRow {
        id: node.id().clone(),
        name: node.name(),
        depth,
        has_children: !children.is_empty(),
        expanded: is_expanded,
        status: node.status(),
    });
    if is_expanded {
        for child in &children {
            push_rows(child, depth + 1, expanded, rows);
        }
    }
}
