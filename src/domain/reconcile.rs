//! Tree reconciler — the single piece of graph-mutation logic in the engine.
//!
//! `Graph::reconcile` merges a full incoming snapshot set into the existing
//! map/tree by id: new ids become nodes, surviving ids are updated in place
//! (their `Arc` handles stay valid), vanished ids are evicted together with
//! any descendants that vanished with them. The same reconciler serves the
//! service, host and pool stores.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::SyncError;
use crate::events::{EventSink, Severity};
use crate::domain::node::{EntityId, EntityNode, EntitySnapshot};

/// What one reconcile pass did. Empty summary means the incoming set was
/// byte-for-byte what the graph already held.
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    /// Existing ids whose snapshot or tree position changed.
    pub changed: Vec<EntityId>,
    /// Ids seen for the first time this cycle.
    pub created: Vec<EntityId>,
    /// Ids evicted this cycle, descendants included.
    pub removed: Vec<EntityId>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.created.is_empty() && self.removed.is_empty()
    }
}

/// One entity type's tree and lookup map. Owned exclusively by its store; all
/// mutation goes through `reconcile`.
#[derive(Default)]
pub struct Graph {
    map: BTreeMap<EntityId, Arc<EntityNode>>,
    roots: Vec<Arc<EntityNode>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<EntityNode>> {
        self.map.get(id).cloned()
    }

    pub fn roots(&self) -> Vec<Arc<EntityNode>> {
        self.roots.clone()
    }

    /// Every node in deterministic render order (pre-order walk of the
    /// sorted tree).
    pub fn all(&self) -> Vec<Arc<EntityNode>> {
        let mut out = Vec::with_capacity(self.map.len());
        let mut stack: Vec<Arc<EntityNode>> = self.roots.iter().rev().cloned().collect();
        while let Some(node) = stack.pop() {
            let children = node.children();
            out.push(node);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Merge a full snapshot set into the graph. Single logical pass by id:
    /// evict, upsert, then rewire structure deterministically.
    pub fn reconcile(
        &mut self,
        incoming: Vec<EntitySnapshot>,
        events: &dyn EventSink,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let mut incoming_by_id: BTreeMap<EntityId, EntitySnapshot> = BTreeMap::new();
        for snapshot in incoming {
            if let Some(previous) = incoming_by_id.insert(snapshot.id.clone(), snapshot) {
                events.report(
                    Severity::Warning,
                    &format!("duplicate id {} in snapshot set, keeping the last", previous.id),
                );
            }
        }

        // Eviction: ids no longer reported disappear from the map. Descendants
        // that vanished with their ancestor are caught by the same diff.
        let stale: Vec<EntityId> = self
            .map
            .keys()
            .filter(|id| !incoming_by_id.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            self.map.remove(&id);
            summary.removed.push(id);
        }

        // Upsert: update surviving nodes in place, create the rest.
        let mut changed: BTreeSet<EntityId> = BTreeSet::new();
        for (id, snapshot) in incoming_by_id {
            let snapshot = Arc::new(snapshot);
            match self.map.get(&id) {
                Some(node) => {
                    if node.apply_snapshot(snapshot) {
                        changed.insert(id);
                    }
                }
                None => {
                    self.map.insert(id.clone(), EntityNode::new(snapshot));
                    summary.created.push(id);
                }
            }
        }

        let effective = self.resolve_parents(events);

        // Group children under their effective parent and order everything by
        // (name, id) for deterministic rendering.
        let mut children_of: HashMap<EntityId, Vec<Arc<EntityNode>>> = HashMap::new();
        let mut roots: Vec<Arc<EntityNode>> = Vec::new();
        for (id, node) in &self.map {
            match effective.get(id).and_then(Clone::clone) {
                Some(parent_id) => children_of
                    .entry(parent_id)
                    .or_default()
                    .push(node.clone()),
                None => roots.push(node.clone()),
            }
        }
        sort_for_render(&mut roots);
        for list in children_of.values_mut() {
            sort_for_render(list);
        }

        let created: HashSet<&EntityId> = summary.created.iter().collect();
        for (id, node) in &self.map {
            let parent = effective
                .get(id)
                .and_then(Clone::clone)
                .and_then(|parent_id| self.map.get(&parent_id));
            let kids = children_of.remove(id).unwrap_or_default();
            if node.set_structure(parent, kids) && !created.contains(id) {
                changed.insert(id.clone());
            }
        }
        self.roots = roots;

        summary.changed = changed.into_iter().collect();
        if !summary.is_empty() {
            debug!(
                changed = summary.changed.len(),
                created = summary.created.len(),
                removed = summary.removed.len(),
                "reconciled snapshot set"
            );
        }
        summary
    }

    /// Map every id to the parent it will actually hang under this cycle.
    /// A parent reference to an absent id makes the node a root (reported as
    /// an orphan anomaly); parent cycles are broken at their lowest id.
    fn resolve_parents(&self, events: &dyn EventSink) -> BTreeMap<EntityId, Option<EntityId>> {
        let mut effective: BTreeMap<EntityId, Option<EntityId>> = BTreeMap::new();
        for (id, node) in &self.map {
            let parent = match node.parent_id() {
                Some(parent_id) if parent_id == *id => {
                    events.report(
                        Severity::Warning,
                        &format!("entity {id} names itself as parent, treating as root"),
                    );
                    None
                }
                Some(parent_id) if !self.map.contains_key(&parent_id) => {
                    events.report(
                        Severity::Warning,
                        &SyncError::OrphanEntity {
                            id: id.clone(),
                            parent_id,
                        }
                        .to_string(),
                    );
                    None
                }
                other => other,
            };
            effective.insert(id.clone(), parent);
        }

        // Acyclicity: walk each ancestor chain; a node that reaches itself is
        // re-rooted, which unwinds the whole cycle (BTreeMap order makes the
        // break point the lowest id).
        let ids: Vec<EntityId> = effective.keys().cloned().collect();
        for id in ids {
            let mut cursor = effective.get(&id).and_then(Clone::clone);
            let mut hops = 0usize;
            while let Some(parent_id) = cursor {
                if parent_id == id {
                    events.report(
                        Severity::Warning,
                        &format!("parent cycle through entity {id}, treating as root"),
                    );
                    effective.insert(id.clone(), None);
                    break;
                }
                hops += 1;
                if hops > self.map.len() {
                    break;
                }
                cursor = effective.get(&parent_id).and_then(Clone::clone);
            }
        }
        effective
    }
}

fn sort_for_render(nodes: &mut [Arc<EntityNode>]) {
    nodes.sort_by(|a, b| {
        a.name()
            .cmp(&b.name())
            .then_with(|| a.id().cmp(b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        reports: Mutex<Vec<(Severity, String)>>,
    }

    impl CollectingSink {
        fn messages(&self) -> Vec<String> {
            self.reports.lock().iter().map(|(_, m)| m.clone()).collect()
        }
    }

    impl EventSink for CollectingSink {
        fn report(&self, severity: Severity, message: &str) {
            self.reports.lock().push((severity, message.to_owned()));
        }
    }

    fn snap(id: &str, name: &str, parent: Option<&str>) -> EntitySnapshot {
        EntitySnapshot::new(id, name, parent)
    }

    #[test]
    fn single_root_from_empty() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        let summary = graph.reconcile(vec![snap("1", "A", None)], &sink);

        assert_eq!(summary.created, vec!["1".to_string()]);
        let roots = graph.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name(), "A");
        assert!(roots[0].children().is_empty());
    }

    #[test]
    fn omitted_child_is_evicted_from_map_and_parent() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(
            vec![snap("1", "A", None), snap("2", "B", Some("1"))],
            &sink,
        );
        assert_eq!(graph.get("1").unwrap().children().len(), 1);

        let summary = graph.reconcile(vec![snap("1", "A", None)], &sink);
        assert_eq!(summary.removed, vec!["2".to_string()]);
        assert!(graph.get("2").is_none());
        assert!(graph.get("1").unwrap().children().is_empty());
    }

    #[test]
    fn removing_a_parent_takes_its_descendants() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(
            vec![
                snap("1", "A", None),
                snap("2", "B", Some("1")),
                snap("3", "C", Some("2")),
                snap("4", "D", None),
            ],
            &sink,
        );

        let summary = graph.reconcile(vec![snap("4", "D", None)], &sink);
        let mut removed = summary.removed.clone();
        removed.sort();
        assert_eq!(removed, vec!["1", "2", "3"]);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.roots().len(), 1);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        let set = vec![
            snap("1", "A", None),
            snap("2", "B", Some("1")),
            snap("3", "C", Some("1")),
        ];
        graph.reconcile(set.clone(), &sink);

        let versions: Vec<u64> = graph.all().iter().map(|n| n.version()).collect();
        let order: Vec<EntityId> = graph.all().iter().map(|n| n.id().clone()).collect();

        let summary = graph.reconcile(set, &sink);
        assert!(summary.is_empty());
        assert_eq!(
            graph.all().iter().map(|n| n.version()).collect::<Vec<_>>(),
            versions
        );
        assert_eq!(
            graph.all().iter().map(|n| n.id().clone()).collect::<Vec<_>>(),
            order
        );
    }

    #[test]
    fn surviving_nodes_keep_their_identity() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(vec![snap("1", "A", None)], &sink);
        let before = graph.get("1").unwrap();

        let mut renamed = snap("1", "A2", None);
        renamed
            .extra
            .insert("note".into(), serde_json::Value::from("refetched"));
        let summary = graph.reconcile(vec![renamed], &sink);

        let after = graph.get("1").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.name(), "A2");
        assert_eq!(summary.changed, vec!["1".to_string()]);
        assert!(after.version() > 1);
    }

    #[test]
    fn orphan_becomes_root_and_is_reported() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(vec![snap("2", "B", Some("missing"))], &sink);

        let roots = graph.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id(), "2");
        assert!(roots[0].parent().is_none());
        assert!(sink
            .messages()
            .iter()
            .any(|m| m.contains("unknown parent missing")));
    }

    #[test]
    fn parent_cycle_is_broken_and_reported() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(
            vec![snap("1", "A", Some("2")), snap("2", "B", Some("1"))],
            &sink,
        );

        // One of the two becomes a root, the other stays attached under it.
        assert_eq!(graph.roots().len(), 1);
        assert_eq!(graph.len(), 2);
        assert!(sink.messages().iter().any(|m| m.contains("cycle")));
        // No node is its own ancestor.
        for node in graph.all() {
            let mut ancestor = node.parent();
            while let Some(current) = ancestor {
                assert!(!Arc::ptr_eq(&current, &node));
                ancestor = current.parent();
            }
        }
    }

    #[test]
    fn children_are_ordered_by_name_then_id() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(
            vec![
                snap("1", "root", None),
                snap("9", "zeta", Some("1")),
                snap("5", "alpha", Some("1")),
                snap("7", "alpha", Some("1")),
            ],
            &sink,
        );

        let names_and_ids: Vec<(String, EntityId)> = graph
            .get("1")
            .unwrap()
            .children()
            .iter()
            .map(|c| (c.name(), c.id().clone()))
            .collect();
        assert_eq!(
            names_and_ids,
            vec![
                ("alpha".into(), "5".into()),
                ("alpha".into(), "7".into()),
                ("zeta".into(), "9".into()),
            ]
        );
    }

    #[test]
    fn reparenting_moves_the_subtree() {
        let sink = CollectingSink::default();
        let mut graph = Graph::new();
        graph.reconcile(
            vec![
                snap("1", "A", None),
                snap("2", "B", None),
                snap("3", "C", Some("1")),
            ],
            &sink,
        );

        let summary = graph.reconcile(
            vec![
                snap("1", "A", None),
                snap("2", "B", None),
                snap("3", "C", Some("2")),
            ],
            &sink,
        );

        assert!(summary.changed.contains(&"1".to_string()));
        assert!(summary.changed.contains(&"2".to_string()));
        assert!(summary.changed.contains(&"3".to_string()));
        assert!(graph.get("1").unwrap().children().is_empty());
        let b_children = graph.get("2").unwrap().children();
        assert_eq!(b_children.len(), 1);
        assert_eq!(b_children[0].id(), "3");
        assert_eq!(
            graph.get("3").unwrap().parent().unwrap().id(),
            "2"
        );
    }
}
