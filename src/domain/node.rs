//! Entity and instance models.
//!
//! An `EntityNode` is the identity-stable handle the view layer holds across
//! refreshes: the `Arc` never changes for a given id while that id stays in
//! the fetched snapshot set. The immutable raw payload lives in an
//! `Arc<EntitySnapshot>` that is swapped wholesale; everything derived from it
//! (name, parent, children, status, instances) sits behind one lock and is
//! mutated in place by the reconciler and instance merger.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::health::{self, DesiredState, HealthCheckResult, HealthStatus, InstanceState};
use crate::source::InstanceRecord;

pub type EntityId = String;

/// Which entity type a store owns. Only service stores carry instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Service,
    Host,
    Pool,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Service => "service",
            EntityKind::Host => "host",
            EntityKind::Pool => "pool",
        }
    }

    pub(crate) fn has_instances(self) -> bool {
        matches!(self, EntityKind::Service)
    }
}

/// Raw payload for one entity as last fetched. Replaced wholesale on refresh,
/// never edited field-by-field; `extra` keeps whatever else the backend sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    #[serde(default)]
    pub desired_state: DesiredState,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_owned),
            desired_state: DesiredState::default(),
            extra: serde_json::Map::new(),
        }
    }
}

/// One running (or not) instance of a service. Owned exclusively by its parent
/// node; consumers get clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceNode {
    pub id: String,
    pub service_id: EntityId,
    pub mode: String,
    pub connections: u64,
    pub host_id: Option<String>,
    pub health_checks: BTreeMap<String, HealthCheckResult>,
    pub current_state: InstanceState,
    pub last_update: DateTime<Utc>,
}

impl InstanceNode {
    pub(crate) fn from_record(service_id: &str, record: InstanceRecord) -> Self {
        let current_state = health::instance_state(&record.health_checks);
        Self {
            id: record.instance_id,
            service_id: service_id.to_owned(),
            mode: record.mode,
            connections: record.connections,
            host_id: record.host_id,
            health_checks: record.health_checks,
            current_state,
            last_update: Utc::now(),
        }
    }

    pub fn has_host(&self) -> bool {
        self.host_id.is_some()
    }
}

pub(in crate::domain) struct NodeInner {
    pub name: String,
    pub snapshot: Arc<EntitySnapshot>,
    /// Parent id as requested by the snapshot; may differ from the effective
    /// parent when the referenced id is missing (orphan treated as root).
    pub parent_id: Option<EntityId>,
    pub parent: Weak<EntityNode>,
    pub children: Vec<Arc<EntityNode>>,
    pub desired_state: DesiredState,
    pub status: HealthStatus,
    pub instances: Vec<InstanceNode>,
    pub last_update: DateTime<Utc>,
    pub version: u64,
}

impl NodeInner {
    pub fn bump(&mut self) {
        self.version += 1;
        self.last_update = Utc::now();
    }
}

/// Identity-stable entity handle. The id is fixed for the node's lifetime;
/// children hold strong references and the parent link is weak, so the graph
/// cannot own a cycle.
pub struct EntityNode {
    id: EntityId,
    inner: RwLock<NodeInner>,
}

impl EntityNode {
    pub(in crate::domain) fn new(snapshot: Arc<EntitySnapshot>) -> Arc<Self> {
        let status = health::evaluate(snapshot.desired_state, &[]);
        Arc::new(Self {
            id: snapshot.id.clone(),
            inner: RwLock::new(NodeInner {
                name: snapshot.name.clone(),
                parent_id: snapshot.parent_id.clone(),
                desired_state: snapshot.desired_state,
                snapshot,
                parent: Weak::new(),
                children: Vec::new(),
                status,
                instances: Vec::new(),
                last_update: Utc::now(),
                version: 1,
            }),
        })
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// The last raw payload, shared immutably.
    pub fn snapshot(&self) -> Arc<EntitySnapshot> {
        self.inner.read().snapshot.clone()
    }

    pub fn parent_id(&self) -> Option<EntityId> {
        self.inner.read().parent_id.clone()
    }

    pub fn parent(&self) -> Option<Arc<EntityNode>> {
        self.inner.read().parent.upgrade()
    }

    /// Children in render order (name, then id).
    pub fn children(&self) -> Vec<Arc<EntityNode>> {
        self.inner.read().children.clone()
    }

    pub fn desired_state(&self) -> DesiredState {
        self.inner.read().desired_state
    }

    pub fn status(&self) -> HealthStatus {
        self.inner.read().status
    }

    pub fn instances(&self) -> Vec<InstanceNode> {
        self.inner.read().instances.clone()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.inner.read().last_update
    }

    /// Change marker: bumped on every structural or status mutation, untouched
    /// by reconciles that change nothing.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub(in crate::domain) fn lock(&self) -> RwLockWriteGuard<'_, NodeInner> {
        self.inner.write()
    }

    /// Swap in a freshly fetched snapshot and recompute snapshot-derived
    /// fields. Returns true (and bumps the marker) only when the payload
    /// actually differs.
    pub(in crate::domain) fn apply_snapshot(&self, snapshot: Arc<EntitySnapshot>) -> bool {
        let mut inner = self.inner.write();
        if *inner.snapshot == *snapshot {
            return false;
        }
        inner.name = snapshot.name.clone();
        inner.parent_id = snapshot.parent_id.clone();
        inner.desired_state = snapshot.desired_state;
        inner.snapshot = snapshot;
        inner.status = health::evaluate(inner.desired_state, &inner.instances);
        inner.bump();
        true
    }

    /// Rewire this node's place in the tree. Returns true when the parent or
    /// the child list changed, comparing by node identity.
    pub(in crate::domain) fn set_structure(
        &self,
        parent: Option<&Arc<EntityNode>>,
        children: Vec<Arc<EntityNode>>,
    ) -> bool {
        let mut inner = self.inner.write();
        let parent_same = match (parent, inner.parent.upgrade()) {
            (Some(next), Some(prev)) => Arc::ptr_eq(next, &prev),
            (None, None) => true,
            _ => false,
        };
        let children_same = inner.children.len() == children.len()
            && inner
                .children
                .iter()
                .zip(children.iter())
                .all(|(prev, next)| Arc::ptr_eq(prev, next));
        if parent_same && children_same {
            return false;
        }
        inner.parent = parent.map_or_else(Weak::new, Arc::downgrade);
        inner.children = children;
        inner.bump();
        true
    }
}

impl std::fmt::Debug for EntityNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("EntityNode")
            .field("id", &self.id)
            .field("name", &inner.name)
            .field("parent_id", &inner.parent_id)
            .field("children", &inner.children.len())
            .field("status", &inner.status)
            .field("version", &inner.version)
            .finish()
    }
}
