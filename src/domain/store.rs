//! Entity store — owns one entity type's tree/map and its polling lifecycle.
//!
//! Constructed with injected collaborators (data source, event sink, config);
//! there is no ambient global state. All mutation of the owned graph happens
//! synchronously inside a fetch-reconcile cycle; the only suspension points
//! are the source calls, and the single-flight poller guarantees cycles for
//! one store never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::instances;
use crate::domain::node::{EntityKind, EntityNode, EntitySnapshot};
use crate::domain::reconcile::Graph;
use crate::error::SyncError;
use crate::events::EventSink;
use crate::poller::Poller;
use crate::source::EntitySource;

pub struct EntityStore {
    kind: EntityKind,
    source: Arc<dyn EntitySource>,
    events: Arc<dyn EventSink>,
    graph: Mutex<Graph>,
    /// Last payload as fetched, for the unchanged-payload short circuit.
    last_payload: Mutex<Option<Vec<EntitySnapshot>>>,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    /// Store-level change marker.
    version: AtomicU64,
    /// Bumped by `deactivate`; a cycle only merges results fetched under the
    /// epoch it started with.
    epoch: AtomicU64,
    poller: Poller,
}

impl EntityStore {
    pub fn new(
        kind: EntityKind,
        source: Arc<dyn EntitySource>,
        events: Arc<dyn EventSink>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            source,
            events,
            graph: Mutex::new(Graph::new()),
            last_payload: Mutex::new(None),
            last_refresh: Mutex::new(None),
            version: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            poller: Poller::new(config.poll_interval()),
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Look up a node by id. A miss is a `StaleReference`: the id the caller
    /// holds is no longer part of the tree.
    pub fn get(&self, id: &str) -> Result<Arc<EntityNode>, SyncError> {
        self.graph
            .lock()
            .get(id)
            .ok_or_else(|| SyncError::StaleReference { id: id.to_owned() })
    }

    /// Root nodes in render order.
    pub fn roots(&self) -> Vec<Arc<EntityNode>> {
        self.graph.lock().roots()
    }

    /// Every node, pre-order over the sorted tree.
    pub fn all(&self) -> Vec<Arc<EntityNode>> {
        self.graph.lock().all()
    }

    pub fn len(&self) -> usize {
        self.graph.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.lock().is_empty()
    }

    /// Store-level change marker; compare against a previously seen value to
    /// decide whether any derived view needs rebuilding.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.lock()
    }

    pub fn is_active(&self) -> bool {
        self.poller.is_active()
    }

    /// Start polling. Idempotent. The first cycle runs immediately; existing
    /// data (kept across a previous deactivate for fast reactivation) stays
    /// visible but is refreshed before it should be trusted.
    pub fn activate(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.poller.activate(move |force| {
            let weak = weak.clone();
            async move {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = store.run_cycle(force).await {
                    warn!(
                        kind = store.kind.as_str(),
                        error = %err,
                        "refresh cycle failed, retrying next tick"
                    );
                }
            }
        });
    }

    /// Stop polling and mark the store inert. Any fetch still in flight will
    /// resolve against a stale epoch and be discarded without merging.
    pub fn deactivate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.poller.deactivate();
    }

    /// One fetch-reconcile cycle. While the store is active the request
    /// coalesces into the poller (single-flight, never dropped); on an
    /// inactive store it runs directly and surfaces the fetch error.
    ///
    /// `force` bypasses the unchanged-payload short circuit — the escape
    /// hatch for backends that under-report changes.
    pub async fn update(&self, force: bool) -> Result<(), SyncError> {
        if self.poller.is_active() {
            self.poller.request_refresh(force);
            Ok(())
        } else {
            self.run_cycle(force).await
        }
    }

    async fn run_cycle(&self, force: bool) -> Result<(), SyncError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let incoming = self.source.fetch_all().await?;
        if !self.epoch_matches(epoch) {
            debug!(kind = self.kind.as_str(), "discarding fetch result after deactivate");
            return Ok(());
        }

        let mut changed = false;
        let created: Vec<Arc<EntityNode>>;
        {
            let mut last_payload = self.last_payload.lock();
            if force || last_payload.as_deref() != Some(incoming.as_slice()) {
                let mut graph = self.graph.lock();
                let summary = graph.reconcile(incoming.clone(), self.events.as_ref());
                created = summary
                    .created
                    .iter()
                    .filter_map(|id| graph.get(id))
                    .collect();
                changed |= !summary.is_empty();
                *last_payload = Some(incoming);
            } else {
                debug!(kind = self.kind.as_str(), "payload unchanged, skipping reconcile");
                created = Vec::new();
            }
        }

        if self.kind.has_instances() {
            // Full instance lists for nodes first seen this cycle; a forced
            // update re-pulls everyone's.
            let need_lists = if force { self.all() } else { created };
            for node in need_lists {
                let records = self.source.fetch_instances(node.id()).await?;
                if !self.epoch_matches(epoch) {
                    return Ok(());
                }
                changed |= instances::apply_instance_list(&node, records);
            }

            // Status payloads for every service, every cycle.
            for node in self.all() {
                let payload = self.source.fetch_status(node.id()).await?;
                if !self.epoch_matches(epoch) {
                    return Ok(());
                }
                changed |= instances::merge_instance_status(&node, payload, self.events.as_ref());
            }
        }

        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        *self.last_refresh.lock() = Some(Utc::now());
        debug!(kind = self.kind.as_str(), changed, "refresh cycle complete");
        Ok(())
    }

    fn epoch_matches(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}
