#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use canopy::{
    EntitySnapshot, EntitySource, EventSink, FetchError, InstanceRecord, Severity, StatusPayload,
};

/// Scripted data source. Optionally gated: each `fetch_all` blocks on the
/// semaphore until the test releases a permit, which lets tests hold a fetch
/// in flight.
pub struct MockSource {
    snapshots: Mutex<Vec<EntitySnapshot>>,
    instances: Mutex<HashMap<String, Vec<InstanceRecord>>>,
    statuses: Mutex<HashMap<String, StatusPayload>>,
    pub fetches: AtomicUsize,
    pub instance_fetches: AtomicUsize,
    pub status_fetches: AtomicUsize,
    pub fail_next: Mutex<Option<String>>,
    gate: Option<Arc<Semaphore>>,
    pub fetch_started: Notify,
}

impl MockSource {
    pub fn new(snapshots: Vec<EntitySnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots),
            instances: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            instance_fetches: AtomicUsize::new(0),
            status_fetches: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            gate: None,
            fetch_started: Notify::new(),
        })
    }

    pub fn gated(snapshots: Vec<EntitySnapshot>, gate: Arc<Semaphore>) -> Arc<Self> {
        let mut source = Self {
            snapshots: Mutex::new(snapshots),
            instances: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            instance_fetches: AtomicUsize::new(0),
            status_fetches: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            gate: None,
            fetch_started: Notify::new(),
        };
        source.gate = Some(gate);
        Arc::new(source)
    }

    pub fn set_snapshots(&self, snapshots: Vec<EntitySnapshot>) {
        *self.snapshots.lock() = snapshots;
    }

    pub fn set_instances(&self, id: &str, records: Vec<InstanceRecord>) {
        self.instances.lock().insert(id.to_owned(), records);
    }

    pub fn set_status(&self, id: &str, payload: StatusPayload) {
        self.statuses.lock().insert(id.to_owned(), payload);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitySource for MockSource {
    async fn fetch_all(&self) -> Result<Vec<EntitySnapshot>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if let Some(message) = self.fail_next.lock().take() {
            return Err(FetchError::new(message));
        }
        Ok(self.snapshots.lock().clone())
    }

    async fn fetch_instances(&self, id: &str) -> Result<Vec<InstanceRecord>, FetchError> {
        self.instance_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.instances.lock().get(id).cloned().unwrap_or_default())
    }

    async fn fetch_status(&self, id: &str) -> Result<StatusPayload, FetchError> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.statuses.lock().get(id).cloned().unwrap_or_default())
    }
}

/// Sink that records everything reported through it.
#[derive(Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<(Severity, String)>>,
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<String> {
        self.reports.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl EventSink for CollectingSink {
    fn report(&self, severity: Severity, message: &str) {
        self.reports.lock().push((severity, message.to_owned()));
    }
}

pub fn snap(id: &str, name: &str, parent: Option<&str>) -> EntitySnapshot {
    EntitySnapshot::new(id, name, parent)
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}
