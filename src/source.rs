//! Data-access seam between the engine and whatever transport feeds it.
//!
//! The engine only ever asks for full snapshot sets, full instance lists, and
//! per-entity status payloads. A source must either fulfil a call or fail it
//! with a `FetchError`; it must never partially mutate engine state. Timeouts
//! are the source's business and surface here as ordinary failures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::node::EntitySnapshot;
use crate::health::{DesiredState, HealthCheckResult};

/// Transport-level failure. Always treated as transient by the engine: the
/// cycle is abandoned, logged, and retried on the next tick.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One instance as reported by a full instance-list refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub connections: u64,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub health_checks: BTreeMap<String, HealthCheckResult>,
}

/// Health/stat update for one already-known instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub connections: u64,
    #[serde(default)]
    pub health_checks: BTreeMap<String, HealthCheckResult>,
}

/// Per-entity status payload: desired state plus updates keyed by instance id.
/// Status-only — it never introduces or removes instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub desired_state: DesiredState,
    #[serde(default)]
    pub instances: Vec<InstanceStatus>,
}

/// Data-access collaborator for one entity type.
///
/// Host and pool sources implement `fetch_all` only; the instance methods keep
/// their empty defaults and are never called for those stores.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// The complete current snapshot set. Ids absent from the result are
    /// treated as deleted by the reconciler.
    async fn fetch_all(&self) -> Result<Vec<EntitySnapshot>, FetchError>;

    /// Full instance list for one entity (service stores only).
    async fn fetch_instances(&self, _id: &str) -> Result<Vec<InstanceRecord>, FetchError> {
        Ok(Vec::new())
    }

    /// Status payload for one entity (service stores only).
    async fn fetch_status(&self, _id: &str) -> Result<StatusPayload, FetchError> {
        Ok(StatusPayload::default())
    }
}
