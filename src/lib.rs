//! Canopy — client-side entity tree synchronization and health aggregation.
//!
//! Keeps in-memory trees of orchestration entities (services, hosts, resource
//! pools) current via periodic polling. Incoming snapshot sets are reconciled
//! against the existing tree by id, so node handles held by the view layer
//! stay valid across refreshes; per-instance health results are merged into
//! each entity and rolled up into one aggregated run status. Consumers watch
//! cheap change markers instead of re-deriving views every tick.
//!
//! Transport, rendering, and authentication live outside this crate: stores
//! are built from an injected [`EntitySource`], report anomalies through an
//! injected [`EventSink`], and schedule themselves on the tokio clock.

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod poller;
pub mod source;
pub mod visibility;

pub use config::{init_tracing, EngineConfig};
pub use domain::node::{EntityId, EntityKind, EntityNode, EntitySnapshot, InstanceNode};
pub use domain::reconcile::{Graph, ReconcileSummary};
pub use domain::store::EntityStore;
pub use error::SyncError;
pub use events::{EventSink, Severity, TracingSink};
pub use health::{evaluate, DesiredState, HealthCheckResult, HealthStatus, InstanceState};
pub use source::{EntitySource, FetchError, InstanceRecord, InstanceStatus, StatusPayload};
pub use visibility::{visible_rows, VisibleRow};
