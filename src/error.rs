use thiserror::Error;

use crate::source::FetchError;

/// Engine error taxonomy.
///
/// Reconciliation-time anomalies (`OrphanEntity`, `MissingInstanceStatus`) are
/// recovered locally and only surface through the event sink; the variants
/// exist so the message format lives in one place. `TransientFetch` is retried
/// on the next poll tick and never stops the loop. `StaleReference` is the one
/// variant callers see directly, from a failed lookup.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    TransientFetch(#[from] FetchError),

    #[error("entity {id} references unknown parent {parent_id}, treating as root")]
    OrphanEntity { id: String, parent_id: String },

    #[error("no status for known instance {instance_id} of service {service_id}")]
    MissingInstanceStatus {
        service_id: String,
        instance_id: String,
    },

    #[error("no entity with id {id}")]
    StaleReference { id: String },
}
