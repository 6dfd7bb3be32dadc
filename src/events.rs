//! Observability channel for reconciliation anomalies and failures.
//!
//! The engine never fails a poll cycle over a data inconsistency; it reports
//! the anomaly here and keeps going. Consumers inject their own sink (for a
//! notification drawer, say); `TracingSink` is the default and forwards to
//! `tracing` at the matching level.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Default sink: anomalies become log lines.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}
