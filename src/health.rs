//! Health evaluator — pure aggregation of per-instance health into one status.
//!
//! `evaluate` is the single place an entity's run status is derived. It takes
//! the desired state from the last snapshot and the current instance set, and
//! is deliberately free of I/O so it can be exercised with literal inputs.

use serde::{Deserialize, Serialize};

use crate::domain::node::InstanceNode;

/// The name of the health check that decides whether an instance counts as
/// started at all. Every other named check only degrades a started instance.
pub const RUNNING_CHECK: &str = "running";

/// Intended run state of an entity, as declared by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Run,
    Stop,
}

/// Result of one named health check on one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckResult {
    Passed,
    Failed,
    #[default]
    Unknown,
}

/// Observed run state of a single instance, derived from its health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Started,
    Stopped,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Started => "started",
            InstanceState::Stopped => "stopped",
        }
    }
}

/// Aggregated status of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Failed,
    Degraded,
    Started,
    #[default]
    Unknown,
    /// Entity is intentionally stopped; instance health is irrelevant.
    Neutral,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Failed => "failed",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Started => "started",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Neutral => "neutral",
        }
    }

    /// Severity rank for worst-of aggregation: failed > degraded > started > unknown.
    fn rank(self) -> u8 {
        match self {
            HealthStatus::Failed => 3,
            HealthStatus::Degraded => 2,
            HealthStatus::Started => 1,
            HealthStatus::Unknown | HealthStatus::Neutral => 0,
        }
    }
}

/// Derive an instance's run state from its health checks: it is started iff
/// the `running` check passed.
pub fn instance_state<'a, I>(checks: I) -> InstanceState
where
    I: IntoIterator<Item = (&'a String, &'a HealthCheckResult)>,
{
    let running = checks
        .into_iter()
        .find(|(name, _)| name.as_str() == RUNNING_CHECK)
        .map(|(_, result)| *result);
    if running == Some(HealthCheckResult::Passed) {
        InstanceState::Started
    } else {
        InstanceState::Stopped
    }
}

/// Aggregate instance health into an entity-level status.
///
/// An intentionally stopped entity is `Neutral` no matter what its instances
/// report. A running entity takes the worst outcome across its instances;
/// with zero instances nothing is known, so the result is `Unknown`.
pub fn evaluate(desired: DesiredState, instances: &[InstanceNode]) -> HealthStatus {
    if desired == DesiredState::Stop {
        return HealthStatus::Neutral;
    }

    instances
        .iter()
        .map(instance_outcome)
        .max_by_key(|status| status.rank())
        .unwrap_or(HealthStatus::Unknown)
}

fn instance_outcome(instance: &InstanceNode) -> HealthStatus {
    if instance.health_checks.is_empty() {
        return HealthStatus::Unknown;
    }
    if instance.current_state == InstanceState::Stopped {
        return HealthStatus::Failed;
    }
    let any_failed = instance
        .health_checks
        .iter()
        .any(|(name, result)| name != RUNNING_CHECK && *result == HealthCheckResult::Failed);
    if any_failed {
        HealthStatus::Degraded
    } else {
        HealthStatus::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn instance(checks: &[(&str, HealthCheckResult)]) -> InstanceNode {
        let health_checks: BTreeMap<String, HealthCheckResult> = checks
            .iter()
            .map(|(name, result)| (name.to_string(), *result))
            .collect();
        let current_state = instance_state(&health_checks);
        InstanceNode {
            id: "0".into(),
            service_id: "svc".into(),
            mode: String::new(),
            connections: 0,
            host_id: None,
            health_checks,
            current_state,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn running_passed_means_started() {
        let inst = instance(&[(RUNNING_CHECK, HealthCheckResult::Passed)]);
        assert_eq!(inst.current_state, InstanceState::Started);
        assert_eq!(evaluate(DesiredState::Run, &[inst]), HealthStatus::Started);
    }

    #[test]
    fn running_failed_means_stopped_and_failed() {
        let inst = instance(&[(RUNNING_CHECK, HealthCheckResult::Failed)]);
        assert_eq!(inst.current_state, InstanceState::Stopped);
        assert_eq!(evaluate(DesiredState::Run, &[inst]), HealthStatus::Failed);
    }

    #[test]
    fn secondary_check_failure_degrades() {
        let inst = instance(&[
            (RUNNING_CHECK, HealthCheckResult::Passed),
            ("answering", HealthCheckResult::Failed),
        ]);
        assert_eq!(evaluate(DesiredState::Run, &[inst]), HealthStatus::Degraded);
    }

    #[test]
    fn desired_stop_is_neutral_even_when_failing() {
        let inst = instance(&[(RUNNING_CHECK, HealthCheckResult::Failed)]);
        assert_eq!(evaluate(DesiredState::Stop, &[inst]), HealthStatus::Neutral);
    }

    #[test]
    fn no_instances_while_running_is_unknown() {
        assert_eq!(evaluate(DesiredState::Run, &[]), HealthStatus::Unknown);
    }

    #[test]
    fn worst_outcome_wins() {
        let healthy = instance(&[(RUNNING_CHECK, HealthCheckResult::Passed)]);
        let broken = instance(&[(RUNNING_CHECK, HealthCheckResult::Failed)]);
        assert_eq!(
            evaluate(DesiredState::Run, &[healthy, broken]),
            HealthStatus::Failed
        );
    }

    #[test]
    fn no_checks_reported_is_unknown() {
        let inst = InstanceNode {
            current_state: InstanceState::Started,
            ..instance(&[])
        };
        assert_eq!(evaluate(DesiredState::Run, &[inst]), HealthStatus::Unknown);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let a = instance(&[(RUNNING_CHECK, HealthCheckResult::Passed)]);
        let b = instance(&[("answering", HealthCheckResult::Failed)]);
        let first = evaluate(DesiredState::Run, &[a.clone(), b.clone()]);
        let second = evaluate(DesiredState::Run, &[a, b]);
        assert_eq!(first, second);
    }
}
