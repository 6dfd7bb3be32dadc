//! Instance merger — folds instance lists and status payloads into a node.
//!
//! Status payloads are stale-tolerant: a known instance with no entry in the
//! payload keeps its last-known state and the gap is reported as an anomaly,
//! not a failure. Only a full instance-list refresh creates or removes
//! instances. Every merge ends by re-running the health evaluator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::node::{EntityNode, InstanceNode};
use crate::error::SyncError;
use crate::events::{EventSink, Severity};
use crate::health;
use crate::source::{InstanceRecord, InstanceStatus, StatusPayload};

/// Replace the node's instance set from a full instance-list refresh. New ids
/// are created, vanished ids dropped, surviving instances updated in place.
/// Returns true when anything (including the aggregated status) changed.
pub fn apply_instance_list(node: &Arc<EntityNode>, records: Vec<InstanceRecord>) -> bool {
    let mut inner = node.lock();
    let mut changed = false;

    let mut next: Vec<InstanceNode> = Vec::with_capacity(records.len());
    for record in records {
        match inner
            .instances
            .iter()
            .find(|instance| instance.id == record.instance_id)
        {
            Some(existing) => {
                let mut instance = existing.clone();
                if apply_record(&mut instance, record) {
                    changed = true;
                }
                next.push(instance);
            }
            None => {
                next.push(InstanceNode::from_record(node.id(), record));
                changed = true;
            }
        }
    }
    next.sort_by(|a, b| a.id.cmp(&b.id));
    if next.len() != inner.instances.len() {
        changed = true;
    }
    inner.instances = next;

    let status = health::evaluate(inner.desired_state, &inner.instances);
    if inner.status != status {
        inner.status = status;
        changed = true;
    }
    if changed {
        inner.bump();
    }
    changed
}

/// Merge a status payload into the node's existing instances, then recompute
/// the aggregated status. Unknown-to-the-payload instances are left alone and
/// reported through the event sink.
pub fn merge_instance_status(
    node: &Arc<EntityNode>,
    payload: StatusPayload,
    events: &dyn EventSink,
) -> bool {
    let mut inner = node.lock();
    let mut changed = false;

    if inner.desired_state != payload.desired_state {
        inner.desired_state = payload.desired_state;
        changed = true;
    }

    let by_id: HashMap<&str, &InstanceStatus> = payload
        .instances
        .iter()
        .map(|status| (status.instance_id.as_str(), status))
        .collect();

    for instance in inner.instances.iter_mut() {
        match by_id.get(instance.id.as_str()) {
            Some(status) => {
                if apply_status(instance, status) {
                    changed = true;
                }
            }
            None => events.report(
                Severity::Warning,
                &SyncError::MissingInstanceStatus {
                    service_id: instance.service_id.clone(),
                    instance_id: instance.id.clone(),
                }
                .to_string(),
            ),
        }
    }

    let status = health::evaluate(inner.desired_state, &inner.instances);
    if inner.status != status {
        inner.status = status;
        changed = true;
    }
    if changed {
        inner.bump();
    }
    changed
}

fn apply_record(instance: &mut InstanceNode, record: InstanceRecord) -> bool {
    let next_state = health::instance_state(&record.health_checks);
    let same = instance.mode == record.mode
        && instance.connections == record.connections
        && instance.host_id == record.host_id
        && instance.health_checks == record.health_checks
        && instance.current_state == next_state;
    if same {
        return false;
    }
    instance.mode = record.mode;
    instance.connections = record.connections;
    instance.host_id = record.host_id;
    instance.health_checks = record.health_checks;
    instance.current_state = next_state;
    instance.last_update = Utc::now();
    true
}

fn apply_status(instance: &mut InstanceNode, status: &InstanceStatus) -> bool {
    let next_state = health::instance_state(&status.health_checks);
    let same = instance.mode == status.mode
        && instance.connections == status.connections
        && instance.health_checks == status.health_checks
        && instance.current_state == next_state;
    if same {
        return false;
    }
    instance.mode = status.mode.clone();
    instance.connections = status.connections;
    instance.health_checks = status.health_checks.clone();
    instance.current_state = next_state;
    instance.last_update = Utc::now();
    true
}
