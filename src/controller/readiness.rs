//! Rollout readiness classifier
//!
//! Turns the status of a pod-owning workload into one of three verdicts:
//! ready, not ready but worth retrying, or stuck past its progress deadline.
//! Every workload kind maps its own status fields onto [`RolloutStatusView`]
//! and shares the rules below.
//!
//! Rules, first match wins:
//! 1. observed generation behind generation: retryable
//! 2. `Progressing` condition with reason `ProgressDeadlineExceeded`: fatal
//! 3. fewer updated replicas than declared: split
//! 4. old replicas still present: split
//! 5. fewer available than updated replicas: split
//! 6. ready
//!
//! "Split" is retryable unless the `Available` condition reports
//! `MinimumReplicasUnavailable` and its last transition is older than the
//! progress deadline, in which case the rollout is declared stuck.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROGRESSING_CONDITION: &str = "Progressing";
pub const AVAILABLE_CONDITION: &str = "Available";
pub const PROGRESS_DEADLINE_EXCEEDED_REASON: &str = "ProgressDeadlineExceeded";
pub const MINIMUM_REPLICAS_UNAVAILABLE_REASON: &str = "MinimumReplicasUnavailable";

/// Workload status condition, independent of the workload API group
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Convert any condition that serializes with the standard Kubernetes
    /// field names (`type`, `status`, `reason`, `lastTransitionTime`)
    ///
    /// Returns None when the condition cannot be represented, e.g. a
    /// malformed timestamp.
    pub fn from_api<T: Serialize>(condition: &T) -> Option<Self> {
        serde_json::to_value(condition)
            .ok()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Convert a status condition list, dropping entries that cannot be read
pub fn conditions_from<T: Serialize>(conditions: &[T]) -> Vec<Condition> {
    conditions.iter().filter_map(Condition::from_api).collect()
}

/// Rollout-relevant status of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutStatusView {
    pub generation: Option<i64>,
    pub observed_generation: Option<i64>,
    /// Declared replica count; None when the kind has no such field
    pub desired_replicas: Option<i32>,
    /// All replicas, old and updated
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub conditions: Vec<Condition>,
}

impl RolloutStatusView {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    fn generation_observed(&self) -> bool {
        match (self.generation, self.observed_generation) {
            (Some(generation), Some(observed)) => observed >= generation,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotReady {
    #[error(
        "waiting for rollout to finish: observed generation {observed:?} is behind desired generation {desired:?}"
    )]
    GenerationNotObserved {
        desired: Option<i64>,
        observed: Option<i64>,
    },

    #[error("rollout exceeded its progress deadline")]
    ProgressDeadlineExceeded,

    #[error("waiting for rollout to finish: {updated} out of {desired} new replicas have been updated")]
    ReplicasUpdating { updated: i32, desired: i32 },

    #[error("waiting for rollout to finish: {pending} old replicas are pending termination")]
    OldReplicasPending { pending: i32 },

    #[error("waiting for rollout to finish: {available} of {updated} updated replicas are available")]
    UpdatedReplicasUnavailable { available: i32, updated: i32 },
}

/// Not-ready reason plus whether the caller should keep polling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct NotReadyError {
    pub reason: NotReady,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    Retryable(NotReady),
    Fatal(NotReady),
}

impl Verdict {
    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ready => "ready",
            Verdict::Retryable(_) => "retryable",
            Verdict::Fatal(_) => "fatal",
        }
    }

    pub fn into_result(self) -> Result<(), NotReadyError> {
        match self {
            Verdict::Ready => Ok(()),
            Verdict::Retryable(reason) => Err(NotReadyError {
                reason,
                retryable: true,
            }),
            Verdict::Fatal(reason) => Err(NotReadyError {
                reason,
                retryable: false,
            }),
        }
    }
}

/// Classify a workload rollout
///
/// # Arguments
/// * `status` - Rollout status of the workload
/// * `deadline` - Progress deadline of the canary
/// * `now` - Current time, injected for testability
pub fn classify(status: &RolloutStatusView, deadline: Duration, now: DateTime<Utc>) -> Verdict {
    if !status.generation_observed() {
        return Verdict::Retryable(NotReady::GenerationNotObserved {
            desired: status.generation,
            observed: status.observed_generation,
        });
    }

    let deadline_exceeded = status
        .condition(PROGRESSING_CONDITION)
        .and_then(|c| c.reason.as_deref())
        == Some(PROGRESS_DEADLINE_EXCEEDED_REASON);
    if deadline_exceeded {
        return Verdict::Fatal(NotReady::ProgressDeadlineExceeded);
    }

    let pending = if let Some(desired) = status
        .desired_replicas
        .filter(|desired| status.updated_replicas < *desired)
    {
        NotReady::ReplicasUpdating {
            updated: status.updated_replicas,
            desired,
        }
    } else if status.replicas > status.updated_replicas {
        NotReady::OldReplicasPending {
            pending: status.replicas - status.updated_replicas,
        }
    } else if status.available_replicas < status.updated_replicas {
        NotReady::UpdatedReplicasUnavailable {
            available: status.available_replicas,
            updated: status.updated_replicas,
        }
    } else {
        return Verdict::Ready;
    };

    if unavailable_past_deadline(status, deadline, now) {
        Verdict::Fatal(pending)
    } else {
        Verdict::Retryable(pending)
    }
}

/// True when `MinimumReplicasUnavailable` has lasted longer than `deadline`
fn unavailable_past_deadline(
    status: &RolloutStatusView,
    deadline: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(available) = status.condition(AVAILABLE_CONDITION) else {
        return false;
    };
    if available.status != "False"
        || available.reason.as_deref() != Some(MINIMUM_REPLICAS_UNAVAILABLE_REASON)
    {
        return false;
    }
    available
        .last_transition_time
        .is_some_and(|since| since + deadline < now)
}
