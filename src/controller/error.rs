//! Error taxonomy for workload operations
//!
//! Every failure carries the object it concerns and an [`ErrorKind`], so the
//! analysis loop can decide between "retry later" and "stop the rollout"
//! without parsing messages.

use super::config_tracker::TrackerError;
use super::readiness::NotReadyError;
use super::store::ApiError;
use super::workload::WorkloadKind;
use std::fmt;
use thiserror::Error;

/// Classification of a [`WorkloadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed object does not exist
    NotFound,
    /// API call failed for another reason (network, server error, ...)
    Transient,
    /// Optimistic-concurrency failure; the object changed between read and write
    Conflict,
    /// Rollout is still progressing
    RolloutNotFinished,
    /// Rollout exceeded its progress deadline
    RolloutStuck,
    /// The target manifest or the canary cannot be managed as configured
    Configuration,
    /// The config tracker failed to read or copy referenced configs
    ConfigTracking,
}

impl ErrorKind {
    /// Whether the caller should try the operation again later
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::RolloutStuck | ErrorKind::Configuration)
    }
}

/// Cluster object an error refers to, displayed as `Kind name.namespace`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind, self.name, self.namespace)
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("{operation} {object} failed: {source}")]
    Api {
        operation: &'static str,
        object: ObjectRef,
        source: ApiError,
    },

    #[error("{object} not ready: {source}")]
    NotReady {
        object: ObjectRef,
        source: NotReadyError,
    },

    #[error("halt {canary} advancement: primary {object} is scaled to zero")]
    PrimaryScaledToZero { canary: String, object: ObjectRef },

    #[error(
        "{object} spec.selector.matchLabels must contain exactly one of {candidates:?}, found {found:?}"
    )]
    SelectorLabel {
        object: ObjectRef,
        candidates: Vec<String>,
        found: Vec<String>,
    },

    #[error("{object} must have {expected} update strategy but has {actual}")]
    UpdateStrategy {
        object: ObjectRef,
        expected: &'static str,
        actual: String,
    },

    #[error("{object} has no pod template")]
    MissingPodTemplate { object: ObjectRef },

    #[error("canary {canary} is missing {field}")]
    InvalidCanary { canary: String, field: &'static str },

    #[error("config tracker {operation} failed for canary {canary}: {source}")]
    ConfigTracker {
        operation: &'static str,
        canary: String,
        source: TrackerError,
    },

    #[error("failed to hash spec of {object}: {source}")]
    Hash {
        object: ObjectRef,
        source: serde_json::Error,
    },
}

impl WorkloadError {
    pub fn api(operation: &'static str, object: ObjectRef, source: ApiError) -> Self {
        WorkloadError::Api {
            operation,
            object,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkloadError::Api { source, .. } => match source {
                ApiError::NotFound => ErrorKind::NotFound,
                ApiError::Conflict(_) => ErrorKind::Conflict,
                ApiError::Kube(_) => ErrorKind::Transient,
            },
            WorkloadError::NotReady { source, .. } => {
                if source.retryable {
                    ErrorKind::RolloutNotFinished
                } else {
                    ErrorKind::RolloutStuck
                }
            }
            WorkloadError::PrimaryScaledToZero { .. }
            | WorkloadError::SelectorLabel { .. }
            | WorkloadError::UpdateStrategy { .. }
            | WorkloadError::MissingPodTemplate { .. }
            | WorkloadError::InvalidCanary { .. }
            | WorkloadError::Hash { .. } => ErrorKind::Configuration,
            WorkloadError::ConfigTracker { .. } => ErrorKind::ConfigTracking,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
