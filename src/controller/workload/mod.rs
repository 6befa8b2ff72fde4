//! Workload controller contract
//!
//! One implementation per workload kind, all driven the same way by the
//! analysis loop: `initialize` → readiness and drift polls → `promote` →
//! `finalize`. Implementations hold no state between calls; every operation
//! reads the live objects again.
//!
//! - `pod` - generic controller for kinds that own a pod template
//! - `deployment`, `daemonset`, `cloneset` - data access for those kinds
//! - `service` - service-only mode without pods
//! - `template` - scale-to-zero marker, labels, annotations, ports, hashing

pub mod cloneset;
pub mod daemonset;
pub mod deployment;
pub mod pod;
pub mod service;
pub mod template;

use super::clock::Clock;
use super::config_tracker::{ConfigRefs, ConfigTracker};
use super::error::WorkloadError;
use crate::crd::canary::Canary;
use crate::server::SharedMetrics;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use pod::{PodWorkload, PodWorkloadController};
pub use service::ServiceController;

/// Closed set of workload kinds the factory knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    Service,
    CloneSet,
}

impl WorkloadKind {
    /// Map a `targetRef.kind` to a workload kind
    ///
    /// Unknown kinds fall back to `Deployment`, the most common target.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "DaemonSet" => WorkloadKind::DaemonSet,
            "Service" => WorkloadKind::Service,
            "CloneSet" => WorkloadKind::CloneSet,
            _ => WorkloadKind::Deployment,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Service => "Service",
            WorkloadKind::CloneSet => "CloneSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pod selector label and ports discovered on a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadMetadata {
    /// Selector label key pairing target and primary (empty for services)
    pub label: String,
    pub label_value: String,
    /// Named container ports, only when port discovery is enabled
    pub ports: Option<BTreeMap<String, i32>>,
}

/// Lifecycle operations on a target/primary workload pair
///
/// # Idempotency
/// Every operation can be repeated. Creation of the primary is
/// create-if-absent, scaling only writes when the marker actually changes.
///
/// # Errors
/// Errors carry an [`ErrorKind`](super::error::ErrorKind); callers retry when
/// [`WorkloadError::is_retryable`] is true and stop the rollout otherwise.
#[async_trait]
pub trait WorkloadController: Send + Sync {
    fn kind(&self) -> WorkloadKind;

    /// Create the primary if missing; while initializing, wait for the primary
    /// to be ready (unless analysis is skipped) and scale the target to zero
    async fn initialize(&self, canary: &Canary) -> Result<(), WorkloadError>;

    /// Copy the target revision (and promoted configs) into the primary
    async fn promote(&self, canary: &Canary) -> Result<(), WorkloadError>;

    /// Whether the target spec differs from the last applied revision
    async fn has_target_changed(&self, canary: &Canary) -> Result<bool, WorkloadError>;

    /// Whether configs referenced by the target changed
    async fn have_dependencies_changed(&self, canary: &Canary) -> Result<bool, WorkloadError>;

    async fn get_metadata(&self, canary: &Canary) -> Result<WorkloadMetadata, WorkloadError>;

    /// Ok when the primary finished rolling out and is not scaled to zero
    async fn is_primary_ready(&self, canary: &Canary) -> Result<(), WorkloadError>;

    /// Ok when the target finished rolling out; check `is_retryable` on error
    async fn is_canary_ready(&self, canary: &Canary) -> Result<(), WorkloadError>;

    async fn scale_to_zero(&self, canary: &Canary) -> Result<(), WorkloadError>;

    async fn scale_from_zero(&self, canary: &Canary) -> Result<(), WorkloadError>;

    /// Restore the target when the canary is deleted
    async fn finalize(&self, canary: &Canary) -> Result<(), WorkloadError>;
}

/// Names of the workload pair addressed by a canary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPair {
    /// `name.namespace` of the canary, used in logs and errors
    pub canary: String,
    pub namespace: String,
    pub target: String,
    pub primary: String,
}

impl WorkloadPair {
    pub fn for_canary(canary: &Canary) -> Result<Self, WorkloadError> {
        let name = canary.name_any();
        let namespace = canary
            .namespace()
            .ok_or_else(|| WorkloadError::InvalidCanary {
                canary: name.clone(),
                field: "metadata.namespace",
            })?;
        let display = format!("{name}.{namespace}");
        if canary.target_name().is_empty() {
            return Err(WorkloadError::InvalidCanary {
                canary: display,
                field: "spec.targetRef.name",
            });
        }
        Ok(Self {
            canary: display,
            namespace,
            target: canary.target_name().to_string(),
            primary: canary.primary_name(),
        })
    }
}

/// Dependencies shared by every controller built by the factory
pub struct ControllerDeps {
    pub config_tracker: Arc<dyn ConfigTracker>,
    /// Candidate pod selector label keys
    pub labels: Vec<String>,
    /// Label key prefixes copied from target to primary metadata
    pub include_label_prefix: Vec<String>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<SharedMetrics>,
}

impl ControllerDeps {
    /// Look up the target's configs and create their primary copies
    ///
    /// Must run before the primary pod spec is written so the overlay points
    /// at configs that already exist.
    pub async fn promote_configs(
        &self,
        canary: &Canary,
        pair: &WorkloadPair,
    ) -> Result<ConfigRefs, WorkloadError> {
        let refs = self
            .config_tracker
            .get_target_configs(canary)
            .await
            .map_err(|source| WorkloadError::ConfigTracker {
                operation: "get_target_configs",
                canary: pair.canary.clone(),
                source,
            })?;
        self.config_tracker
            .create_primary_configs(canary, &refs, &self.include_label_prefix)
            .await
            .map_err(|source| WorkloadError::ConfigTracker {
                operation: "create_primary_configs",
                canary: pair.canary.clone(),
                source,
            })?;
        Ok(refs)
    }

    pub fn record_operation<T>(
        &self,
        kind: WorkloadKind,
        operation: &str,
        result: &Result<T, WorkloadError>,
    ) {
        if let Some(ref metrics) = self.metrics {
            let outcome = match result {
                Ok(_) => "success",
                Err(e) if e.is_retryable() => "retry",
                Err(_) => "failure",
            };
            metrics.record_operation(kind.as_str(), operation, outcome);
        }
    }

    pub fn record_readiness(&self, kind: WorkloadKind, role: &str, verdict: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_readiness(kind.as_str(), role, verdict);
        }
    }
}
