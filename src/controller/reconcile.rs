//! Canary watch loop
//!
//! The analysis loop that decides when to promote lives outside this crate.
//! Reconciling a canary here only keeps the primary in place and reports
//! what that loop would act on: target drift and target readiness.

use super::error::WorkloadError;
use super::factory::ControllerFactory;
use crate::crd::canary::Canary;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval after a successful reconciliation
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Requeue interval after a retryable error
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub struct Context {
    pub factory: ControllerFactory,
}

impl Context {
    pub fn new(factory: ControllerFactory) -> Self {
        Self { factory }
    }
}

/// Reconcile one canary
///
/// # Returns
/// * `Ok(Action)` - Requeue after [`RESYNC_INTERVAL`]
/// * `Err(WorkloadError)` - Initialization or drift detection failed
pub async fn reconcile(canary: Arc<Canary>, ctx: Arc<Context>) -> Result<Action, WorkloadError> {
    let name = format!(
        "{}.{}",
        canary.name_any(),
        canary.namespace().unwrap_or_default()
    );
    let controller = ctx.factory.controller(&canary.spec.target_ref.kind);
    debug!(canary = %name, kind = %controller.kind(), "Reconciling Canary");

    controller.initialize(&canary).await?;

    if canary.is_initializing() {
        return Ok(Action::requeue(RESYNC_INTERVAL));
    }

    let target_changed = controller.has_target_changed(&canary).await?;
    let dependencies_changed = controller.have_dependencies_changed(&canary).await?;
    if target_changed || dependencies_changed {
        info!(
            canary = %name,
            target_changed,
            dependencies_changed,
            "New revision detected, waiting for analysis"
        );
    }

    match controller.is_canary_ready(&canary).await {
        Ok(()) => debug!(canary = %name, "Target ready"),
        Err(e) if e.is_retryable() => debug!(canary = %name, reason = %e, "Target not ready"),
        Err(e) => warn!(canary = %name, error = %e, "Target rollout is stuck"),
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Requeue retryable errors, wait for a spec change otherwise
pub fn requeue_action(error: &WorkloadError) -> Action {
    if error.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

pub fn error_policy(canary: Arc<Canary>, error: &WorkloadError, _ctx: Arc<Context>) -> Action {
    warn!(
        canary = %canary.name_any(),
        kind = ?error.kind(),
        retryable = error.is_retryable(),
        error = %error,
        "Reconcile error"
    );
    requeue_action(error)
}
