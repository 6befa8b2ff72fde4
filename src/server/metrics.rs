//! Prometheus metrics for workload operations
//!
//! - `kulta_workload_operations_total{kind,operation,outcome}` - state-changing
//!   operations by outcome (`success`, `retry`, `failure`)
//! - `kulta_workload_readiness_total{kind,role,verdict}` - readiness checks of
//!   primaries and canaries by verdict (`ready`, `retryable`, `fatal`)

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct WorkloadMetrics {
    registry: Registry,
    operations_total: IntCounterVec,
    readiness_total: IntCounterVec,
}

impl WorkloadMetrics {
    /// Create the metrics and register them on a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "kulta_workload_operations_total",
                "Workload lifecycle operations by outcome",
            ),
            &["kind", "operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let readiness_total = IntCounterVec::new(
            Opts::new(
                "kulta_workload_readiness_total",
                "Workload readiness checks by verdict",
            ),
            &["kind", "role", "verdict"],
        )?;
        registry.register(Box::new(readiness_total.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            readiness_total,
        })
    }

    pub fn record_operation(&self, kind: &str, operation: &str, outcome: &str) {
        self.operations_total
            .with_label_values(&[kind, operation, outcome])
            .inc();
    }

    /// `role` is `primary` or `canary`
    pub fn record_readiness(&self, kind: &str, role: &str, verdict: &str) {
        self.readiness_total
            .with_label_values(&[kind, role, verdict])
            .inc();
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<WorkloadMetrics>;

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(WorkloadMetrics::new()?))
}
