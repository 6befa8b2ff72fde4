//! Service-only mode
//!
//! The target is a plain Service with no pods behind it that this controller
//! manages. The primary is a copy of the target Service; readiness and scaling
//! do not apply.

use super::template::{compute_hash, include_labels_by_prefix, primary_metadata_annotations};
use super::{ControllerDeps, WorkloadController, WorkloadKind, WorkloadMetadata, WorkloadPair};
use crate::controller::error::{ObjectRef, WorkloadError};
use crate::controller::store::{ApiError, ObjectApi};
use crate::crd::canary::Canary;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use kube::Resource;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ServiceController {
    api: Arc<dyn ObjectApi<Service>>,
    deps: Arc<ControllerDeps>,
}

/// `clusterIP` value of a headless Service
const HEADLESS_CLUSTER_IP: &str = "None";

/// Service types that are allocated node ports
const NODE_PORT_TYPES: &[&str] = &["NodePort", "LoadBalancer"];

/// Spec with every field the API server allocates removed
///
/// A headless `clusterIP` is a request, not an allocation, so it is kept.
fn portable_spec(spec: &ServiceSpec) -> ServiceSpec {
    let mut spec = spec.clone();
    if spec.cluster_ip.as_deref() != Some(HEADLESS_CLUSTER_IP) {
        spec.cluster_ip = None;
        spec.cluster_ips = None;
    }
    spec.health_check_node_port = None;
    for port in spec.ports.iter_mut().flatten() {
        port.node_port = None;
    }
    spec
}

/// Reuse the node port the primary already holds for the same port
///
/// Types without node ports get none.
fn keep_node_ports(
    ports: Vec<ServicePort>,
    previous: &[ServicePort],
    type_: Option<&str>,
) -> Vec<ServicePort> {
    let node_ports = type_.is_some_and(|t| NODE_PORT_TYPES.contains(&t));
    ports
        .into_iter()
        .map(|mut port| {
            port.node_port = previous
                .iter()
                .filter(|_| node_ports)
                .find(|p| p.name == port.name && p.port == port.port)
                .and_then(|p| p.node_port);
            port
        })
        .collect()
}

impl ServiceController {
    pub fn new(api: Arc<dyn ObjectApi<Service>>, deps: Arc<ControllerDeps>) -> Self {
        Self { api, deps }
    }

    fn object(pair: &WorkloadPair, name: &str) -> ObjectRef {
        ObjectRef::new(WorkloadKind::Service, name, &pair.namespace)
    }

    async fn fetch(&self, pair: &WorkloadPair, name: &str) -> Result<Service, WorkloadError> {
        self.api
            .get(&pair.namespace, name)
            .await
            .map_err(|source| WorkloadError::api("get", Self::object(pair, name), source))?
            .ok_or_else(|| WorkloadError::api("get", Self::object(pair, name), ApiError::NotFound))
    }

    async fn ensure_primary(&self, canary: &Canary, pair: &WorkloadPair) -> Result<(), WorkloadError> {
        let target = self.fetch(pair, &pair.target).await?;

        let existing = self
            .api
            .get(&pair.namespace, &pair.primary)
            .await
            .map_err(|source| WorkloadError::api("get", Self::object(pair, &pair.primary), source))?;
        if existing.is_some() {
            debug!(canary = %pair.canary, workload = %pair.primary, "Primary service already exists");
            return Ok(());
        }

        let labels = target
            .metadata
            .labels
            .as_ref()
            .map(|labels| include_labels_by_prefix(labels, &self.deps.include_label_prefix))
            .filter(|labels| !labels.is_empty());
        let primary = Service {
            metadata: ObjectMeta {
                name: Some(pair.primary.clone()),
                namespace: Some(pair.namespace.clone()),
                labels,
                annotations: primary_metadata_annotations(target.metadata.annotations.as_ref()),
                owner_references: canary.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: target.spec.as_ref().map(portable_spec),
            status: None,
        };

        self.api
            .create(&pair.namespace, &primary)
            .await
            .map_err(|source| WorkloadError::api("create", Self::object(pair, &pair.primary), source))?;

        info!(canary = %pair.canary, workload = %pair.primary, "Primary service created");
        Ok(())
    }

    async fn run_promote(&self, pair: &WorkloadPair) -> Result<(), WorkloadError> {
        let target = self.fetch(pair, &pair.target).await?;
        let mut primary = self.fetch(pair, &pair.primary).await?;

        let source = target.spec.unwrap_or_default();
        let dest = primary.spec.get_or_insert_with(ServiceSpec::default);
        let previous = dest.ports.take().unwrap_or_default();
        dest.ports = source
            .ports
            .map(|ports| keep_node_ports(ports, &previous, source.type_.as_deref()));
        dest.selector = source.selector;
        dest.type_ = source.type_;
        dest.session_affinity = source.session_affinity;
        dest.session_affinity_config = source.session_affinity_config;

        self.api
            .replace(&pair.namespace, &pair.primary, &primary)
            .await
            .map_err(|source| WorkloadError::api("update", Self::object(pair, &pair.primary), source))?;

        info!(canary = %pair.canary, workload = %pair.primary, "Target service promoted to primary");
        Ok(())
    }
}

#[async_trait]
impl WorkloadController for ServiceController {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Service
    }

    async fn initialize(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let result = match WorkloadPair::for_canary(canary) {
            Ok(pair) => self.ensure_primary(canary, &pair).await,
            Err(e) => Err(e),
        };
        self.deps.record_operation(WorkloadKind::Service, "initialize", &result);
        result
    }

    async fn promote(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let result = match WorkloadPair::for_canary(canary) {
            Ok(pair) => self.run_promote(&pair).await,
            Err(e) => Err(e),
        };
        self.deps.record_operation(WorkloadKind::Service, "promote", &result);
        result
    }

    async fn has_target_changed(&self, canary: &Canary) -> Result<bool, WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let target = self.fetch(&pair, &pair.target).await?;
        let spec = target.spec.as_ref().map(portable_spec).unwrap_or_default();
        let hash = compute_hash(&spec).map_err(|source| WorkloadError::Hash {
            object: Self::object(&pair, &pair.target),
            source,
        })?;
        Ok(canary.has_spec_changed(&hash))
    }

    async fn have_dependencies_changed(&self, _canary: &Canary) -> Result<bool, WorkloadError> {
        Ok(false)
    }

    async fn get_metadata(&self, _canary: &Canary) -> Result<WorkloadMetadata, WorkloadError> {
        Ok(WorkloadMetadata::default())
    }

    async fn is_primary_ready(&self, _canary: &Canary) -> Result<(), WorkloadError> {
        Ok(())
    }

    async fn is_canary_ready(&self, _canary: &Canary) -> Result<(), WorkloadError> {
        Ok(())
    }

    async fn scale_to_zero(&self, _canary: &Canary) -> Result<(), WorkloadError> {
        Ok(())
    }

    async fn scale_from_zero(&self, _canary: &Canary) -> Result<(), WorkloadError> {
        Ok(())
    }

    async fn finalize(&self, _canary: &Canary) -> Result<(), WorkloadError> {
        Ok(())
    }
}
