//! Generic controller for workloads that own a pod template
//!
//! Deployment, DaemonSet and CloneSet share the same lifecycle and differ only
//! in where their fields live. Each kind implements [`PodWorkload`] to expose
//! those fields; [`PodWorkloadController`] implements [`WorkloadController`]
//! once on top of it.

use super::template::{
    add_scale_to_zero_marker, discover_ports, include_labels_by_prefix, make_annotations,
    make_primary_labels, pod_template_hash, primary_metadata_annotations,
    remove_scale_to_zero_marker, resolve_selector_label,
};
use super::{ControllerDeps, WorkloadController, WorkloadKind, WorkloadMetadata, WorkloadPair};
use crate::controller::error::{ObjectRef, WorkloadError};
use crate::controller::readiness::{classify, RolloutStatusView, Verdict};
use crate::controller::store::{ApiError, ObjectApi};
use crate::crd::canary::{Canary, PRIMARY_SUFFIX};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Field access for a pod-owning workload kind
pub trait PodWorkload: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    const KIND: WorkloadKind;

    /// Update strategy named in errors when the target's strategy is rejected
    const REQUIRED_STRATEGY: &'static str;

    fn match_labels(&self) -> Option<&BTreeMap<String, String>>;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;

    /// Declared replica count; None for kinds scheduled per node
    fn declared_replicas(&self) -> Option<i32>;

    fn rollout_status(&self) -> RolloutStatusView;

    /// The target's update strategy type when it cannot be mirrored to a primary
    fn unsupported_strategy(&self) -> Option<String>;

    /// Assemble a new primary; rollout policy is copied afterwards
    fn new_primary(
        metadata: ObjectMeta,
        selector: LabelSelector,
        template: PodTemplateSpec,
        replicas: i32,
    ) -> Self;

    /// Copy min-ready-seconds, revision history, update strategy and
    /// kind-specific rollout settings from target to primary
    fn copy_rollout_policy(target: &Self, primary: &mut Self);
}

pub struct PodWorkloadController<W> {
    api: Arc<dyn ObjectApi<W>>,
    deps: Arc<ControllerDeps>,
}

impl<W: PodWorkload> PodWorkloadController<W> {
    pub fn new(api: Arc<dyn ObjectApi<W>>, deps: Arc<ControllerDeps>) -> Self {
        Self { api, deps }
    }

    fn object(pair: &WorkloadPair, name: &str) -> ObjectRef {
        ObjectRef::new(W::KIND, name, &pair.namespace)
    }

    async fn fetch(&self, pair: &WorkloadPair, name: &str) -> Result<W, WorkloadError> {
        match self.api.get(&pair.namespace, name).await {
            Ok(Some(object)) => Ok(object),
            Ok(None) => Err(WorkloadError::api(
                "get",
                Self::object(pair, name),
                ApiError::NotFound,
            )),
            Err(source) => Err(WorkloadError::api("get", Self::object(pair, name), source)),
        }
    }

    async fn update(&self, pair: &WorkloadPair, name: &str, object: &W) -> Result<(), WorkloadError> {
        self.api
            .replace(&pair.namespace, name, object)
            .await
            .map_err(|source| WorkloadError::api("update", Self::object(pair, name), source))?;
        Ok(())
    }

    fn selector_label(&self, target: &W, pair: &WorkloadPair) -> Result<(String, String), WorkloadError> {
        resolve_selector_label(target.match_labels(), &self.deps.labels).map_err(|found| {
            WorkloadError::SelectorLabel {
                object: Self::object(pair, &pair.target),
                candidates: self.deps.labels.clone(),
                found,
            }
        })
    }

    fn template<'a>(object: &'a W, pair: &WorkloadPair, name: &str) -> Result<&'a PodTemplateSpec, WorkloadError> {
        object
            .pod_template()
            .ok_or_else(|| WorkloadError::MissingPodTemplate {
                object: Self::object(pair, name),
            })
    }

    /// Create the primary when it does not exist yet, never update it
    async fn ensure_primary(&self, canary: &Canary, pair: &WorkloadPair) -> Result<(), WorkloadError> {
        let target = self.fetch(pair, &pair.target).await?;

        if let Some(actual) = target.unsupported_strategy() {
            return Err(WorkloadError::UpdateStrategy {
                object: Self::object(pair, &pair.target),
                expected: W::REQUIRED_STRATEGY,
                actual,
            });
        }

        let (label, value) = self.selector_label(&target, pair)?;
        let primary_value = format!("{value}{PRIMARY_SUFFIX}");

        let existing = self
            .api
            .get(&pair.namespace, &pair.primary)
            .await
            .map_err(|source| WorkloadError::api("get", Self::object(pair, &pair.primary), source))?;
        if existing.is_some() {
            debug!(
                canary = %pair.canary,
                kind = %W::KIND,
                workload = %pair.primary,
                "Primary already exists"
            );
            return Ok(());
        }

        let refs = self.deps.promote_configs(canary, pair).await?;
        let source = Self::template(&target, pair, &pair.target)?;
        let source_meta = source.metadata.as_ref();

        let mut spec = self
            .deps
            .config_tracker
            .apply_primary_configs(source.spec.clone().unwrap_or_default(), &refs);
        remove_scale_to_zero_marker(&mut spec);

        let target_meta = target.meta();
        let labels = include_labels_by_prefix(
            target_meta.labels.as_ref().unwrap_or(&BTreeMap::new()),
            &self.deps.include_label_prefix,
        );
        let metadata = ObjectMeta {
            name: Some(pair.primary.clone()),
            namespace: Some(pair.namespace.clone()),
            labels: Some(make_primary_labels(Some(&labels), &label, &primary_value)),
            annotations: primary_metadata_annotations(target_meta.annotations.as_ref()),
            owner_references: canary.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        };
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([(label.clone(), primary_value.clone())])),
            ..Default::default()
        };
        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(make_primary_labels(
                    source_meta.and_then(|m| m.labels.as_ref()),
                    &label,
                    &primary_value,
                )),
                annotations: Some(make_annotations(
                    source_meta.and_then(|m| m.annotations.as_ref()),
                )),
                ..Default::default()
            }),
            spec: Some(spec),
        };
        let replicas = target
            .declared_replicas()
            .filter(|replicas| *replicas > 0)
            .unwrap_or(1);

        let mut primary = W::new_primary(metadata, selector, template, replicas);
        W::copy_rollout_policy(&target, &mut primary);

        self.api
            .create(&pair.namespace, &primary)
            .await
            .map_err(|source| WorkloadError::api("create", Self::object(pair, &pair.primary), source))?;

        info!(
            canary = %pair.canary,
            kind = %W::KIND,
            workload = %pair.primary,
            "Primary created"
        );
        Ok(())
    }

    async fn run_initialize(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        self.ensure_primary(canary, &pair).await?;

        if canary.is_initializing() {
            if !canary.skip_analysis() {
                self.check_primary(canary, &pair).await?;
            }
            info!(
                canary = %pair.canary,
                kind = %W::KIND,
                workload = %pair.target,
                "Scaling down target"
            );
            self.set_scale_to_zero(&pair, true).await?;
        }
        Ok(())
    }

    async fn run_promote(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let target = self.fetch(&pair, &pair.target).await?;
        let (label, value) = self.selector_label(&target, &pair)?;
        let primary_value = format!("{value}{PRIMARY_SUFFIX}");
        let mut primary = self.fetch(&pair, &pair.primary).await?;

        let refs = self.deps.promote_configs(canary, &pair).await?;

        let source = Self::template(&target, &pair, &pair.target)?;
        let source_meta = source.metadata.as_ref();
        let mut spec = self
            .deps
            .config_tracker
            .apply_primary_configs(source.spec.clone().unwrap_or_default(), &refs);
        remove_scale_to_zero_marker(&mut spec);

        W::copy_rollout_policy(&target, &mut primary);
        let template = primary
            .pod_template_mut()
            .ok_or_else(|| WorkloadError::MissingPodTemplate {
                object: Self::object(&pair, &pair.primary),
            })?;
        template.spec = Some(spec);
        let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
        meta.annotations = Some(make_annotations(
            source_meta.and_then(|m| m.annotations.as_ref()),
        ));
        meta.labels = Some(make_primary_labels(
            source_meta.and_then(|m| m.labels.as_ref()),
            &label,
            &primary_value,
        ));

        self.update(&pair, &pair.primary, &primary).await?;

        info!(
            canary = %pair.canary,
            kind = %W::KIND,
            workload = %pair.primary,
            "Target promoted to primary"
        );
        Ok(())
    }

    fn check_readiness(&self, object: &W, role: &str, canary: &Canary) -> Verdict {
        let verdict = classify(
            &object.rollout_status(),
            canary.progress_deadline(),
            self.deps.clock.now(),
        );
        self.deps.record_readiness(W::KIND, role, verdict.as_str());
        verdict
    }

    async fn check_primary(&self, canary: &Canary, pair: &WorkloadPair) -> Result<(), WorkloadError> {
        let primary = self.fetch(pair, &pair.primary).await?;

        self.check_readiness(&primary, "primary", canary)
            .into_result()
            .map_err(|source| WorkloadError::NotReady {
                object: Self::object(pair, &pair.primary),
                source,
            })?;

        if primary.declared_replicas() == Some(0) {
            return Err(WorkloadError::PrimaryScaledToZero {
                canary: pair.canary.clone(),
                object: Self::object(pair, &pair.primary),
            });
        }
        Ok(())
    }

    /// Add or remove the scale-to-zero marker on the target, writing only on change
    async fn set_scale_to_zero(&self, pair: &WorkloadPair, enabled: bool) -> Result<(), WorkloadError> {
        let mut target = self.fetch(pair, &pair.target).await?;
        let template = target
            .pod_template_mut()
            .ok_or_else(|| WorkloadError::MissingPodTemplate {
                object: Self::object(pair, &pair.target),
            })?;
        let spec = template.spec.get_or_insert_with(PodSpec::default);

        let changed = if enabled {
            add_scale_to_zero_marker(spec)
        } else {
            remove_scale_to_zero_marker(spec)
        };
        if !changed {
            debug!(
                canary = %pair.canary,
                kind = %W::KIND,
                workload = %pair.target,
                scaled_to_zero = enabled,
                "Target already at requested scale"
            );
            return Ok(());
        }

        self.update(pair, &pair.target, &target).await?;
        info!(
            canary = %pair.canary,
            kind = %W::KIND,
            workload = %pair.target,
            scaled_to_zero = enabled,
            "Target scale updated"
        );
        Ok(())
    }
}

#[async_trait]
impl<W: PodWorkload> WorkloadController for PodWorkloadController<W> {
    fn kind(&self) -> WorkloadKind {
        W::KIND
    }

    async fn initialize(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let result = self.run_initialize(canary).await;
        self.deps.record_operation(W::KIND, "initialize", &result);
        result
    }

    async fn promote(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let result = self.run_promote(canary).await;
        self.deps.record_operation(W::KIND, "promote", &result);
        result
    }

    async fn has_target_changed(&self, canary: &Canary) -> Result<bool, WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let target = self.fetch(&pair, &pair.target).await?;
        let template = Self::template(&target, &pair, &pair.target)?;
        let hash = pod_template_hash(template).map_err(|source| WorkloadError::Hash {
            object: Self::object(&pair, &pair.target),
            source,
        })?;
        Ok(canary.has_spec_changed(&hash))
    }

    async fn have_dependencies_changed(&self, canary: &Canary) -> Result<bool, WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        self.deps
            .config_tracker
            .has_config_changed(canary)
            .await
            .map_err(|source| WorkloadError::ConfigTracker {
                operation: "has_config_changed",
                canary: pair.canary,
                source,
            })
    }

    async fn get_metadata(&self, canary: &Canary) -> Result<WorkloadMetadata, WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let target = self.fetch(&pair, &pair.target).await?;
        let (label, label_value) = self.selector_label(&target, &pair)?;

        let ports = if canary.spec.service.port_discovery {
            let containers = target
                .pod_template()
                .and_then(|t| t.spec.as_ref())
                .map(|spec| spec.containers.as_slice())
                .unwrap_or_default();
            Some(discover_ports(canary, containers))
        } else {
            None
        };

        Ok(WorkloadMetadata {
            label,
            label_value,
            ports,
        })
    }

    async fn is_primary_ready(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        self.check_primary(canary, &pair).await
    }

    async fn is_canary_ready(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let target = self.fetch(&pair, &pair.target).await?;
        self.check_readiness(&target, "canary", canary)
            .into_result()
            .map_err(|source| WorkloadError::NotReady {
                object: Self::object(&pair, &pair.target),
                source,
            })
    }

    async fn scale_to_zero(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let result = self.set_scale_to_zero(&pair, true).await;
        self.deps.record_operation(W::KIND, "scale_to_zero", &result);
        result
    }

    async fn scale_from_zero(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let result = self.set_scale_to_zero(&pair, false).await;
        self.deps.record_operation(W::KIND, "scale_from_zero", &result);
        result
    }

    async fn finalize(&self, canary: &Canary) -> Result<(), WorkloadError> {
        let pair = WorkloadPair::for_canary(canary)?;
        let result = self.set_scale_to_zero(&pair, false).await;
        self.deps.record_operation(W::KIND, "finalize", &result);
        result
    }
}

#[cfg(test)]
#[path = "pod_test.rs"]
mod tests;
