use super::pod::PodWorkload;
use super::WorkloadKind;
use crate::controller::readiness::{conditions_from, RolloutStatusView};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

const ROLLING_UPDATE: &str = "RollingUpdate";

impl PodWorkload for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;
    const REQUIRED_STRATEGY: &'static str = ROLLING_UPDATE;

    fn match_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.as_ref()?.selector.match_labels.as_ref()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }

    fn declared_replicas(&self) -> Option<i32> {
        self.spec.as_ref()?.replicas
    }

    fn rollout_status(&self) -> RolloutStatusView {
        let status = self.status.clone().unwrap_or_default();
        RolloutStatusView {
            generation: self.metadata.generation,
            observed_generation: status.observed_generation,
            desired_replicas: self.declared_replicas(),
            replicas: status.replicas.unwrap_or(0),
            updated_replicas: status.updated_replicas.unwrap_or(0),
            available_replicas: status.available_replicas.unwrap_or(0),
            conditions: conditions_from(status.conditions.as_deref().unwrap_or_default()),
        }
    }

    /// Anything but `RollingUpdate`, i.e. `Recreate`
    fn unsupported_strategy(&self) -> Option<String> {
        self.spec
            .as_ref()?
            .strategy
            .as_ref()?
            .type_
            .clone()
            .filter(|t| !t.is_empty() && t.as_str() != ROLLING_UPDATE)
    }

    fn new_primary(
        metadata: ObjectMeta,
        selector: LabelSelector,
        template: PodTemplateSpec,
        replicas: i32,
    ) -> Self {
        Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector,
                template,
                ..Default::default()
            }),
            status: None,
        }
    }

    fn copy_rollout_policy(target: &Self, primary: &mut Self) {
        let (Some(source), Some(dest)) = (target.spec.as_ref(), primary.spec.as_mut()) else {
            return;
        };
        dest.min_ready_seconds = source.min_ready_seconds;
        dest.revision_history_limit = source.revision_history_limit;
        dest.strategy = source.strategy.clone();
        dest.progress_deadline_seconds = source.progress_deadline_seconds;
    }
}
