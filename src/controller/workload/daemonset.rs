use super::pod::PodWorkload;
use super::WorkloadKind;
use crate::controller::readiness::{conditions_from, RolloutStatusView};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

const ROLLING_UPDATE: &str = "RollingUpdate";

/// DaemonSets run one pod per eligible node, so counts are scheduled pods
/// and there is no replica field to seed or check.
impl PodWorkload for DaemonSet {
    const KIND: WorkloadKind = WorkloadKind::DaemonSet;
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
        None
    }

    fn rollout_status(&self) -> RolloutStatusView {
        let status = self.status.clone().unwrap_or_default();
        RolloutStatusView {
            generation: self.metadata.generation,
            observed_generation: status.observed_generation,
            desired_replicas: Some(status.desired_number_scheduled),
            replicas: status.current_number_scheduled,
            updated_replicas: status.updated_number_scheduled.unwrap_or(0),
            available_replicas: status.number_available.unwrap_or(0),
            conditions: conditions_from(status.conditions.as_deref().unwrap_or_default()),
        }
    }

    fn unsupported_strategy(&self) -> Option<String> {
        self.spec
            .as_ref()?
            .update_strategy
            .as_ref()?
            .type_
            .clone()
            .filter(|t| !t.is_empty() && t.as_str() != ROLLING_UPDATE)
    }

    fn new_primary(
        metadata: ObjectMeta,
        selector: LabelSelector,
        template: PodTemplateSpec,
        _replicas: i32,
    ) -> Self {
        DaemonSet {
            metadata,
            spec: Some(DaemonSetSpec {
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
        dest.update_strategy = source.update_strategy.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::readiness::{classify, NotReady, Verdict};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn daemon_set(status: serde_json::Value) -> DaemonSet {
        serde_json::from_value(json!({
            "metadata": { "name": "node-exporter", "generation": 2 },
            "spec": {
                "selector": { "matchLabels": { "app": "node-exporter" } },
                "template": {},
                "updateStrategy": { "type": "OnDelete" }
            },
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_rollout_status_uses_scheduled_counts() {
        let ds = daemon_set(json!({
            "observedGeneration": 2,
            "desiredNumberScheduled": 3,
            "currentNumberScheduled": 3,
            "numberMisscheduled": 0,
            "numberReady": 2,
            "updatedNumberScheduled": 2,
            "numberAvailable": 2
        }));

        let view = ds.rollout_status();
        assert_eq!(view.desired_replicas, Some(3));
        assert_eq!(view.replicas, 3);
        assert_eq!(view.updated_replicas, 2);
        assert_eq!(view.available_replicas, 2);
        assert_eq!(
            classify(&view, Duration::seconds(600), Utc::now()),
            Verdict::Retryable(NotReady::ReplicasUpdating {
                updated: 2,
                desired: 3
            })
        );
    }

    #[test]
    fn test_fully_scheduled_daemon_set_is_ready() {
        let ds = daemon_set(json!({
            "observedGeneration": 2,
            "desiredNumberScheduled": 3,
            "currentNumberScheduled": 3,
            "numberMisscheduled": 0,
            "numberReady": 3,
            "updatedNumberScheduled": 3,
            "numberAvailable": 3
        }));

        assert_eq!(
            classify(&ds.rollout_status(), Duration::seconds(600), Utc::now()),
            Verdict::Ready
        );
        assert_eq!(ds.declared_replicas(), None);
    }

    #[test]
    fn test_on_delete_strategy_is_rejected() {
        let ds = daemon_set(json!({
            "desiredNumberScheduled": 0,
            "currentNumberScheduled": 0,
            "numberMisscheduled": 0,
            "numberReady": 0
        }));
        assert_eq!(ds.unsupported_strategy(), Some("OnDelete".to_string()));
    }
}
