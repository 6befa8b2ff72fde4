use super::pod::PodWorkload;
use super::WorkloadKind;
use crate::controller::readiness::{conditions_from, RolloutStatusView};
use crate::crd::cloneset::{CloneSet, CloneSetSpec, RECREATE_UPDATE_STRATEGY};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// In-place update strategies patch pods of the same set and cannot be
/// mirrored to a separate primary, so only `ReCreate` is accepted.
impl PodWorkload for CloneSet {
    const KIND: WorkloadKind = WorkloadKind::CloneSet;
    const REQUIRED_STRATEGY: &'static str = RECREATE_UPDATE_STRATEGY;

    fn match_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.selector.match_labels.as_ref()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        Some(&self.spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        Some(&mut self.spec.template)
    }

    fn declared_replicas(&self) -> Option<i32> {
        self.spec.replicas
    }

    fn rollout_status(&self) -> RolloutStatusView {
        let status = self.status.clone().unwrap_or_default();
        RolloutStatusView {
            generation: self.metadata.generation,
            observed_generation: status.observed_generation,
            desired_replicas: self.spec.replicas,
            replicas: status.replicas,
            updated_replicas: status.updated_replicas,
            available_replicas: status.available_replicas,
            conditions: conditions_from(&status.conditions),
        }
    }

    fn unsupported_strategy(&self) -> Option<String> {
        self.spec
            .update_strategy
            .type_
            .clone()
            .filter(|t| !t.is_empty() && t.as_str() != RECREATE_UPDATE_STRATEGY)
    }

    fn new_primary(
        metadata: ObjectMeta,
        selector: LabelSelector,
        template: PodTemplateSpec,
        replicas: i32,
    ) -> Self {
        CloneSet {
            metadata,
            spec: CloneSetSpec {
                replicas: Some(replicas),
                selector,
                template,
                ..Default::default()
            },
            status: None,
        }
    }

    fn copy_rollout_policy(target: &Self, primary: &mut Self) {
        primary.spec.min_ready_seconds = target.spec.min_ready_seconds;
        primary.spec.revision_history_limit = target.spec.revision_history_limit;
        primary.spec.update_strategy = target.spec.update_strategy.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::readiness::{classify, NotReady, Verdict};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn clone_set(update_strategy: serde_json::Value, status: serde_json::Value) -> CloneSet {
        serde_json::from_value(json!({
            "apiVersion": "apps.kruise.io/v1alpha1",
            "kind": "CloneSet",
            "metadata": { "name": "podinfo", "namespace": "test", "generation": 4 },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "podinfo" } },
                "template": {},
                "updateStrategy": update_strategy,
                "scaleStrategy": { "maxUnavailable": 1 }
            },
            "status": status
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:20:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_in_place_strategy_is_rejected() {
        let cs = clone_set(json!({ "type": "InPlaceIfPossible" }), json!({}));
        assert_eq!(
            cs.unsupported_strategy(),
            Some("InPlaceIfPossible".to_string())
        );

        let cs = clone_set(json!({ "type": "ReCreate" }), json!({}));
        assert_eq!(cs.unsupported_strategy(), None);

        let cs = clone_set(json!({}), json!({}));
        assert_eq!(cs.unsupported_strategy(), None);
    }

    #[test]
    fn test_progress_deadline_condition_is_read_from_status() {
        let cs = clone_set(
            json!({}),
            json!({
                "observedGeneration": 4,
                "replicas": 2,
                "updatedReplicas": 2,
                "availableReplicas": 2,
                "conditions": [{
                    "type": "Progressing",
                    "status": "False",
                    "reason": "ProgressDeadlineExceeded",
                    "lastTransitionTime": "2026-01-01T00:00:00Z"
                }]
            }),
        );

        assert_eq!(
            classify(&cs.rollout_status(), Duration::seconds(600), now()),
            Verdict::Fatal(NotReady::ProgressDeadlineExceeded)
        );
    }

    #[test]
    fn test_unavailable_past_deadline_is_fatal() {
        let cs = clone_set(
            json!({}),
            json!({
                "observedGeneration": 4,
                "replicas": 2,
                "updatedReplicas": 2,
                "availableReplicas": 1,
                "conditions": [{
                    "type": "Available",
                    "status": "False",
                    "reason": "MinimumReplicasUnavailable",
                    "lastTransitionTime": "2026-01-01T00:00:00Z"
                }]
            }),
        );

        assert_eq!(
            classify(&cs.rollout_status(), Duration::seconds(600), now()),
            Verdict::Fatal(NotReady::UpdatedReplicasUnavailable {
                available: 1,
                updated: 2
            })
        );
        assert_eq!(
            classify(&cs.rollout_status(), Duration::seconds(3600), now()),
            Verdict::Retryable(NotReady::UpdatedReplicasUnavailable {
                available: 1,
                updated: 2
            })
        );
    }

    #[test]
    fn test_copy_rollout_policy_keeps_primary_selector() {
        let target = clone_set(
            json!({ "type": "ReCreate", "partition": 1 }),
            json!({}),
        );
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "app".to_string(),
                "podinfo-primary".to_string(),
            )])),
            ..Default::default()
        };
        let mut primary = CloneSet::new_primary(
            ObjectMeta::default(),
            selector.clone(),
            PodTemplateSpec::default(),
            2,
        );

        CloneSet::copy_rollout_policy(&target, &mut primary);

        assert_eq!(primary.spec.selector, selector);
        assert_eq!(primary.spec.update_strategy.type_.as_deref(), Some("ReCreate"));
        assert_eq!(primary.spec.replicas, Some(2));
    }
}
