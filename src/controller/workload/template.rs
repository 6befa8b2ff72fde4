//! Pod template helpers shared by every workload kind
//!
//! The scale-to-zero marker lives here together with everything that must
//! ignore it (spec hashing, copying a template to the primary), so the two
//! sides cannot drift apart.

use crate::crd::canary::Canary;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use std::collections::BTreeMap;

/// Node selector key that makes target pods unschedulable
pub const SCALE_TO_ZERO_KEY: &str = "kulta.io/scale-to-zero";
pub const SCALE_TO_ZERO_VALUE: &str = "true";

/// Pod template annotation regenerated on every promotion
pub const PROMOTION_ID_ANNOTATION: &str = "kulta.io/promotion-id";

/// Metadata annotation never copied onto a primary
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Label prefix owned by GitOps tooling, never copied onto a primary
const EXCLUDED_LABEL_PREFIX: &str = "toolkit.fluxcd.io/";

/// Add the scale-to-zero marker; returns true when the spec changed
pub fn add_scale_to_zero_marker(spec: &mut PodSpec) -> bool {
    let selector = spec.node_selector.get_or_insert_with(BTreeMap::new);
    let previous = selector.insert(
        SCALE_TO_ZERO_KEY.to_string(),
        SCALE_TO_ZERO_VALUE.to_string(),
    );
    previous.as_deref() != Some(SCALE_TO_ZERO_VALUE)
}

/// Remove the scale-to-zero marker; returns true when the spec changed
///
/// A node selector left empty is reset to None, matching a template that
/// never had one.
pub fn remove_scale_to_zero_marker(spec: &mut PodSpec) -> bool {
    let Some(selector) = spec.node_selector.as_mut() else {
        return false;
    };
    let removed = selector.remove(SCALE_TO_ZERO_KEY).is_some();
    if selector.is_empty() {
        spec.node_selector = None;
    }
    removed
}

/// Stable hash of any serializable spec
///
/// FNV-1a over the JSON encoding. Maps in k8s-openapi types are `BTreeMap`s,
/// so the encoding is deterministic across processes.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;

    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in &json {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }

    Ok(format!("{hash:016x}"))
}

/// Hash of a pod template as compared by drift detection
///
/// The scale-to-zero marker is ignored and a missing node selector hashes
/// like an empty one.
pub fn pod_template_hash(template: &PodTemplateSpec) -> Result<String, serde_json::Error> {
    let mut template = template.clone();
    let spec = template.spec.get_or_insert_with(PodSpec::default);
    remove_scale_to_zero_marker(spec);
    spec.node_selector.get_or_insert_with(BTreeMap::new);
    compute_hash(&template)
}

/// Resolve the pod selector label pairing target and primary
///
/// Exactly one of `candidates` must be present in `match_labels`. On failure
/// the candidate keys that were found are returned (empty or several).
pub fn resolve_selector_label(
    match_labels: Option<&BTreeMap<String, String>>,
    candidates: &[String],
) -> Result<(String, String), Vec<String>> {
    let found: Vec<(String, String)> = candidates
        .iter()
        .filter_map(|key| {
            match_labels
                .and_then(|labels| labels.get(key))
                .map(|value| (key.clone(), value.clone()))
        })
        .collect();

    match found.as_slice() {
        [(key, value)] => Ok((key.clone(), value.clone())),
        _ => Err(found.into_iter().map(|(key, _)| key).collect()),
    }
}

/// Keep labels whose key starts with one of `prefixes` (`*` keeps everything)
pub fn include_labels_by_prefix(
    labels: &BTreeMap<String, String>,
    prefixes: &[String],
) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| !key.starts_with(EXCLUDED_LABEL_PREFIX))
        .filter(|(key, _)| {
            prefixes
                .iter()
                .any(|prefix| prefix == "*" || key.starts_with(prefix.as_str()))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Copy `labels` with the selector label pointing at the primary
pub fn make_primary_labels(
    labels: Option<&BTreeMap<String, String>>,
    label: &str,
    primary_value: &str,
) -> BTreeMap<String, String> {
    let mut result = labels.cloned().unwrap_or_default();
    result.insert(label.to_string(), primary_value.to_string());
    result
}

/// Copy pod template annotations with a fresh promotion id
///
/// A new id on every promotion makes the workload controller roll the
/// primary pods even when nothing else in the template changed.
pub fn make_annotations(annotations: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut result: BTreeMap<String, String> = annotations
        .into_iter()
        .flatten()
        .filter(|(key, _)| key.as_str() != PROMOTION_ID_ANNOTATION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    result.insert(
        PROMOTION_ID_ANNOTATION.to_string(),
        uuid::Uuid::new_v4().to_string(),
    );
    result
}

/// Workload metadata annotations copied onto a new primary
pub fn primary_metadata_annotations(
    annotations: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let copied: BTreeMap<String, String> = annotations
        .into_iter()
        .flatten()
        .filter(|(key, _)| key.as_str() != LAST_APPLIED_ANNOTATION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!copied.is_empty()).then_some(copied)
}

/// Container ports exposed through port discovery
///
/// Ports are keyed by their name, or `tcp-<container>-<port>` when unnamed.
/// The canary's own service port and target port are excluded.
pub fn discover_ports(canary: &Canary, containers: &[Container]) -> BTreeMap<String, i32> {
    let service = &canary.spec.service;
    let mut ports = BTreeMap::new();

    for container in containers {
        for port in container.ports.iter().flatten() {
            if port.container_port == service.port {
                continue;
            }
            let is_target = match &service.target_port {
                Some(IntOrString::Int(target)) => port.container_port == *target,
                Some(IntOrString::String(target)) => port.name.as_deref() == Some(target.as_str()),
                None => false,
            };
            if is_target {
                continue;
            }

            let name = port
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("tcp-{}-{}", container.name, port.container_port));
            ports.insert(name, port.container_port);
        }
    }

    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::canary::{CanaryService, CanarySpec, TargetRef};
    use k8s_openapi::api::core::v1::ContainerPort;
    use kube::api::ObjectMeta;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn has_scale_to_zero_marker(spec: &PodSpec) -> bool {
        spec.node_selector
            .as_ref()
            .is_some_and(|s| s.contains_key(SCALE_TO_ZERO_KEY))
    }

    fn candidates() -> Vec<String> {
        vec![
            "app".to_string(),
            "name".to_string(),
            "app.kubernetes.io/name".to_string(),
        ]
    }

    #[test]
    fn test_resolve_selector_label_single_candidate() {
        let match_labels = labels(&[("app.kubernetes.io/name", "podinfo"), ("tier", "web")]);
        assert_eq!(
            resolve_selector_label(Some(&match_labels), &candidates()),
            Ok(("app.kubernetes.io/name".to_string(), "podinfo".to_string()))
        );
    }

    #[test]
    fn test_resolve_selector_label_each_candidate_alone() {
        for key in candidates() {
            let match_labels = labels(&[(key.as_str(), "v"), ("other", "x")]);
            let (label, value) = resolve_selector_label(Some(&match_labels), &candidates()).unwrap();
            assert_eq!(label, key);
            assert_eq!(value, "v");
        }
    }

    #[test]
    fn test_resolve_selector_label_none_present() {
        let match_labels = labels(&[("tier", "web")]);
        assert_eq!(
            resolve_selector_label(Some(&match_labels), &candidates()),
            Err(vec![])
        );
        assert_eq!(resolve_selector_label(None, &candidates()), Err(vec![]));
    }

    #[test]
    fn test_resolve_selector_label_ambiguous() {
        let match_labels = labels(&[("app", "podinfo"), ("name", "podinfo")]);
        assert_eq!(
            resolve_selector_label(Some(&match_labels), &candidates()),
            Err(vec!["app".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn test_scale_to_zero_marker_is_idempotent() {
        let mut spec = PodSpec {
            node_selector: Some(labels(&[("disktype", "ssd")])),
            ..Default::default()
        };

        assert!(add_scale_to_zero_marker(&mut spec));
        let once = spec.clone();
        assert!(!add_scale_to_zero_marker(&mut spec));
        assert_eq!(spec, once);
        assert_eq!(
            spec.node_selector,
            Some(labels(&[("disktype", "ssd"), (SCALE_TO_ZERO_KEY, "true")]))
        );
    }

    #[test]
    fn test_marker_round_trip_restores_selector() {
        let original = PodSpec {
            node_selector: Some(labels(&[("disktype", "ssd")])),
            ..Default::default()
        };
        let mut spec = original.clone();
        add_scale_to_zero_marker(&mut spec);
        assert!(remove_scale_to_zero_marker(&mut spec));
        assert_eq!(spec, original);
    }

    #[test]
    fn test_marker_round_trip_restores_missing_selector() {
        let mut spec = PodSpec::default();
        add_scale_to_zero_marker(&mut spec);
        assert!(has_scale_to_zero_marker(&spec));
        remove_scale_to_zero_marker(&mut spec);
        assert_eq!(spec.node_selector, None);
        assert!(!remove_scale_to_zero_marker(&mut spec));
    }

    #[test]
    fn test_pod_template_hash_ignores_marker_and_empty_selector() {
        let bare = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec::default()),
        };
        let mut empty_selector = bare.clone();
        empty_selector.spec.as_mut().unwrap().node_selector = Some(BTreeMap::new());
        let mut marked = bare.clone();
        add_scale_to_zero_marker(marked.spec.as_mut().unwrap());

        let hash = pod_template_hash(&bare).unwrap();
        assert_eq!(hash.len(), 16);
        assert_eq!(pod_template_hash(&empty_selector).unwrap(), hash);
        assert_eq!(pod_template_hash(&marked).unwrap(), hash);
    }

    #[test]
    fn test_pod_template_hash_detects_image_change() {
        let template = |image: &str| PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        };
        assert_ne!(
            pod_template_hash(&template("podinfo:6.0.0")).unwrap(),
            pod_template_hash(&template("podinfo:6.0.1")).unwrap()
        );
    }

    #[test]
    fn test_include_labels_by_prefix() {
        let target = labels(&[
            ("app", "podinfo"),
            ("team.example.com/owner", "web"),
            ("kustomize.toolkit.fluxcd.io/name", "apps"),
            ("toolkit.fluxcd.io/tenant", "a"),
        ]);

        let included = include_labels_by_prefix(&target, &["team.example.com".to_string()]);
        assert_eq!(included, labels(&[("team.example.com/owner", "web")]));

        let all = include_labels_by_prefix(&target, &["*".to_string()]);
        assert_eq!(all.len(), 3);
        assert!(!all.contains_key("toolkit.fluxcd.io/tenant"));

        assert!(include_labels_by_prefix(&target, &[]).is_empty());
    }

    #[test]
    fn test_make_primary_labels_overrides_selector_value() {
        let template = labels(&[("app", "podinfo"), ("version", "1")]);
        let primary = make_primary_labels(Some(&template), "app", "podinfo-primary");
        assert_eq!(primary, labels(&[("app", "podinfo-primary"), ("version", "1")]));

        let bare = make_primary_labels(None, "app", "podinfo-primary");
        assert_eq!(bare, labels(&[("app", "podinfo-primary")]));
    }

    #[test]
    fn test_make_annotations_regenerates_promotion_id() {
        let source = labels(&[
            ("prometheus.io/scrape", "true"),
            (PROMOTION_ID_ANNOTATION, "old"),
        ]);
        let first = make_annotations(Some(&source));
        let second = make_annotations(Some(&source));

        assert_eq!(first.get("prometheus.io/scrape").map(String::as_str), Some("true"));
        assert_ne!(first.get(PROMOTION_ID_ANNOTATION).map(String::as_str), Some("old"));
        assert_ne!(first.get(PROMOTION_ID_ANNOTATION), second.get(PROMOTION_ID_ANNOTATION));
    }

    #[test]
    fn test_primary_metadata_annotations_drop_last_applied() {
        let source = labels(&[(LAST_APPLIED_ANNOTATION, "{}"), ("owner", "web")]);
        assert_eq!(
            primary_metadata_annotations(Some(&source)),
            Some(labels(&[("owner", "web")]))
        );
        assert_eq!(
            primary_metadata_annotations(Some(&labels(&[(LAST_APPLIED_ANNOTATION, "{}")]))),
            None
        );
    }

    #[test]
    fn test_discover_ports_excludes_service_ports() {
        let canary = Canary {
            metadata: ObjectMeta::default(),
            spec: CanarySpec {
                target_ref: TargetRef::default(),
                progress_deadline_seconds: None,
                skip_analysis: false,
                service: CanaryService {
                    port: 9898,
                    target_port: Some(IntOrString::String("http".to_string())),
                    port_discovery: true,
                },
            },
            status: None,
        };
        let port = |name: Option<&str>, number: i32| ContainerPort {
            name: name.map(str::to_string),
            container_port: number,
            ..Default::default()
        };
        let containers = vec![
            Container {
                name: "podinfo".to_string(),
                ports: Some(vec![
                    port(Some("http"), 8080),
                    port(Some("http-metrics"), 9797),
                    port(None, 9898),
                ]),
                ..Default::default()
            },
            Container {
                name: "sidecar".to_string(),
                ports: Some(vec![port(None, 15090)]),
                ..Default::default()
            },
        ];

        let ports = discover_ports(&canary, &containers);
        assert_eq!(
            ports,
            BTreeMap::from([
                ("http-metrics".to_string(), 9797),
                ("tcp-sidecar-15090".to_string(), 15090),
            ])
        );
    }
}
