use super::canary::*;
use super::cloneset::CloneSet;
use kube::api::ObjectMeta;

fn canary_with_status(status: Option<CanaryStatus>) -> Canary {
    Canary {
        metadata: ObjectMeta {
            name: Some("demo".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        spec: CanarySpec {
            target_ref: TargetRef {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: "demo".to_string(),
            },
            progress_deadline_seconds: None,
            skip_analysis: false,
            service: CanaryService::default(),
        },
        status,
    }
}

#[test]
fn test_canary_deserializes_from_yaml() {
    let yaml = r#"
apiVersion: kulta.io/v1alpha1
kind: Canary
metadata:
  name: podinfo
  namespace: test
spec:
  targetRef:
    apiVersion: apps/v1
    kind: Deployment
    name: podinfo
  progressDeadlineSeconds: 60
  service:
    port: 9898
    targetPort: http
    portDiscovery: true
status:
  phase: Progressing
  lastAppliedSpec: abc
"#;

    let canary: Canary = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(canary.target_name(), "podinfo");
    assert_eq!(canary.primary_name(), "podinfo-primary");
    assert_eq!(canary.progress_deadline(), chrono::Duration::seconds(60));
    assert!(canary.spec.service.port_discovery);
    assert_eq!(canary.phase(), Some(&CanaryPhase::Progressing));
    assert!(!canary.is_initializing());
}

#[test]
fn test_progress_deadline_defaults_to_ten_minutes() {
    let canary = canary_with_status(None);
    assert_eq!(canary.progress_deadline(), chrono::Duration::seconds(600));
}

#[test]
fn test_missing_phase_counts_as_initializing() {
    assert!(canary_with_status(None).is_initializing());
    assert!(canary_with_status(Some(CanaryStatus {
        phase: Some(CanaryPhase::Initializing),
        ..Default::default()
    }))
    .is_initializing());
    assert!(!canary_with_status(Some(CanaryStatus {
        phase: Some(CanaryPhase::Succeeded),
        ..Default::default()
    }))
    .is_initializing());
}

#[test]
fn test_empty_phase_reads_as_initializing() {
    let status: CanaryStatus = serde_json::from_value(serde_json::json!({
        "phase": "",
        "lastAppliedSpec": "abc"
    }))
    .unwrap();
    assert_eq!(status.phase, None);
    assert_eq!(status.last_applied_spec.as_deref(), Some("abc"));
    assert!(canary_with_status(Some(status)).is_initializing());

    let status: CanaryStatus =
        serde_json::from_value(serde_json::json!({ "phase": "Promoting" })).unwrap();
    assert_eq!(status.phase, Some(CanaryPhase::Promoting));

    assert!(serde_json::from_value::<CanaryStatus>(serde_json::json!({ "phase": "Paused" })).is_err());
}

#[test]
fn test_target_port_schema_accepts_int_or_string() {
    use kube::CustomResourceExt;

    let crd = serde_json::to_value(Canary::crd()).unwrap();
    let service = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
        ["properties"]["service"]["properties"];
    assert!(service["targetPort"]
        .to_string()
        .contains(r#""x-kubernetes-int-or-string":true"#));
}

#[test]
fn test_has_spec_changed_without_applied_spec() {
    let canary = canary_with_status(None);
    assert!(canary.has_spec_changed("any"));

    let empty = canary_with_status(Some(CanaryStatus {
        last_applied_spec: Some(String::new()),
        ..Default::default()
    }));
    assert!(empty.has_spec_changed("any"));
}

#[test]
fn test_has_spec_changed_compares_applied_hash() {
    let canary = canary_with_status(Some(CanaryStatus {
        last_applied_spec: Some("aaa".to_string()),
        ..Default::default()
    }));
    assert!(!canary.has_spec_changed("aaa"));
    assert!(canary.has_spec_changed("bbb"));
}

#[test]
fn test_manual_rollback_to_promoted_spec_is_not_a_change() {
    let canary = canary_with_status(Some(CanaryStatus {
        last_applied_spec: Some("new".to_string()),
        last_promoted_spec: Some("old".to_string()),
        ..Default::default()
    }));
    assert!(!canary.has_spec_changed("old"));
}

#[test]
fn test_cloneset_keeps_unknown_spec_fields() {
    let yaml = r#"
apiVersion: apps.kruise.io/v1alpha1
kind: CloneSet
metadata:
  name: sample
  namespace: ns
spec:
  replicas: 3
  selector:
    matchLabels:
      app: sample
  template:
    metadata:
      labels:
        app: sample
    spec:
      containers:
        - name: main
          image: nginx:alpine
  scaleStrategy:
    maxUnavailable: 1
  updateStrategy:
    type: ReCreate
    priorityStrategy:
      weightPriority: []
"#;

    let cloneset: CloneSet = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cloneset.spec.replicas, Some(3));
    assert!(cloneset.spec.extra.contains_key("scaleStrategy"));

    let round_trip = serde_json::to_value(&cloneset).unwrap();
    assert_eq!(round_trip["spec"]["scaleStrategy"]["maxUnavailable"], 1);
    assert!(round_trip["spec"]["updateStrategy"]["priorityStrategy"].is_object());
    assert_eq!(round_trip["spec"]["updateStrategy"]["type"], "ReCreate");
}
