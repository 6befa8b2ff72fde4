use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;

/// Suffix appended to the target name (and selector value) to address the primary
pub const PRIMARY_SUFFIX: &str = "-primary";

/// Progress deadline used when `spec.progressDeadlineSeconds` is not set
pub const DEFAULT_PROGRESS_DEADLINE_SECONDS: i32 = 600;

/// Canary describes a target workload promoted through a primary shadow copy
///
/// The workload core only reads this resource. Status hashes and the phase are
/// written by the analysis loop.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kulta.io",
    version = "v1alpha1",
    kind = "Canary",
    namespaced,
    status = "CanaryStatus",
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.targetRef.name"}"#,
    printcolumn = r#"{"name":"Kind", "type":"string", "jsonPath":".spec.targetRef.kind"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct CanarySpec {
    /// Workload receiving new revisions under test
    #[serde(rename = "targetRef")]
    pub target_ref: TargetRef,

    /// Maximum time in seconds a rollout may stay unavailable before it is
    /// declared stuck. Defaults to 600 (10 minutes) when not specified.
    #[serde(
        rename = "progressDeadlineSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_deadline_seconds: Option<i32>,

    /// Promote without running analysis
    #[serde(rename = "skipAnalysis", default)]
    pub skip_analysis: bool,

    /// Service exposing the workload pair
    #[serde(default)]
    pub service: CanaryService,
}

/// Reference to the target workload
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct TargetRef {
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Workload kind (Deployment, DaemonSet, Service, CloneSet)
    pub kind: String,

    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CanaryService {
    /// Port exposed by the canary service
    #[serde(default)]
    pub port: i32,

    /// Container port or port name the service targets
    #[serde(rename = "targetPort", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<IntOrStringSchema>")]
    pub target_port: Option<IntOrString>,

    /// Expose every other named container port as well
    #[serde(rename = "portDiscovery", default)]
    pub port_discovery: bool,
}

/// Canary lifecycle phase
///
/// A missing phase means the canary has not been picked up yet and is treated
/// like `Initializing`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum CanaryPhase {
    Initializing,
    Progressing,
    Promoting,
    Finalizing,
    Succeeded,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CanaryStatus {
    /// An empty string reads as no phase
    #[serde(
        default,
        deserialize_with = "empty_phase_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub phase: Option<CanaryPhase>,

    /// Hash of the target pod template last handed to analysis
    #[serde(rename = "lastAppliedSpec", skip_serializing_if = "Option::is_none")]
    pub last_applied_spec: Option<String>,

    /// Hash of the target pod template last promoted to the primary
    #[serde(rename = "lastPromotedSpec", skip_serializing_if = "Option::is_none")]
    pub last_promoted_spec: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn empty_phase_as_none<'de, D>(deserializer: D) -> Result<Option<CanaryPhase>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(phase) => {
            CanaryPhase::deserialize(IntoDeserializer::<D::Error>::into_deserializer(phase)).map(Some)
        }
    }
}

/// Schema for `IntOrString` fields (`x-kubernetes-int-or-string`)
struct IntOrStringSchema;

impl JsonSchema for IntOrStringSchema {
    fn schema_name() -> Cow<'static, str> {
        "IntOrString".into()
    }

    fn inline_schema() -> bool {
        true
    }

    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({ "x-kubernetes-int-or-string": true })
    }
}

impl Canary {
    /// Name of the target workload
    pub fn target_name(&self) -> &str {
        &self.spec.target_ref.name
    }

    /// Name of the primary workload (`<target>-primary`)
    pub fn primary_name(&self) -> String {
        format!("{}{}", self.spec.target_ref.name, PRIMARY_SUFFIX)
    }

    pub fn progress_deadline(&self) -> chrono::Duration {
        let seconds = self
            .spec
            .progress_deadline_seconds
            .unwrap_or(DEFAULT_PROGRESS_DEADLINE_SECONDS);
        chrono::Duration::seconds(i64::from(seconds.max(0)))
    }

    pub fn skip_analysis(&self) -> bool {
        self.spec.skip_analysis
    }

    pub fn phase(&self) -> Option<&CanaryPhase> {
        self.status.as_ref().and_then(|s| s.phase.as_ref())
    }

    /// True while the canary has no phase yet or is still initializing
    pub fn is_initializing(&self) -> bool {
        matches!(self.phase(), None | Some(CanaryPhase::Initializing))
    }

    pub fn last_applied_spec(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.last_applied_spec.as_deref())
            .filter(|h| !h.is_empty())
    }

    pub fn last_promoted_spec(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.last_promoted_spec.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Decide whether a freshly computed spec hash is a new revision
    ///
    /// - nothing applied yet: changed
    /// - hash equals the last promoted spec (manual rollback): unchanged
    /// - otherwise: changed when it differs from the last applied spec
    pub fn has_spec_changed(&self, hash: &str) -> bool {
        let Some(applied) = self.last_applied_spec() else {
            return true;
        };
        if self.last_promoted_spec() == Some(hash) {
            return false;
        }
        applied != hash
    }
}
