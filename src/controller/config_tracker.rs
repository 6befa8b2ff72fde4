//! Contract of the secret/config synchronization engine
//!
//! The workload core never reads ConfigMaps or Secrets itself. It asks the
//! tracker which configs a target references, has it create primary copies
//! before a promotion, and lets it rewrite the promoted pod spec so it points at
//! those copies.

use crate::crd::canary::Canary;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodSpec;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigRefKind {
    ConfigMap,
    Secret,
}

/// Handle to a config object referenced by a pod template
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigRef {
    pub kind: ConfigRefKind,
    pub name: String,
}

impl ConfigRef {
    pub fn config_map(name: impl Into<String>) -> Self {
        Self {
            kind: ConfigRefKind::ConfigMap,
            name: name.into(),
        }
    }

    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            kind: ConfigRefKind::Secret,
            name: name.into(),
        }
    }
}

/// Set of configs referenced by a target, produced by `get_target_configs`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRefs {
    refs: BTreeSet<ConfigRef>,
}

impl ConfigRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: ConfigRef) {
        self.refs.insert(config);
    }

    pub fn contains(&self, config: &ConfigRef) -> bool {
        self.refs.contains(config)
    }
}

impl FromIterator<ConfigRef> for ConfigRefs {
    fn from_iter<I: IntoIterator<Item = ConfigRef>>(iter: I) -> Self {
        Self {
            refs: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
pub trait ConfigTracker: Send + Sync {
    /// Configs referenced by the canary's target pod template
    async fn get_target_configs(&self, canary: &Canary) -> Result<ConfigRefs, TrackerError>;

    /// Create or update primary-labelled copies of `refs`
    async fn create_primary_configs(
        &self,
        canary: &Canary,
        refs: &ConfigRefs,
        include_label_prefix: &[String],
    ) -> Result<(), TrackerError>;

    /// Rewrite `spec` to reference the primary copies of `refs`
    fn apply_primary_configs(&self, spec: PodSpec, refs: &ConfigRefs) -> PodSpec;

    /// Whether any referenced config changed since the last promotion
    async fn has_config_changed(&self, canary: &Canary) -> Result<bool, TrackerError>;
}

/// Tracker used when config tracking is disabled
///
/// References nothing, copies nothing and never reports a change.
pub struct NopTracker;

#[async_trait]
impl ConfigTracker for NopTracker {
    async fn get_target_configs(&self, _canary: &Canary) -> Result<ConfigRefs, TrackerError> {
        Ok(ConfigRefs::new())
    }

    async fn create_primary_configs(
        &self,
        _canary: &Canary,
        _refs: &ConfigRefs,
        _include_label_prefix: &[String],
    ) -> Result<(), TrackerError> {
        Ok(())
    }

    fn apply_primary_configs(&self, spec: PodSpec, _refs: &ConfigRefs) -> PodSpec {
        spec
    }

    async fn has_config_changed(&self, _canary: &Canary) -> Result<bool, TrackerError> {
        Ok(false)
    }
}

/// Test tracker that rewrites volume references to `<name>-primary`
///
/// Calls are recorded in the shared journal so tests can assert ordering
/// against object writes.
#[cfg(test)]
pub struct MockConfigTracker {
    refs: ConfigRefs,
    changed: bool,
    fail_create: bool,
    journal: crate::controller::store::Journal,
}

#[cfg(test)]
impl MockConfigTracker {
    pub fn new(journal: crate::controller::store::Journal) -> Self {
        Self {
            refs: ConfigRefs::new(),
            changed: false,
            fail_create: false,
            journal,
        }
    }

    pub fn with_refs(mut self, refs: ConfigRefs) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

#[cfg(test)]
#[async_trait]
impl ConfigTracker for MockConfigTracker {
    async fn get_target_configs(&self, _canary: &Canary) -> Result<ConfigRefs, TrackerError> {
        self.journal.record("get_target_configs");
        Ok(self.refs.clone())
    }

    async fn create_primary_configs(
        &self,
        _canary: &Canary,
        _refs: &ConfigRefs,
        _include_label_prefix: &[String],
    ) -> Result<(), TrackerError> {
        if self.fail_create {
            return Err(TrackerError::Failed("configmap podinfo-config is locked".into()));
        }
        self.journal.record("create_primary_configs");
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    fn apply_primary_configs(&self, spec: PodSpec, refs: &ConfigRefs) -> PodSpec {
        let mut value = serde_json::to_value(&spec).unwrap();
        let volumes = value
            .get_mut("volumes")
            .and_then(|v| v.as_array_mut())
            .into_iter()
            .flatten();
        for volume in volumes {
            for (source, field, kind) in [
                ("configMap", "name", ConfigRefKind::ConfigMap),
                ("secret", "secretName", ConfigRefKind::Secret),
            ] {
                let Some(name) = volume.pointer_mut(&format!("/{source}/{field}")) else {
                    continue;
                };
                let referenced = name.as_str().map(|n| ConfigRef {
                    kind,
                    name: n.to_string(),
                });
                if let Some(config) = referenced.filter(|c| refs.contains(c)) {
                    *name = serde_json::Value::String(format!("{}-primary", config.name));
                }
            }
        }
        serde_json::from_value(value).unwrap()
    }

    async fn has_config_changed(&self, _canary: &Canary) -> Result<bool, TrackerError> {
        Ok(self.changed)
    }
}
