//! Selection of a workload controller by target kind

use super::clock::{Clock, SystemClock};
use super::config_tracker::ConfigTracker;
use super::store::{KubeObjectApi, ObjectApi};
use super::workload::{
    ControllerDeps, PodWorkloadController, ServiceController, WorkloadController, WorkloadKind,
};
use crate::crd::cloneset::CloneSet;
use crate::server::SharedMetrics;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use std::sync::Arc;

/// Per-kind object access handed to the controllers
#[derive(Clone)]
pub struct WorkloadClients {
    pub deployments: Arc<dyn ObjectApi<Deployment>>,
    pub daemon_sets: Arc<dyn ObjectApi<DaemonSet>>,
    pub services: Arc<dyn ObjectApi<Service>>,
    pub clone_sets: Arc<dyn ObjectApi<CloneSet>>,
}

impl WorkloadClients {
    /// Clients backed by the Kubernetes API server
    pub fn from_client(client: Client) -> Self {
        Self {
            deployments: Arc::new(KubeObjectApi::<Deployment>::new(client.clone())),
            daemon_sets: Arc::new(KubeObjectApi::<DaemonSet>::new(client.clone())),
            services: Arc::new(KubeObjectApi::<Service>::new(client.clone())),
            clone_sets: Arc::new(KubeObjectApi::<CloneSet>::new(client)),
        }
    }
}

/// Builds the controller matching a canary's `targetRef.kind`
///
/// # Example
/// ```ignore
/// let factory = ControllerFactory::new(clients, Arc::new(NopTracker), labels, vec![]);
/// let controller = factory.controller(&canary.spec.target_ref.kind);
/// controller.initialize(&canary).await?;
/// ```
pub struct ControllerFactory {
    clients: WorkloadClients,
    deps: Arc<ControllerDeps>,
}

impl ControllerFactory {
    /// # Arguments
    /// * `labels` - Candidate pod selector label keys, in priority order
    /// * `include_label_prefix` - Label key prefixes copied to primaries (`*` for all)
    pub fn new(
        clients: WorkloadClients,
        config_tracker: Arc<dyn ConfigTracker>,
        labels: Vec<String>,
        include_label_prefix: Vec<String>,
    ) -> Self {
        Self {
            clients,
            deps: Arc::new(ControllerDeps {
                config_tracker,
                labels,
                include_label_prefix,
                clock: Arc::new(SystemClock),
                metrics: None,
            }),
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        self.map_deps(|deps| deps.clock = clock)
    }

    pub fn with_metrics(self, metrics: SharedMetrics) -> Self {
        self.map_deps(|deps| deps.metrics = Some(metrics))
    }

    fn map_deps(self, update: impl FnOnce(&mut ControllerDeps)) -> Self {
        let mut deps = match Arc::try_unwrap(self.deps) {
            Ok(deps) => deps,
            Err(shared) => ControllerDeps {
                config_tracker: shared.config_tracker.clone(),
                labels: shared.labels.clone(),
                include_label_prefix: shared.include_label_prefix.clone(),
                clock: shared.clock.clone(),
                metrics: shared.metrics.clone(),
            },
        };
        update(&mut deps);
        Self {
            clients: self.clients,
            deps: Arc::new(deps),
        }
    }

    /// Controller for `kind`; unknown kinds get the Deployment controller
    pub fn controller(&self, kind: &str) -> Box<dyn WorkloadController> {
        let deps = self.deps.clone();
        match WorkloadKind::from_kind(kind) {
            WorkloadKind::Deployment => Box::new(PodWorkloadController::new(
                self.clients.deployments.clone(),
                deps,
            )),
            WorkloadKind::DaemonSet => Box::new(PodWorkloadController::new(
                self.clients.daemon_sets.clone(),
                deps,
            )),
            WorkloadKind::CloneSet => Box::new(PodWorkloadController::new(
                self.clients.clone_sets.clone(),
                deps,
            )),
            WorkloadKind::Service => {
                Box::new(ServiceController::new(self.clients.services.clone(), deps))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::config_tracker::NopTracker;
    use crate::controller::store::{Journal, MockObjectApi};

    fn factory() -> ControllerFactory {
        let journal = Journal::default();
        let clients = WorkloadClients {
            deployments: Arc::new(MockObjectApi::<Deployment>::new(journal.clone())),
            daemon_sets: Arc::new(MockObjectApi::<DaemonSet>::new(journal.clone())),
            services: Arc::new(MockObjectApi::<Service>::new(journal.clone())),
            clone_sets: Arc::new(MockObjectApi::<CloneSet>::new(journal)),
        };
        ControllerFactory::new(
            clients,
            Arc::new(NopTracker),
            vec!["app".to_string()],
            vec![],
        )
    }

    #[test]
    fn test_known_kinds_select_their_controller() {
        let factory = factory();
        for kind in [
            WorkloadKind::Deployment,
            WorkloadKind::DaemonSet,
            WorkloadKind::Service,
            WorkloadKind::CloneSet,
        ] {
            assert_eq!(factory.controller(kind.as_str()).kind(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_gets_deployment_controller() {
        let factory = factory();
        assert_eq!(
            factory.controller("UnknownKind").kind(),
            factory.controller("Deployment").kind()
        );
        assert_eq!(factory.controller("StatefulSet").kind(), WorkloadKind::Deployment);
    }

    #[test]
    fn test_builder_keeps_settings() {
        let metrics = crate::server::metrics::create_metrics().unwrap();
        let factory = factory().with_metrics(metrics).with_clock(Arc::new(SystemClock));
        assert!(factory.deps.metrics.is_some());
        assert_eq!(factory.deps.labels, vec!["app".to_string()]);
    }
}
