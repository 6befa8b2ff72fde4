use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use kulta_workloads::config::ControllerConfig;
use kulta_workloads::controller::config_tracker::{ConfigTracker, NopTracker};
use kulta_workloads::controller::{error_policy, reconcile, Context, ControllerFactory, WorkloadClients};
use kulta_workloads::crd::canary::Canary;
use kulta_workloads::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting KULTA workload controller");

    let config = ControllerConfig::from_env()?;
    info!(
        selector_labels = ?config.selector_labels,
        include_label_prefix = ?config.include_label_prefix,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) =
            run_health_server(health_port, health_readiness, health_metrics, shutdown_signal).await
        {
            warn!(error = %e, "Health server failed");
        }
    });

    if config.enable_config_tracking {
        warn!("No config tracker is available in this build; ConfigMaps and Secrets are not copied to primaries");
    }
    let tracker: Arc<dyn ConfigTracker> = Arc::new(NopTracker);

    let factory = ControllerFactory::new(
        WorkloadClients::from_client(client.clone()),
        tracker,
        config.selector_labels.clone(),
        config.include_label_prefix.clone(),
    )
    .with_metrics(metrics);
    let ctx = Arc::new(Context::new(factory));

    let canaries = match config.watch_namespace.as_deref() {
        Some(namespace) => Api::<Canary>::namespaced(client, namespace),
        None => Api::<Canary>::all(client),
    };

    readiness.set_ready();
    info!("Controller ready, watching canaries");

    // error_policy already logs failures
    let controller = Controller::new(canaries, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((canary, _)) = res {
                info!(canary = %canary.name, "Reconciled");
            }
        });

    tokio::select! {
        _ = controller => {
            info!("Controller stream ended");
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
                Err(e) => error!(error = %e, "Cannot listen for termination signals, shutting down"),
            }
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();
    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task failed");
    }

    info!("KULTA workload controller shut down gracefully");
    Ok(())
}
