//! kuberecovery operator - captures deleted cluster resources as Snapshots

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use kuberecovery::controller::{policy, snapshot};
use kuberecovery::crd::{RecoveryPolicy, Snapshot};
use kuberecovery::discovery::{ClusterResolver, ResourceResolver};
use kuberecovery::pool::WatcherPool;
use kuberecovery::telemetry;

/// kuberecovery - undelete layer for arbitrary Kubernetes resources
#[derive(Parser, Debug)]
#[command(name = "kuberecovery", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let policy_crd = serde_yaml::to_string(&RecoveryPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize RecoveryPolicy CRD: {}", e))?;
        let snapshot_crd = serde_yaml::to_string(&Snapshot::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize Snapshot CRD: {}", e))?;
        println!("{policy_crd}---\n{snapshot_crd}");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    run_controllers().await
}

/// Ensure both kuberecovery CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("kuberecovery").force();

    tracing::info!("Installing RecoveryPolicy CRD...");
    crds.patch(
        "recoverypolicies.kuberecovery.freepik.com",
        &params,
        &Patch::Apply(&RecoveryPolicy::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install RecoveryPolicy CRD: {}", e))?;

    tracing::info!("Installing Snapshot CRD...");
    crds.patch(
        "snapshots.kuberecovery.freepik.com",
        &params,
        &Patch::Apply(&Snapshot::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Snapshot CRD: {}", e))?;

    tracing::info!("All kuberecovery CRDs installed/updated");
    Ok(())
}

/// Run both controllers until shutdown
///
/// The policy controller rebuilds the watcher pool from scratch on startup:
/// the initial list of RecoveryPolicy objects reconciles each policy, which
/// spawns its capture pipelines. Deletions that happened while the operator
/// was down are not recovered.
async fn run_controllers() -> anyhow::Result<()> {
    tracing::info!("kuberecovery controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let pool = Arc::new(WatcherPool::default());
    let resolver: Arc<dyn ResourceResolver> = Arc::new(ClusterResolver::new(client.clone()));

    let policy_ctx = Arc::new(policy::Context::new(
        client.clone(),
        resolver.clone(),
        pool.clone(),
    ));
    let snapshot_ctx = Arc::new(snapshot::Context::new(client.clone(), resolver));

    let policies: Api<RecoveryPolicy> = Api::all(client.clone());
    let snapshots: Api<Snapshot> = Api::all(client);

    tracing::info!("Starting kuberecovery controllers...");
    tracing::info!("- RecoveryPolicy controller");
    tracing::info!("- Snapshot controller");

    let policy_controller = Controller::new(policies, WatcherConfig::default())
        .shutdown_on_signal()
        .run(policy::reconcile, policy::error_policy, policy_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Policy reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Policy reconciliation error"),
            }
        });

    let snapshot_controller = Controller::new(snapshots, WatcherConfig::default())
        .shutdown_on_signal()
        .run(snapshot::reconcile, snapshot::error_policy, snapshot_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Snapshot reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Snapshot reconciliation error"),
            }
        });

    tokio::select! {
        _ = policy_controller => tracing::info!("Policy controller completed"),
        _ = snapshot_controller => tracing::info!("Snapshot controller completed"),
    }

    tracing::info!("kuberecovery controller shutting down");
    Ok(())
}
