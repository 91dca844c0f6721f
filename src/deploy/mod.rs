//! Deployment dispatcher: validate a SpinApp manifest's prerequisites and
//! apply it to the selected cluster.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::identity::NAMESPACE;
use crate::subprocess::{AzureCli, Kubectl, SubprocessManager};

pub struct DeployService {
    azure: AzureCli,
    kubectl: Kubectl,
}

/// Pick the SpinApp's name out of `kubectl apply -o name` output
/// (`kind.group/name` lines). Display only; the real apply does not depend
/// on it.
fn find_spin_app_name(resource_names: &[String]) -> Option<String> {
    resource_names
        .iter()
        .find(|name| name.contains("spinapp"))
        .and_then(|name| name.split('/').nth(1))
        .map(|name| name.to_string())
}

impl DeployService {
    pub fn new(subprocess: &SubprocessManager, subscription: &str) -> Self {
        Self {
            azure: subprocess.azure_for_subscription(subscription),
            kubectl: subprocess.kubectl(),
        }
    }

    /// Apply a SpinApp manifest. Preconditions fail fast with no external
    /// call: a cluster must be selected and the manifest must exist on disk.
    /// The service account must already exist in the cluster; it is
    /// checked here, never created.
    pub async fn deploy(
        &self,
        cfg: &Config,
        manifest_path: &Path,
        identity_name: &str,
    ) -> Result<()> {
        cfg.require_cluster()?;

        if !manifest_path.exists() {
            anyhow::bail!(
                "SpinApp manifest not found at {}",
                manifest_path.display()
            );
        }

        self.azure
            .run(&[
                "aks",
                "get-credentials",
                "--name",
                &cfg.cluster_name,
                "--resource-group",
                &cfg.resource_group,
                "--overwrite-existing",
            ])
            .await
            .context("failed to get Kubernetes credentials")?;

        if !self
            .kubectl
            .service_account_exists(identity_name, NAMESPACE)
            .await
            .context("failed to check if service account exists")?
        {
            anyhow::bail!(
                "service account '{identity_name}' not found in namespace '{NAMESPACE}', \
                 create it with 'spin-aks identity use --name {identity_name} --create-service-account'"
            );
        }

        let resource_names = self
            .kubectl
            .apply_dry_run_names(manifest_path)
            .await
            .context("failed to parse manifest")?;

        match find_spin_app_name(&resource_names) {
            Some(name) => println!("Deploying SpinApp '{name}'"),
            None => println!("Deploying SpinApp resources"),
        }

        self.kubectl
            .apply_file(manifest_path)
            .await
            .context("failed to apply SpinApp manifest")?;

        println!(
            "Successfully deployed Spin application from '{}' with identity '{}'",
            manifest_path.display(),
            identity_name
        );
        Ok(())
    }
}
