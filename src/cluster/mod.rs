//! Cluster provisioning pipeline: create or select an AKS cluster, manage
//! its workload-identity feature flags, and install the Spin Operator stack.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::config::Config;
use crate::subprocess::{AzureCli, ChartInstall, Helm, Kubectl, SubprocessManager};

const SPIN_OPERATOR_VERSION: &str = "0.4.0";
const SPIN_OPERATOR_RELEASES: &str =
    "https://github.com/spinkube/spin-operator/releases/download/v0.4.0";
const CERT_MANAGER_VERSION: &str = "v1.14.3";
const CERT_MANAGER_CRDS_URL: &str =
    "https://github.com/cert-manager/cert-manager/releases/download/v1.14.3/cert-manager.crds.yaml";
const KWASM_REPO_URL: &str = "http://kwasm.sh/kwasm-operator/";
const KWASM_INSTALLER_IMAGE: &str =
    "ghcr.io/spinkube/containerd-shim-spin/node-installer:v0.18.0";
const KWASM_NODE_ANNOTATION: &str = "kwasm.sh/kwasm-node=true";

pub const DEFAULT_LOCATION: &str = "eastus";
pub const DEFAULT_NODE_COUNT: u32 = 1;
pub const DEFAULT_NODE_VM_SIZE: &str = "Standard_DS2_v2";

/// Everything `az aks create` needs. `passthrough` is an ordered list of
/// opaque strings forwarded verbatim to the external CLI, with no name/value
/// interpretation on our side.
pub struct CreateClusterRequest {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub node_count: u32,
    pub node_vm_size: String,
    pub passthrough: Vec<String>,
}

pub struct ClusterService {
    azure: AzureCli,
    kubectl: Kubectl,
    helm: Helm,
    node_init_wait: Duration,
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

impl ClusterService {
    pub fn new(subprocess: &SubprocessManager, subscription: &str) -> Self {
        Self {
            azure: subprocess.azure_for_subscription(subscription),
            kubectl: subprocess.kubectl(),
            helm: subprocess.helm(),
            node_init_wait: Duration::from_secs(30),
        }
    }

    /// Shorten the post-annotation wait. The production default is 30s for
    /// KWasm node provisioning; tests drop it to zero.
    pub fn with_node_init_wait(mut self, wait: Duration) -> Self {
        self.node_init_wait = wait;
        self
    }

    /// Create an AKS cluster with the OIDC issuer and workload identity
    /// enabled. The config is only updated after the external command
    /// confirms success; a failure leaves it untouched.
    pub async fn create_cluster(
        &self,
        cfg: &mut Config,
        request: &CreateClusterRequest,
    ) -> Result<()> {
        let node_count = request.node_count.to_string();
        let dns_prefix = format!("{}-wid", request.name);
        let mut args: Vec<&str> = vec![
            "aks",
            "create",
            "--resource-group",
            &request.resource_group,
            "--name",
            &request.name,
            "--location",
            &request.location,
            "--enable-oidc-issuer",
            "--enable-workload-identity",
            "--generate-ssh-keys",
            "--node-count",
            &node_count,
            "--node-vm-size",
            &request.node_vm_size,
            "--dns-name-prefix",
            &dns_prefix,
        ];
        args.extend(request.passthrough.iter().map(String::as_str));

        let bar = spinner("Creating AKS cluster...");
        let result = self.azure.run(&args).await;
        bar.finish_with_message("Creating AKS cluster... done");
        result.context("failed to create AKS cluster")?;

        cfg.cluster_name = request.name.clone();
        cfg.resource_group = request.resource_group.clone();
        Ok(())
    }

    /// Select an existing cluster: verify it exists, then record it exactly
    /// as create does. No provisioning occurs.
    pub async fn use_cluster(
        &self,
        cfg: &mut Config,
        resource_group: &str,
        name: &str,
    ) -> Result<()> {
        self.azure
            .run(&["aks", "show", "--resource-group", resource_group, "--name", name])
            .await
            .with_context(|| format!("failed to find AKS cluster '{name}'"))?;

        cfg.cluster_name = name.to_string();
        cfg.resource_group = resource_group.to_string();
        Ok(())
    }

    /// Read the workload-identity feature flag from the selected cluster.
    pub async fn workload_identity_enabled(&self, cfg: &Config) -> Result<bool> {
        cfg.require_cluster()?;

        let value = self
            .azure
            .query_tsv(
                &[
                    "aks",
                    "show",
                    "--resource-group",
                    &cfg.resource_group,
                    "--name",
                    &cfg.cluster_name,
                ],
                "securityProfile.workloadIdentity.enabled",
            )
            .await
            .context("failed to check workload identity")?;

        Ok(value == "true")
    }

    /// Re-issue the update with the same feature flags used at creation
    /// time. Enabling an already-enabled feature is a no-op at the Azure
    /// layer, so this is safe to call unconditionally.
    pub async fn enable_workload_identity(&self, cfg: &Config) -> Result<()> {
        cfg.require_cluster()?;

        self.azure
            .run(&[
                "aks",
                "update",
                "--resource-group",
                &cfg.resource_group,
                "--name",
                &cfg.cluster_name,
                "--enable-oidc-issuer",
                "--enable-workload-identity",
            ])
            .await
            .context("failed to enable workload identity")?;
        Ok(())
    }

    /// Point kubectl at the selected cluster.
    pub async fn fetch_credentials(&self, cfg: &Config) -> Result<()> {
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
        Ok(())
    }

    /// Install the Spin Operator and its dependencies on the selected
    /// cluster: a fixed, non-retrying sequence. Each step relies on the
    /// external tool's own apply semantics for idempotency; a failure aborts
    /// the remainder and nothing already applied is rolled back.
    pub async fn deploy_spin_operator(&self, cfg: &Config) -> Result<()> {
        cfg.require_cluster()?;

        println!("Setting up kubectl with cluster credentials...");
        self.fetch_credentials(cfg).await?;

        println!("Installing Spin Operator Custom Resource Definitions...");
        self.kubectl
            .apply_url(&format!("{SPIN_OPERATOR_RELEASES}/spin-operator.crds.yaml"))
            .await
            .context("failed to install Spin Operator CRDs")?;

        println!("Installing Spin Operator Runtime Class...");
        self.kubectl
            .apply_url(&format!(
                "{SPIN_OPERATOR_RELEASES}/spin-operator.runtime-class.yaml"
            ))
            .await
            .context("failed to install Spin Operator runtime class")?;

        println!("Installing cert-manager CRDs...");
        self.kubectl
            .apply_url(CERT_MANAGER_CRDS_URL)
            .await
            .context("failed to install cert-manager CRDs")?;

        println!("Adding Jetstack Helm repository...");
        self.helm
            .repo_add("jetstack", "https://charts.jetstack.io")
            .await
            .context("failed to add Jetstack Helm repository")?;

        println!("Updating Helm repositories...");
        self.helm
            .repo_update()
            .await
            .context("failed to update Helm repositories")?;

        println!("Installing cert-manager...");
        self.helm
            .install(&ChartInstall {
                release: "cert-manager",
                chart: "jetstack/cert-manager",
                namespace: "cert-manager",
                version: Some(CERT_MANAGER_VERSION),
                set: &[],
                wait: false,
            })
            .await
            .context("failed to install cert-manager")?;

        println!("Adding KWasm Helm repository...");
        self.helm
            .repo_add("kwasm", KWASM_REPO_URL)
            .await
            .context("failed to add KWasm Helm repository")?;

        println!("Installing KWasm operator...");
        self.helm
            .install(&ChartInstall {
                release: "kwasm-operator",
                chart: "kwasm/kwasm-operator",
                namespace: "kwasm",
                version: None,
                set: &[("kwasmOperator.installerImage", KWASM_INSTALLER_IMAGE)],
                wait: false,
            })
            .await
            .context("failed to install KWasm operator")?;

        println!("Provisioning nodes with KWasm...");
        self.kubectl
            .annotate_all_nodes(KWASM_NODE_ANNOTATION)
            .await
            .context("failed to annotate nodes for KWasm")?;

        println!("Waiting for KWasm operator to initialize nodes...");
        tokio::time::sleep(self.node_init_wait).await;

        println!("Installing Spin Operator...");
        self.helm
            .install(&ChartInstall {
                release: "spin-operator",
                chart: "oci://ghcr.io/spinkube/charts/spin-operator",
                namespace: "spin-operator",
                version: Some(SPIN_OPERATOR_VERSION),
                set: &[],
                wait: true,
            })
            .await
            .context("failed to install Spin Operator")?;

        println!("Applying shim executor configuration...");
        self.kubectl
            .apply_url(&format!(
                "{SPIN_OPERATOR_RELEASES}/spin-operator.shim-executor.yaml"
            ))
            .await
            .context("failed to apply shim executor configuration")?;

        println!("Spin Operator has been successfully deployed to the cluster!");
        Ok(())
    }
}
