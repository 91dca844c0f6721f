//! Identity & federation: Azure managed identities, Kubernetes service
//! accounts, and the federated OIDC credentials linking them.
//!
//! Federation binds a Kubernetes service-account token to an Azure AD
//! application through OIDC trust, so workloads authenticate without any
//! stored secret.

use anyhow::{Context, Result};
use std::io::Write;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::subprocess::{AzureCli, Kubectl, SubprocessManager};

/// Service accounts and federation subjects always live in this namespace.
pub const NAMESPACE: &str = "default";

const FEDERATED_AUDIENCE: &str = "api://AzureADTokenExchange";

pub struct IdentityService {
    azure: AzureCli,
    kubectl: Kubectl,
}

/// The federation subject for a service account: what the cluster puts in
/// the token, and what the Azure-side credential must match exactly.
fn federated_subject(namespace: &str, identity_name: &str) -> String {
    format!("system:serviceaccount:{namespace}:{identity_name}")
}

fn service_account_manifest(name: &str, namespace: &str, client_id: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: {name}
  namespace: {namespace}
  annotations:
    azure.workload.identity/client-id: {client_id}
"#
    )
}

impl IdentityService {
    pub fn new(subprocess: &SubprocessManager, subscription: &str) -> Self {
        Self {
            azure: subprocess.azure_for_subscription(subscription),
            kubectl: subprocess.kubectl(),
        }
    }

    /// Create a managed identity and optionally wire it to the selected
    /// cluster with a service account and federated credential. The identity
    /// name is persisted in the config only after everything succeeded.
    pub async fn create_identity(
        &self,
        cfg: &mut Config,
        name: &str,
        resource_group: &str,
        create_service_account: bool,
    ) -> Result<()> {
        if create_service_account {
            cfg.require_cluster()?;
        }

        println!("Creating managed identity '{name}'...");
        self.azure
            .run(&[
                "identity",
                "create",
                "--name",
                name,
                "--resource-group",
                resource_group,
            ])
            .await
            .context("failed to create managed identity")?;

        let client_id = self.client_id(name, resource_group).await?;

        if create_service_account {
            println!("Creating Kubernetes service account for identity '{name}'...");
            self.create_service_account(cfg, name).await?;

            println!("Creating federated credential for identity '{name}'...");
            self.create_federated_credential(name, &cfg.cluster_name, resource_group)
                .await?;
        }

        cfg.identity_name = name.to_string();
        println!("Created managed identity '{name}' with client ID '{client_id}'");
        Ok(())
    }

    /// Select an existing identity: verify it resolves, optionally create
    /// the service account and federation, then record it.
    pub async fn use_identity(
        &self,
        cfg: &mut Config,
        name: &str,
        resource_group: &str,
        create_service_account: bool,
    ) -> Result<()> {
        if create_service_account {
            cfg.require_cluster()?;
        }

        let client_id = self
            .client_id(name, resource_group)
            .await
            .with_context(|| format!("failed to find managed identity '{name}'"))?;

        if create_service_account {
            println!("Creating Kubernetes service account for identity '{name}'...");
            self.create_service_account(cfg, name).await?;

            println!("Creating federated credential for identity '{name}'...");
            self.create_federated_credential(name, &cfg.cluster_name, resource_group)
                .await?;
        }

        cfg.identity_name = name.to_string();
        println!("Now using identity '{name}' with client ID '{client_id}'");
        Ok(())
    }

    /// Create the Kubernetes service account carrying the identity's client
    /// ID annotation. Idempotent: if the service account already exists in
    /// the fixed namespace, this succeeds without touching it.
    pub async fn create_service_account(&self, cfg: &Config, identity_name: &str) -> Result<()> {
        cfg.require_cluster()?;

        println!("Setting up kubectl with cluster credentials...");
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

        let client_id = self.client_id(identity_name, &cfg.resource_group).await?;

        println!("Checking if service account '{identity_name}' exists...");
        if self
            .kubectl
            .service_account_exists(identity_name, NAMESPACE)
            .await
            .context("failed to check if service account exists")?
        {
            println!("Service account '{identity_name}' already exists in namespace '{NAMESPACE}'");
            return Ok(());
        }

        let manifest = service_account_manifest(identity_name, NAMESPACE, &client_id);

        // NamedTempFile removes itself on all exit paths, including errors.
        let mut temp = NamedTempFile::new().context("failed to create temp file")?;
        temp.write_all(manifest.as_bytes())
            .context("failed to write service account manifest")?;
        temp.flush().context("failed to flush service account manifest")?;

        println!("Creating service account '{identity_name}'...");
        self.kubectl
            .apply_file(temp.path())
            .await
            .context("failed to create service account")?;

        println!("Created service account '{identity_name}' in namespace '{NAMESPACE}'");
        Ok(())
    }

    /// Create the Azure-side record of the OIDC trust: issuer from the
    /// cluster, subject derived from the service account, fixed audience.
    pub async fn create_federated_credential(
        &self,
        identity_name: &str,
        cluster_name: &str,
        resource_group: &str,
    ) -> Result<()> {
        let issuer = self
            .oidc_issuer_url(cluster_name, resource_group)
            .await
            .context("failed to get cluster OIDC issuer URL")?;

        let subject = federated_subject(NAMESPACE, identity_name);
        let credential_name = format!("{identity_name}-federated-credential");

        println!("Creating federated identity credential '{credential_name}'...");
        self.azure
            .run(&[
                "identity",
                "federated-credential",
                "create",
                "--name",
                &credential_name,
                "--identity-name",
                identity_name,
                "--resource-group",
                resource_group,
                "--issuer",
                &issuer,
                "--subject",
                &subject,
                "--audiences",
                FEDERATED_AUDIENCE,
            ])
            .await
            .context("failed to create federated identity credential")?;
        Ok(())
    }

    pub async fn client_id(&self, name: &str, resource_group: &str) -> Result<String> {
        self.azure
            .query_tsv(
                &[
                    "identity",
                    "show",
                    "--name",
                    name,
                    "--resource-group",
                    resource_group,
                ],
                "clientId",
            )
            .await
            .context("failed to get identity client ID")
    }

    async fn oidc_issuer_url(&self, cluster_name: &str, resource_group: &str) -> Result<String> {
        self.azure
            .query_tsv(
                &[
                    "aks",
                    "show",
                    "--name",
                    cluster_name,
                    "--resource-group",
                    resource_group,
                ],
                "oidcIssuerProfile.issuerUrl",
            )
            .await
            .map_err(Into::into)
    }
}
