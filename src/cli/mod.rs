//! Command-line surface and handlers. Each handler loads the config once,
//! threads it through the services explicitly, and saves it only after the
//! operation confirmed success.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;

use crate::bind::{BindRequest, CosmosDbService};
use crate::cluster::{
    ClusterService, CreateClusterRequest, DEFAULT_LOCATION, DEFAULT_NODE_COUNT,
    DEFAULT_NODE_VM_SIZE,
};
use crate::config::{Config, ConfigStore};
use crate::deploy::DeployService;
use crate::identity::IdentityService;
use crate::subprocess::SubprocessManager;

/// Manage Spin apps on Azure Kubernetes Service (AKS)
#[derive(Parser)]
#[command(name = "spin-aks")]
#[command(about = "Manage Spin apps on AKS clusters with workload identity", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in to Azure and record the active subscription and tenant
    Login {
        /// Azure subscription ID to use
        #[arg(long)]
        subscription: Option<String>,

        /// Azure tenant ID to use
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Log out from Azure and clear saved credentials
    Logout,
    /// Manage AKS clusters for Spin applications
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Manage Azure managed identities for Spin workloads
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
    /// Assign Azure RBAC roles to managed identities
    AssignRole {
        #[command(subcommand)]
        command: AssignRoleCommands,
    },
    /// Deploy a Spin application manifest to the selected cluster
    Deploy {
        /// Path to the SpinApp YAML file
        #[arg(long)]
        from: PathBuf,

        /// Identity whose service account the app runs under
        /// (defaults to the configured identity)
        #[arg(long)]
        identity: Option<String>,
    },
    /// View and manage the persisted configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Create an AKS cluster with workload identity enabled and install the
    /// Spin Operator. Arguments after `--` are forwarded verbatim to
    /// `az aks create`.
    Create {
        /// Name of the AKS cluster
        #[arg(long)]
        name: String,

        /// Resource group for the AKS cluster
        #[arg(long)]
        resource_group: String,

        /// Azure region for the AKS cluster
        #[arg(long, default_value = DEFAULT_LOCATION)]
        location: String,

        /// Number of nodes in the AKS cluster
        #[arg(long, default_value_t = DEFAULT_NODE_COUNT)]
        node_count: u32,

        /// VM size for the AKS cluster nodes
        #[arg(long, default_value = DEFAULT_NODE_VM_SIZE)]
        node_vm_size: String,

        /// Additional arguments passed through to `az aks create` unchanged
        #[arg(last = true)]
        passthrough: Vec<String>,
    },
    /// Select an existing AKS cluster
    Use {
        /// Name of the existing AKS cluster
        #[arg(long)]
        name: String,

        /// Resource group of the cluster (defaults to the configured one)
        #[arg(long)]
        resource_group: Option<String>,

        /// Install the Spin Operator after selection
        #[arg(long)]
        install_spin_operator: bool,
    },
    /// Check that workload identity is enabled on the cluster, enabling it
    /// if necessary
    CheckIdentity,
    /// Install the Spin Operator and its dependencies on the cluster
    InstallSpinOperator,
}

#[derive(Subcommand)]
pub enum IdentityCommands {
    /// Create a managed identity with a Kubernetes service account and
    /// federated credential
    Create {
        /// Name of the identity to create
        #[arg(long, default_value = "workload-identity")]
        name: String,

        /// Resource group for the identity (defaults to the configured one)
        #[arg(long)]
        resource_group: Option<String>,

        /// Skip Kubernetes service account creation
        #[arg(long)]
        skip_service_account: bool,
    },
    /// Select an existing managed identity
    Use {
        /// Name of the identity to use
        #[arg(long)]
        name: String,

        /// Resource group containing the identity (defaults to the
        /// configured one)
        #[arg(long)]
        resource_group: Option<String>,

        /// Create a Kubernetes service account for this identity
        #[arg(long)]
        create_service_account: bool,
    },
}

#[derive(Subcommand)]
pub enum AssignRoleCommands {
    /// Grant a managed identity data-plane access to a CosmosDB account
    Cosmosdb {
        /// Name of the CosmosDB account
        #[arg(long)]
        name: String,

        /// Resource group of the CosmosDB account (defaults to the
        /// configured one)
        #[arg(long)]
        resource_group: Option<String>,

        /// Identity to bind (defaults to the configured identity)
        #[arg(long)]
        identity: Option<String>,

        /// Resource group of the identity (defaults to the configured one)
        #[arg(long)]
        identity_resource_group: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Reset the configuration to the all-empty record
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Everything a handler needs: the config store and the process layer.
/// Tests construct this with a temp directory and a mock runner.
pub struct App {
    pub store: ConfigStore,
    pub subprocess: SubprocessManager,
}

impl App {
    pub fn production() -> Result<Self> {
        Ok(Self {
            store: ConfigStore::new()?,
            subprocess: SubprocessManager::production(),
        })
    }
}

pub async fn run(command: Commands, app: &App) -> Result<()> {
    match command {
        Commands::Login {
            subscription,
            tenant,
        } => login(app, subscription, tenant).await,
        Commands::Logout => logout(app).await,
        Commands::Cluster { command } => cluster(app, command).await,
        Commands::Identity { command } => identity(app, command).await,
        Commands::AssignRole { command } => assign_role(app, command).await,
        Commands::Deploy { from, identity } => deploy(app, from, identity).await,
        Commands::Config { command } => config(app, command),
    }
}

async fn login(app: &App, subscription: Option<String>, tenant: Option<String>) -> Result<()> {
    let az = app.subprocess.azure();

    println!("Logging in to Azure...");
    az.run_interactive(&["login"])
        .await
        .context("failed to log in to Azure")?;

    let subscription_id = match subscription {
        Some(id) => {
            println!("Setting subscription to '{id}'...");
            az.run(&["account", "set", "--subscription", &id])
                .await
                .context("failed to set subscription")?;
            id
        }
        None => {
            let id = az
                .query_tsv(&["account", "show"], "id")
                .await
                .context("failed to get current subscription")?;
            println!("Using subscription: {id}");
            id
        }
    };

    let tenant_id = match tenant {
        Some(id) => {
            println!("Using tenant ID: {id}");
            id
        }
        None => {
            let id = az
                .query_tsv(&["account", "show"], "tenantId")
                .await
                .context("failed to get current tenant")?;
            println!("Using tenant ID: {id}");
            id
        }
    };

    let mut cfg = app.store.load()?;
    cfg.subscription_id = subscription_id;
    cfg.tenant_id = tenant_id;
    app.store.save(&cfg)?;

    az.run(&["account", "list", "--output", "none"])
        .await
        .context("login verification failed")?;

    println!("Successfully logged in to Azure!");
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    println!("Logging out from Azure...");
    app.subprocess
        .azure()
        .run(&["logout"])
        .await
        .context("failed to log out from Azure")?;

    let mut cfg = app.store.load()?;
    cfg.subscription_id = String::new();
    cfg.tenant_id = String::new();
    app.store.save(&cfg)?;

    println!("Successfully logged out from Azure!");
    Ok(())
}

async fn cluster(app: &App, command: ClusterCommands) -> Result<()> {
    let mut cfg = app.store.load()?;
    cfg.require_subscription()?;
    let service = ClusterService::new(&app.subprocess, &cfg.subscription_id);

    match command {
        ClusterCommands::Create {
            name,
            resource_group,
            location,
            node_count,
            node_vm_size,
            passthrough,
        } => {
            println!(
                "Creating AKS cluster '{name}' in resource group '{resource_group}' \
                 with {node_count} nodes (VM size: {node_vm_size})..."
            );
            if !passthrough.is_empty() {
                println!("Additional arguments passed to az aks create: {passthrough:?}");
            }

            service
                .create_cluster(
                    &mut cfg,
                    &CreateClusterRequest {
                        name: name.clone(),
                        resource_group,
                        location,
                        node_count,
                        node_vm_size,
                        passthrough,
                    },
                )
                .await?;
            app.store.save(&cfg)?;
            println!("AKS cluster '{name}' created successfully with workload identity enabled");

            println!("Installing Spin Operator (this may take a few minutes)...");
            service.deploy_spin_operator(&cfg).await?;
            println!("Spin Operator installed successfully");
        }
        ClusterCommands::Use {
            name,
            resource_group,
            install_spin_operator,
        } => {
            let resource_group = resolve_resource_group(resource_group, &cfg)?;
            println!("Using existing AKS cluster '{name}' in resource group '{resource_group}'...");
            service.use_cluster(&mut cfg, &resource_group, &name).await?;
            app.store.save(&cfg)?;
            println!("Now using AKS cluster '{name}'");

            if install_spin_operator {
                println!("Installing Spin Operator...");
                service.deploy_spin_operator(&cfg).await?;
                println!("Spin Operator installed successfully");
            }
        }
        ClusterCommands::CheckIdentity => {
            println!("Checking if workload identity is enabled on the cluster...");
            if service.workload_identity_enabled(&cfg).await? {
                println!("Workload identity is already enabled on the cluster");
            } else {
                println!("Workload identity is not enabled, enabling it now...");
                service.enable_workload_identity(&cfg).await?;
                println!("Workload identity has been enabled on the cluster");
            }
        }
        ClusterCommands::InstallSpinOperator => {
            println!("Installing Spin Operator on the current cluster...");
            service.deploy_spin_operator(&cfg).await?;
        }
    }
    Ok(())
}

async fn identity(app: &App, command: IdentityCommands) -> Result<()> {
    let mut cfg = app.store.load()?;
    cfg.require_subscription()?;
    let service = IdentityService::new(&app.subprocess, &cfg.subscription_id);

    match command {
        IdentityCommands::Create {
            name,
            resource_group,
            skip_service_account,
        } => {
            let resource_group = resolve_resource_group(resource_group, &cfg)?;
            service
                .create_identity(&mut cfg, &name, &resource_group, !skip_service_account)
                .await?;
            app.store.save(&cfg)?;
        }
        IdentityCommands::Use {
            name,
            resource_group,
            create_service_account,
        } => {
            let resource_group = resolve_resource_group(resource_group, &cfg)?;
            service
                .use_identity(&mut cfg, &name, &resource_group, create_service_account)
                .await?;
            app.store.save(&cfg)?;
            println!("Using identity '{name}' for Spin workloads");
        }
    }
    Ok(())
}

async fn assign_role(app: &App, command: AssignRoleCommands) -> Result<()> {
    let cfg = app.store.load()?;
    cfg.require_subscription()?;

    match command {
        AssignRoleCommands::Cosmosdb {
            name,
            resource_group,
            identity,
            identity_resource_group,
        } => {
            let resource_group = resolve_resource_group(resource_group, &cfg)?;
            let identity_name = match identity {
                Some(identity) => identity,
                None if !cfg.identity_name.is_empty() => cfg.identity_name.clone(),
                None => anyhow::bail!(
                    "no identity given and none configured, specify --identity or \
                     select one with 'spin-aks identity use' first"
                ),
            };
            let identity_resource_group =
                identity_resource_group.unwrap_or_else(|| resource_group.clone());

            println!(
                "Assigning CosmosDB Data Contributor role to identity '{identity_name}' \
                 for CosmosDB account '{name}' in resource group '{resource_group}'..."
            );
            let service = CosmosDbService::new(&app.subprocess, &cfg.subscription_id);
            service
                .bind(&BindRequest {
                    identity_name: &identity_name,
                    identity_resource_group: &identity_resource_group,
                    account_name: &name,
                    account_resource_group: &resource_group,
                })
                .await?;
            println!("Successfully assigned roles to CosmosDB '{name}'");
        }
    }
    Ok(())
}

async fn deploy(app: &App, from: PathBuf, identity: Option<String>) -> Result<()> {
    let cfg = app.store.load()?;
    cfg.require_subscription()?;

    let identity_name = match identity {
        Some(identity) => identity,
        None if !cfg.identity_name.is_empty() => cfg.identity_name.clone(),
        None => anyhow::bail!(
            "no workload identity configured, specify --identity or select one with \
             'spin-aks identity use' first"
        ),
    };

    println!(
        "Deploying Spin application from '{}' using identity '{identity_name}'...",
        from.display()
    );
    let service = DeployService::new(&app.subprocess, &cfg.subscription_id);
    service.deploy(&cfg, &from, &identity_name).await?;
    Ok(())
}

fn config(app: &App, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show { output } => {
            let cfg = app.store.load()?;
            match output {
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&cfg)
                        .context("failed to serialize config to JSON")?;
                    println!("{json}");
                }
                OutputFormat::Text => {
                    println!("Current Configuration:");
                    println!("  Subscription ID: {}", cfg.subscription_id);
                    println!("  Tenant ID: {}", cfg.tenant_id);
                    println!("  Resource Group: {}", cfg.resource_group);
                    println!("  Cluster Name: {}", cfg.cluster_name);
                    println!("  Location: {}", cfg.location);
                    println!("  Identity Name: {}", cfg.identity_name);
                }
            }
        }
        ConfigCommands::Reset { yes } => {
            if !yes && !confirm_reset()? {
                println!("Reset cancelled.");
                return Ok(());
            }
            app.store.reset()?;
            println!("Configuration has been reset to defaults.");
        }
    }
    Ok(())
}

fn confirm_reset() -> Result<bool> {
    print!("Are you sure you want to reset all configuration? This will remove all saved settings. [y/N]: ");
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    let response = response.trim();
    Ok(response.eq_ignore_ascii_case("y"))
}

fn resolve_resource_group(explicit: Option<String>, cfg: &Config) -> Result<String> {
    match explicit {
        Some(rg) => Ok(rg),
        None if !cfg.resource_group.is_empty() => Ok(cfg.resource_group.clone()),
        None => anyhow::bail!("resource group not set, please specify --resource-group"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_app(mock: crate::subprocess::MockProcessRunner) -> (App, TempDir) {
        let dir = TempDir::new().unwrap();
        let app = App {
            store: ConfigStore::with_dir(dir.path().join("cfg")).unwrap(),
            subprocess: SubprocessManager::new(Arc::new(mock)),
        };
        (app, dir)
    }

    fn logged_in_config() -> Config {
        Config {
            subscription_id: "sub-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_cli_parses_cluster_create_with_passthrough() {
        let cli = Cli::try_parse_from([
            "spin-aks",
            "cluster",
            "create",
            "--name",
            "demo",
            "--resource-group",
            "demo-rg",
            "--",
            "--kubernetes-version",
            "1.23.5",
        ])
        .unwrap();

        match cli.command {
            Commands::Cluster {
                command:
                    ClusterCommands::Create {
                        name,
                        resource_group,
                        location,
                        node_count,
                        node_vm_size,
                        passthrough,
                    },
            } => {
                assert_eq!(name, "demo");
                assert_eq!(resource_group, "demo-rg");
                assert_eq!(location, DEFAULT_LOCATION);
                assert_eq!(node_count, DEFAULT_NODE_COUNT);
                assert_eq!(node_vm_size, DEFAULT_NODE_VM_SIZE);
                assert_eq!(passthrough, vec!["--kubernetes-version", "1.23.5"]);
            }
            _ => panic!("parsed into the wrong command"),
        }
    }

    #[test]
    fn test_cli_requires_cluster_name() {
        let result = Cli::try_parse_from(["spin-aks", "cluster", "create", "--resource-group", "rg"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_assign_role_without_identity_fails_fast() {
        let mock = crate::subprocess::MockProcessRunner::new();
        let (app, _dir) = test_app(mock.clone());
        app.store.save(&logged_in_config()).unwrap();

        let err = run(
            Commands::AssignRole {
                command: AssignRoleCommands::Cosmosdb {
                    name: "my-cosmos".to_string(),
                    resource_group: Some("cosmos-rg".to_string()),
                    identity: None,
                    identity_resource_group: None,
                },
            },
            &app,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("no identity given and none configured"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cluster_commands_require_subscription() {
        let mock = crate::subprocess::MockProcessRunner::new();
        let (app, _dir) = test_app(mock.clone());

        let err = run(
            Commands::Cluster {
                command: ClusterCommands::CheckIdentity,
            },
            &app,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("subscription ID not set"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_deploy_without_configured_identity_fails_fast() {
        let mock = crate::subprocess::MockProcessRunner::new();
        let (app, _dir) = test_app(mock.clone());
        app.store.save(&logged_in_config()).unwrap();

        let err = run(
            Commands::Deploy {
                from: PathBuf::from("spinapp.yaml"),
                identity: None,
            },
            &app,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("no workload identity configured"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_logout_clears_credentials() {
        let mut mock = crate::subprocess::MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args == ["logout"])
            .returns_success()
            .finish();

        let (app, _dir) = test_app(mock);
        app.store.save(&logged_in_config()).unwrap();

        run(Commands::Logout, &app).await.unwrap();

        let cfg = app.store.load().unwrap();
        assert!(cfg.subscription_id.is_empty());
        assert!(cfg.tenant_id.is_empty());
    }

    #[tokio::test]
    async fn test_identity_use_persists_selection() {
        let mut mock = crate::subprocess::MockProcessRunner::new();
        mock.expect_command("az")
            .returns_stdout("client-abc\n")
            .finish();

        let (app, _dir) = test_app(mock);
        let mut cfg = logged_in_config();
        cfg.resource_group = "demo-rg".to_string();
        cfg.cluster_name = "demo".to_string();
        app.store.save(&cfg).unwrap();

        run(
            Commands::Identity {
                command: IdentityCommands::Use {
                    name: "my-identity".to_string(),
                    resource_group: None,
                    create_service_account: false,
                },
            },
            &app,
        )
        .await
        .unwrap();

        assert_eq!(app.store.load().unwrap().identity_name, "my-identity");
    }
}
