//! Role binding: grant a managed identity data-plane access to an Azure
//! resource. CosmosDB is the one supported target.

use anyhow::{Context, Result};

use crate::subprocess::{AzureCli, SubprocessManager};

/// Built-in Cosmos DB SQL role: Data Contributor. The role-assignment call
/// breaks silently with the wrong GUID, so this value must match Azure's
/// fixed definition exactly.
const COSMOSDB_DATA_CONTRIBUTOR_ROLE: &str = "00000000-0000-0000-0000-000000000002";

pub struct CosmosDbService {
    azure: AzureCli,
    subscription: String,
}

/// The identity is always named explicitly here; falling back to the
/// configured identity is the CLI layer's convenience, not this service's.
pub struct BindRequest<'a> {
    pub identity_name: &'a str,
    pub identity_resource_group: &'a str,
    pub account_name: &'a str,
    pub account_resource_group: &'a str,
}

impl CosmosDbService {
    pub fn new(subprocess: &SubprocessManager, subscription: &str) -> Self {
        Self {
            azure: subprocess.azure_for_subscription(subscription),
            subscription: subscription.to_string(),
        }
    }

    /// Assign the Data Contributor role on a CosmosDB account to a managed
    /// identity, scoped to that account's ARM resource ID.
    pub async fn bind(&self, request: &BindRequest<'_>) -> Result<()> {
        self.validate_account(request.account_name, request.account_resource_group)
            .await?;

        let principal_id = self
            .identity_principal_id(request.identity_name, request.identity_resource_group)
            .await?;

        self.assign_role(&principal_id, request.account_name, request.account_resource_group)
            .await?;

        println!(
            "Successfully bound CosmosDB '{}' to identity '{}'",
            request.account_name, request.identity_name
        );

        // Best-effort display of the first database/container; any failure
        // here only omits the line.
        if let Ok(Some((database, container))) = self
            .first_database_and_container(request.account_name, request.account_resource_group)
            .await
        {
            println!("CosmosDB Database: {database}, Container: {container}");
        }

        Ok(())
    }

    /// Two-step existence check: the name must resolve at all, and the
    /// account must live in the given resource group.
    async fn validate_account(&self, name: &str, resource_group: &str) -> Result<()> {
        self.azure
            .run(&["cosmosdb", "check-name-exists", "--name", name])
            .await
            .context("failed to check if CosmosDB exists")?;

        self.azure
            .run(&[
                "cosmosdb",
                "show",
                "--name",
                name,
                "--resource-group",
                resource_group,
            ])
            .await
            .with_context(|| {
                format!("CosmosDB '{name}' not found in resource group '{resource_group}'")
            })?;

        Ok(())
    }

    async fn identity_principal_id(&self, name: &str, resource_group: &str) -> Result<String> {
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
                "principalId",
            )
            .await
            .context("failed to get identity principal ID")
    }

    async fn account_resource_id(&self, name: &str, resource_group: &str) -> Result<String> {
        self.azure
            .query_tsv(
                &[
                    "cosmosdb",
                    "show",
                    "--name",
                    name,
                    "--resource-group",
                    resource_group,
                ],
                "id",
            )
            .await
            .context("failed to get CosmosDB resource ID")
    }

    async fn assign_role(
        &self,
        principal_id: &str,
        account_name: &str,
        resource_group: &str,
    ) -> Result<()> {
        let scope = self.account_resource_id(account_name, resource_group).await?;
        let role_definition_id = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DocumentDB/databaseAccounts/{}/sqlRoleDefinitions/{}",
            self.subscription, resource_group, account_name, COSMOSDB_DATA_CONTRIBUTOR_ROLE
        );

        self.azure
            .run(&[
                "cosmosdb",
                "sql",
                "role",
                "assignment",
                "create",
                "--account-name",
                account_name,
                "--resource-group",
                resource_group,
                "--role-definition-id",
                &role_definition_id,
                "--principal-id",
                principal_id,
                "--scope",
                &scope,
            ])
            .await
            .context("failed to assign role to CosmosDB")?;
        Ok(())
    }

    async fn first_database_and_container(
        &self,
        account_name: &str,
        resource_group: &str,
    ) -> Result<Option<(String, String)>> {
        let database = self
            .azure
            .query_tsv(
                &[
                    "cosmosdb",
                    "sql",
                    "database",
                    "list",
                    "--account-name",
                    account_name,
                    "--resource-group",
                    resource_group,
                ],
                "[0].name",
            )
            .await?;
        if database.is_empty() {
            return Ok(None);
        }

        let container = self
            .azure
            .query_tsv(
                &[
                    "cosmosdb",
                    "sql",
                    "container",
                    "list",
                    "--account-name",
                    account_name,
                    "--database-name",
                    &database,
                    "--resource-group",
                    resource_group,
                ],
                "[0].name",
            )
            .await?;
        if container.is_empty() {
            return Ok(None);
        }

        Ok(Some((database, container)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::{MockProcessRunner, SubprocessManager};
    use std::sync::Arc;

    fn service(mock: MockProcessRunner) -> CosmosDbService {
        let subprocess = SubprocessManager::new(Arc::new(mock));
        CosmosDbService::new(&subprocess, "sub-1")
    }

    fn request() -> BindRequest<'static> {
        BindRequest {
            identity_name: "my-identity",
            identity_resource_group: "identity-rg",
            account_name: "my-cosmos",
            account_resource_group: "cosmos-rg",
        }
    }

    fn arg_pair(args: &[String], pair: [&str; 2]) -> bool {
        args.windows(2).any(|w| w == pair)
    }

    #[tokio::test]
    async fn test_bind_assigns_fixed_role_definition() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args[1] == "check-name-exists")
            .returns_success()
            .finish();
        mock.expect_command("az")
            .with_args(|args| args[1] == "show" && !args.contains(&"--query".to_string()))
            .returns_success()
            .finish();
        mock.expect_command("az")
            .with_args(|args| args.first().map(String::as_str) == Some("identity"))
            .returns_stdout("principal-123\n")
            .finish();
        mock.expect_command("az")
            .with_args(|args| {
                args[1] == "show" && arg_pair(args, ["--query", "id"])
            })
            .returns_stdout("/subscriptions/sub-1/resourceGroups/cosmos-rg/providers/Microsoft.DocumentDB/databaseAccounts/my-cosmos\n")
            .finish();
        mock.expect_command("az")
            .with_args(|args| {
                args.starts_with(&[
                    "cosmosdb".to_string(),
                    "sql".to_string(),
                    "role".to_string(),
                    "assignment".to_string(),
                    "create".to_string(),
                ]) && arg_pair(
                    args,
                    [
                        "--role-definition-id",
                        "/subscriptions/sub-1/resourceGroups/cosmos-rg/providers/Microsoft.DocumentDB/databaseAccounts/my-cosmos/sqlRoleDefinitions/00000000-0000-0000-0000-000000000002",
                    ],
                ) && arg_pair(args, ["--principal-id", "principal-123"])
            })
            .returns_success()
            .finish();
        // Display lookups fail; the bind must still succeed.
        mock.expect_command("az")
            .returns_exit_code(1)
            .finish();

        let service = service(mock);
        service.bind(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_when_account_missing() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args[1] == "check-name-exists")
            .returns_success()
            .finish();
        mock.expect_command("az")
            .with_args(|args| args[1] == "show")
            .returns_stderr("ERROR: Resource group 'cosmos-rg' could not be found.")
            .returns_exit_code(3)
            .finish();

        let service = service(mock.clone());
        let err = service.bind(&request()).await.unwrap_err();

        assert!(format!("{err:#}")
            .contains("CosmosDB 'my-cosmos' not found in resource group 'cosmos-rg'"));
        // Validation failed, so no role assignment was attempted.
        assert!(mock.verify_called("az", 2));
    }

    #[tokio::test]
    async fn test_bind_reports_database_and_container_when_available() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args[1] == "check-name-exists")
            .returns_success()
            .finish();
        mock.expect_command("az")
            .with_args(|args| args.first().map(String::as_str) == Some("identity"))
            .returns_stdout("principal-123\n")
            .finish();
        mock.expect_command("az")
            .with_args(|args| args[1] == "sql" && args[2] == "database")
            .returns_stdout("orders-db\n")
            .finish();
        mock.expect_command("az")
            .with_args(|args| args[1] == "sql" && args[2] == "container")
            .returns_stdout("orders\n")
            .finish();
        // Remaining az calls (show, role assignment) succeed generically.
        mock.expect_command("az").returns_success().finish();

        let service = service(mock);
        service.bind(&request()).await.unwrap();
    }
}
