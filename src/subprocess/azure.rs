use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::ProcessRunner;

/// Thin wrapper over the `az` CLI. Every Azure management-plane operation
/// goes through here: argv in, combined stdout+stderr text out.
///
/// When a subscription is set, `--subscription <id>` is appended to every
/// non-interactive call so commands always target the configured
/// subscription regardless of the user's `az` default.
pub struct AzureCli {
    runner: Arc<dyn ProcessRunner>,
    subscription: Option<String>,
}

fn command_display(args: &[String]) -> String {
    format!("az {}", args.join(" "))
}

impl AzureCli {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            subscription: None,
        }
    }

    pub fn with_subscription(runner: Arc<dyn ProcessRunner>, subscription: &str) -> Self {
        Self {
            runner,
            subscription: Some(subscription.to_string()),
        }
    }

    fn scoped_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(sub) = &self.subscription {
            full.push("--subscription".to_string());
            full.push(sub.clone());
        }
        full
    }

    /// Run a scoped `az` command, returning the combined output on success.
    pub async fn run(&self, args: &[&str]) -> Result<String, ProcessError> {
        let full_args = self.scoped_args(args);
        let cmd_display = command_display(&full_args);
        tracing::info!("Executing command: {}", cmd_display);

        let output = self
            .runner
            .run(ProcessCommandBuilder::new("az").args(&full_args).build())
            .await?;

        output.require_success(&cmd_display)
    }

    /// Run a scoped `az` command requesting a single field as tab-separated
    /// output (`--query <q> --output tsv`), trimmed.
    pub async fn query_tsv(&self, args: &[&str], query: &str) -> Result<String, ProcessError> {
        let mut full_args = self.scoped_args(args);
        full_args.extend(
            ["--query", query, "--output", "tsv"]
                .iter()
                .map(|s| s.to_string()),
        );
        let cmd_display = command_display(&full_args);
        tracing::info!("Executing command: {}", cmd_display);

        let output = self
            .runner
            .run(ProcessCommandBuilder::new("az").args(&full_args).build())
            .await?;

        Ok(output.require_success(&cmd_display)?.trim().to_string())
    }

    /// Run an `az` command with inherited stdio. Only `az login` needs this;
    /// its device-code prompt must reach the terminal.
    pub async fn run_interactive(&self, args: &[&str]) -> Result<(), ProcessError> {
        let full_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let cmd_display = command_display(&full_args);

        let output = self
            .runner
            .run(
                ProcessCommandBuilder::new("az")
                    .args(&full_args)
                    .interactive()
                    .build(),
            )
            .await?;

        output.require_success(&cmd_display)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::mock::MockProcessRunner;

    #[tokio::test]
    async fn test_run_appends_subscription_scope() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args == ["account", "list", "--subscription", "sub-123"])
            .returns_success()
            .finish();

        let az = AzureCli::with_subscription(Arc::new(mock), "sub-123");
        az.run(&["account", "list"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_without_subscription_leaves_args_untouched() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| args == ["logout"])
            .returns_success()
            .finish();

        let az = AzureCli::new(Arc::new(mock));
        az.run(&["logout"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_tsv_appends_query_and_trims() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .with_args(|args| {
                args == [
                    "account",
                    "show",
                    "--query",
                    "id",
                    "--output",
                    "tsv",
                ]
            })
            .returns_stdout("  sub-abc \n")
            .finish();

        let az = AzureCli::new(Arc::new(mock));
        let id = az.query_tsv(&["account", "show"], "id").await.unwrap();
        assert_eq!(id, "sub-abc");
    }

    #[tokio::test]
    async fn test_failure_carries_combined_output() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("az")
            .returns_stdout("partial")
            .returns_stderr("ERROR: resource not found")
            .returns_exit_code(3)
            .finish();

        let az = AzureCli::new(Arc::new(mock));
        let err = az.run(&["aks", "show"]).await.unwrap_err();
        match err {
            ProcessError::CommandFailed { code, output, .. } => {
                assert_eq!(code, 3);
                assert!(output.contains("partial"));
                assert!(output.contains("ERROR: resource not found"));
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }
}
