use std::path::Path;
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::ProcessRunner;

/// Thin wrapper over `kubectl` for the handful of cluster-side operations
/// the provisioning pipeline needs. Targets whatever cluster the current
/// kubeconfig context points at; callers fetch credentials first via
/// `az aks get-credentials`.
pub struct Kubectl {
    runner: Arc<dyn ProcessRunner>,
}

/// Parse `kubectl apply -o name` output into resource names, one per line
/// (format: `kind.group/name`).
fn parse_resource_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

impl Kubectl {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ProcessError> {
        let cmd_display = format!("kubectl {}", args.join(" "));
        tracing::info!("Executing command: {}", cmd_display);

        let output = self
            .runner
            .run(ProcessCommandBuilder::new("kubectl").args(args).build())
            .await?;

        output.require_success(&cmd_display)
    }

    pub async fn apply_url(&self, url: &str) -> Result<(), ProcessError> {
        self.run(&["apply", "-f", url]).await?;
        Ok(())
    }

    pub async fn apply_file(&self, path: &Path) -> Result<(), ProcessError> {
        self.run(&["apply", "-f", &path.to_string_lossy()]).await?;
        Ok(())
    }

    /// Client-side dry-run apply, returning the names of the resources the
    /// manifest would create without touching the cluster.
    pub async fn apply_dry_run_names(&self, path: &Path) -> Result<Vec<String>, ProcessError> {
        let output = self
            .run(&[
                "apply",
                "--dry-run=client",
                "-f",
                &path.to_string_lossy(),
                "-o",
                "name",
            ])
            .await?;
        Ok(parse_resource_names(&output))
    }

    /// Check whether a service account exists in the given namespace.
    /// `--ignore-not-found` keeps the exit code zero either way; presence is
    /// determined from the output text.
    pub async fn service_account_exists(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<bool, ProcessError> {
        let output = self
            .run(&[
                "get",
                "serviceaccount",
                name,
                "-n",
                namespace,
                "--ignore-not-found",
            ])
            .await?;
        Ok(output.contains(name))
    }

    pub async fn annotate_all_nodes(&self, annotation: &str) -> Result<(), ProcessError> {
        self.run(&["annotate", "node", "--all", annotation]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::mock::MockProcessRunner;

    #[test]
    fn test_parse_resource_names() {
        let output = "serviceaccount/my-app\nspinapp.core.spinkube.dev/my-app\n";
        let names = parse_resource_names(output);
        assert_eq!(
            names,
            vec!["serviceaccount/my-app", "spinapp.core.spinkube.dev/my-app"]
        );
    }

    #[test]
    fn test_parse_resource_names_empty() {
        assert!(parse_resource_names("").is_empty());
        assert!(parse_resource_names("\n  \n").is_empty());
    }

    #[tokio::test]
    async fn test_service_account_exists() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("kubectl")
            .with_args(|args| args.first().map(String::as_str) == Some("get"))
            .returns_stdout("NAME      SECRETS   AGE\nmy-app    0         4d\n")
            .finish();

        let kubectl = Kubectl::new(Arc::new(mock));
        assert!(kubectl
            .service_account_exists("my-app", "default")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_service_account_missing() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("kubectl")
            .returns_stdout("")
            .finish();

        let kubectl = Kubectl::new(Arc::new(mock));
        assert!(!kubectl
            .service_account_exists("my-app", "default")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_apply_dry_run_invocation() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("kubectl")
            .with_args(|args| {
                args == [
                    "apply",
                    "--dry-run=client",
                    "-f",
                    "app.yaml",
                    "-o",
                    "name",
                ]
            })
            .returns_stdout("spinapp.core.spinkube.dev/demo\n")
            .finish();

        let kubectl = Kubectl::new(Arc::new(mock));
        let names = kubectl
            .apply_dry_run_names(Path::new("app.yaml"))
            .await
            .unwrap();
        assert_eq!(names, vec!["spinapp.core.spinkube.dev/demo"]);
    }
}
