use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::ProcessRunner;

/// Thin wrapper over the `helm` CLI for repository registration and chart
/// installation during operator setup.
pub struct Helm {
    runner: Arc<dyn ProcessRunner>,
}

/// A single chart installation. Field order mirrors the emitted argv.
pub struct ChartInstall<'a> {
    pub release: &'a str,
    pub chart: &'a str,
    pub namespace: &'a str,
    pub version: Option<&'a str>,
    pub set: &'a [(&'a str, &'a str)],
    pub wait: bool,
}

impl ChartInstall<'_> {
    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            self.release.to_string(),
            self.chart.to_string(),
            "--namespace".to_string(),
            self.namespace.to_string(),
            "--create-namespace".to_string(),
        ];
        if let Some(version) = self.version {
            args.push("--version".to_string());
            args.push(version.to_string());
        }
        for (key, value) in self.set {
            args.push("--set".to_string());
            args.push(format!("{key}={value}"));
        }
        if self.wait {
            args.push("--wait".to_string());
        }
        args
    }
}

impl Helm {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, args: &[String]) -> Result<String, ProcessError> {
        let cmd_display = format!("helm {}", args.join(" "));
        tracing::info!("Executing command: {}", cmd_display);

        let output = self
            .runner
            .run(ProcessCommandBuilder::new("helm").args(args).build())
            .await?;

        output.require_success(&cmd_display)
    }

    pub async fn repo_add(&self, name: &str, url: &str) -> Result<(), ProcessError> {
        self.run(&[
            "repo".to_string(),
            "add".to_string(),
            name.to_string(),
            url.to_string(),
        ])
        .await?;
        Ok(())
    }

    pub async fn repo_update(&self) -> Result<(), ProcessError> {
        self.run(&["repo".to_string(), "update".to_string()])
            .await?;
        Ok(())
    }

    pub async fn install(&self, chart: &ChartInstall<'_>) -> Result<(), ProcessError> {
        self.run(&chart.to_args()).await?;
        Ok(())
    }
}
