pub mod azure;
pub mod builder;
pub mod error;
pub mod helm;
pub mod kube;
pub mod mock;
pub mod runner;

pub use azure::AzureCli;
pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use helm::{ChartInstall, Helm};
pub use kube::Kubectl;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    /// An `az` wrapper without subscription scoping, for login/logout where
    /// no subscription is configured yet.
    pub fn azure(&self) -> AzureCli {
        AzureCli::new(Arc::clone(&self.runner))
    }

    /// An `az` wrapper that scopes every call to the given subscription.
    pub fn azure_for_subscription(&self, subscription: &str) -> AzureCli {
        AzureCli::with_subscription(Arc::clone(&self.runner), subscription)
    }

    pub fn kubectl(&self) -> Kubectl {
        Kubectl::new(Arc::clone(&self.runner))
    }

    pub fn helm(&self) -> Helm {
        Helm::new(Arc::clone(&self.runner))
    }
}
