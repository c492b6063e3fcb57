use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dk_types::{DockyardError, RegistryLogin, Result};
use tracing::debug;

use super::RegistryTokenProvider;
use crate::process::{run_captured, ProcessRunner, ProcessSpec};

/// Username ECR issues its tokens for.
pub const ECR_USERNAME: &str = "AWS";

/// Token exchange through `aws ecr get-login-password`.
pub struct AwsCliTokenProvider {
    runner: Arc<dyn ProcessRunner>,
    aws_binary: String,
    timeout: Duration,
}

impl AwsCliTokenProvider {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            aws_binary: "aws".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.aws_binary = binary.into();
        self
    }
}

#[async_trait]
impl RegistryTokenProvider for AwsCliTokenProvider {
    async fn login(&self, region: &str, account_id: &str, server: &str) -> Result<RegistryLogin> {
        debug!(region, account_id, "Requesting ECR token");
        let spec = ProcessSpec::new(&self.aws_binary)
            .args(["ecr", "get-login-password", "--region", region])
            .timeout(self.timeout);
        let out = run_captured(self.runner.as_ref(), &spec).await?;
        let password = out.stdout.trim();
        if !out.success() || password.is_empty() {
            return Err(DockyardError::LoginFailed(format!(
                "Failed to obtain registry token for account {account_id} in {region}: {}",
                out.stderr.trim()
            )));
        }
        Ok(RegistryLogin {
            username: ECR_USERNAME.to_string(),
            password: password.to_string(),
            server: server.to_string(),
        })
    }
}
