//! Image resolution, pulling and local builds.

pub mod builder;
pub mod ecr;
pub mod puller;
pub mod resolver;

use async_trait::async_trait;
use dk_types::{RegistryLogin, Result};

pub use builder::ImageBuilder;
pub use ecr::AwsCliTokenProvider;
pub use puller::ImagePuller;
pub use resolver::{ImageResolver, ResolveOptions};

/// Exchanges the runner's IAM identity for short-lived registry credentials.
#[async_trait]
pub trait RegistryTokenProvider: Send + Sync {
    async fn login(&self, region: &str, account_id: &str, server: &str) -> Result<RegistryLogin>;
}
