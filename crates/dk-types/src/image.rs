use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::ImageType;

/// Resolver/puller variant. One entry per registry flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    DockerHub,
    DockerHubPrivate,
    QuayIo,
    QuayIoPrivate,
    AwsEcr,
    Builder,
}

impl From<ImageType> for ProviderKind {
    fn from(t: ImageType) -> Self {
        match t {
            ImageType::DockerHub => Self::DockerHub,
            ImageType::DockerHubPrivate => Self::DockerHubPrivate,
            ImageType::QuayIo => Self::QuayIo,
            ImageType::QuayIoPrivate => Self::QuayIoPrivate,
            ImageType::AwsEcr => Self::AwsEcr,
            ImageType::Builder => Self::Builder,
        }
    }
}

/// Username/password pair for `docker login`.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("username", &self.username)
            .field("password", &"[hidden]")
            .field("server", &self.server)
            .finish()
    }
}

/// How the puller authenticates against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    None,
    Basic(RegistryLogin),
    /// Short-lived credentials obtained through an IAM token exchange.
    IamToken {
        region: String,
        account_id: String,
        login: RegistryLogin,
    },
}

impl AuthStrategy {
    pub fn login(&self) -> Option<&RegistryLogin> {
        match self {
            Self::None => None,
            Self::Basic(login) => Some(login),
            Self::IamToken { login, .. } => Some(login),
        }
    }
}

/// Everything needed to assemble a `builder` image locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// Image the generated Dockerfile starts `FROM`.
    pub parent: Box<ImageSpecification>,
    pub repository_uri: String,
    /// Git credentials; `server` holds the repository host.
    pub repository_login: Option<RegistryLogin>,
    pub commands: Vec<String>,
    pub entry_point: Option<String>,
    /// Tag given to the built image.
    pub target_tag: String,
}

/// Resolved, fully-qualified image reference with its auth strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpecification {
    pub kind: ProviderKind,
    pub reference: String,
    pub auth: AuthStrategy,
    pub build: Option<BuildPlan>,
}

/// A locally available image, ready to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulledImage {
    pub reference: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub digests: Vec<String>,
}
