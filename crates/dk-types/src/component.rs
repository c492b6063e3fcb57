use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Registry flavour of a component image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    #[serde(rename = "dockerhub")]
    DockerHub,
    #[serde(rename = "dockerhub-private")]
    DockerHubPrivate,
    #[serde(rename = "quayio")]
    QuayIo,
    #[serde(rename = "quayio-private")]
    QuayIoPrivate,
    #[serde(rename = "aws-ecr")]
    AwsEcr,
    #[serde(rename = "builder")]
    Builder,
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DockerHub => "dockerhub",
            Self::DockerHubPrivate => "dockerhub-private",
            Self::QuayIo => "quayio",
            Self::QuayIoPrivate => "quayio-private",
            Self::AwsEcr => "aws-ecr",
            Self::Builder => "builder",
        };
        write!(f, "{s}")
    }
}

/// Registry credentials declared on a component. `#password` is stored encrypted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDefinition {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "#password")]
    pub password: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Source repository a `builder` image is assembled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRepository {
    pub uri: String,
    #[serde(default = "default_repository_type", rename = "type")]
    pub repository_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "#password")]
    pub password: Option<String>,
}

fn default_repository_type() -> String {
    "git".to_string()
}

/// A build-time parameter; its value is read from the configuration's `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParameter {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Recipe for a `builder` image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDefinition {
    /// Registry flavour of the parent image (`uri` of the image definition).
    pub parent_type: ImageType,
    pub repository: BuildRepository,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub parameters: Vec<BuildParameter>,
}

/// Image section of a component definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDefinition {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub uri: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryDefinition>,
    #[serde(default)]
    pub build: Option<BuildDefinition>,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Container network policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    None,
    #[default]
    Bridge,
}

impl NetworkMode {
    pub fn as_docker_flag(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
        }
    }
}

/// Backend of a provisioned workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceBackend {
    Snowflake,
    Redshift,
    Synapse,
    Exasol,
    Teradata,
    Bigquery,
}

impl WorkspaceBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snowflake => "snowflake",
            Self::Redshift => "redshift",
            Self::Synapse => "synapse",
            Self::Exasol => "exasol",
            Self::Teradata => "teradata",
            Self::Bigquery => "bigquery",
        }
    }
}

impl FromStr for WorkspaceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snowflake" => Ok(Self::Snowflake),
            "redshift" => Ok(Self::Redshift),
            "synapse" => Ok(Self::Synapse),
            "exasol" => Ok(Self::Exasol),
            "teradata" => Ok(Self::Teradata),
            "bigquery" => Ok(Self::Bigquery),
            other => Err(format!("Unknown workspace backend: {other}")),
        }
    }
}

/// How data travels between storage and the container for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StagingMode {
    #[default]
    Local,
    S3,
    Abs,
    Workspace(WorkspaceBackend),
    None,
}

impl StagingMode {
    pub fn is_workspace(&self) -> bool {
        matches!(self, Self::Workspace(_))
    }
}

impl fmt::Display for StagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::S3 => write!(f, "s3"),
            Self::Abs => write!(f, "abs"),
            Self::Workspace(backend) => write!(f, "workspace-{}", backend.as_str()),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for StagingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "abs" => Ok(Self::Abs),
            "none" => Ok(Self::None),
            other => match other.strip_prefix("workspace-") {
                Some(backend) => Ok(Self::Workspace(backend.parse()?)),
                None => Err(format!("Unknown staging storage: {other}")),
            },
        }
    }
}

impl TryFrom<String> for StagingMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StagingMode> for String {
    fn from(mode: StagingMode) -> Self {
        mode.to_string()
    }
}

/// Per-direction staging configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStorage {
    #[serde(default)]
    pub input: StagingMode,
    #[serde(default)]
    pub output: StagingMode,
}

/// Serialization format of `config.*` and manifests exchanged with the component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Json,
    Yaml,
}

impl DataFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yml",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> crate::Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(value)?),
            Self::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self, text: &str) -> crate::Result<T> {
        match self {
            Self::Json => Ok(serde_json::from_str(text)?),
            Self::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }
}

/// Behavioural switches declared by a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentFlag {
    /// Configuration of synchronous actions is encrypted before it reaches the runner.
    Encrypt,
    /// Output tables without a destination land in the component's default bucket.
    DefaultBucket,
}

/// Immutable descriptor of a runnable component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub image: ImageDefinition,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u32,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub staging_storage: StagingStorage,
    #[serde(default)]
    pub flags: Vec<ComponentFlag>,
    #[serde(default)]
    pub synchronous_actions: Vec<String>,
    #[serde(default)]
    pub configuration_format: DataFormat,
    #[serde(default)]
    pub auth_provider: Option<String>,
    #[serde(default)]
    pub forward_token: bool,
    #[serde(default)]
    pub forward_token_details: bool,
    /// Overrides the runner's container timeout.
    #[serde(default)]
    pub process_timeout: Option<u64>,
    /// Static parameters passed to the container (`#` keys are encrypted).
    #[serde(default)]
    pub image_parameters: serde_json::Map<String, serde_json::Value>,
}

fn default_memory() -> String {
    "256m".to_string()
}

fn default_cpu_shares() -> u32 {
    1024
}

impl ComponentDefinition {
    pub fn has_flag(&self, flag: ComponentFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Bucket for output tables without an explicit destination.
    pub fn default_bucket(&self, config_id: &str) -> String {
        let sanitized: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!("in.c-{sanitized}-{config_id}")
    }

    pub fn allows_action(&self, action: &str) -> bool {
        self.synchronous_actions.iter().any(|a| a == action)
    }
}
