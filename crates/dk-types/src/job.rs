use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::component::ComponentDefinition;
use crate::mapping::StorageMapping;

/// OAuth credentials handed over by the OAuth broker. `#` fields arrive encrypted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "appKey")]
    pub app_key: Option<String>,
    #[serde(default, rename = "#appSecret")]
    pub app_secret: Option<String>,
    #[serde(default, rename = "#data")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthApi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<OAuthCredentials>,
}

/// The `authorization` block of a configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_api: Option<OAuthApi>,
    /// Filled in by the runner when a workspace is provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Value>,
}

/// Before/after processor chains. Carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processors {
    #[serde(default)]
    pub before: Vec<Value>,
    #[serde(default)]
    pub after: Vec<Value>,
}

/// Per-configuration runtime overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Image tag used instead of the component's tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// One configuration payload as written to `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPayload {
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub storage: StorageMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<Processors>,
    #[serde(default)]
    pub authorization: AuthorizationBlock,
    #[serde(default)]
    pub image_parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// A configuration row; its payload is a partial overlay of the root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRow {
    pub id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub state: Value,
}

/// A configuration stored on the platform, optionally with rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConfiguration {
    pub id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub rows: Vec<ConfigurationRow>,
    #[serde(default)]
    pub state: Value,
}

/// Where the job's configuration comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationSource {
    Inline(Value),
    Stored(StoredConfiguration),
}

/// Storage API token forwarded to components that ask for it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageToken {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub token: String,
}

impl fmt::Debug for StorageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageToken")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("token", &"[hidden]")
            .finish()
    }
}

/// The tenant a job runs for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub stack_id: String,
    #[serde(default)]
    pub token: Option<StorageToken>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    #[default]
    Run,
    /// Archive the working directory before and after the run.
    Debug,
}

/// A fully-parsed job as handed over by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    pub project: ProjectContext,
    pub component: ComponentDefinition,
    pub configuration: ConfigurationSource,
    /// Run a single row of a row-based configuration.
    #[serde(default)]
    pub row_id: Option<String>,
    #[serde(default)]
    pub mode: JobMode,
}

impl JobRequest {
    pub fn run_id(&self) -> &str {
        self.run_id.as_deref().unwrap_or(&self.job_id)
    }
}

/// A synchronous action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub job_id: String,
    pub project: ProjectContext,
    pub component: ComponentDefinition,
    pub action: String,
    #[serde(default)]
    pub config_data: Value,
}

/// One (component, configuration) pairing executed as a single container run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub component: ComponentDefinition,
    pub configuration: ConfigurationPayload,
    pub config_id: Option<String>,
    pub config_version: Option<u64>,
    pub row_id: Option<String>,
    pub state: Value,
    pub continue_on_failure: bool,
}

impl JobDefinition {
    /// Label used in logs and working directory names.
    pub fn label(&self) -> String {
        match (&self.config_id, &self.row_id) {
            (Some(c), Some(r)) => format!("{c}-{r}"),
            (Some(c), None) => c.clone(),
            (None, _) => "inline".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_payload_defaults() {
        let payload: ConfigurationPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.parameters.is_empty());
        assert!(payload.authorization.oauth_api.is_none());
        assert!(payload.runtime.is_none());

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("action").is_none());
        assert!(value.get("storage").is_some());
    }

    #[test]
    fn configuration_source_variants() {
        let inline: ConfigurationSource =
            serde_json::from_str(r#"{"inline": {"parameters": {"a": 1}}}"#).unwrap();
        assert!(matches!(inline, ConfigurationSource::Inline(_)));

        let stored: ConfigurationSource = serde_json::from_str(
            r#"{"stored": {"id": "123", "version": 4, "rows": [{"id": "r1"}]}}"#,
        )
        .unwrap();
        match stored {
            ConfigurationSource::Stored(cfg) => {
                assert_eq!(cfg.id, "123");
                assert_eq!(cfg.rows.len(), 1);
                assert!(!cfg.rows[0].is_disabled);
            }
            _ => panic!("expected stored configuration"),
        }
    }

    #[test]
    fn oauth_credentials_use_hash_keys() {
        let creds: OAuthCredentials = serde_json::from_str(
            r##"{"appKey": "k", "#appSecret": "s", "#data": "{\"token\":\"t\"}"}"##,
        )
        .unwrap();
        assert_eq!(creds.app_key.as_deref(), Some("k"));
        assert_eq!(creds.app_secret.as_deref(), Some("s"));
    }

    #[test]
    fn storage_token_debug_hides_token() {
        let token = StorageToken {
            id: "1".to_string(),
            description: "ci".to_string(),
            token: "123-abcdef".to_string(),
        };
        assert!(!format!("{token:?}").contains("abcdef"));
    }

    #[test]
    fn job_definition_label() {
        let component: ComponentDefinition = serde_json::from_str(
            r#"{"id": "a", "image": {"type": "dockerhub", "uri": "a"}}"#,
        )
        .unwrap();
        let mut def = JobDefinition {
            component,
            configuration: ConfigurationPayload::default(),
            config_id: Some("12".to_string()),
            config_version: None,
            row_id: Some("34".to_string()),
            state: Value::Null,
            continue_on_failure: false,
        };
        assert_eq!(def.label(), "12-34");
        def.config_id = None;
        assert_eq!(def.label(), "inline");
    }

    #[test]
    fn job_request_run_id_defaults_to_job_id() {
        let json = r#"{
            "job_id": "987",
            "project": {"id": "1", "stack_id": "connection.example.com"},
            "component": {"id": "a", "image": {"type": "dockerhub", "uri": "a"}},
            "configuration": {"inline": {}}
        }"#;
        let req: JobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.run_id(), "987");
        assert_eq!(req.mode, JobMode::Run);
    }
}
