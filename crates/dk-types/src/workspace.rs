use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::component::WorkspaceBackend;

/// Connection parameters of a provisioned workspace.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceCredentials {
    pub id: String,
    pub backend: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    pub schema: String,
    #[serde(default)]
    pub warehouse: Option<String>,
    pub user: String,
    pub password: String,
    /// Persistent workspaces outlive the job.
    #[serde(default)]
    pub persistent: bool,
}

impl fmt::Debug for WorkspaceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceCredentials")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("schema", &self.schema)
            .field("user", &self.user)
            .field("password", &"[hidden]")
            .field("persistent", &self.persistent)
            .finish()
    }
}

impl WorkspaceCredentials {
    /// Environment variables handed to the container.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("KBC_WORKSPACE_ID".to_string(), self.id.clone());
        env.insert("KBC_WORKSPACE_BACKEND".to_string(), self.backend.clone());
        env.insert("KBC_WORKSPACE_HOST".to_string(), self.host.clone());
        if let Some(port) = self.port {
            env.insert("KBC_WORKSPACE_PORT".to_string(), port.to_string());
        }
        if let Some(ref db) = self.database {
            env.insert("KBC_WORKSPACE_DATABASE".to_string(), db.clone());
        }
        env.insert("KBC_WORKSPACE_SCHEMA".to_string(), self.schema.clone());
        if let Some(ref wh) = self.warehouse {
            env.insert("KBC_WORKSPACE_WAREHOUSE".to_string(), wh.clone());
        }
        env.insert("KBC_WORKSPACE_USER".to_string(), self.user.clone());
        env.insert("KBC_WORKSPACE_PASSWORD".to_string(), self.password.clone());
        env
    }

    /// Block written to `authorization.workspace` in the configuration file.
    pub fn to_authorization(&self) -> serde_json::Value {
        json!({
            "host": self.host,
            "port": self.port,
            "database": self.database,
            "schema": self.schema,
            "warehouse": self.warehouse,
            "user": self.user,
            "#password": self.password,
        })
    }
}

/// Request to provision a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceOptions {
    pub backend: WorkspaceBackend,
    pub component_id: String,
    pub config_id: Option<String>,
    pub persistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> WorkspaceCredentials {
        WorkspaceCredentials {
            id: "ws-1".to_string(),
            backend: "snowflake".to_string(),
            host: "acc.snowflakecomputing.com".to_string(),
            port: None,
            database: Some("DB".to_string()),
            schema: "WORKSPACE_1".to_string(),
            warehouse: Some("WH".to_string()),
            user: "USER_1".to_string(),
            password: "pa55".to_string(),
            persistent: false,
        }
    }

    #[test]
    fn workspace_env_contains_connection() {
        let env = creds().to_env();
        assert_eq!(env["KBC_WORKSPACE_SCHEMA"], "WORKSPACE_1");
        assert_eq!(env["KBC_WORKSPACE_PASSWORD"], "pa55");
        assert!(!env.contains_key("KBC_WORKSPACE_PORT"));
    }

    #[test]
    fn workspace_authorization_marks_password_secret() {
        let auth = creds().to_authorization();
        assert_eq!(auth["#password"], "pa55");
        assert!(auth.get("password").is_none());
    }

    #[test]
    fn workspace_debug_hides_password() {
        assert!(!format!("{:?}", creds()).contains("pa55"));
    }
}
