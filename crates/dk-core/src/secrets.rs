//! Decryption and encryption of `#`-marked configuration values.

use std::fmt;
use std::sync::Arc;

use dk_types::{DockyardError, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::output_filter::OutputFilter;

/// Key-derivation strategy. Each wrapper binds ciphertext to part of the [`KeyScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapperKind {
    /// Bound to component + stack.
    Component,
    /// Bound to component + project + stack.
    Project,
    /// Bound to component + project + stack + configuration.
    Configuration,
}

impl WrapperKind {
    pub const ALL: [WrapperKind; 3] = [Self::Component, Self::Project, Self::Configuration];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Component => "KBC::ComponentSecure::",
            Self::Project => "KBC::ProjectSecure::",
            Self::Configuration => "KBC::ConfigSecure::",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Project => "project",
            Self::Configuration => "configuration",
        }
    }

    /// Wrapper whose envelope prefix `value` carries, if any.
    pub fn detect(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| value.starts_with(w.prefix()))
    }
}

impl fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity the encryption keys are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScope {
    pub component_id: String,
    pub project_id: String,
    pub stack_id: String,
    pub config_id: Option<String>,
}

impl KeyScope {
    /// Key identity for `wrapper`: SHA-256 over the wrapper name and the scope fields it requires.
    pub fn key_id(&self, wrapper: WrapperKind) -> std::result::Result<String, EncryptorError> {
        let mut hasher = Sha256::new();
        hasher.update(wrapper.name().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.component_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.stack_id.as_bytes());
        if matches!(wrapper, WrapperKind::Project | WrapperKind::Configuration) {
            hasher.update(b"\0");
            hasher.update(self.project_id.as_bytes());
        }
        if wrapper == WrapperKind::Configuration {
            let config_id = self.config_id.as_deref().ok_or_else(|| {
                EncryptorError::ScopeMismatch(
                    "configuration wrapper requires a configuration id".to_string(),
                )
            })?;
            hasher.update(b"\0");
            hasher.update(config_id.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Most specific wrapper this scope can satisfy.
    pub fn preferred_wrapper(&self) -> WrapperKind {
        if self.config_id.is_some() {
            WrapperKind::Configuration
        } else {
            WrapperKind::Project
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptorError {
    /// The value carries no known envelope; it is plaintext.
    #[error("value is not encrypted")]
    NotEncrypted,
    /// Ciphertext was produced for a different component, project or configuration.
    #[error("value was encrypted for a different scope: {0}")]
    ScopeMismatch(String),
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

/// Encryption-at-rest collaborator.
pub trait Encryptor: Send + Sync {
    fn encrypt(
        &self,
        plaintext: &str,
        wrapper: WrapperKind,
        scope: &KeyScope,
    ) -> std::result::Result<String, EncryptorError>;

    fn decrypt(&self, value: &str, scope: &KeyScope) -> std::result::Result<String, EncryptorError>;
}

/// Walks configuration trees and routes `#` values through an [`Encryptor`].
#[derive(Clone)]
pub struct SecretResolver {
    encryptor: Arc<dyn Encryptor>,
    scope: KeyScope,
}

impl SecretResolver {
    pub fn new(encryptor: Arc<dyn Encryptor>, scope: KeyScope) -> Self {
        Self { encryptor, scope }
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    /// Decrypt one value. Plaintext passes through unchanged.
    pub fn decrypt_value(&self, value: &str) -> Result<String> {
        match self.encryptor.decrypt(value, &self.scope) {
            Ok(plain) => Ok(plain),
            Err(EncryptorError::NotEncrypted) => Ok(value.to_string()),
            Err(e) => Err(DockyardError::Encryption(e.to_string())),
        }
    }

    /// Decrypt every string under a `#` key and register the plaintext with `filter`.
    pub fn decrypt_tree(&self, tree: &Value, filter: &mut OutputFilter) -> Result<Value> {
        let mut count = 0usize;
        let out = self.walk_decrypt(tree, false, filter, &mut count)?;
        debug!(component = %self.scope.component_id, secrets = count, "Configuration decrypted");
        Ok(out)
    }

    fn walk_decrypt(
        &self,
        value: &Value,
        secret: bool,
        filter: &mut OutputFilter,
        count: &mut usize,
    ) -> Result<Value> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, v) in map {
                    let nested = secret || key.starts_with('#');
                    out.insert(key.clone(), self.walk_decrypt(v, nested, filter, count)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.walk_decrypt(v, secret, filter, count))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::String(s) if secret => {
                let plain = self.decrypt_value(s)?;
                filter.add_value(&plain);
                *count += 1;
                Ok(Value::String(plain))
            }
            Value::Number(n) if secret => {
                filter.add_value(&n.to_string());
                Ok(value.clone())
            }
            other => Ok(other.clone()),
        }
    }

    /// Encrypt every plaintext string under a `#` key. Values already carrying an
    /// envelope are left as they are.
    pub fn encrypt_tree(&self, tree: &Value, wrapper: WrapperKind) -> Result<Value> {
        self.walk_encrypt(tree, false, wrapper)
    }

    fn walk_encrypt(&self, value: &Value, secret: bool, wrapper: WrapperKind) -> Result<Value> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, v) in map {
                    let nested = secret || key.starts_with('#');
                    out.insert(key.clone(), self.walk_encrypt(v, nested, wrapper)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.walk_encrypt(v, secret, wrapper))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::String(s) if secret && WrapperKind::detect(s).is_none() => self
                .encryptor
                .encrypt(s, wrapper, &self.scope)
                .map(Value::String)
                .map_err(|e| DockyardError::Encryption(e.to_string())),
            other => Ok(other.clone()),
        }
    }
}
