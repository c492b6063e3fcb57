use thiserror::Error;

/// Who is expected to act on a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration, bad credentials, component-reported failure.
    User,
    /// Infrastructure or internal fault, actionable by operators.
    Application,
}

/// Top-level error type for Dockyard.
#[derive(Error, Debug)]
pub enum DockyardError {
    /// Invalid configuration, missing component, invalid mapping.
    #[error("{0}")]
    User(String),

    /// Registry rejected the credentials.
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Application error: {0}")]
    Application(String),

    /// Ciphertext malformed or encrypted for a different scope.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Remote storage rejected a request.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The component exited with a nonzero status.
    #[error("{message}")]
    Component { exit_code: i32, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    /// A pull attempt failed for a reason that may go away on retry.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DockyardError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::User(_)
            | Self::LoginFailed(_)
            | Self::Encryption(_)
            | Self::Storage(_)
            | Self::Timeout(_) => ErrorClass::User,
            Self::Component { exit_code, .. } if *exit_code == 1 => ErrorClass::User,
            _ => ErrorClass::Application,
        }
    }

    /// Only transient pull failures are retried inside the pipeline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Rewrite every human-readable message carried by the error.
    ///
    /// Wrapped library errors are flattened into `Application` so that their
    /// text passes through `f` as well.
    pub fn map_message<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        match self {
            Self::User(m) => Self::User(f(&m)),
            Self::LoginFailed(m) => Self::LoginFailed(f(&m)),
            Self::Application(m) => Self::Application(f(&m)),
            Self::Encryption(m) => Self::Encryption(f(&m)),
            Self::Storage(m) => Self::Storage(f(&m)),
            Self::Component { exit_code, message } => Self::Component {
                exit_code,
                message: f(&message),
            },
            Self::Timeout(m) => Self::Timeout(f(&m)),
            Self::Transient(m) => Self::Transient(f(&m)),
            Self::Cancelled(m) => Self::Cancelled(f(&m)),
            Self::Config(m) => Self::Config(f(&m)),
            Self::Database(m) => Self::Database(f(&m)),
            other @ (Self::Io(_) | Self::Json(_) | Self::Yaml(_)) => {
                Self::Application(f(&other.to_string()))
            }
        }
    }

    /// Short status label used in the run ledger.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            _ => match self.class() {
                ErrorClass::User => "user_error",
                ErrorClass::Application => "error",
            },
        }
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, DockyardError>;
