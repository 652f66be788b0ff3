/// Error kinds that callers branch on
///
/// Everything else travels as `anyhow::Error` with context attached.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Invalid database URL: {message}")]
    InvalidDatabaseUrl { message: String },

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),

    #[error("No running {engine} container found (tried {tried})")]
    ContainerNotFound { engine: String, tried: String },

    #[error("Command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Backup archive is missing {0}")]
    MissingBackupMember(String),

    #[error("Unsupported architecture for {core}: {arch}")]
    UnsupportedArch { core: String, arch: String },

    #[error("Telegram API error: {0}")]
    Telegram(String),
}

impl OpsError {
    pub fn invalid_url(message: impl Into<String>) -> Self {
        OpsError::InvalidDatabaseUrl {
            message: message.into(),
        }
    }
}
