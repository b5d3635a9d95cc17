//! Error types for roost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoostError>;

#[derive(Error, Debug)]
pub enum RoostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RoostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RoostError::InvalidInput(_) => 3,
            RoostError::Platform(PlatformError::Authentication(_)) => 2,
            RoostError::Config(_) => 2,
            RoostError::Platform(_) | RoostError::Database(_) | RoostError::Crypto(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Failed to resolve path: {0}")]
    Path(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption key is not usable: {0}")]
    InvalidKey(String),

    #[error("Sealed secret is malformed: {0}")]
    Malformed(String),

    #[error("Failed to open sealed secret (wrong key or corrupted data)")]
    OpenFailed,

    #[error("Failed to seal secret")]
    SealFailed,
}
