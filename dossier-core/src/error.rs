//! Error types for the Dossier research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the oracle, record/GIS providers, configuration, taxonomy growth
//! and run lifecycle domains.

use std::path::PathBuf;

/// Top-level error type for the Dossier core library.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Taxonomy error: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from research oracle interactions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle request failed: {message}")]
    Request { message: String },

    #[error("Authentication failed for oracle {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by oracle, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Oracle request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Oracle connection failed: {message}")]
    Connection { message: String },

    /// The owning run was cancelled or superseded while the call was pending.
    #[error("Operation aborted")]
    Aborted,
}

impl OracleError {
    /// Initialization-class failures terminate a run instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        match self {
            OracleError::AuthFailed { .. } => true,
            OracleError::Request { message } => {
                let lower = message.to_lowercase();
                lower.contains("api key") || lower.contains("401")
            }
            _ => false,
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited { .. }
                | OracleError::Timeout { .. }
                | OracleError::Connection { .. }
        )
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, OracleError::Aborted)
    }
}

/// Errors from record-system, geocoder and GIS providers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{dataset} request to {endpoint} failed: {message}")]
    Request {
        dataset: String,
        endpoint: String,
        message: String,
    },

    #[error("{dataset} is not available for this jurisdiction")]
    Unavailable { dataset: String },

    #[error("{dataset} returned malformed data: {message}")]
    Malformed { dataset: String, message: String },

    #[error("Provider call aborted")]
    Aborted,
}

impl ProviderError {
    /// Endpoint pointer recorded on the resulting data gap, when known.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProviderError::Request { endpoint, .. } => Some(endpoint.as_str()),
            _ => None,
        }
    }
}

/// Errors with a distinguished "aborted by cancellation" variant.
pub trait Abortable {
    fn aborted() -> Self;
}

impl Abortable for OracleError {
    fn aborted() -> Self {
        OracleError::Aborted
    }
}

impl Abortable for ProviderError {
    fn aborted() -> Self {
        ProviderError::Aborted
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from loading or persisting the tactic taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("Seed taxonomy is invalid: {message}")]
    InvalidSeed { message: String },

    #[error("Growth store persistence failed: {message}")]
    Persistence { message: String },
}

/// Errors from the research run lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("Run {generation} was superseded")]
    Superseded { generation: u64 },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Run initialization failed: {message}")]
    InitFailed { message: String },
}

/// A type alias for results using the top-level `DossierError`.
pub type Result<T> = std::result::Result<T, DossierError>;
