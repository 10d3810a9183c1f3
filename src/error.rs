//! Error types for pinvault

use thiserror::Error;

use crate::backup::BackupProvider;

/// Result type alias for pinvault operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Distribution must total 100%, got {total}%")]
    InvalidDistribution { total: f64 },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid asset manifest: {0}")]
    ManifestError(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("{provider} is not configured")]
    ProviderNotConfigured { provider: BackupProvider },

    #[error("{provider} upload failed after {attempts} attempts: {last_error}")]
    ProviderExhausted {
        provider: BackupProvider,
        attempts: u32,
        last_error: String,
    },

    #[error("Primary storage unavailable: {0}")]
    PrimaryUnavailable(String),

    #[error("Failed to restore {cid} from any gateway (tried: {})", attempted.join(", "))]
    RestoreExhausted { cid: String, attempted: Vec<String> },
}

impl Error {
    /// Error kind label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigError(_) | Error::InvalidDistribution { .. } => "config",
            Error::HttpError(_) => "http",
            Error::IoError(_) => "io",
            Error::SerializationError(_) | Error::ManifestError(_) => "serialization",
            Error::UrlError(_) => "url",
            Error::ProviderNotConfigured { .. } => "not_configured",
            Error::ProviderExhausted { .. } => "provider_exhausted",
            Error::PrimaryUnavailable(_) => "primary",
            Error::RestoreExhausted { .. } => "restore",
        }
    }

    /// Errors raised before any network traffic; these stop a run outright
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigError(_)
                | Error::InvalidDistribution { .. }
                | Error::ManifestError(_)
                | Error::UrlError(_)
                | Error::PrimaryUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_error_names_total() {
        let err = Error::InvalidDistribution { total: 95.0 };
        assert_eq!(err.to_string(), "Distribution must total 100%, got 95%");
    }

    #[test]
    fn test_restore_exhausted_lists_gateways() {
        let err = Error::RestoreExhausted {
            cid: "bafyabc".to_string(),
            attempted: vec!["https://a".to_string(), "https://b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("bafyabc"));
        assert!(msg.contains("https://a, https://b"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(Error::ConfigError("missing".into()).is_fatal());
        assert!(Error::PrimaryUnavailable("down".into()).is_fatal());
        assert_eq!(Error::ConfigError("x".into()).kind(), "config");
    }
}
