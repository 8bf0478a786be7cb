use thiserror::Error;

/// Error type shared across the monitoring and notification pipeline.
///
/// Variants map to the semantic failure kinds of the system rather than to
/// the underlying libraries; callers match on the kind, not on source types.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller violated a function contract (e.g. rate window < 2).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration section failed validation.
    #[error("invalid configuration: [{section}] {field}: {reason}")]
    ConfigurationInvalid {
        section: &'static str,
        field: &'static str,
        reason: String,
    },

    /// A required environment variable is missing.
    #[error("required environment variable {0} is not set")]
    EnvironmentMissing(String),

    /// A filesystem root could not be read at all.
    #[error("I/O unavailable for {path}: {source}")]
    IoUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An HTTP request exceeded its wall-clock deadline.
    #[error("request to {url} timed out after {timeout_secs:.1}s")]
    Timeout { url: String, timeout_secs: f64 },

    /// An HTTP request failed below the protocol layer.
    #[error("transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The circuit breaker for a URL is open.
    #[error("circuit breaker is open for {url}")]
    CircuitOpen { url: String },

    /// A non-retryable HTTP client error (4xx other than 429).
    #[error("client error {status} from {url}")]
    ClientError { url: String, status: u16 },

    /// A server error that survived all retry attempts.
    #[error("server error {status} from {url} after {attempts} attempts")]
    ServerError {
        url: String,
        status: u16,
        attempts: u32,
    },

    /// The target URL could not be parsed.
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// A provider rejected its own configuration.
    #[error("provider {0} failed configuration validation")]
    ProviderValidation(String),

    /// A provider crashed while sending a notification.
    #[error("dispatch failed: {reason}")]
    ProviderExecution { provider: String, reason: String },

    /// A provider exceeded its dispatch deadline.
    #[error("delivery timed out after {timeout_secs}s")]
    ProviderTimeout { provider: String, timeout_secs: f64 },
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for failures worth retrying at a higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Transport { .. }
                | Self::CircuitOpen { .. }
                | Self::ServerError { .. }
                | Self::ProviderTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
