use thiserror::Error;

/// Core error type for genproxy.
/// Everything that can end a generation request before a byte has been sent
/// to the caller is one of these; the gateway maps them to a JSON body.
#[derive(Debug, Error)]
pub enum GenProxyError {
    #[error("forbidden")]
    Forbidden,

    #[error("no upstream api key configured")]
    NoApiKey,

    #[error("upstream returned {status}")]
    Upstream {
        status: u16,
        /// Provider error body: parsed JSON when possible, otherwise the
        /// truncated raw text as a JSON string.
        body: serde_json::Value,
    },

    #[error("timeout or network failure: {0}")]
    TimeoutOrNetwork(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenProxyError {
    /// Stable tag written into error bodies and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::NoApiKey => "no_api_key",
            Self::Upstream { .. } => "upstream_error",
            Self::TimeoutOrNetwork(_) => "timeout_or_network",
            Self::Validation(_) => "validation",
            Self::Io(_) | Self::Other(_) => "internal",
        }
    }

    /// HTTP status of the outward response.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Forbidden => 403,
            _ => 500,
        }
    }

    /// Value of the `status` field inside the JSON error body.
    pub fn body_status(&self) -> u16 {
        match self {
            Self::Forbidden => 403,
            Self::Upstream { status, .. } => *status,
            Self::TimeoutOrNetwork(_) => 504,
            _ => 500,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, GenProxyError>;
