use thiserror::Error;

/// Failure of an upstream statistics query.
///
/// Kept distinct from "no records": a query that succeeded with an empty list
/// is data, a `FetchError` is the absence of data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by {url} (HTTP 429)")]
    RateLimited { url: String },

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl FetchError {
    /// Only throttling, server-side failures and transport errors are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.test/general".to_string();
        assert!(FetchError::RateLimited { url: url.clone() }.is_retryable());
        assert!(FetchError::Status { status: 503, url: url.clone() }.is_retryable());
        assert!(!FetchError::Status { status: 401, url }.is_retryable());
        assert!(!FetchError::Decode("eof".into()).is_retryable());
        assert!(!FetchError::NotFound("ncm 00000000".into()).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let e = FetchError::Status { status: 404, url: "u".into() };
        assert_eq!(e.to_string(), "HTTP 404 from u");
    }
}
