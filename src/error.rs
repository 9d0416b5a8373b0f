use thiserror::Error;

/// Classifies an error as a rate-limit signal from the backend.
///
/// Only rate-limited failures are retried by [`crate::retry::RetryPolicy`];
/// everything else is surfaced on first occurrence.
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

/// Terminal failure of a retried invocation.
#[derive(Debug, Error)]
pub enum InvokeError<E> {
    /// Non-retryable failure, returned on the attempt that produced it
    #[error("{0}")]
    Fatal(E),

    /// Every attempt in the budget was rate limited
    #[error("service is overloaded: request failed after {attempts} attempts (last error: {last})")]
    ExhaustedRetries { attempts: u32, last: E },
}

impl<E> InvokeError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, InvokeError::ExhaustedRetries { .. })
    }

    /// The underlying cause, whichever variant carries it.
    pub fn cause(&self) -> &E {
        match self {
            InvokeError::Fatal(err) => err,
            InvokeError::ExhaustedRetries { last, .. } => last,
        }
    }

    pub fn into_cause(self) -> E {
        match self {
            InvokeError::Fatal(err) => err,
            InvokeError::ExhaustedRetries { last, .. } => last,
        }
    }
}

/// Errors raised by the HTTP backends (generation, transcription and maps).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited by backend (status {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Non-OK `status` field in a 200 response (Maps web services)
    #[error("service reported {status}: {message}")]
    Service { status: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend returned no candidates")]
    EmptyResponse,
}

impl ApiError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 {
            ApiError::RateLimited {
                status,
                message: body,
            }
        } else {
            ApiError::Status { status, body }
        }
    }
}

impl ApiError {
    /// Map a Maps web-service `status` string. `OVER_QUERY_LIMIT` is that
    /// API's rate-limit signal and is reported like an HTTP 429.
    pub fn from_service_status(status: &str, message: Option<String>) -> Self {
        let message = message.unwrap_or_default();
        if status == "OVER_QUERY_LIMIT" {
            ApiError::RateLimited {
                status: 429,
                message: format!("{}: {}", status, message),
            }
        } else {
            ApiError::Service {
                status: status.to_string(),
                message,
            }
        }
    }
}

impl RateLimited for ApiError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl<E: RateLimited> RateLimited for InvokeError<E> {
    fn is_rate_limited(&self) -> bool {
        match self {
            InvokeError::Fatal(err) => err.is_rate_limited(),
            InvokeError::ExhaustedRetries { .. } => false,
        }
    }
}
