// =============================================================================
// Service error taxonomy
// =============================================================================
//
// Caller-visible failures for the MarketDataService operations. Internal-only
// conditions (Malformed, SlowConsumer, ValidationError) never surface through
// this type; they are represented as counters and log events instead.
// =============================================================================

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("upstream feed unavailable")]
    FeedUnavailable,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("circuit open, retry after cooldown")]
    CircuitOpen,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("feed adapter not running")]
    NotRunning,
}

impl ServiceError {
    /// HTTP status the illustrative REST transport maps this error to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::FeedUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether a retry wrapper should treat this as transient (worth
    /// retrying after backoff) rather than terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::FeedUnavailable | ServiceError::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ServiceError::FeedUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::InvalidArgument("bad ric".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn transience_classification() {
        assert!(ServiceError::FeedUnavailable.is_transient());
        assert!(ServiceError::RateLimited.is_transient());
        assert!(!ServiceError::CircuitOpen.is_transient());
        assert!(!ServiceError::NotRunning.is_transient());
        assert!(!ServiceError::InvalidArgument("x".into()).is_transient());
    }
}
