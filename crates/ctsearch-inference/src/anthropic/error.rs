//! Anthropic-specific error handling.

use ctsearch_core::Error;

/// Anthropic API error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicErrorCode {
    /// Missing or invalid API key, or key without access.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// API temporarily overloaded.
    Overloaded,
    /// Model not found or not available.
    ModelNotFound,
    /// Prompt too large for the model or the endpoint.
    RequestTooLarge,
    /// Malformed request for this record.
    InvalidRequest,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl AnthropicErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401 | 403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (529, _) | (_, "overloaded_error") => Self::Overloaded,
            (404, _) | (_, "not_found_error") => Self::ModelNotFound,
            (413, _) | (_, "request_too_large") => Self::RequestTooLarge,
            (400, _) => Self::InvalidRequest,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

/// Convert an Anthropic error to a ctsearch [`Error`].
///
/// Failures that would repeat for every remaining record map to fatal
/// variants, which includes any 5xx or unclassified status from the service.
/// Only failures tied to one request's content map to [`Error::Inference`].
pub fn to_ctsearch_error(code: AnthropicErrorCode, message: &str) -> Error {
    match code {
        AnthropicErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        AnthropicErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        AnthropicErrorCode::RateLimitExceeded => {
            Error::Request(format!("Rate limit exceeded: {}", message))
        }
        AnthropicErrorCode::Overloaded => Error::Request(format!("API overloaded: {}", message)),
        AnthropicErrorCode::RequestTooLarge => {
            Error::Inference(format!("Request too large: {}", message))
        }
        AnthropicErrorCode::InvalidRequest => {
            Error::Inference(format!("Invalid request: {}", message))
        }
        AnthropicErrorCode::ServerError => Error::Request(format!("Server error: {}", message)),
        AnthropicErrorCode::Unknown => Error::Request(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_401() {
        let code = AnthropicErrorCode::from_response(401, "authentication_error");
        assert_eq!(code, AnthropicErrorCode::AuthenticationError);
    }

    #[test]
    fn test_error_code_from_403() {
        let code = AnthropicErrorCode::from_response(403, "permission_error");
        assert_eq!(code, AnthropicErrorCode::AuthenticationError);
    }

    #[test]
    fn test_error_code_from_429() {
        let code = AnthropicErrorCode::from_response(429, "rate_limit_error");
        assert_eq!(code, AnthropicErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_error_code_from_529() {
        let code = AnthropicErrorCode::from_response(529, "overloaded_error");
        assert_eq!(code, AnthropicErrorCode::Overloaded);
    }

    #[test]
    fn test_error_code_from_404() {
        let code = AnthropicErrorCode::from_response(404, "not_found_error");
        assert_eq!(code, AnthropicErrorCode::ModelNotFound);
    }

    #[test]
    fn test_error_code_from_413() {
        let code = AnthropicErrorCode::from_response(413, "request_too_large");
        assert_eq!(code, AnthropicErrorCode::RequestTooLarge);
    }

    #[test]
    fn test_error_code_from_400() {
        let code = AnthropicErrorCode::from_response(400, "invalid_request_error");
        assert_eq!(code, AnthropicErrorCode::InvalidRequest);
    }

    #[test]
    fn test_error_code_from_500() {
        let code = AnthropicErrorCode::from_response(500, "api_error");
        assert_eq!(code, AnthropicErrorCode::ServerError);
    }

    #[test]
    fn test_error_code_from_unknown() {
        let code = AnthropicErrorCode::from_response(418, "im_a_teapot");
        assert_eq!(code, AnthropicErrorCode::Unknown);
    }

    #[test]
    fn test_auth_and_rate_limit_are_fatal() {
        assert!(to_ctsearch_error(AnthropicErrorCode::AuthenticationError, "bad key").is_fatal());
        assert!(to_ctsearch_error(AnthropicErrorCode::RateLimitExceeded, "slow down").is_fatal());
        assert!(to_ctsearch_error(AnthropicErrorCode::ModelNotFound, "nope").is_fatal());
    }

    #[test]
    fn test_per_record_errors_are_not_fatal() {
        let err = to_ctsearch_error(AnthropicErrorCode::RequestTooLarge, "prompt is too long");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Request too large"));

        let err = to_ctsearch_error(AnthropicErrorCode::InvalidRequest, "bad field");
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_service_outage_is_fatal() {
        for status in [500, 502, 503] {
            let code = AnthropicErrorCode::from_response(status, "api_error");
            let err = to_ctsearch_error(code, "unavailable");
            assert!(matches!(err, Error::Request(_)), "status {status}: {err:?}");
            assert!(err.is_fatal());
        }
        assert!(to_ctsearch_error(AnthropicErrorCode::Unknown, "teapot").is_fatal());
    }
}
