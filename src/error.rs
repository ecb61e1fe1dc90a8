//! Error codes shared by services and HTTP routes.
//!
//! Every user- or operator-facing error carries a grepable `E_*` code and a
//! retryable flag. Routes serialize them as `{code, message, retryable}`.

use serde::Serialize;

/// Implemented by every error that can cross the HTTP boundary.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Wire shape for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("nothing here")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_NOT_FOUND"
        }
    }

    #[test]
    fn error_body_carries_code_message_and_default_retryable() {
        let body = ErrorBody::from_error(&NotFound);
        assert_eq!(body.code, "E_NOT_FOUND");
        assert_eq!(body.message, "nothing here");
        assert!(!body.retryable);
    }
}
