//! Error taxonomy: propagated through the outcome channel and matched by
//! [`crate::retry`] to decide whether an operation is retried.

use freightliner_types::ErrorClass;

/// A classified engine error. Library code still returns `anyhow::Result` at
/// most call sites; this type exists at the seams — RetryExecutor decisions,
/// checkpoint `error` fields, outcome reporting — where the caller needs to
/// match on *which* kind of failure occurred rather than just display a
/// message.
#[derive(Debug, thiserror::Error)]
pub enum FreightlinerError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("destination unreachable: {0}")]
    DestinationUnreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("rate limited{}", retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited { retry_after: Option<std::time::Duration> },

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("unsupported media type: {0}")]
    Unsupported(String),

    #[error("operation canceled")]
    Canceled,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl FreightlinerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FreightlinerError::SourceNotFound(_) => ErrorClass::SourceNotFound,
            FreightlinerError::DestinationUnreachable(_) => ErrorClass::DestinationUnreachable,
            FreightlinerError::AuthFailure(_) => ErrorClass::AuthFailure,
            FreightlinerError::RateLimited { .. } => ErrorClass::RateLimited,
            FreightlinerError::IntegrityFailure(_) => ErrorClass::IntegrityFailure,
            FreightlinerError::Unsupported(_) => ErrorClass::Unsupported,
            FreightlinerError::Canceled => ErrorClass::Canceled,
            FreightlinerError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Classify an HTTP status code the way a RegistryClient adapter should:
    /// by status code, never by matching substrings in an error message (see
    /// substring-matching a prose message against known phrases).
    pub fn from_status(status: reqwest::StatusCode, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            reqwest::StatusCode::NOT_FOUND => FreightlinerError::SourceNotFound(context),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                FreightlinerError::AuthFailure(context)
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                FreightlinerError::RateLimited { retry_after: None }
            }
            s if s.is_server_error() => FreightlinerError::DestinationUnreachable(context),
            s => FreightlinerError::Internal(format!("unexpected status {s}: {context}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_matches_variant() {
        assert_eq!(
            FreightlinerError::IntegrityFailure("x".into()).class(),
            ErrorClass::IntegrityFailure
        );
        assert_eq!(FreightlinerError::Canceled.class(), ErrorClass::Canceled);
    }

    #[test]
    fn from_status_prefers_status_code_over_message_sniffing() {
        let err = FreightlinerError::from_status(reqwest::StatusCode::NOT_FOUND, "GET /v2/x");
        assert_eq!(err.class(), ErrorClass::SourceNotFound);

        let err = FreightlinerError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "PUT");
        assert_eq!(err.class(), ErrorClass::RateLimited);

        let err = FreightlinerError::from_status(reqwest::StatusCode::BAD_GATEWAY, "PUT");
        assert_eq!(err.class(), ErrorClass::DestinationUnreachable);
    }
}
