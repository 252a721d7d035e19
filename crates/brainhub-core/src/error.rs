//! Hub error types.
//!
//! Only `join` is allowed to fail with an error the transport must reject;
//! every other hub operation answers with a structured JSON response.

use thiserror::Error;

/// Errors surfaced to the transport layer.
#[derive(Debug, Error)]
pub enum HubError {
    /// The join descriptor failed validation.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// The `client-list` delivery to a joining session failed, so the join
    /// was rolled back.
    #[error("join delivery failed: {0}")]
    JoinDeliveryFailed(String),
}

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_reason() {
        let err = HubError::MalformedDescriptor("missing or invalid field: id".into());
        assert_eq!(
            err.to_string(),
            "malformed descriptor: missing or invalid field: id"
        );
    }
}
