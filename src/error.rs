//! Error taxonomy for the sync layer.
//!
//! Errors are classified by how the console reacts to them:
//! - ConfigurationMissing: not an error for the agent, flips forms into manual entry
//! - Retryable: timeouts, network failures, 5xx/429 from a store
//! - Fatal for the operation: validation, missing records, database failures
//!
//! Layer-specific errors (`TabularError`, `MailError`, `DbError`) convert into
//! `SupportError` at the policy boundary (cache, gateway, mirror).

use thiserror::Error;

use crate::db::DbError;
use crate::mail::MailError;
use crate::tabular::TabularError;

/// One failed field check on a ticket submission.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Error)]
pub enum SupportError {
    /// No credentials configured for a backend. A valid steady state for the
    /// tabular store (manual-entry mode), fatal for the relational store.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Settings are present but unusable, such as an unparseable URL.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Request timed out after {0} seconds")]
    NetworkTimeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx from a store. `body` is kept for logs only.
    #[error("Upstream error {status} {reason}")]
    Upstream {
        status: u16,
        reason: String,
        body: String,
    },

    /// Some mirror updates failed; the run itself completed.
    #[error("{failed} of {attempted} replica updates failed")]
    ReconciliationPartialFailure { failed: usize, attempted: usize },

    #[error("Validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid response: {0}")]
    Decode(String),
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SupportError {
    /// Returns true if the agent can reasonably retry the same action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SupportError::NetworkTimeout(_) | SupportError::Network(_) => true,
            SupportError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_configuration_missing(&self) -> bool {
        matches!(self, SupportError::ConfigurationMissing(_))
    }

    /// Single summarized message suitable for display. Never includes raw
    /// upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            SupportError::ConfigurationMissing(_) => {
                "Subscriber directory is not configured; enter subscriber details manually."
                    .to_string()
            }
            SupportError::InvalidConfiguration(_) => {
                "Subscriber directory settings are invalid. Check the tabular store configuration."
                    .to_string()
            }
            SupportError::NetworkTimeout(secs) => {
                format!("The subscriber directory did not answer within {secs} seconds. Try again.")
            }
            SupportError::Network(_) => {
                "The subscriber directory could not be reached. Check your connection and try again."
                    .to_string()
            }
            SupportError::Upstream { status, reason, .. } => {
                format!("Loading failed: the remote store answered {status} {reason}.")
            }
            SupportError::ReconciliationPartialFailure { failed, .. } => {
                format!("{failed} subscriber records could not be refreshed.")
            }
            SupportError::Validation(_) => self.to_string(),
            SupportError::NotFound(what) => format!("{what} was not found."),
            SupportError::Database(_) => "The ticket database is unavailable.".to_string(),
            SupportError::Decode(_) => "The remote store returned an unexpected response.".to_string(),
        }
    }
}

impl From<TabularError> for SupportError {
    fn from(err: TabularError) -> Self {
        match err {
            TabularError::ConfigurationMissing => {
                SupportError::ConfigurationMissing("tabular store API key or base id".to_string())
            }
            TabularError::InvalidConfig(msg) => SupportError::InvalidConfiguration(msg),
            TabularError::Timeout(secs) => SupportError::NetworkTimeout(secs),
            TabularError::Network(msg) => SupportError::Network(msg),
            TabularError::Upstream {
                status,
                reason,
                body,
            } => SupportError::Upstream {
                status,
                reason,
                body,
            },
            TabularError::Decode(msg) => SupportError::Decode(msg),
        }
    }
}

impl From<MailError> for SupportError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Timeout(secs) => SupportError::NetworkTimeout(secs),
            MailError::Http(e) => SupportError::Network(e.to_string()),
            MailError::AuthExpired => SupportError::Upstream {
                status: 401,
                reason: "Unauthorized".to_string(),
                body: String::new(),
            },
            MailError::Api { status, message } => SupportError::Upstream {
                status,
                reason: String::new(),
                body: message,
            },
        }
    }
}

impl From<DbError> for SupportError {
    fn from(err: DbError) -> Self {
        SupportError::Database(err.to_string())
    }
}

/// Serializable error representation handed to the view layer.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFacingError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    ConfigurationMissing,
    Retryable,
    Invalid,
    Fatal,
}

impl From<&SupportError> for UserFacingError {
    fn from(err: &SupportError) -> Self {
        let error_type = if err.is_configuration_missing() {
            ErrorType::ConfigurationMissing
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else if matches!(err, SupportError::Validation(_)) {
            ErrorType::Invalid
        } else {
            ErrorType::Fatal
        };

        UserFacingError {
            message: err.user_message(),
            error_type,
            can_retry: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_hides_body() {
        let err = SupportError::Upstream {
            status: 422,
            reason: "Unprocessable Entity".to_string(),
            body: "{\"error\":\"INVALID_PERMISSIONS\",\"secret\":\"x\"}".to_string(),
        };
        assert!(!err.user_message().contains("INVALID_PERMISSIONS"));
        assert!(!err.to_string().contains("INVALID_PERMISSIONS"));
        assert!(err.user_message().contains("422"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_classification() {
        assert!(SupportError::NetworkTimeout(30).is_retryable());
        assert!(SupportError::Upstream {
            status: 503,
            reason: "Service Unavailable".to_string(),
            body: String::new()
        }
        .is_retryable());
        assert!(!SupportError::Validation(vec![]).is_retryable());
    }

    #[test]
    fn test_timeout_maps_from_tabular() {
        let err: SupportError = TabularError::Timeout(30).into();
        assert!(matches!(err, SupportError::NetworkTimeout(30)));
        let facing = UserFacingError::from(&err);
        assert_eq!(facing.error_type, ErrorType::Retryable);
        assert!(facing.can_retry);
    }

    #[test]
    fn test_validation_lists_fields() {
        let err = SupportError::Validation(vec![
            FieldError {
                field: "title",
                message: "is required",
            },
            FieldError {
                field: "description",
                message: "is required",
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: title is required, description is required"
        );
        assert_eq!(UserFacingError::from(&err).error_type, ErrorType::Invalid);
    }

    #[test]
    fn test_invalid_config_is_fatal_not_network() {
        let err: SupportError = TabularError::InvalidConfig("base URL ::".to_string()).into();
        assert!(matches!(err, SupportError::InvalidConfiguration(_)));
        assert!(!err.is_retryable());
        assert!(!err.is_configuration_missing());
        assert_eq!(UserFacingError::from(&err).error_type, ErrorType::Fatal);
    }

    #[test]
    fn test_configuration_missing_classification() {
        let err: SupportError = TabularError::ConfigurationMissing.into();
        assert!(err.is_configuration_missing());
        assert_eq!(
            UserFacingError::from(&err).error_type,
            ErrorType::ConfigurationMissing
        );
    }
}
