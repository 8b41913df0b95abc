//! Application-level error taxonomy.
//!
//! Every handler returns `BillingError`. Port and domain errors convert
//! into it with `From`, so handlers propagate with `?`.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | Validation | 400 |
//! | Unauthorized | 401 |
//! | Forbidden | 403 |
//! | NotFound | 404 |
//! | Conflict | 503 |
//! | ExternalDependency | 502 |
//! | Internal | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};
use crate::ports::{PaymentError, PaymentErrorCode, SinkError, StoreError};

/// Errors returned by application handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Malformed or missing input. Nothing was written.
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// No authenticated caller.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is not allowed to act on this resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// Concurrent write; retry the whole operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A gateway or sink call failed.
    #[error("External dependency failed: {message}")]
    ExternalDependency { message: String, retryable: bool },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        BillingError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        BillingError::Forbidden(message.into())
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        BillingError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BillingError::Internal(message.into())
    }

    /// SCREAMING_SNAKE code exposed to callers.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation { .. } => "VALIDATION_FAILED",
            BillingError::Unauthorized(_) => "UNAUTHORIZED",
            BillingError::Forbidden(_) => "FORBIDDEN",
            BillingError::NotFound { .. } => "NOT_FOUND",
            BillingError::Conflict(_) => "CONFLICT",
            BillingError::ExternalDependency { .. } => "EXTERNAL_DEPENDENCY",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Minimal message safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Validation { field, message } => {
                format!("Invalid {}: {}", field, message)
            }
            BillingError::Unauthorized(_) => "Authentication required".to_string(),
            BillingError::Forbidden(_) => "You are not allowed to do that".to_string(),
            BillingError::NotFound { resource, .. } => format!("{} not found", resource),
            BillingError::Conflict(_) => "Please try again".to_string(),
            BillingError::ExternalDependency { .. } => {
                "Payment service unavailable, please try again".to_string()
            }
            BillingError::Internal(_) => "Something went wrong".to_string(),
        }
    }

    /// True when retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Conflict(_) | BillingError::Internal(_) => true,
            BillingError::ExternalDependency { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => {
                BillingError::Conflict(err.to_string())
            }
            StoreError::InvalidPath { path, reason } => BillingError::Validation {
                field: path,
                message: reason,
            },
            StoreError::InvalidDocument { .. } | StoreError::Backend(_) => {
                BillingError::Internal(err.to_string())
            }
        }
    }
}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        match err.code {
            PaymentErrorCode::NotFound => BillingError::not_found("Subscription", err.message),
            PaymentErrorCode::InvalidWebhook => BillingError::validation("signature", err.message),
            _ => BillingError::ExternalDependency {
                retryable: err.retryable,
                message: err.to_string(),
            },
        }
    }
}

impl From<SinkError> for BillingError {
    fn from(err: SinkError) -> Self {
        BillingError::ExternalDependency {
            message: err.to_string(),
            retryable: false,
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::validation(err.field().to_string(), err.to_string())
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed | ErrorCode::PricingNotPaid => {
                let field = err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "request".to_string());
                BillingError::validation(field, err.message)
            }
            ErrorCode::InvalidStateTransition | ErrorCode::NoAdjacentTier => {
                BillingError::validation("status", err.message)
            }
            ErrorCode::ClubNotFound => BillingError::not_found("Club", err.message),
            ErrorCode::UserNotFound => BillingError::not_found("User", err.message),
            ErrorCode::MembershipNotFound => BillingError::not_found("Membership", err.message),
            ErrorCode::SubscriptionNotFound => {
                BillingError::not_found("Subscription", err.message)
            }
            ErrorCode::Unauthorized => BillingError::Unauthorized(err.message),
            ErrorCode::Forbidden => BillingError::Forbidden(err.message),
            ErrorCode::Conflict => BillingError::Conflict(err.message),
            ErrorCode::ExternalServiceError => BillingError::ExternalDependency {
                message: err.message,
                retryable: true,
            },
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                BillingError::Internal(err.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_is_retryable_conflict() {
        let err: BillingError = StoreError::Conflict {
            path: "users/u1".into(),
        }
        .into();
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_field_path_is_validation() {
        let err: BillingError = StoreError::InvalidPath {
            path: "memberships.a/b".into(),
            reason: "segment contains an illegal separator".into(),
        }
        .into();
        assert!(matches!(err, BillingError::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn payment_errors_keep_retryability() {
        let err: BillingError = PaymentError::network("timeout").into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "EXTERNAL_DEPENDENCY");

        let err: BillingError = PaymentError::invalid_request("bad price").into();
        assert!(!err.is_retryable());

        let err: BillingError = PaymentError::invalid_webhook("Invalid signature").into();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn domain_errors_map_by_code() {
        let err: BillingError = DomainError::new(ErrorCode::ClubNotFound, "club-1").into();
        assert_eq!(
            err,
            BillingError::NotFound {
                resource: "Club".into(),
                id: "club-1".into()
            }
        );

        let err: BillingError = DomainError::validation("price", "must be positive").into();
        assert_eq!(err, BillingError::validation("price", "must be positive"));
    }

    #[test]
    fn user_message_hides_internals() {
        let err = BillingError::internal("postgres: connection refused at 10.0.0.3");
        assert!(!err.user_message().contains("postgres"));
        let err = BillingError::ExternalDependency {
            message: "sk_live_secret".into(),
            retryable: true,
        };
        assert!(!err.user_message().contains("sk_live"));
    }
}
