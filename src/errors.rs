use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoinEngineError>;

#[derive(Error, Debug)]
pub enum CoinEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transfer amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid purchase quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Cannot transfer coins to yourself")]
    SelfTransfer,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl CoinEngineError {
    /// True only for storage failures that abort before commit, such as a
    /// detected deadlock or serialization conflict. Retrying anything else
    /// risks applying a committed mutation twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoinEngineError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            CoinEngineError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            CoinEngineError::Database(_) => "database_error",
            CoinEngineError::Migration(_) => "database_error",
            CoinEngineError::Validation(_) => "validation_error",
            CoinEngineError::InvalidAmount(_) => "invalid_amount",
            CoinEngineError::InvalidQuantity(_) => "invalid_quantity",
            CoinEngineError::SelfTransfer => "self_transfer",
            CoinEngineError::InsufficientFunds { .. } => "insufficient_funds",
            CoinEngineError::AccountNotFound(_) => "not_found",
            CoinEngineError::UserNotFound(_) => "not_found",
            CoinEngineError::ItemNotFound(_) => "not_found",
            CoinEngineError::DuplicateUsername(_) => "duplicate_username",
            CoinEngineError::PasswordHash(_) => "internal_error",
            CoinEngineError::Jwt(_) => "unauthorized",
            CoinEngineError::Unauthorized => "unauthorized",
            CoinEngineError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for CoinEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoinEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoinEngineError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoinEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            CoinEngineError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            CoinEngineError::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
            CoinEngineError::SelfTransfer => StatusCode::BAD_REQUEST,
            CoinEngineError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            CoinEngineError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            CoinEngineError::UserNotFound(_) => StatusCode::NOT_FOUND,
            CoinEngineError::ItemNotFound(_) => StatusCode::NOT_FOUND,
            CoinEngineError::DuplicateUsername(_) => StatusCode::CONFLICT,
            CoinEngineError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoinEngineError::Jwt(_) => StatusCode::UNAUTHORIZED,
            CoinEngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoinEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_taxonomy() {
        assert_eq!(
            CoinEngineError::InsufficientFunds { required: 100, available: 50 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(CoinEngineError::SelfTransfer.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CoinEngineError::InvalidAmount(0).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CoinEngineError::AccountNotFound(42).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            CoinEngineError::ItemNotFound("cup".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CoinEngineError::DuplicateUsername("alice".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(CoinEngineError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn precondition_failures_are_not_retryable() {
        assert!(!CoinEngineError::InsufficientFunds { required: 10, available: 0 }.is_retryable());
        assert!(!CoinEngineError::AccountNotFound(1).is_retryable());
        assert!(!CoinEngineError::Validation("bad".into()).is_retryable());
        assert!(!CoinEngineError::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn pool_timeout_is_retryable() {
        assert!(CoinEngineError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
