use axum::http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while creating, retrieving or sweeping a secret.
#[derive(Error, Debug)]
pub enum SecretError {
    /// Rejected at the transport boundary (empty content or pin).
    #[error("{0}")]
    Validation(&'static str),

    #[error("expiration date is in the past")]
    ExpirationInPast,

    #[error("invalid secret id")]
    InvalidId,

    /// Absent, expired or already consumed. Callers cannot tell these apart.
    #[error("secret not found")]
    NotFound,

    #[error("invalid pin")]
    WrongPin,

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

impl SecretError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Wrap any redb error type (transaction, table, storage, commit).
    pub(crate) fn db<E: Into<redb::Error>>(e: E) -> Self {
        Self::Database(e.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ExpirationInPast => StatusCode::BAD_REQUEST,
            Self::InvalidId => StatusCode::BAD_REQUEST,
            Self::WrongPin => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short message safe to put in a response body.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => (*msg).to_owned(),
            Self::ExpirationInPast => "Expiration date is in the past".into(),
            Self::InvalidId => "Invalid secret id".into(),
            Self::WrongPin => "Invalid pin".into(),
            Self::NotFound => "Secret not found".into(),
            _ => "internal server error".into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        assert_eq!(SecretError::WrongPin.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SecretError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(SecretError::NotFound.public_message(), "Secret not found");
        assert!(!SecretError::InvalidId.is_internal());
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let e = SecretError::Storage(std::io::Error::other("disk on fire at /var/lib/x"));
        assert!(e.is_internal());
        assert_eq!(e.public_message(), "internal server error");
        let e = SecretError::corrupt("entry abc");
        assert!(!e.public_message().contains("abc"));
    }
}
