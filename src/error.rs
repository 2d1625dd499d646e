use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::blob::BlobError;
use crate::models::ApiResponse;
use crate::store::StoreError;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failure taxonomy shared by every chat operation.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        ChatError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ChatError::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ChatError::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ChatError::Conflict(msg.into())
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            StoreError::Conflict(what) => ChatError::Conflict(what),
            other => {
                log::error!("store failure: {}", other);
                ChatError::Store(other)
            }
        }
    }
}

impl From<BlobError> for ChatError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(id) => ChatError::NotFound(format!("File {}", id)),
            BlobError::TicketExpired | BlobError::TicketUsed => {
                ChatError::InvalidArgument(e.to_string())
            }
            BlobError::TooLarge { .. } | BlobError::EmptyBody => {
                ChatError::InvalidArgument(e.to_string())
            }
            BlobError::Store(inner) => ChatError::from(inner),
        }
    }
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Store(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Storage details stay in the log.
        let message = match self {
            ChatError::Store(_) => "Database error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(message))
    }
}
