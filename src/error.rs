use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("Database error")]
    Store(#[from] sled::Error),

    #[error("Internal server error")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Internal server error")]
    Session,
}

impl ApiError {
    pub fn validation<S: Into<String>>(message: S) -> ApiError {
        ApiError::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> ApiError {
        ApiError::NotFound(message.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Catalog(err) => match err {
                CatalogError::Status(status) if *status == StatusCode::NOT_FOUND => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::Store(_) | ApiError::Hash(_) | ApiError::Session => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("request failed: {:?}", self);
        }
        let message = match self {
            // Detail for upstream failures stays in the logs.
            ApiError::Catalog(CatalogError::Status(status))
                if *status == StatusCode::NOT_FOUND =>
            {
                "Movie not found.".to_owned()
            }
            ApiError::Catalog(_) => "Failed to reach the movie catalog.".to_owned(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
        }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
