use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io;
use thiserror::Error;

/// Failures produced by the repository and its collaborators. The HTTP
/// mapping lives in the `IntoResponse` impl below and nowhere else.
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("volume does not exist: {0}")]
    NotFound(String),

    #[error("no such file or directory: {0}")]
    SubPathNotFound(String),

    #[error("volume already exists: {0}")]
    HandleAlreadyExists(String),

    #[error("parent volume does not exist: {0}")]
    ParentNotFound(String),

    #[error("no parent volume provided")]
    NoParentProvided,

    #[error("unrecognized strategy: {0}")]
    UnprocessableStrategy(String),

    #[error("volume has live child volumes: {0}")]
    HasChildren(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("malformed filter: {0}")]
    BadFilter(String),

    #[error("malformed stream: {0}")]
    StreamMalformed(String),

    #[error("{0}")]
    Internal(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VolumeError>;

impl IntoResponse for VolumeError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(_) => tracing::error!("internal server error: {:?}", self),
            _ => tracing::debug!("responding with error: {:?}", self),
        }

        let status = match &self {
            Self::NotFound(_) | Self::SubPathNotFound(_) => StatusCode::NOT_FOUND,
            Self::HandleAlreadyExists(_) | Self::HasChildren(_) => StatusCode::CONFLICT,
            Self::ParentNotFound(_)
            | Self::NoParentProvided
            | Self::UnprocessableStrategy(_)
            | Self::BadFilter(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) | Self::StreamMalformed(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
