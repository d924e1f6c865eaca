//! Error types for the HEIC to JPG conversion engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Distinguishes why coded image data could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorCode {
    /// The coded payload ended before the decoder had all the samples it needed.
    Truncated,
    /// The coded payload is present but its syntax is not valid.
    InvalidSyntax,
}

impl fmt::Display for DecodeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorCode::Truncated => f.write_str("truncated input"),
            DecodeErrorCode::InvalidSyntax => f.write_str("invalid coded syntax"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),

    #[error("Failed to decode image ({code}): {detail}")]
    DecodeFailure { code: DecodeErrorCode, detail: String },

    #[error("Failed to encode JPEG: {0}")]
    EncodeFailure(String),

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Image too large: {width}x{height} (max: {max}x{max})")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("Result not ready")]
    NotReady,

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Too many active sessions, try again later")]
    SessionLimit,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub fn truncated(detail: impl Into<String>) -> Self {
        ConvertError::DecodeFailure {
            code: DecodeErrorCode::Truncated,
            detail: detail.into(),
        }
    }

    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        ConvertError::DecodeFailure {
            code: DecodeErrorCode::InvalidSyntax,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::InvalidInput(_) => ErrorKind::InvalidInput,
            ConvertError::MalformedContainer(_) => ErrorKind::MalformedContainer,
            ConvertError::UnsupportedVariant(_) => ErrorKind::UnsupportedVariant,
            ConvertError::DecodeFailure { .. } => ErrorKind::DecodeFailure,
            ConvertError::EncodeFailure(_) => ErrorKind::EncodeFailure,
            ConvertError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            ConvertError::ImageTooLarge { .. } => ErrorKind::ImageTooLarge,
            ConvertError::NotReady => ErrorKind::NotReady,
            ConvertError::Cancelled => ErrorKind::Cancelled,
            ConvertError::SessionLimit => ErrorKind::SessionLimit,
            ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Payload-free discriminant of [`ConvertError`], carried in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    MalformedContainer,
    UnsupportedVariant,
    DecodeFailure,
    EncodeFailure,
    FileTooLarge,
    ImageTooLarge,
    NotReady,
    Cancelled,
    SessionLimit,
    Internal,
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ConvertError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ConvertError::MalformedContainer(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ConvertError::UnsupportedVariant(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ConvertError::DecodeFailure { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ConvertError::EncodeFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ConvertError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ConvertError::ImageTooLarge { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ConvertError::NotReady => (StatusCode::CONFLICT, self.to_string()),
            ConvertError::Cancelled => (StatusCode::GONE, self.to_string()),
            ConvertError::SessionLimit => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ConvertError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "kind": self.kind() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failure_message_names_the_diagnostic() {
        let err = ConvertError::truncated("plane Y needs 64 bytes, 10 available");
        assert_eq!(
            err.to_string(),
            "Failed to decode image (truncated input): plane Y needs 64 bytes, 10 available"
        );
        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
    }

    #[test]
    fn not_ready_maps_to_conflict() {
        let response = ConvertError::NotReady.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
