use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::LedgerError;
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;

use crate::gc::GcError;
use crate::ingest::IngestError;
use crate::service::AccessError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `OWNER_MISSING`,
    /// `PAYLOAD_TOO_LARGE`, `UNSUPPORTED_MEDIA_TYPE`, `NOT_FOUND`, `NOT_READY`,
    /// `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "Missing 'file' field")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    OwnerMissing,
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    NotFound(String),
    /// The file exists but has not finished processing.
    NotReady(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::OwnerMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "OWNER_MISSING",
                    message: "X-User-Id header is required".into(),
                },
            ),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorBody {
                    code: "PAYLOAD_TOO_LARGE",
                    message: msg,
                },
            ),
            AppError::UnsupportedMediaType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorBody {
                    code: "UNSUPPORTED_MEDIA_TYPE",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::NotReady(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "NOT_READY",
                    message: msg,
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            // Someone else's file is indistinguishable from a missing one.
            LedgerError::NotFound(_) | LedgerError::Denied(_) => {
                AppError::NotFound("File not found".into())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::PathEscape(_) => {
                AppError::NotFound("File not found".into())
            }
            StorageError::InvalidHash(_) => AppError::Validation(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(_) | IngestError::ContentMismatch(_) | IngestError::Read(_) => {
                AppError::Validation(err.to_string())
            }
            IngestError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            IngestError::UnsupportedType(_) => AppError::UnsupportedMediaType(err.to_string()),
            IngestError::Storage(e) => e.into(),
            IngestError::Ledger(e) => e.into(),
            IngestError::Integrity(detail) => AppError::Internal(detail),
        }
    }
}

impl From<GcError> for AppError {
    fn from(err: GcError) -> Self {
        match err {
            GcError::Ledger(e) => e.into(),
            GcError::Storage(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Ledger(e) => e.into(),
            AccessError::Storage(e) => e.into(),
            AccessError::NotReady { .. } => AppError::NotReady(err.to_string()),
        }
    }
}
