#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle stage of a logical file.
///
/// Video uploads move `Pending -> Processing -> Ready | Failed`; everything
/// else is created directly as `Ready`. Only `Ready` files are downloadable.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Blob stored, waiting for a worker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pending"))]
    Pending,
    /// A worker is transcoding the blob.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "processing"))]
    Processing,
    /// Terminal success.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "ready"))]
    Ready,
    /// Terminal failure.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: FileStatus,
    pub to: FileStatus,
}

impl FileStatus {
    /// All possible status values.
    pub const ALL: &'static [FileStatus] =
        &[Self::Pending, Self::Processing, Self::Ready, Self::Failed];

    /// Statuses a worker or the recovery scanner may still act on.
    pub const NON_TERMINAL: &'static [FileStatus] = &[Self::Pending, Self::Processing];

    /// Whether the file can be served by its final artifact path.
    pub fn is_downloadable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Claiming is idempotent (`Processing -> Processing`). `Pending -> Failed`
    /// exists for recovery giving up on a job that never ran.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Pending, Failed)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(self, next: FileStatus) -> Result<FileStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for FileStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            FileStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for FileStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}
