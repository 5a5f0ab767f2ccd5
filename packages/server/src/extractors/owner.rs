use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const OWNER_HEADER: &str = "x-user-id";

const MAX_OWNER_LEN: usize = 128;

/// The caller, taken from the `X-User-Id` header.
///
/// Add this as a handler parameter to require an identity. Every file
/// operation is scoped to it.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AppError::OwnerMissing)?;

        if value.len() > MAX_OWNER_LEN || value.chars().any(|c| c.is_control()) {
            return Err(AppError::Validation("Invalid X-User-Id header".into()));
        }

        Ok(Owner(value.to_string()))
    }
}
