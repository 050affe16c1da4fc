//! Caller identity and path extraction.
//!
//! The bearer credential in `Authorization` is handed to the identity resolver
//! as-is; the server never parses it. Path parameters go through [`ApiPath`] so a
//! malformed id is reported in the same JSON shape as every other error.

use super::ServerState;
use super::error::ApiError;
use crate::error::RaffleError;
use crate::identity::Identity;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::de::DeserializeOwned;

/// Authenticated caller.
///
/// # Example
///
/// ```ignore
/// async fn handler(Caller(identity): Caller) -> String {
///     identity.user_id.to_string()
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<ServerState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                RaffleError::Unauthenticated("missing bearer credential".to_string())
            })?;

        let identity = state.authenticate(credential).await?;
        Ok(Self(identity))
    }
}

/// `Path` whose rejection is an [`ApiError`]
#[derive(Debug, Clone, Copy)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}
