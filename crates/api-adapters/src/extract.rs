//! Principal extractors.
//!
//! `AuthUser` rejects a request without a valid bearer token.
//! `MaybeAuthUser` treats a missing or invalid token as anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use domains::{DomainError, Principal};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Principal);

#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<Principal>);

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| DomainError::unauthorized("no token, authorization denied"))?;
        let principal = state.services.users.authenticate(token).await?;
        Ok(Self(principal))
    }
}

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = match bearer(parts) {
            Some(token) => state.services.users.authenticate(token).await.ok(),
            None => None,
        };
        Ok(Self(principal))
    }
}
