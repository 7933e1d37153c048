//! Caller identity.
//!
//! Authentication happens upstream; the gateway in front of this service forwards
//! the authenticated principal as `x-user-id` / `x-user-role`. Every engine
//! operation receives the resulting [`Requester`] explicitly.

use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;
use utoipa::ToSchema;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    /// Internal principal used by payment reconciliation. Never accepted from headers.
    System,
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" | "ROLE_USER" => Ok(Role::User),
            "ADMIN" | "ROLE_ADMIN" => Ok(Role::Admin),
            other => Err(ServiceError::Unauthorized(format!(
                "unsupported role '{}'",
                other
            ))),
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requester {
    pub user_id: i32,
    pub role: Role,
}

impl Requester {
    pub fn user(user_id: i32) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: i32) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn system() -> Self {
        Self {
            user_id: 0,
            role: Role::System,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }

    /// Only end users place orders.
    pub fn can_purchase(&self) -> bool {
        self.role == Role::User
    }

    pub fn can_act_on(&self, owner_id: i32) -> bool {
        self.is_privileged() || self.user_id == owner_id
    }

    pub fn ensure_can_act_on(&self, owner_id: i32) -> Result<(), ServiceError> {
        if self.can_act_on(owner_id) {
            Ok(())
        } else {
            Err(ServiceError::access_denied())
        }
    }

    pub fn ensure_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::access_denied())
        }
    }

    pub fn ensure_privileged(&self) -> Result<(), ServiceError> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(ServiceError::access_denied())
        }
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ServiceError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, USER_ID_HEADER)?
            .parse::<i32>()
            .map_err(|_| ServiceError::Unauthorized("malformed user id".to_string()))?;
        let role = header_value(parts, USER_ROLE_HEADER)?.parse::<Role>()?;

        debug!(user_id, role = %role, "resolved requester");
        Ok(Requester { user_id, role })
    }
}
