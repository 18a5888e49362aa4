//! Caller identity as supplied by the upstream identity provider.
//!
//! The gateway in front of this service authenticates the user and forwards
//! `x-actor-id` / `x-actor-role`. We trust those headers but still apply our
//! own organizer/admin checks on top.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Alumni,
    Guest,
}

impl Role {
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "alumni" => Self::Alumni,
            _ => Self::Guest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<String>,
    pub role: Role,
}

impl Actor {
    pub fn guest() -> Self {
        Self {
            id: None,
            role: Role::Guest,
        }
    }

    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Alumni,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin && self.id.is_some()
    }

    /// Authenticated member id, `None` for guests.
    pub fn member_id(&self) -> Option<&str> {
        match self.role {
            Role::Guest => None,
            _ => self.id.as_deref(),
        }
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.member_id() == Some(user_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let id = header(ACTOR_ID_HEADER);
        let role = match (&id, header(ACTOR_ROLE_HEADER)) {
            (Some(_), Some(r)) => Role::from_header(&r),
            (Some(_), None) => Role::Alumni,
            (None, _) => Role::Guest,
        };
        Ok(Actor { id, role })
    }
}
