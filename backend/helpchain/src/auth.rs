//! Caller identity, as forwarded by the upstream authentication gateway.
//!
//! The gateway verifies the session and sets two headers on every request:
//! `x-user-id` and `x-user-role`. A request without them, or with a role we
//! don't know, is refused before any handler logic runs.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::{AppError, Result};
use crate::types::{Action, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Fail with an authorization error unless the role permits `action`.
    pub fn require(&self, action: Action) -> Result<()> {
        if self.role.may(action) {
            Ok(())
        } else {
            Err(AppError::unauthorized(format!(
                "{} accounts cannot perform this action",
                self.role
            )))
        }
    }

    /// Fail unless the caller is the account identified by `owner_id`.
    pub fn require_self(&self, owner_id: &str, what: &str) -> Result<()> {
        if self.id == owner_id {
            Ok(())
        } else {
            Err(AppError::unauthorized(format!("only the {what} may do this")))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = |name: &str| -> Option<String> {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing caller identity"))?;
        let role = header(USER_ROLE_HEADER)
            .as_deref()
            .and_then(Role::parse)
            .ok_or_else(|| AppError::unauthorized("missing or unknown caller role"))?;

        Ok(Caller::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(headers: &[(&str, &str)]) -> Result<Caller> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_headers() {
        let caller = extract(&[("x-user-id", "ngo-1"), ("x-user-role", "NGO")])
            .await
            .unwrap();
        assert_eq!(caller, Caller::new("ngo-1", Role::Ngo));
    }

    #[tokio::test]
    async fn missing_or_unknown_role_is_unauthorized() {
        let err = extract(&[("x-user-id", "u-1")]).await.unwrap_err();
        assert_eq!(err.kind(), "authorization");

        let err = extract(&[("x-user-id", "u-1"), ("x-user-role", "admin")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "authorization");

        let err = extract(&[("x-user-role", "donor")]).await.unwrap_err();
        assert_eq!(err.kind(), "authorization");
    }

    #[test]
    fn require_checks_role_and_identity() {
        let volunteer = Caller::new("v-1", Role::Volunteer);
        assert!(volunteer.require(Action::PledgeDelivery).is_ok());
        assert!(volunteer.require(Action::Donate).is_err());
        assert!(volunteer.require_self("v-1", "assigned volunteer").is_ok());
        assert!(volunteer.require_self("v-2", "assigned volunteer").is_err());
    }
}
