//! Caller identity extractors.
//!
//! Authentication happens upstream; this service trusts the identity
//! headers it is given and turns them into an explicit request context.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::{Actor, EmployeeId, RequestContext, UserId};

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-user-id";
pub const EMPLOYEE_HEADER: &str = "x-employee-id";

/// Context of a customer request.
#[derive(Debug, Clone)]
pub struct UserContext(pub RequestContext);

/// Context of a back-office request.
#[derive(Debug, Clone)]
pub struct AdminContext(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_id(parts, USER_HEADER)?;
        Ok(UserContext(RequestContext::new(Actor::User(UserId::new(id)))))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AdminContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_id(parts, EMPLOYEE_HEADER)?;
        Ok(AdminContext(RequestContext::new(Actor::Admin(EmployeeId::new(id)))))
    }
}

fn header_id(parts: &Parts, name: &str) -> Result<i64, ApiError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::Unauthorized(format!("invalid {name} header")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract_user(header: Option<&str>) -> Result<UserContext, ApiError> {
        let mut builder = Request::builder().uri("/user/orders");
        if let Some(value) = header {
            builder = builder.header(USER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        UserContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn user_header_becomes_actor() {
        let UserContext(ctx) = extract_user(Some("42")).await.unwrap();
        assert_eq!(ctx.actor(), Actor::User(UserId::new(42)));
    }

    #[tokio::test]
    async fn missing_or_bad_header_is_unauthorized() {
        assert!(matches!(extract_user(None).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract_user(Some("abc")).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract_user(Some("-1")).await, Err(ApiError::Unauthorized(_))));
    }
}
