use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::Serialize;

use crate::app_error::AppError;

/// Identity forwarded by the authenticating gateway. The gateway has already
/// verified the credential; this service trusts the headers and performs its
/// own ownership checks against the store.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AuthUser {
    pub id: i32,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Merchant,
    SuperAdmin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "merchant" => Some(Role::Merchant),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

fn identity_from_headers(headers: &HeaderMap) -> Option<AuthUser> {
    let id = headers.get("x-user-id")?.to_str().ok()?.parse().ok()?;
    let role = Role::parse(headers.get("x-user-role")?.to_str().ok()?)?;
    Some(AuthUser { id, role })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).ok_or(AppError::Unauthorized)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(identity_from_headers(&parts.headers))
    }
}

fn authorize(req: &Request, allowed: &[Role]) -> Result<AuthUser, AppError> {
    let user = identity_from_headers(req.headers()).ok_or(AppError::Unauthorized)?;
    if allowed.contains(&user.role) {
        Ok(user)
    } else {
        Err(AppError::ForbiddenResource(
            "Insufficient role for this resource".into(),
        ))
    }
}

/// Any authenticated identity.
pub async fn user_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(&req, &[Role::User, Role::Merchant, Role::SuperAdmin])?;
    Ok(next.run(req).await)
}

pub async fn merchant_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(&req, &[Role::Merchant])?;
    Ok(next.run(req).await)
}

pub async fn admin_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(&req, &[Role::SuperAdmin])?;
    Ok(next.run(req).await)
}

/// Owning merchant or administrator, used by the order status endpoint.
pub async fn staff_authorization(req: Request, next: Next) -> Result<Response, AppError> {
    authorize(&req, &[Role::Merchant, Role::SuperAdmin])?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(id: &str, role: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("x-user-id", HeaderValue::from_str(id).unwrap());
        map.insert("x-user-role", HeaderValue::from_str(role).unwrap());
        map
    }

    #[test]
    fn parses_forwarded_identity() {
        let user = identity_from_headers(&headers("42", "merchant")).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.role, Role::Merchant);
    }

    #[test]
    fn rejects_unknown_role_and_bad_id() {
        assert!(identity_from_headers(&headers("42", "root")).is_none());
        assert!(identity_from_headers(&headers("forty-two", "user")).is_none());
        assert!(identity_from_headers(&HeaderMap::new()).is_none());
    }
}
