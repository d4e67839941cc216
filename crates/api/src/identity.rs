//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the verified user id
//! and role as request headers.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use supportline_shared::{Role, SenderIdentity, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated party making a request
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub SenderIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| ApiError::BadRequest(format!("{} must be a UUID", USER_ID_HEADER)))?;
        let role = header(parts, USER_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|_| ApiError::BadRequest(format!("{} is not a known role", USER_ROLE_HEADER)))?;

        Ok(Caller(SenderIdentity::new(UserId::from(user_id), role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    let value = parts.headers.get(name).ok_or(ApiError::Unauthorized)?;
    value
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::BadRequest(format!("{} is not valid ASCII", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<Caller, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_valid_headers() {
        let id = Uuid::new_v4();
        let caller = extract(&[(USER_ID_HEADER, &id.to_string()), (USER_ROLE_HEADER, "admin")])
            .await
            .unwrap();
        assert_eq!(caller.0.user_id, UserId::from(id));
        assert_eq!(caller.0.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_missing_headers_are_unauthorized() {
        assert!(matches!(extract(&[]).await, Err(ApiError::Unauthorized)));
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            extract(&[(USER_ID_HEADER, &id)]).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_malformed_headers_are_bad_requests() {
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            extract(&[(USER_ID_HEADER, "nope"), (USER_ROLE_HEADER, "user")]).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            extract(&[(USER_ID_HEADER, &id), (USER_ROLE_HEADER, "janitor")]).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
