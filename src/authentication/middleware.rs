use std::convert::Infallible;

use warp::{reject::Rejection, Filter};

use crate::constants::SESSION_COOKIE;
use crate::error::ApiError;

use super::jwt::{verify_jwt_session, Identity};

/// Requires a valid session cookie; rejects anonymous callers with a 401.
pub fn with_session() -> impl Filter<Extract = (Identity,), Error = Rejection> + Copy {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(|session: Option<String>| async move {
        session
            .as_deref()
            .ok_or(ApiError::AuthenticationRequired)
            .and_then(verify_jwt_session)
            .map(Identity::from)
            .map_err(Rejection::from)
    })
}

/// Extracts the caller's identity, falling back to anonymous when the cookie
/// is absent or does not verify.
pub fn with_possible_session() -> impl Filter<Extract = (Identity,), Error = Infallible> + Copy {
    warp::cookie::optional::<String>(SESSION_COOKIE).map(|session: Option<String>| {
        session
            .and_then(|session| verify_jwt_session(&session).ok())
            .map(Identity::from)
            .unwrap_or(Identity::Anonymous)
    })
}
