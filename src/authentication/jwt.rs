use chrono::{Duration, Local};
use hmac::{Hmac, Mac};
use jwt::VerifyWithKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::SESSION_SECRET_ENV;
use crate::error::ApiError;
use crate::schema::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: Uuid,
    pub email: String,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: Uuid, email: String) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + Duration::hours(24)).timestamp();

        Self {
            user_id: id,
            email,
            iat,
            exp,
        }
    }
}

/// The caller of a core operation: anonymous, or a specific user id. Threaded
/// explicitly through every action instead of living in ambient request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(Uuid),
}

impl Identity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::Anonymous => None,
            Identity::User(id) => Some(*id),
        }
    }

    pub fn require(&self) -> Result<Uuid, ApiError> {
        self.user_id().ok_or(ApiError::AuthenticationRequired)
    }
}

impl From<JwtSessionData> for Identity {
    fn from(session: JwtSessionData) -> Self {
        Identity::User(session.user_id)
    }
}

fn session_key() -> Hmac<Sha256> {
    let secret = std::env::var(SESSION_SECRET_ENV).unwrap_or_else(|_| String::from("secret"));
    Hmac::new_from_slice(secret.as_bytes()).unwrap()
}

pub fn verify_jwt_session(token: &str) -> Result<JwtSessionData, ApiError> {
    token
        .verify_with_key(&session_key())
        .map_err(|_| ApiError::AuthenticationRequired)
        .map(|session: JwtSessionData| {
            let now = Local::now().timestamp();

            if (session.exp - now).is_negative() {
                return Err(ApiError::AuthenticationRequired);
            }
            Ok(session)
        })?
}

#[cfg(test)]
mod tests {
    use jwt::SignWithKey;

    use super::*;

    fn signed_token() -> String {
        JwtSessionData::new(7, String::from("cook@example.com"))
            .sign_with_key(&session_key())
            .unwrap()
    }

    #[test]
    fn round_trips_a_signed_session() {
        let token = signed_token();
        let session = verify_jwt_session(&token).unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(Identity::from(session), Identity::User(7));
    }

    #[test]
    fn rejects_a_garbage_token() {
        assert!(verify_jwt_session("not.a.token").is_err());
    }

    #[test]
    fn anonymous_identity_fails_require() {
        assert!(Identity::Anonymous.require().is_err());
        assert_eq!(Identity::User(3).require().unwrap(), 3);
    }
}
