//! Bearer-token authentication (`spec.md` §4.6, §6). HS256 JWTs. User
//! tokens carry claim `user=<email>`; device tokens carry claim
//! `device=<uuid>` — the two are independent per `spec.md` §6, grounded
//! on `examples/original_source/cmd/control-plane/auth.go`'s claim
//! shape. `jsonwebtoken` itself has no direct match in the example pack;
//! it is the standard crate for this job and is noted as such in
//! `DESIGN.md`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Uuid>,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtSecret(pub String);

fn sign(secret: &JwtSecret, claims: Claims) -> Result<String, ApiError> {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.0.as_bytes()))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// User bearer token, produced by the OAuth login flow's external
/// collaborator; carries `user=<email>` only.
pub fn sign_user_token(secret: &JwtSecret, user: &str, ttl: chrono::Duration) -> Result<String, ApiError> {
    sign(
        secret,
        Claims {
            user: Some(user.to_string()),
            device: None,
            exp: (chrono::Utc::now() + ttl).timestamp(),
        },
    )
}

/// Device token, returned by `register_device`; carries `device=<uuid>`
/// only.
pub fn sign_device_token(secret: &JwtSecret, device: Uuid, ttl: chrono::Duration) -> Result<String, ApiError> {
    sign(
        secret,
        Claims {
            user: None,
            device: Some(device),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        },
    )
}

pub fn verify(secret: &JwtSecret, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.0.as_bytes()),
        &Validation::new(jsonwebtoken::Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

/// Extracts and validates a user bearer token, decoding it at the handler
/// boundary rather than in middleware (see `b4nst-lcars`'s `ws.rs` auth
/// check).
pub struct AuthenticatedUser(pub String);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    JwtSecret: axum::extract::FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let secret = JwtSecret::from_ref(state);
        let claims = verify(&secret, token)?;
        claims.user.map(AuthenticatedUser).ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips_user_claim() {
        let secret = JwtSecret("test-secret".to_string());
        let token = sign_user_token(&secret, "alice@example.com", chrono::Duration::minutes(5)).unwrap();
        let claims = verify(&secret, &token).unwrap();
        assert_eq!(claims.user.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.device, None);
    }

    #[test]
    fn sign_then_verify_round_trips_device_claim() {
        let secret = JwtSecret("test-secret".to_string());
        let device = Uuid::new_v4();
        let token = sign_device_token(&secret, device, chrono::Duration::days(365)).unwrap();
        let claims = verify(&secret, &token).unwrap();
        assert_eq!(claims.device, Some(device));
        assert_eq!(claims.user, None);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let secret = JwtSecret("test-secret".to_string());
        let other = JwtSecret("other-secret".to_string());
        let token = sign_user_token(&secret, "alice@example.com", chrono::Duration::minutes(5)).unwrap();
        assert!(verify(&other, &token).is_err());
    }
}
