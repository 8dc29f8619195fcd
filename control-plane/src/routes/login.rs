//! `GET /api/v1/auth/login` (`spec.md` §4.6). The real OAuth login flow is
//! an external collaborator per `spec.md` §1; this stub exchanges a
//! pre-verified identity for a user bearer token so the rest of the
//! surface has something to authenticate against in development.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Stand-in for the identity an OAuth provider would assert.
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = crate::auth::sign_user_token(&state.jwt_secret, &query.email, chrono::Duration::days(30))?;
    Ok(Json(LoginResponse { token }))
}
