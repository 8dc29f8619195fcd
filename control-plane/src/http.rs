//! Router assembly (`spec.md` §4.6). Grounded on
//! `bin-shared/src/http_health_check.rs` for the overall
//! `Router::new().route(...)` shape and on `b4nst-lcars`'s `api` module
//! for nesting a WS surface next to plain REST handlers.

use axum::routing::{delete, get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes::{login, targets, ws};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/target/", get(targets::list_targets))
        .route(
            "/api/v1/target/{name}",
            put(targets::create_target).get(targets::get_target),
        )
        .route("/api/v1/target/{name}/register_device", axum::routing::post(targets::register_device))
        .route("/api/v1/target/{name}/device/{device_id}", delete(targets::delete_device))
        .route("/api/v1/target/{name}/serve", get(ws::serve))
        .route("/api/v1/target/{name}/connect", get(ws::connect))
        .route("/api/v1/auth/login", get(login::login))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::JwtSecret;
    use crate::connection_manager::ConnectionManager;

    /// `connect_lazy` never opens a socket, so these tests exercise only
    /// routing/handler logic that doesn't touch the pool — the same split
    /// `http_health_check.rs`'s tests rely on between routing and I/O.
    fn test_state() -> AppState {
        AppState {
            pool: PgPoolOptions::new()
                .connect_lazy("postgres://localhost/rvpn_test")
                .expect("lazy pool never connects eagerly"),
            connections: Arc::new(ConnectionManager::new()),
            jwt_secret: JwtSecret("test-secret".to_string()),
        }
    }

    #[tokio::test]
    async fn login_issues_a_bearer_token() {
        let app = router(test_state());

        let response = app
            .oneshot(
                Request::get("/api/v1/auth/login?email=dev@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_without_email_is_a_bad_request() {
        let app = router(test_state());

        let response = app
            .oneshot(Request::get("/api/v1/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = router(test_state());

        let response = app
            .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
