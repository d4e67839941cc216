//! API routes

pub mod conversations;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    state::AppState,
    websocket::{ws_admin_handler, ws_conversation_handler},
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let api_v1_routes = Router::new()
        .route("/conversations", post(conversations::start_conversation))
        .route("/conversations/:id", get(conversations::get_conversation))
        .route("/conversations/:id/messages", get(conversations::list_messages))
        .route("/conversations/:id/close", post(conversations::close_conversation));

    // WebSocket routes (identity checked before upgrade)
    let websocket_routes = Router::new()
        .route("/ws/conversations/:id", get(ws_conversation_handler))
        .route("/ws/admin", get(ws_admin_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use supportline_shared::{InMemoryConversationStore, Role, UserId};

    use crate::config::Config;
    use crate::identity::{USER_ID_HEADER, USER_ROLE_HEADER};

    fn app() -> Router {
        let store = Arc::new(InMemoryConversationStore::new());
        create_router(AppState::new(Config::default(), store, None))
    }

    fn request(method: &str, uri: &str, caller: Option<(UserId, Role)>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, role)) = caller {
            builder = builder
                .header(USER_ID_HEADER, user_id.to_string())
                .header(USER_ROLE_HEADER, role.to_string());
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_memory_store() {
        let response = app()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["database"], "memory");
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_start_then_reuse() {
        let app = app();
        let caller = Some((UserId::new(), Role::User));

        let first = app
            .clone()
            .oneshot(request("POST", "/api/v1/conversations", caller, Some(json!({"content": "hello"}))))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first = json_body(first).await;
        assert_eq!(first["outcome"], "created");
        assert_eq!(first["conversation"]["status"], "pending");
        assert_eq!(first["message"]["content"], "hello");

        let second = app
            .oneshot(request("POST", "/api/v1/conversations", caller, Some(json!({"content": "again"}))))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second = json_body(second).await;
        assert_eq!(second["outcome"], "already_open");
        assert_eq!(second["conversation"]["id"], first["conversation"]["id"]);
    }

    #[tokio::test]
    async fn test_start_requires_identity_and_content() {
        let app = app();
        let anonymous = app
            .clone()
            .oneshot(request("POST", "/api/v1/conversations", None, Some(json!({"content": "hi"}))))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let blank = app
            .oneshot(request(
                "POST",
                "/api/v1/conversations",
                Some((UserId::new(), Role::User)),
                Some(json!({"content": "   "})),
            ))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
        let body = json_body(blank).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_close_rules() {
        let app = app();
        let owner = (UserId::new(), Role::User);

        let created = app
            .clone()
            .oneshot(request("POST", "/api/v1/conversations", Some(owner), Some(json!({"content": "hi"}))))
            .await
            .unwrap();
        let created = json_body(created).await;
        let id = created["conversation"]["id"].as_str().unwrap().to_string();
        let close_uri = format!("/api/v1/conversations/{}/close", id);

        let stranger = app
            .clone()
            .oneshot(request("POST", &close_uri, Some((UserId::new(), Role::User)), None))
            .await
            .unwrap();
        assert_eq!(stranger.status(), StatusCode::FORBIDDEN);

        let closed = app
            .clone()
            .oneshot(request("POST", &close_uri, Some(owner), None))
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::OK);
        assert_eq!(json_body(closed).await["status"], "closed");

        let again = app
            .clone()
            .oneshot(request("POST", &close_uri, Some((UserId::new(), Role::Admin)), None))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        // A closed conversation frees the owner to start another
        let fresh = app
            .oneshot(request("POST", "/api/v1/conversations", Some(owner), Some(json!({"content": "new"}))))
            .await
            .unwrap();
        assert_eq!(fresh.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_conversation_visibility() {
        let app = app();
        let owner = (UserId::new(), Role::User);
        let created = app
            .clone()
            .oneshot(request("POST", "/api/v1/conversations", Some(owner), Some(json!({"content": "hi"}))))
            .await
            .unwrap();
        let id = json_body(created).await["conversation"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let uri = format!("/api/v1/conversations/{}/messages", id);
        let as_owner = app
            .clone()
            .oneshot(request("GET", &uri, Some(owner), None))
            .await
            .unwrap();
        assert_eq!(as_owner.status(), StatusCode::OK);
        let messages = json_body(as_owner).await;
        assert_eq!(messages.as_array().unwrap().len(), 1);

        let as_admin = app
            .clone()
            .oneshot(request("GET", &format!("/api/v1/conversations/{}", id), Some((UserId::new(), Role::Admin)), None))
            .await
            .unwrap();
        assert_eq!(as_admin.status(), StatusCode::OK);

        let as_stranger = app
            .clone()
            .oneshot(request("GET", &uri, Some((UserId::new(), Role::Guest)), None))
            .await
            .unwrap();
        assert_eq!(as_stranger.status(), StatusCode::NOT_FOUND);

        let unknown = app
            .oneshot(request("GET", &format!("/api/v1/conversations/{}", Uuid::new_v4()), Some(owner), None))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
