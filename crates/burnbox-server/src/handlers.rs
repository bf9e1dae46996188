use std::fmt;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{error::SecretError, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub content: Option<String>,
    pub expiration_date: DateTime<Utc>,
    pub public_pin: Option<String>,
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("content", &"******")
            .field("expiration_date", &self.expiration_date)
            .field("public_pin", &"******")
            .finish()
    }
}

pub async fn create_secret(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "rejected create request body");
            return (
                rejection.status(),
                Json(json!({"error": "Invalid request body"})),
            )
                .into_response();
        }
    };
    let Some(content) = non_blank(body.content.as_deref()) else {
        return error_response(&SecretError::Validation("Content is required"));
    };
    let Some(pin) = non_blank(body.public_pin.as_deref()) else {
        return error_response(&SecretError::Validation("Public pin is required"));
    };

    match state
        .service
        .create_secret(content, body.expiration_date, pin)
        .await
    {
        Ok(id) => Json(id.to_string()).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Retrieve ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RetrieveParams {
    pub pin: Option<String>,
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RetrieveParams>,
) -> Response {
    let Some(pin) = non_blank(params.pin.as_deref()) else {
        return error_response(&SecretError::Validation("Pin is required"));
    };

    match state.service.retrieve_secret(&id, pin).await {
        Ok(secret) => Json(json!({ "secret": secret })).into_response(),
        Err(e) => error_response(&e),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn error_response(e: &SecretError) -> Response {
    if e.is_internal() {
        tracing::error!(error = %e, "internal error");
    }
    (e.status_code(), Json(json!({"error": e.public_message()}))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::TimeDelta;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::server::router;
    use crate::service::SecretService;
    use crate::store::crypto::TEST_COST;
    use crate::store::{Cipher, MemoryStore, Scheme};
    use crate::AppState;

    use super::*;

    fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let cipher = Cipher::new(Scheme::Sealed).with_cost(TEST_COST);
        router(
            AppState {
                service: SecretService::new(store, cipher),
            },
            None,
        )
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn create(content: &str, expires: DateTime<Utc>, pin: &str) -> Request<Body> {
        let body = json!({
            "content": content,
            "expirationDate": expires.to_rfc3339(),
            "publicPin": pin,
        });
        Request::builder()
            .method("POST")
            .uri("/api/secret")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(id: &str, pin: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/secret/{id}?pin={pin}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_read_once() {
        let app = app();
        let (status, body) = send(
            &app,
            create("hello", Utc::now() + TimeDelta::minutes(10), "123456"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body.as_str().unwrap().to_owned();
        assert_eq!(id.len(), 32);

        let (status, body) = send(&app, get(&id, "123456")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["secret"], "hello");

        let (status, body) = send(&app, get(&id, "123456")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Secret not found");
    }

    #[tokio::test]
    async fn create_rejects_blank_fields_and_past_dates() {
        let app = app();
        let future = Utc::now() + TimeDelta::minutes(1);

        let (status, body) = send(&app, create("  ", future, "1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Content is required");

        let (status, body) = send(&app, create("x", future, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Public pin is required");

        let (status, body) = send(&app, create("b", Utc::now() - TimeDelta::seconds(1), "1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Expiration date is in the past");
    }

    #[tokio::test]
    async fn malformed_create_body_gets_json_error() {
        let app = app();
        let post = |body: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/secret")
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .unwrap()
        };

        let (status, body) = send(&app, post("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request body");

        let (status, body) = send(&app, post(r#"{"content":"x","publicPin":"1"}"#)).await;
        assert!(status.is_client_error());
        assert_eq!(body["error"], "Invalid request body");
        assert!(!body.to_string().contains("expirationDate"));
    }

    #[tokio::test]
    async fn retrieve_maps_client_errors() {
        let app = app();
        let (_, body) = send(&app, create("v", Utc::now() + TimeDelta::minutes(1), "42")).await;
        let id = body.as_str().unwrap().to_owned();

        let (status, body) = send(&app, get("not-an-id", "42")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid secret id");

        let (status, body) = send(&app, get(&id, "41")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid pin");

        let missing_pin = Request::builder()
            .uri(format!("/api/secret/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, missing_pin).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Still there after the failed attempts.
        let (status, body) = send(&app, get(&id, "42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["secret"], "v");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn create_request_debug_masks_secrets() {
        let req = CreateRequest {
            content: Some("top secret".into()),
            expiration_date: Utc::now(),
            public_pin: Some("9876".into()),
        };
        let shown = format!("{req:?}");
        assert!(!shown.contains("top secret"));
        assert!(!shown.contains("9876"));
    }
}
