//! HTTP ingress: `POST /api/v1/events` and `GET /health`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::normalize::normalize;
use crate::EventPublisher;

pub struct AppState {
    pub publisher: Arc<dyn EventPublisher>,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/events", post(ingest_events))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Single object or array; 202 on enqueue, 400 on parse failure, 503 when
/// the publish buffer rejects.
async fn ingest_events(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "unparseable ingest payload");
            return bad_request("invalid JSON");
        }
    };

    let items: Vec<&Value> = match &payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    if items.is_empty() {
        return bad_request("empty batch");
    }

    let mut events = Vec::with_capacity(items.len());
    for item in items {
        match normalize(item) {
            Ok(evt) => events.push(evt),
            Err(err) => {
                debug!(error = %err, "event normalization failed");
                return bad_request("invalid event format");
            }
        }
    }

    let accepted = events.len();
    for event in events {
        if state.publisher.try_publish(event).is_err() {
            warn!("publish buffer full, shedding ingest request");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "event bus backlogged"})),
            )
                .into_response();
        }
    }

    (StatusCode::ACCEPTED, Json(json!({"accepted": accepted}))).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    if state.publisher.healthy() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "bus disconnected").into_response()
    }
}

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::util::ServiceExt;
    use vigil_core::Event;
    use vigil_fabric::PublishRejected;

    #[derive(Default)]
    struct StubPublisher {
        full: AtomicBool,
        events: Mutex<Vec<Event>>,
    }

    impl EventPublisher for StubPublisher {
        fn try_publish(&self, event: Event) -> Result<(), PublishRejected> {
            if self.full.load(Ordering::Relaxed) {
                return Err(PublishRejected);
            }
            self.events.lock().push(event);
            Ok(())
        }

        fn healthy(&self) -> bool {
            !self.full.load(Ordering::Relaxed)
        }
    }

    fn app(publisher: Arc<StubPublisher>) -> Router {
        router(Arc::new(AppState { publisher }), 10 * 1024 * 1024)
    }

    fn post_events(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_event_accepted() {
        let publisher = Arc::new(StubPublisher::default());
        let response = app(Arc::clone(&publisher))
            .oneshot(post_events(r#"{"source":"agent","severity":"low"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(publisher.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_accepted() {
        let publisher = Arc::new(StubPublisher::default());
        let response = app(Arc::clone(&publisher))
            .oneshot(post_events(r#"[{"source":"a"},{"source":"b"},{"source":"c"}]"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(publisher.events.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_json_is_400() {
        let publisher = Arc::new(StubPublisher::default());
        let response = app(Arc::clone(&publisher))
            .oneshot(post_events("{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_full_buffer_is_503_and_nothing_published() {
        let publisher = Arc::new(StubPublisher::default());
        publisher.full.store(true, Ordering::Relaxed);
        let response = app(Arc::clone(&publisher))
            .oneshot(post_events(r#"{"source":"agent"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(publisher.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_health_reflects_bus_state() {
        let publisher = Arc::new(StubPublisher::default());
        let response = app(Arc::clone(&publisher))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let publisher = Arc::new(StubPublisher::default());
        publisher.full.store(true, Ordering::Relaxed);
        let response = app(Arc::clone(&publisher))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
