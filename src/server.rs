//! HTTP surface: the mirror trigger endpoint and a health probe.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::SupportError;
use crate::mirror::SyncStats;

pub const SYNC_PATH: &str = "/functions/v1/sync-subscribers";

/// Whatever can run one mirror pass on request.
#[async_trait]
pub trait MirrorRunner: Send + Sync {
    async fn run_mirror(&self) -> Result<SyncStats, SupportError>;
}

#[derive(Clone)]
pub struct TriggerState {
    /// Requests are refused while no token is configured.
    pub token: Option<String>,
    pub runner: Arc<dyn MirrorRunner>,
}

pub fn build_router(state: TriggerState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
        tracing::info_span!(
            "http.request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    Router::new()
        .route(SYNC_PATH, post(sync_subscribers))
        .route("/health", get(health))
        .layer(trace_layer)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected.map(str::trim).filter(|t| !t.is_empty()) else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

async fn sync_subscribers(State(state): State<TriggerState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, state.token.as_deref()) {
        log::warn!("Sync trigger: rejected request without a valid token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Unauthorized" })),
        )
            .into_response();
    }

    match state.runner.run_mirror().await {
        Ok(stats) => {
            log::info!(
                "Sync trigger: run completed ({} inserted, {} updated, {} deleted)",
                stats.inserted,
                stats.updated,
                stats.deleted
            );
            let message = match stats.partial_failure() {
                Some(partial) => format!("Synchronization completed with errors: {}", partial.user_message()),
                None => "Synchronization completed".to_string(),
            };
            (
                StatusCode::OK,
                Json(json!({ "success": true, "message": message, "stats": stats })),
            )
                .into_response()
        }
        Err(e) => {
            log::error!("Sync trigger: run failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.user_message() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct FakeRunner {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MirrorRunner for FakeRunner {
        async fn run_mirror(&self) -> Result<SyncStats, SupportError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SupportError::Upstream {
                    status: 503,
                    reason: "Service Unavailable".to_string(),
                    body: "maintenance window".to_string(),
                });
            }
            Ok(SyncStats {
                total_source: 3,
                inserted: 1,
                updated: 2,
                deleted: 0,
                failed_updates: 0,
                truncated: false,
            })
        }
    }

    fn app(fail: bool, token: Option<&str>) -> (Router, Arc<FakeRunner>) {
        let runner = Arc::new(FakeRunner {
            runs: AtomicUsize::new(0),
            fail,
        });
        let state = TriggerState {
            token: token.map(str::to_string),
            runner: runner.clone(),
        };
        (build_router(state), runner)
    }

    fn trigger(method: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(SYNC_PATH);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_trigger_runs_mirror_and_reports_stats() {
        let (app, runner) = app(false, Some("s3cret"));
        let response = app.oneshot(trigger("POST", Some("Bearer s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["total_source"], 3);
        assert_eq!(body["stats"]["updated"], 2);
        assert_eq!(body["stats"]["failed_updates"], 0);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_rejects_bad_or_missing_token() {
        let (app, runner) = app(false, Some("s3cret"));
        let response = app
            .clone()
            .oneshot(trigger("POST", Some("Bearer wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.oneshot(trigger("POST", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trigger_refused_when_no_token_configured() {
        let (app, runner) = app(false, None);
        let response = app.oneshot(trigger("POST", Some("Bearer "))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trigger_other_methods_not_allowed() {
        let (app, _runner) = app(false, Some("s3cret"));
        let response = app.oneshot(trigger("GET", Some("Bearer s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_failed_run_returns_500_without_upstream_body() {
        let (app, _runner) = app(true, Some("s3cret"));
        let response = app.oneshot(trigger("POST", Some("Bearer s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(!body["error"].as_str().unwrap().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _runner) = app(false, None);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}
