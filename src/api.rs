// 🌐 HTTP surface - POST /ai/process-command, GET /api/health

use crate::gateway::CancelSignal;
use crate::interpreter::{CommandInterpreter, CommandResponse};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub interpreter: CommandInterpreter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default)]
    pub voice_command: Option<String>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /ai/process-command - run one voice command through the pipeline
async fn process_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Response {
    let voice_command = match payload {
        Ok(Json(request)) => request
            .voice_command
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable command body");
            None
        }
    };

    let Some(voice_command) = voice_command else {
        return (
            StatusCode::BAD_REQUEST,
            Json(CommandResponse::error("voiceCommand is required")),
        )
            .into_response();
    };

    // A client disconnect drops this future, which aborts the pipeline; no
    // signal is raised, so the pre-write cancel check never fires here
    let outcome = state
        .interpreter
        .process(&voice_command, &CancelSignal::never())
        .await;

    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.to_response())).into_response()
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .route("/ai/process-command", post(process_command))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::seeded_store;
    use crate::db::SqliteStore;
    use crate::gateway::tests::FlakyProvider;
    use crate::gateway::RetryPolicy;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(store: &SqliteStore, provider: FlakyProvider) -> Router {
        let interpreter = CommandInterpreter::from_parts(
            Arc::new(provider),
            Arc::new(store.clone()),
            RetryPolicy::new(),
        );
        create_router(AppState { interpreter })
    }

    async fn post_command(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ai/process-command")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_voice_command_is_400() {
        let (store, _, _) = seeded_store();

        for body in [r#"{}"#, r#"{"voiceCommand":"   "}"#, "not json"] {
            let (status, json) = post_command(app(&store, FlakyProvider::replying("AMBIGUOUS")), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(json["status"], "error");
            assert_eq!(json["message"], "voiceCommand is required");
        }
    }

    #[tokio::test]
    async fn test_ambiguous_is_200() {
        let (store, _, _) = seeded_store();
        let (status, json) = post_command(
            app(&store, FlakyProvider::replying("AMBIGUOUS")),
            r#"{"voiceCommand":"do the thing"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ambiguous");
        assert_eq!(json["aiInstruction"], "AMBIGUOUS");
        assert_eq!(store.payment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_successful_add() {
        let (store, _, _) = seeded_store();
        let (status, json) = post_command(
            app(
                &store,
                FlakyProvider::replying(
                    "Add payment for John Doe on Home loan with amount 1,250.50, method bank transfer, status pending, date 05/01/2025",
                ),
            ),
            r#"{"voiceCommand":"john doe paid 1250.50 by bank transfer"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["result"]["action"], "add");
        assert_eq!(json["result"]["message"], "Payment added successfully");
        assert_eq!(json["result"]["doc"]["paymentMethod"], "Bank Transfer");
        assert_eq!(json["result"]["doc"]["paymentDate"], "2025-01-05");
        assert_eq!(store.payment_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_404() {
        let (store, _, _) = seeded_store();
        let (status, json) = post_command(
            app(
                &store,
                FlakyProvider::replying("delete payment for John Doe on Home loan where status is Pending"),
            ),
            r#"{"voiceCommand":"remove the pending one"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Payment not found");
        assert!(json["aiInstruction"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_is_500() {
        let (store, _, _) = seeded_store();
        let (status, json) = post_command(
            app(&store, FlakyProvider::new(3, "unused")),
            r#"{"voiceCommand":"add a payment"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().starts_with("AI call failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_health() {
        let (store, _, _) = seeded_store();
        let response = app(&store, FlakyProvider::replying("AMBIGUOUS"))
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["data"], "OK");
    }
}
