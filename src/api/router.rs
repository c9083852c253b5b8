//! Router assembly and OpenAPI document.

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers::{self, AppState};
use crate::api::models::{
    ChatMessage, ErrorResponse, GenerateRequest, GenerateResponse, HealthResponse,
    TranscribeRequest, TranscribeResponse,
};
use crate::core::middleware::{request_id_middleware, MetricsMiddleware};
use crate::core::AppError;

/// OpenAPI documentation for the relay endpoints.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::index,
        handlers::health,
        handlers::generate,
        handlers::transcribe,
    ),
    components(
        schemas(
            GenerateRequest,
            ChatMessage,
            GenerateResponse,
            TranscribeRequest,
            TranscribeResponse,
            ErrorResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "relay", description = "Reply generation and audio transcription"),
        (name = "health", description = "Liveness endpoints")
    ),
    info(
        title = "AutoReply Proxy API",
        description = "Relay between the browser extension and the language model provider"
    )
)]
pub struct ApiDoc;

/// Build the application router with all endpoints and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let swagger_ui = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    let relay_routes = Router::new()
        .route("/generate", post(handlers::generate))
        .route("/transcribe", post(handlers::transcribe))
        .with_state(state);

    Router::new()
        .merge(swagger_ui)
        .merge(relay_routes)
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Render a handler panic as the standard error envelope.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %message, "Handler panicked");
    AppError::Internal(message).into_response()
}
