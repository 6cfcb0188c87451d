use {
    crate::{AppState, adapters::api_errors::ApiError, domain::error::PipelineError},
    axum::{
        Router,
        body::Bytes,
        extract::{DefaultBodyLimit, State},
        routing::{get, post},
    },
    tower_http::trace::TraceLayer,
};

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhook", post(webhook_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Processing runs on its own task so a dropped connection cannot cancel a
/// half-applied event; the handler only waits for the verdict.
pub async fn webhook_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let body = String::from_utf8(body.to_vec())
        .map_err(|_| PipelineError::Transport("body is not UTF-8".into()))?;
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.process(&body).await });

    let outcome = task.await.map_err(|e| {
        PipelineError::downstream("pipeline", format!("processing task failed: {e}"))
    })??;

    tracing::debug!(status = outcome.status(), "webhook acknowledged");
    Ok("OK")
}
