use crate::domain::error::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// The provider only looks at the status code: anything but 2xx is
/// redelivered. The body is always the literal `ERROR`.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Transport(_) => StatusCode::BAD_REQUEST,
            PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            PipelineError::Transport(msg) => tracing::warn!("rejected webhook body: {msg}"),
            PipelineError::Auth(msg) => tracing::warn!("webhook signature rejected: {msg}"),
            err => tracing::error!("webhook processing failed, provider will retry: {err}"),
        }

        (status, "ERROR").into_response()
    }
}
