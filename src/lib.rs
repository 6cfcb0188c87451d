pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {services::webhook_pipeline::WebhookPipeline, std::sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<WebhookPipeline>,
}
