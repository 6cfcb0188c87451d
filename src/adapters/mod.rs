pub mod api_errors;
pub mod notification;
pub mod provider_client;
pub mod webhook;
