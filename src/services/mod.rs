pub mod attribution;
pub mod dispatcher;
pub mod locks;
pub mod notifier;
pub mod webhook_pipeline;
pub mod worker;
