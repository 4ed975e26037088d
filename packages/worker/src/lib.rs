pub mod activity_log;
pub mod config;
pub mod cookies;
pub mod error;
pub mod handler;
pub mod janitor;
pub mod resources;
pub mod retry;
pub mod runtime;

pub use config::WorkerAppConfig;
pub use error::WorkerError;
pub use handler::{ErrorSeverity, HandlerRegistry, QuoteHandler};
pub use resources::{ResourceController, ResourceUnavailable};
pub use runtime::WorkerRuntime;
