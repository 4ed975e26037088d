use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::Vendor;
use serde_json::{Map, Value};

/// Severity attached to errors surfaced to the external web app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One quotation attempt against a vendor portal.
///
/// The runtime drives the lifecycle: `setup`, then `run` under the job
/// timeout, then `teardown` on every exit path. `run` returns `true` when a
/// quotation was produced; raising an error routes the job through the retry
/// pipeline. Blocking browser work belongs on a blocking thread
/// (`tokio::task::spawn_blocking`) so the I/O loop stays responsive.
#[async_trait]
pub trait QuoteHandler: Send {
    async fn setup(&mut self) -> anyhow::Result<()>;

    async fn run(&mut self) -> anyhow::Result<bool>;

    async fn teardown(&mut self);

    /// Surface a structured error to the external web app. Only invoked in
    /// production environments.
    async fn report_error(&self, error_code: &str, message: &str, severity: ErrorSeverity);
}

/// Builds a handler for one `(job_id, payload)` pair.
pub type HandlerFactory =
    Arc<dyn Fn(String, Map<String, Value>) -> Box<dyn QuoteHandler> + Send + Sync>;

/// Explicit vendor-to-factory table, filled at composition-root time.
///
/// There is no reflective lookup at message arrival: a vendor without an
/// entry here gets its messages dropped with a warning.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    factories: HashMap<Vendor, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, vendor: Vendor, factory: F)
    where
        F: Fn(String, Map<String, Value>) -> Box<dyn QuoteHandler> + Send + Sync + 'static,
    {
        self.factories.insert(vendor, Arc::new(factory));
    }

    pub fn contains(&self, vendor: Vendor) -> bool {
        self.factories.contains_key(&vendor)
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Factory for the vendor, or `None` when no bot exists.
    pub fn factory(&self, vendor: Vendor) -> Option<HandlerFactory> {
        self.factories.get(&vendor).cloned()
    }

    /// Instantiate a handler for the vendor, or `None` when no bot exists.
    pub fn build(
        &self,
        vendor: Vendor,
        job_id: &str,
        payload: &Map<String, Value>,
    ) -> Option<Box<dyn QuoteHandler>> {
        self.factories
            .get(&vendor)
            .map(|factory| factory(job_id.to_string(), payload.clone()))
    }

    /// Vendors with a registered bot, for startup logging.
    pub fn vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self.factories.keys().copied().collect();
        vendors.sort_by_key(|v| v.as_str());
        vendors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl QuoteHandler for NoopHandler {
        async fn setup(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn run(&mut self) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn teardown(&mut self) {}
        async fn report_error(&self, _code: &str, _message: &str, _severity: ErrorSeverity) {}
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Vendor::Hdi, |_job_id, _payload| Box::new(NoopHandler));
        assert!(registry.contains(Vendor::Hdi));
        assert!(!registry.contains(Vendor::Sura));
        assert_eq!(registry.vendors(), vec![Vendor::Hdi]);
    }

    #[test]
    fn test_registry_builds_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Vendor::Sbs, |_job_id, _payload| Box::new(NoopHandler));

        let payload = Map::new();
        assert!(registry.build(Vendor::Sbs, "job-1", &payload).is_some());
        assert!(registry.build(Vendor::Axa, "job-1", &payload).is_none());
    }
}
