//! Post-request callbacks
//!
//! Every terminal batch outcome is handed to exactly one [`PostRequestCallback`].
//! Callbacks are looked up by name in a [`CallbackRegistry`] when the sink starts.

pub mod email;
pub mod logger;
pub mod stdout;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::{SinkError, SinkResult};
use crate::sink::DispatchReport;

pub use email::{EmailCallback, EmailConfig};
pub use logger::LoggerCallback;
pub use stdout::StdoutCallback;

/// Receives the terminal outcome of every batch
///
/// Invoked from dispatch tasks while the batch still holds its in-flight slot, so
/// slow callbacks apply backpressure. Failures inside a callback are its own to log.
#[async_trait]
pub trait PostRequestCallback: Send + Sync {
    fn name(&self) -> &str;

    async fn on_complete(&self, report: &DispatchReport);
}

type CallbackFactory = Box<dyn Fn() -> SinkResult<Arc<dyn PostRequestCallback>> + Send + Sync>;

/// Named callback factories
pub struct CallbackRegistry {
    factories: BTreeMap<String, CallbackFactory>,
}

impl CallbackRegistry {
    /// Registry without any callback
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with `logger`, `stdout` and `email`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(logger::NAME, || Ok(Arc::new(LoggerCallback)));
        registry.register(stdout::NAME, || Ok(Arc::new(StdoutCallback::new())));
        registry.register(email::NAME, || {
            let config = EmailConfig::from_env()?;
            Ok(Arc::new(EmailCallback::new(config)?))
        });
        registry
    }

    /// Register a factory, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> SinkResult<Arc<dyn PostRequestCallback>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the callback registered under `name`
    pub fn create(&self, name: &str) -> SinkResult<Arc<dyn PostRequestCallback>> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => Err(SinkError::config(format!(
                "Unknown request callback '{}', available: {}",
                name,
                self.names().join(", ")
            ))),
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::RecordingCallback;

    #[test]
    fn test_builtins_are_registered() {
        let registry = CallbackRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["email", "logger", "stdout"]);
        assert_eq!(registry.create("logger").unwrap().name(), "logger");
        assert_eq!(registry.create("stdout").unwrap().name(), "stdout");
    }

    #[test]
    fn test_unknown_callback_lists_available_names() {
        let registry = CallbackRegistry::with_builtins();
        let err = registry.create("webhook").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("Unknown request callback 'webhook'"));
        assert!(message.contains("logger"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = CallbackRegistry::empty();
        registry.register("recording", || Ok(Arc::new(RecordingCallback::new())));
        assert_eq!(registry.create("recording").unwrap().name(), "recording");
        assert!(registry.create("logger").is_err());
    }
}
