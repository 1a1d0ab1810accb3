//! The handler capability exposed to client code.
//!
//! Every monitored event names a handler by a string locator. Locators are resolved through a
//! [`HandlerRegistry`] and validated when the event is registered, so a misconfigured locator
//! fails fast instead of surfacing mid-scan.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::decoder::DecodedEvent;

/// Error type handlers may return. The core never inspects it beyond logging and recording.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer of decoded events.
///
/// Implementations may perform blocking I/O and are not time-bounded by the core; a hanging
/// handler stalls the whole run. The core guarantees at-least-once invocation per observed
/// event and must not assume `save` is idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn save(&self, event: &DecodedEvent) -> Result<(), HandlerError>;
}

/// Maps handler locator strings to handler instances.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under the given locator, replacing any previous one.
    pub fn register(&self, locator: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.write().insert(locator.into(), handler);
    }

    /// Resolves a locator to its handler instance.
    #[must_use]
    pub fn resolve(&self, locator: &str) -> Option<Arc<dyn EventHandler>> {
        self.read().get(locator).cloned()
    }

    /// Whether a handler is registered under the given locator.
    #[must_use]
    pub fn contains(&self, locator: &str) -> bool {
        self.read().contains_key(locator)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn EventHandler>>> {
        self.handlers.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn EventHandler>>> {
        self.handlers.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
