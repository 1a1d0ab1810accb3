//! Run coordination: the scan loop, overlap guard and checkpoint bookkeeping.
//!
//! The listener does not schedule time; an external scheduler invokes [`EventListener::run`]
//! periodically and the listener only guards against overlapping invocations. Within one run,
//! scanning is single threaded and strictly sequential by unit order: earlier units are fully
//! committed before later ones begin.

use std::{fmt, sync::Arc, time::SystemTime};

use serde::Deserialize;
use tracing::{error, info};

use crate::{
    decoder::Decoder,
    dispatcher::Dispatcher,
    error::{FetchError, ValidationError},
    handler::HandlerRegistry,
    node::NodeClient,
    registry::EventRegistry,
    scanner::{PendingUnits, RetrievalMode, RetrievalStrategy, DEFAULT_BATCH_SIZE},
    store::{
        CursorStore, EventStore, FailureStore, MemoryStore, SharedCache, REGISTRY_CHANGED_KEY,
        RUN_LOCK_KEY,
    },
};

/// Listener configuration. Deserializable so processes can load it from their settings layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Ceiling on how many blocks a single run may claim.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Log retrieval strategy, fixed at startup.
    #[serde(default)]
    pub retrieval: RetrievalMode,
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, retrieval: RetrievalMode::default() }
    }
}

/// What a single invocation of [`EventListener::run`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run scanned (possibly zero) pending blocks to the head seen at start.
    Completed { blocks_processed: u64, events_dispatched: usize },
    /// Another run held the lock; nothing was done. Not an error.
    Skipped,
}

/// Scoped run lock over the shared cache; released unconditionally on drop, so an aborted
/// run can never leave the listener locked out.
struct RunLock {
    cache: Arc<dyn SharedCache>,
}

impl RunLock {
    fn acquire(cache: Arc<dyn SharedCache>) -> Option<Self> {
        cache.add_if_absent(RUN_LOCK_KEY, "locked").then_some(Self { cache })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.cache.remove(RUN_LOCK_KEY);
    }
}

/// The event listener: owns the cursor, the decoder and the scan loop.
pub struct EventListener {
    node: Arc<dyn NodeClient>,
    registry: EventRegistry,
    decoder: Decoder,
    dispatcher: Dispatcher,
    cursor: Arc<dyn CursorStore>,
    cache: Arc<dyn SharedCache>,
    strategy: Box<dyn RetrievalStrategy>,
    batch_size: u64,
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener").field("batch_size", &self.batch_size).finish_non_exhaustive()
    }
}

impl EventListener {
    #[must_use]
    pub fn builder(node: Arc<dyn NodeClient>) -> EventListenerBuilder {
        EventListenerBuilder::new(node)
    }

    /// The registry backing this listener, for runtime event registration.
    #[must_use]
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Performs one scan: drains all pending units between the checkpoint and the current
    /// head, dispatching decoded events along the way.
    ///
    /// The cursor is advanced and persisted per unit, only after dispatch for that unit has
    /// returned; handler failures never block advancement, only fetch/decode pipeline faults
    /// do. On such a fault the run aborts, the cursor stays at its last committed value and
    /// `last_error_block` marks the stuck point for operators.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] that aborted the run. The caller (typically a thin
    /// scheduler wrapper) should log it and wait for the next scheduled invocation.
    pub async fn run(&mut self) -> Result<RunOutcome, FetchError> {
        let Some(_lock) = RunLock::acquire(self.cache.clone()) else {
            info!("event listener is already running, skipping execution");
            return Ok(RunOutcome::Skipped);
        };

        match self.scan().await {
            Ok(outcome) => Ok(outcome),
            Err(fault) => {
                let mut cursor = self.cursor.load();
                let stuck_block = cursor.last_processed_block + 1;
                if cursor.last_error_block < stuck_block {
                    cursor.last_error_block = stuck_block;
                    cursor.updated_at = SystemTime::now();
                    self.cursor.save(&cursor);
                }
                error!(error = %fault, stuck_block, "run aborted, cursor left at last committed block");
                Err(fault)
            }
        }
    }

    async fn scan(&mut self) -> Result<RunOutcome, FetchError> {
        let head = self.node.head_block_number().await?;
        let mut cursor = self.cursor.load();
        let unit_size = self.strategy.unit_size(self.batch_size);

        let mut blocks_processed = 0u64;
        let mut events_dispatched = 0usize;

        for unit in PendingUnits::new(cursor.last_processed_block, head, unit_size) {
            let (unit_start, unit_end) = (*unit.start(), *unit.end());

            // Registry edits made while this run is in flight take effect here, at the unit
            // boundary. New events are stamped as monitored from this unit's start block.
            // The flag is cleared before the refresh snapshots the registry: a registration
            // committing while the snapshot is taken raises it again, so the next unit
            // re-refreshes instead of losing the edit.
            if self.cache.flag(REGISTRY_CHANGED_KEY) || self.decoder.is_empty() {
                self.cache.set_flag(REGISTRY_CHANGED_KEY, false);
                self.decoder.refresh(unit_start);
            }

            let watch = self.decoder.watch_keys();
            let raw_logs = self.strategy.fetch_logs(unit, &watch).await?;
            let events = self.decoder.decode_all(&raw_logs);
            let report = self.dispatcher.dispatch(&self.decoder, events).await;

            cursor.last_processed_block = unit_end;
            cursor.updated_at = SystemTime::now();
            self.cursor.save(&cursor);

            blocks_processed += unit_end - unit_start + 1;
            events_dispatched += report.dispatched;

            info!(
                from = unit_start,
                to = unit_end,
                logs = raw_logs.len(),
                dispatched = report.dispatched,
                failed = report.failed,
                "scan unit committed"
            );
        }

        Ok(RunOutcome::Completed { blocks_processed, events_dispatched })
    }

    /// Operational surface: resets the checkpoint to the given block and clears the error
    /// cursor. The next run rescans from `block + 1`.
    pub fn reset_cursor(&self, block: u64) {
        let mut cursor = self.cursor.load();
        cursor.last_processed_block = block;
        cursor.last_error_block = 0;
        cursor.updated_at = SystemTime::now();
        self.cursor.save(&cursor);
        info!(block, "cursor reset");
    }
}

/// Builder wiring the listener's collaborators together.
///
/// Stores default to a single shared [`MemoryStore`]; deployments with durable persistence
/// inject their own implementations per capability.
pub struct EventListenerBuilder {
    node: Arc<dyn NodeClient>,
    handlers: Arc<HandlerRegistry>,
    config: ListenerConfig,
    event_store: Option<Arc<dyn EventStore>>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    failure_store: Option<Arc<dyn FailureStore>>,
    shared_cache: Option<Arc<dyn SharedCache>>,
}

impl EventListenerBuilder {
    #[must_use]
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self {
            node,
            handlers: Arc::new(HandlerRegistry::new()),
            config: ListenerConfig::default(),
            event_store: None,
            cursor_store: None,
            failure_store: None,
            shared_cache: None,
        }
    }

    #[must_use]
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    #[must_use]
    pub fn cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    #[must_use]
    pub fn failure_store(mut self, store: Arc<dyn FailureStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    /// Wires the listener together.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBatchSize`] if the configured batch size is zero,
    /// so a bad settings value fails at startup instead of panicking mid-run.
    pub fn build(self) -> Result<EventListener, ValidationError> {
        if self.config.batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }

        let memory = Arc::new(MemoryStore::new());
        let event_store = self.event_store.unwrap_or_else(|| memory.clone());
        let cursor_store = self.cursor_store.unwrap_or_else(|| memory.clone());
        let failure_store = self.failure_store.unwrap_or_else(|| memory.clone());
        let shared_cache = self.shared_cache.unwrap_or_else(|| memory.clone());

        let registry =
            EventRegistry::new(event_store, shared_cache.clone(), self.handlers.clone());
        let decoder = Decoder::new(registry.clone());
        let dispatcher = Dispatcher::new(self.handlers, failure_store);
        let strategy = self.config.retrieval.into_strategy(self.node.clone());

        Ok(EventListener {
            node: self.node,
            registry,
            decoder,
            dispatcher,
            cursor: cursor_store,
            cache: shared_cache,
            strategy,
            batch_size: self.config.batch_size,
        })
    }
}
