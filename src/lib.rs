//! ethereum-events routes decoded smart-contract logs to user-supplied handlers.
//!
//! The core ingests state-change logs emitted by monitored contracts and invokes a handler
//! once per observed occurrence, tolerating handler failures and node unavailability without
//! losing or duplicating progress.
//!
//! # Architecture
//!
//! - [`EventRegistry`] maps (contract address, event signature) to a decoding schema and a
//!   handler locator, with live add/remove.
//! - [`Decoder`] keeps the in-memory watch index and turns raw logs into typed
//!   [`DecodedEvent`] records.
//! - The scanner ([`scanner`]) discovers the pending block range and retrieves candidate
//!   logs, either through server-side filters or a per-block receipt walk.
//! - [`Dispatcher`] invokes handlers with per-event failure isolation; a raised invocation
//!   becomes a durable [`FailedEventRecord`] for manual replay.
//! - [`EventListener`] coordinates a run: the overlap guard, the checkpoint [`Cursor`] and
//!   the error cursor.
//!
//! # Delivery guarantees
//!
//! A block is only marked processed once every watched log in it was decoded and handed to
//! dispatch; handler failures do not block the cursor. Handlers therefore see each event at
//! least once and are never assumed idempotent by the core. The durable failure record is
//! the replay mechanism for invocations that raised.
//!
//! # Live reconfiguration
//!
//! Registry mutations (possibly from another process) raise a shared cache flag which the
//! scan polls once per unit, so edits made mid-run take effect at the next unit boundary
//! without restarting the run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ethereum_events::{
//!     DecodedEvent, EventHandler, EventListener, HandlerError, HandlerRegistry, ListenerConfig,
//!     RpcNodeClient,
//! };
//! use alloy::providers::ProviderBuilder;
//! use async_trait::async_trait;
//!
//! struct DepositHandler;
//!
//! #[async_trait]
//! impl EventHandler for DepositHandler {
//!     async fn save(&self, event: &DecodedEvent) -> Result<(), HandlerError> {
//!         println!("deposit at block {}", event.block_number);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ProviderBuilder::new().connect("http://localhost:8545").await?;
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register("deposits", Arc::new(DepositHandler));
//!
//! let mut listener = EventListener::builder(Arc::new(RpcNodeClient::new(provider)))
//!     .handlers(handlers)
//!     .config(ListenerConfig::default())
//!     .build()?;
//!
//! listener.registry().register(
//!     "Deposit",
//!     "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
//!     r#"[{"anonymous":false,"inputs":[{"indexed":true,"name":"from","type":"address"},
//!         {"indexed":false,"name":"amount","type":"uint256"}],"name":"Deposit","type":"event"}]"#,
//!     "deposits",
//! )?;
//!
//! // Invoked periodically by an external scheduler; overlapping runs skip themselves.
//! listener.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod json;
pub mod listener;
pub mod node;
pub mod registry;
pub mod scanner;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use decoder::{DecodedEvent, Decoder};
pub use dispatcher::{DispatchReport, Dispatcher, FailedEventRecord};
pub use error::{DecodeError, FetchError, ValidationError};
pub use handler::{EventHandler, HandlerError, HandlerRegistry};
pub use listener::{EventListener, EventListenerBuilder, ListenerConfig, RunOutcome};
pub use node::{BlockInfo, NodeClient, ReceiptInfo, RpcNodeClient};
pub use registry::{ContractAbi, EventRegistry, MonitoredEvent};
pub use scanner::{
    pending_range, FilterRetrieval, PendingUnits, RetrievalMode, RetrievalStrategy,
    WalkRetrieval, DEFAULT_BATCH_SIZE,
};
pub use store::{
    Cursor, CursorStore, EventStore, FailureStore, MemoryStore, SharedCache,
    REGISTRY_CHANGED_KEY, RUN_LOCK_KEY,
};
