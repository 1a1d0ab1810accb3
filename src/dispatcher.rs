//! Failure-isolated handler dispatch.

use std::sync::Arc;

use alloy::primitives::{Address, BlockNumber, B256};
use serde::Serialize;
use tracing::{error, trace};

use crate::{
    decoder::{DecodedEvent, Decoder},
    handler::HandlerRegistry,
    json,
    store::FailureStore,
};

/// Durable record of a handler invocation that raised, intended for manual replay.
///
/// Never mutated after creation. The payload carries the full decoded event so the record
/// can be replayed without re-fetching the chain.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEventRecord {
    pub event_name: String,
    pub handler: String,
    pub address: Address,
    pub topic: B256,
    pub block_number: BlockNumber,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub payload: serde_json::Value,
    pub reason: String,
}

/// Counters returned by a dispatch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub failed: usize,
}

/// Resolves a handler for each decoded event and invokes it, isolating failures.
///
/// Dispatch failures never abort the batch and never prevent cursor advancement; each raised
/// invocation produces exactly one [`FailedEventRecord`].
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    failures: Arc<dyn FailureStore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>, failures: Arc<dyn FailureStore>) -> Self {
        Self { handlers, failures }
    }

    /// Dispatches the given events strictly in input order.
    ///
    /// An unresolvable handler locator is treated the same as a handler exception: recorded,
    /// logged, and skipped.
    pub async fn dispatch(&self, decoder: &Decoder, events: Vec<DecodedEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for event in events {
            let locator = match decoder.monitored_for(event.address, event.topic) {
                Some(monitored) => monitored.handler.clone(),
                None => {
                    // The watch index changed between decode and dispatch; fail the event
                    // like an unresolvable handler rather than dropping it silently.
                    self.record_failure(
                        &event,
                        "<unknown>",
                        "no monitored event for (address, topic)",
                        &mut report,
                    );
                    continue;
                }
            };

            match self.handlers.resolve(&locator) {
                Some(handler) => match handler.save(&event).await {
                    Ok(()) => {
                        trace!(
                            event = %event.name,
                            block = event.block_number,
                            log_index = event.log_index,
                            "event dispatched"
                        );
                        report.dispatched += 1;
                    }
                    Err(err) => {
                        self.record_failure(&event, &locator, &err.to_string(), &mut report);
                    }
                },
                None => {
                    self.record_failure(
                        &event,
                        &locator,
                        "handler locator did not resolve",
                        &mut report,
                    );
                }
            }
        }

        report
    }

    fn record_failure(
        &self,
        event: &DecodedEvent,
        handler: &str,
        reason: &str,
        report: &mut DispatchReport,
    ) {
        error!(
            event = %event.name,
            handler,
            block = event.block_number,
            transaction = %event.transaction_hash,
            log_index = event.log_index,
            reason,
            "handler failed, recording event for replay"
        );
        self.failures.record(FailedEventRecord {
            event_name: event.name.clone(),
            handler: handler.to_owned(),
            address: event.address,
            topic: event.topic,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash,
            log_index: event.log_index,
            payload: json::event_payload(event),
            reason: reason.to_owned(),
        });
        report.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{EventHandler, HandlerError},
        registry::EventRegistry,
        store::MemoryStore,
        test_utils::{deposit_log, DEPOSIT_ABI},
    };
    use alloy::primitives::{address, U256};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONTRACT: Address = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
    const SENDER: Address = address!("00000000000000000000000000000000000000aa");

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn save(&self, _event: &DecodedEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    fn fixture(fail: bool) -> (Dispatcher, Decoder, Arc<MemoryStore>, Arc<CountingHandler>) {
        let store = Arc::new(MemoryStore::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail });
        handlers.register("deposits", handler.clone());

        let registry = EventRegistry::new(store.clone(), store.clone(), handlers.clone());
        registry
            .register("Deposit", &CONTRACT.to_string(), DEPOSIT_ABI, "deposits")
            .unwrap();
        let mut decoder = Decoder::new(registry);
        decoder.refresh(1);

        (Dispatcher::new(handlers, store.clone()), decoder, store, handler)
    }

    #[tokio::test]
    async fn dispatches_events_in_order() {
        let (dispatcher, decoder, store, handler) = fixture(false);

        let logs = vec![
            deposit_log(CONTRACT, SENDER, U256::from(1u64), 5, 0, 0),
            deposit_log(CONTRACT, SENDER, U256::from(2u64), 5, 0, 1),
        ];
        let events = decoder.decode_all(&logs);
        let report = dispatcher.dispatch(&decoder, events).await;

        assert_eq!(report, DispatchReport { dispatched: 2, failed: 0 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(FailureStore::all(store.as_ref()).is_empty());
    }

    #[tokio::test]
    async fn raising_handler_yields_one_failure_record_per_invocation() {
        let (dispatcher, decoder, store, handler) = fixture(true);

        let logs = vec![
            deposit_log(CONTRACT, SENDER, U256::from(1u64), 5, 0, 0),
            deposit_log(CONTRACT, SENDER, U256::from(2u64), 6, 0, 0),
        ];
        let events = decoder.decode_all(&logs);
        let report = dispatcher.dispatch(&decoder, events).await;

        assert_eq!(report, DispatchReport { dispatched: 0, failed: 2 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        let failures = FailureStore::all(store.as_ref());
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].event_name, "Deposit");
        assert_eq!(failures[0].handler, "deposits");
        assert_eq!(failures[0].reason, "boom");
        assert_eq!(failures[0].block_number, 5);
        assert_eq!(failures[0].payload["args"]["amount"], "1");
    }
}
