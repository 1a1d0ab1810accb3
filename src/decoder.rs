//! Raw-log decoding against the watch index.

use std::collections::HashMap;

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    primitives::{Address, BlockNumber, B256},
    rpc::types::Log,
};
use tracing::{trace, warn};

use crate::{
    error::DecodeError,
    registry::{EventRegistry, MonitoredEvent},
};

/// A typed, decoded occurrence of a monitored event.
///
/// Produced by the [`Decoder`], consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub name: String,
    pub address: Address,
    pub topic: B256,
    pub block_number: BlockNumber,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Decoded parameters in ABI-declared order, indexed and non-indexed interleaved back
    /// into their original positions.
    pub args: Vec<(String, DynSolValue)>,
}

/// Holds the in-memory watch index and decodes raw logs into [`DecodedEvent`]s.
///
/// The watch index is a pure function of the registry contents as of the last
/// [`refresh`](Decoder::refresh); registry edits are only observed through a refresh, never
/// mid-batch.
pub struct Decoder {
    registry: EventRegistry,
    watch: HashMap<(Address, B256), MonitoredEvent>,
}

impl Decoder {
    #[must_use]
    pub fn new(registry: EventRegistry) -> Self {
        Self { registry, watch: HashMap::new() }
    }

    /// Atomically rebuilds the watch index from the registry.
    ///
    /// Every listed event that has never been observed by a scan gets its `monitored_from`
    /// stamped with `current_block` (the start of the scan unit triggering the refresh), so a
    /// later replay never claims pre-registration history was covered.
    pub fn refresh(&mut self, current_block: BlockNumber) {
        let mut watch = HashMap::new();
        for mut monitored in self.registry.list() {
            if monitored.monitored_from.is_none() {
                self.registry.stamp_monitored_from(
                    monitored.address,
                    monitored.topic,
                    current_block,
                );
                monitored.monitored_from = Some(current_block);
            }
            watch.insert((monitored.address, monitored.topic), monitored);
        }
        self.watch = watch;
        trace!(watched = self.watch.len(), current_block, "watch index refreshed");
    }

    /// Whether the watch index has never been built or watches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watch.is_empty()
    }

    /// The distinct (address, topic) pairs currently watched.
    #[must_use]
    pub fn watch_keys(&self) -> Vec<(Address, B256)> {
        self.watch.keys().copied().collect()
    }

    /// The monitored event matching (address, topic), if any.
    #[must_use]
    pub fn monitored_for(&self, address: Address, topic: B256) -> Option<&MonitoredEvent> {
        self.watch.get(&(address, topic))
    }

    /// Decodes a single raw log.
    ///
    /// Returns `Ok(None)` when the log's (address, topics[0]) is not in the watch index: a
    /// filter miss, not an error, since upstream retrieval may be coarser than the exact
    /// watch set. A log that matches the index but cannot be decoded against its schema is a
    /// real [`DecodeError`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the matched schema rejects the log payload.
    pub fn decode(&self, log: &Log) -> Result<Option<DecodedEvent>, DecodeError> {
        let address = log.inner.address;
        let topics = log.inner.data.topics();
        let Some(topic) = topics.first().copied() else {
            return Ok(None);
        };
        let Some(monitored) = self.watch.get(&(address, topic)) else {
            return Ok(None);
        };

        let decoded = monitored
            .event
            .decode_log_parts(topics.iter().copied(), log.inner.data.data.as_ref())
            .map_err(|source| DecodeError {
                event: monitored.name.clone(),
                block_number: log.block_number.unwrap_or_default(),
                source,
            })?;

        // decode_log_parts splits values into indexed and body; zip them back into the
        // ABI-declared parameter order.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut args = Vec::with_capacity(monitored.event.inputs.len());
        for input in &monitored.event.inputs {
            let value = if input.indexed { indexed.next() } else { body.next() };
            if let Some(value) = value {
                args.push((input.name.clone(), value));
            }
        }

        Ok(Some(DecodedEvent {
            name: monitored.name.clone(),
            address,
            topic,
            block_number: log.block_number.unwrap_or_default(),
            block_hash: log.block_hash.unwrap_or_default(),
            transaction_hash: log.transaction_hash.unwrap_or_default(),
            transaction_index: log.transaction_index.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            args,
        }))
    }

    /// Decodes a batch of raw logs, preserving input order.
    ///
    /// Filter misses are dropped silently; decode failures are logged and skipped so one
    /// malformed log cannot stall the batch.
    #[must_use]
    pub fn decode_all(&self, logs: &[Log]) -> Vec<DecodedEvent> {
        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs {
            match self.decode(log) {
                Ok(Some(event)) => decoded.push(event),
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "skipping undecodable log");
                }
            }
        }
        decoded
    }
}
