//! The monitored-event registry.
//!
//! The registry is the only component permitted to mutate monitored-event state. Every
//! mutation raises the registry-changed signal so a scan already in flight picks up the new
//! definitions at its next unit boundary.

use std::sync::Arc;

use alloy::{
    json_abi::{Event, JsonAbi},
    primitives::{Address, BlockNumber, B256},
};
use tracing::info;

use crate::{
    abi,
    error::ValidationError,
    handler::HandlerRegistry,
    store::{EventStore, SharedCache, REGISTRY_CHANGED_KEY},
};

/// A monitored-event definition. Immutable after creation except for the set-once
/// `monitored_from` stamp.
#[derive(Debug, Clone)]
pub struct MonitoredEvent {
    /// Event name as declared in the ABI, e.g. `Deposit`.
    pub name: String,
    /// Emitting contract address (normalized; displayed checksummed).
    pub address: Address,
    /// keccak-256 of the canonical event signature, matched against `topics[0]`.
    pub topic: B256,
    /// The parsed event fragment used for decoding.
    pub event: Event,
    /// Locator of the handler that consumes decoded occurrences.
    pub handler: String,
    /// Block number of the first scan unit that observed this definition. `None` until the
    /// first scan after registration; never overwritten once set.
    pub monitored_from: Option<BlockNumber>,
}

/// Contract ABI input accepted by [`EventRegistry::register`]: either a serialized JSON ABI
/// or an already parsed one.
pub enum ContractAbi {
    Serialized(String),
    Parsed(JsonAbi),
}

impl From<&str> for ContractAbi {
    fn from(json: &str) -> Self {
        ContractAbi::Serialized(json.to_owned())
    }
}

impl From<String> for ContractAbi {
    fn from(json: String) -> Self {
        ContractAbi::Serialized(json)
    }
}

impl From<JsonAbi> for ContractAbi {
    fn from(abi: JsonAbi) -> Self {
        ContractAbi::Parsed(abi)
    }
}

impl ContractAbi {
    fn into_parsed(self) -> Result<JsonAbi, ValidationError> {
        match self {
            ContractAbi::Serialized(json) => abi::parse_abi(&json),
            ContractAbi::Parsed(abi) => Ok(abi),
        }
    }
}

/// Read/write surface over monitored-event definitions.
#[derive(Clone)]
pub struct EventRegistry {
    store: Arc<dyn EventStore>,
    cache: Arc<dyn SharedCache>,
    handlers: Arc<HandlerRegistry>,
}

impl EventRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        cache: Arc<dyn SharedCache>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self { store, cache, handlers }
    }

    /// Registers a new monitored event and raises the registry-changed signal.
    ///
    /// Validates the contract address, locates the named event fragment in the ABI, derives
    /// the log topic from the canonical signature, and checks the handler locator resolves.
    /// Handler resolution is validated here, at registration time, so a bad locator fails
    /// fast instead of producing failure records on every dispatch.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] on a malformed address or ABI, a missing event fragment,
    /// an unresolvable handler locator, or a duplicate (topic, address) pair.
    pub fn register(
        &self,
        name: &str,
        address: &str,
        contract_abi: impl Into<ContractAbi>,
        handler: &str,
    ) -> Result<MonitoredEvent, ValidationError> {
        let address: Address = address
            .parse()
            .map_err(|_| ValidationError::InvalidAddress(address.to_owned()))?;
        let parsed = contract_abi.into().into_parsed()?;
        let event = abi::find_event(&parsed, name)?.clone();
        let topic = abi::event_topic(&event);

        if !self.handlers.contains(handler) {
            return Err(ValidationError::UnknownHandler(handler.to_owned()));
        }

        let monitored = MonitoredEvent {
            name: name.to_owned(),
            address,
            topic,
            event,
            handler: handler.to_owned(),
            monitored_from: None,
        };
        self.store.insert(monitored.clone())?;
        self.cache.set_flag(REGISTRY_CHANGED_KEY, true);

        info!(
            event = %monitored.name,
            address = %monitored.address,
            topic = %monitored.topic,
            handler = %monitored.handler,
            "registered monitored event"
        );

        Ok(monitored)
    }

    /// Removes the monitored event matching (address, topic). Raises the registry-changed
    /// signal if anything was deleted. Returns the number of records removed.
    pub fn remove(&self, address: Address, topic: B256) -> usize {
        let removed = self.store.remove(address, topic);
        if removed > 0 {
            self.cache.set_flag(REGISTRY_CHANGED_KEY, true);
            info!(%address, %topic, "removed monitored event");
        }
        removed
    }

    /// All monitored events. Consumed by the decoder's watch-index refresh.
    #[must_use]
    pub fn list(&self) -> Vec<MonitoredEvent> {
        self.store.list()
    }

    /// Stamps `monitored_from` for the given event if it has never been stamped.
    pub(crate) fn stamp_monitored_from(&self, address: Address, topic: B256, block: BlockNumber) {
        self.store.stamp_monitored_from(address, topic, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{EventHandler, HandlerError},
        store::MemoryStore,
    };
    use alloy::primitives::keccak256;
    use async_trait::async_trait;

    const ABI: &str = r#"[
        {
            "anonymous": false,
            "inputs": [
                { "indexed": true, "name": "from", "type": "address" },
                { "indexed": false, "name": "amount", "type": "uint256" }
            ],
            "name": "Deposit",
            "type": "event"
        }
    ]"#;

    const ADDRESS: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn save(&self, _event: &crate::decoder::DecodedEvent) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn registry() -> (EventRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register("deposits", Arc::new(NoopHandler));
        (EventRegistry::new(store.clone(), store.clone(), handlers), store)
    }

    #[test]
    fn register_derives_topic_and_raises_signal() {
        let (registry, store) = registry();

        let monitored = registry.register("Deposit", ADDRESS, ABI, "deposits").unwrap();
        assert_eq!(monitored.topic, keccak256("Deposit(address,uint256)"));
        assert_eq!(monitored.monitored_from, None);
        assert!(SharedCache::flag(store.as_ref(), REGISTRY_CHANGED_KEY));
    }

    #[test]
    fn register_same_abi_twice_derives_same_topic() {
        let (registry, _) = registry();
        let other = "0x00000000000000000000000000000000000000aa";

        let first = registry.register("Deposit", ADDRESS, ABI, "deposits").unwrap();
        let second = registry.register("Deposit", other, ABI, "deposits").unwrap();
        assert_eq!(first.topic, second.topic);
    }

    #[test]
    fn duplicate_topic_address_pair_is_rejected() {
        let (registry, _) = registry();

        registry.register("Deposit", ADDRESS, ABI, "deposits").unwrap();
        let err = registry.register("Deposit", ADDRESS, ABI, "deposits").unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { .. }));
    }

    #[test]
    fn malformed_address_is_rejected() {
        let (registry, _) = registry();
        let err = registry.register("Deposit", "0x1234", ABI, "deposits").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress(_)));
    }

    #[test]
    fn unknown_handler_locator_is_rejected() {
        let (registry, _) = registry();
        let err = registry.register("Deposit", ADDRESS, ABI, "withdrawals").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownHandler(_)));
    }

    #[test]
    fn remove_raises_signal_only_when_something_was_deleted() {
        let (registry, store) = registry();
        let monitored = registry.register("Deposit", ADDRESS, ABI, "deposits").unwrap();
        SharedCache::set_flag(store.as_ref(), REGISTRY_CHANGED_KEY, false);

        assert_eq!(registry.remove(monitored.address, monitored.topic), 1);
        assert!(SharedCache::flag(store.as_ref(), REGISTRY_CHANGED_KEY));

        SharedCache::set_flag(store.as_ref(), REGISTRY_CHANGED_KEY, false);
        assert_eq!(registry.remove(monitored.address, monitored.topic), 0);
        assert!(!SharedCache::flag(store.as_ref(), REGISTRY_CHANGED_KEY));
    }
}
