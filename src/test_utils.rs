//! Deterministic in-process node for tests: programmable head, blocks, receipts, logs and
//! injected RPC failures. No external binary or network involved.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy::{
    primitives::{keccak256, Address, BlockNumber, Bytes, LogData, B256, U256},
    rpc::types::{Filter, Log},
    transports::TransportErrorKind,
};
use async_trait::async_trait;

use crate::{
    error::FetchError,
    node::{BlockInfo, NodeClient, ReceiptInfo},
};

/// Minimal contract ABI declaring `Deposit(address indexed from, uint256 amount)`.
pub const DEPOSIT_ABI: &str = r#"[
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

/// Builds a raw `Deposit(address,uint256)` log with deterministic block and transaction
/// hashes derived from the coordinates.
#[must_use]
pub fn deposit_log(
    contract: Address,
    from: Address,
    amount: U256,
    block_number: BlockNumber,
    transaction_index: u64,
    log_index: u64,
) -> Log {
    let topics = vec![keccak256("Deposit(address,uint256)"), from.into_word()];
    let data = Bytes::from(B256::from(amount).to_vec());

    let mut tx_seed = Vec::with_capacity(16);
    tx_seed.extend_from_slice(&block_number.to_be_bytes());
    tx_seed.extend_from_slice(&transaction_index.to_be_bytes());

    Log {
        inner: alloy::primitives::Log {
            address: contract,
            data: LogData::new_unchecked(topics, data),
        },
        block_hash: Some(keccak256(block_number.to_be_bytes())),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(keccak256(tx_seed)),
        transaction_index: Some(transaction_index),
        log_index: Some(log_index),
        removed: false,
    }
}

#[derive(Default)]
struct MockNodeState {
    head: BlockNumber,
    logs: Vec<Log>,
    blocks: HashMap<BlockNumber, BlockInfo>,
    receipts: HashMap<B256, ReceiptInfo>,
    fail_from: Option<BlockNumber>,
}

/// Programmable [`NodeClient`] double.
#[derive(Default)]
pub struct MockNode {
    state: Mutex<MockNodeState>,
}

impl MockNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockNodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_head(&self, head: BlockNumber) {
        self.state().head = head;
    }

    /// Makes a log visible to the filter strategy.
    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Adds a block with the given transactions for the walk strategy. Each transaction is a
    /// (hash, receipt logs) pair; receipts are registered alongside.
    pub fn add_block(&self, number: BlockNumber, transactions: Vec<(B256, Vec<Log>)>) {
        let mut state = self.state();
        let hashes = transactions.iter().map(|(hash, _)| *hash).collect();
        state
            .blocks
            .insert(number, BlockInfo { hash: keccak256(number.to_be_bytes()), transactions: hashes });
        for (hash, logs) in transactions {
            state.receipts.insert(hash, ReceiptInfo { logs });
        }
    }

    /// Adds empty blocks over an inclusive range.
    pub fn add_empty_blocks(&self, range: std::ops::RangeInclusive<BlockNumber>) {
        for number in range {
            self.add_block(number, Vec::new());
        }
    }

    /// Marks a block as unavailable on the node (the walk strategy treats this as a
    /// transient [`FetchError::UnknownBlock`]).
    pub fn missing_block(&self, number: BlockNumber) {
        self.state().blocks.remove(&number);
    }

    /// Injects an RPC transport failure for any request touching `block` or later.
    pub fn fail_from(&self, block: BlockNumber) {
        self.state().fail_from = Some(block);
    }

    /// Drops a transaction receipt, simulating a not-yet-final transaction.
    pub fn drop_receipt(&self, hash: B256) {
        self.state().receipts.remove(&hash);
    }
}

fn rpc_failure() -> FetchError {
    FetchError::from(TransportErrorKind::custom_str("injected RPC failure"))
}

fn filter_bounds(filter: &Filter) -> (BlockNumber, BlockNumber) {
    let from = filter
        .block_option
        .get_from_block()
        .and_then(|block| block.as_number())
        .unwrap_or_default();
    let to = filter
        .block_option
        .get_to_block()
        .and_then(|block| block.as_number())
        .unwrap_or(BlockNumber::MAX);
    (from, to)
}

#[async_trait]
impl NodeClient for MockNode {
    async fn head_block_number(&self) -> Result<BlockNumber, FetchError> {
        Ok(self.state().head)
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<BlockInfo>, FetchError> {
        let state = self.state();
        if state.fail_from.is_some_and(|fail| number >= fail) {
            return Err(rpc_failure());
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, FetchError> {
        Ok(self.state().receipts.get(&hash).cloned())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError> {
        let state = self.state();
        let (from, to) = filter_bounds(filter);
        if state.fail_from.is_some_and(|fail| to >= fail) {
            return Err(rpc_failure());
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let number = log.block_number.unwrap_or_default();
                let topic = log.inner.data.topics().first();
                number >= from
                    && number <= to
                    && filter.address.matches(&log.inner.address)
                    && topic.is_some_and(|topic| filter.topics[0].matches(topic))
            })
            .cloned()
            .collect())
    }
}
