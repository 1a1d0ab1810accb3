use std::sync::Arc;

use alloy::{
    primitives::{Address, BlockNumber},
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

/// Registration and configuration failures.
///
/// Surfaced synchronously to the caller of [`EventRegistry::register`] or
/// [`EventListenerBuilder::build`] and never retried automatically.
///
/// [`EventRegistry::register`]: crate::registry::EventRegistry::register
/// [`EventListenerBuilder::build`]: crate::listener::EventListenerBuilder::build
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The contract address is not a well-formed 20-byte hex address.
    #[error("invalid contract address `{0}`")]
    InvalidAddress(String),

    /// The contract ABI could not be parsed.
    #[error("invalid contract ABI: {0}")]
    InvalidAbi(#[from] serde_json::Error),

    /// The ABI contains no event fragment with the requested name.
    #[error("event `{0}` not found in the contract ABI")]
    EventNotFound(String),

    /// A monitored event with the same (topic, address) pair already exists.
    #[error("event `{name}` on {address} is already monitored")]
    Duplicate { name: String, address: Address },

    /// The handler locator does not resolve to a registered handler.
    #[error("handler locator `{0}` does not resolve to a registered handler")]
    UnknownHandler(String),

    /// The configured batch size is zero; a run must be able to claim at least one block.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}

/// Node retrieval failures.
///
/// A `FetchError` aborts the current run; recovery is "try again on the next scheduled
/// invocation". The error cursor marks the stuck block for operators.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    /// The node could not return a block it is expected to have. Treated as transient; the
    /// scanner never advances past it.
    #[error("block {0} not available on the node")]
    UnknownBlock(BlockNumber),
}

impl From<RpcError<TransportErrorKind>> for FetchError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        FetchError::Rpc(Arc::new(error))
    }
}

/// A log that matched the watch index but could not be decoded against its schema.
///
/// Isolated per log: the decoder skips the offending log with a warning and the batch
/// continues. Distinct from a watch-index miss, which is not an error at all.
#[derive(Error, Debug)]
#[error("failed to decode log for event `{event}` at block {block_number}: {source}")]
pub struct DecodeError {
    pub event: String,
    pub block_number: BlockNumber,
    #[source]
    pub source: alloy::dyn_abi::Error,
}
