//! The node RPC capability consumed by the scanner.
//!
//! The wire protocol itself is out of scope; the core only needs four operations, expressed
//! as the [`NodeClient`] trait. [`RpcNodeClient`] adapts any alloy provider to it.

use alloy::{
    primitives::{BlockNumber, B256},
    providers::Provider,
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;

use crate::error::FetchError;

/// The subset of a block the walk strategy needs.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub hash: B256,
    pub transactions: Vec<B256>,
}

/// The subset of a transaction receipt the walk strategy needs.
#[derive(Debug, Clone)]
pub struct ReceiptInfo {
    pub logs: Vec<Log>,
}

/// Capability interface over an Ethereum node.
///
/// These calls are the only suspension points of a scan. Transport-level concerns
/// (authentication, retries, endpoints) belong to the implementation.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// The current head block number.
    async fn head_block_number(&self) -> Result<BlockNumber, FetchError>;

    /// The block at the given height, or `None` if the node does not have it.
    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<BlockInfo>, FetchError>;

    /// The receipt for the given transaction, or `None` if it is not yet available.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, FetchError>;

    /// Logs matching a server-side filter.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError>;
}

/// [`NodeClient`] backed by an alloy [`Provider`].
pub struct RpcNodeClient<P> {
    provider: P,
}

impl<P: Provider> RpcNodeClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider> NodeClient for RpcNodeClient<P> {
    async fn head_block_number(&self) -> Result<BlockNumber, FetchError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_by_number(&self, number: BlockNumber) -> Result<Option<BlockInfo>, FetchError> {
        let block = self.provider.get_block_by_number(number.into()).await?;
        Ok(block.map(|block| BlockInfo {
            hash: block.header.hash,
            transactions: block.transactions.hashes().collect(),
        }))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, FetchError> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|receipt| ReceiptInfo { logs: receipt.inner.logs().to_vec() }))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError> {
        Ok(self.provider.get_logs(filter).await?)
    }
}
