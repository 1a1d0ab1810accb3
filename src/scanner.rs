//! Block-range discovery and log retrieval.
//!
//! Two retrieval strategies exist, chosen once at startup from configuration:
//! [`FilterRetrieval`] for nodes that support server-side log filters, and
//! [`WalkRetrieval`] as a per-block receipt walk for nodes that do not.

use std::{
    collections::HashSet,
    ops::RangeInclusive,
    sync::Arc,
};

use alloy::{
    primitives::{Address, BlockNumber, B256},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::{error::FetchError, node::NodeClient};

/// Default ceiling on how many blocks a single run may claim.
///
/// A backlog larger than this is drained across multiple scheduled invocations.
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Computes the next pending block range.
///
/// Returns `None` when `cursor >= head` (nothing pending), otherwise
/// `cursor + 1 ..= min(head, cursor + batch_size)`.
#[must_use]
pub fn pending_range(
    cursor: BlockNumber,
    head: BlockNumber,
    batch_size: u64,
) -> Option<RangeInclusive<BlockNumber>> {
    if cursor >= head {
        return None;
    }
    let from = cursor + 1;
    let to = head.min(from.saturating_add(batch_size - 1));
    Some(from..=to)
}

/// Iterator over the scan units between a cursor and the chain head.
///
/// Each unit is committed independently by the run coordinator; unit width is the batch size
/// in filter mode and a single block in walk mode.
#[derive(Debug, Clone)]
pub struct PendingUnits {
    cursor: BlockNumber,
    head: BlockNumber,
    unit_size: u64,
}

impl PendingUnits {
    /// # Panics
    ///
    /// Panics if `unit_size` is 0.
    #[must_use]
    pub fn new(cursor: BlockNumber, head: BlockNumber, unit_size: u64) -> Self {
        assert!(unit_size >= 1, "unit_size must be at least 1");
        Self { cursor, head, unit_size }
    }
}

impl Iterator for PendingUnits {
    type Item = RangeInclusive<BlockNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = pending_range(self.cursor, self.head, self.unit_size)?;
        self.cursor = *unit.end();
        Some(unit)
    }
}

/// Which retrieval strategy the scanner uses, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Server-side log filters (`eth_getLogs`).
    #[default]
    Filter,
    /// Per-block, per-receipt walk for nodes without filter support.
    Walk,
}

impl RetrievalMode {
    #[must_use]
    pub fn into_strategy(self, node: Arc<dyn NodeClient>) -> Box<dyn RetrievalStrategy> {
        match self {
            RetrievalMode::Filter => Box::new(FilterRetrieval::new(node)),
            RetrievalMode::Walk => Box::new(WalkRetrieval::new(node)),
        }
    }
}

/// Retrieves the raw logs of a block range that match the watch index.
///
/// Implementations must return logs ordered ascending by `(block_number, log_index)`: a
/// single transaction can emit several matched logs and handlers may depend on emission
/// order. Any fetch error aborts the whole range; there is no partial result.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// The unit width the run coordinator commits at a time, given the configured batch size.
    fn unit_size(&self, batch_size: u64) -> u64;

    async fn fetch_logs(
        &self,
        range: RangeInclusive<BlockNumber>,
        watch: &[(Address, B256)],
    ) -> Result<Vec<Log>, FetchError>;
}

/// One server-side range filter per distinct (address, topic) watch key; results merged and
/// re-sorted into a single total order.
pub struct FilterRetrieval {
    node: Arc<dyn NodeClient>,
}

impl FilterRetrieval {
    #[must_use]
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl RetrievalStrategy for FilterRetrieval {
    fn unit_size(&self, batch_size: u64) -> u64 {
        batch_size
    }

    async fn fetch_logs(
        &self,
        range: RangeInclusive<BlockNumber>,
        watch: &[(Address, B256)],
    ) -> Result<Vec<Log>, FetchError> {
        let mut logs = Vec::new();
        for (address, topic) in watch {
            let filter = Filter::new()
                .address(*address)
                .event_signature(*topic)
                .from_block(*range.start())
                .to_block(*range.end());
            logs.extend(self.node.logs(&filter).await?);
        }
        logs.sort_by_key(|log| {
            (log.block_number.unwrap_or_default(), log.log_index.unwrap_or_default())
        });
        trace!(from = *range.start(), to = *range.end(), count = logs.len(), "fetched logs");
        Ok(logs)
    }
}

/// Fallback walk: every block, every transaction receipt, filtered client-side against the
/// watch index. Naturally preserves block/transaction/log order.
pub struct WalkRetrieval {
    node: Arc<dyn NodeClient>,
}

impl WalkRetrieval {
    #[must_use]
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl RetrievalStrategy for WalkRetrieval {
    fn unit_size(&self, _batch_size: u64) -> u64 {
        // The coordinator commits block by block in walk mode.
        1
    }

    async fn fetch_logs(
        &self,
        range: RangeInclusive<BlockNumber>,
        watch: &[(Address, B256)],
    ) -> Result<Vec<Log>, FetchError> {
        let watched: HashSet<(Address, B256)> = watch.iter().copied().collect();
        let mut logs = Vec::new();

        for number in range {
            let block = self
                .node
                .block_by_number(number)
                .await?
                .ok_or(FetchError::UnknownBlock(number))?;

            for tx_hash in block.transactions {
                let Some(receipt) = self.node.transaction_receipt(tx_hash).await? else {
                    // Receipt not yet available: the transaction is not final, skip it.
                    debug!(%tx_hash, block = number, "receipt unavailable, skipping");
                    continue;
                };
                for log in receipt.logs {
                    let key = log.inner.data.topics().first().copied().map(|topic| {
                        (log.inner.address, topic)
                    });
                    if key.is_some_and(|key| watched.contains(&key)) {
                        logs.push(log);
                    }
                }
            }
        }

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pending_range_when_cursor_at_head() {
        assert_eq!(pending_range(10, 10, 100), None);
        assert_eq!(pending_range(11, 10, 100), None);
    }

    #[test]
    fn pending_range_is_bounded_by_head_and_batch_size() {
        assert_eq!(pending_range(0, 5, 100), Some(1..=5));
        assert_eq!(pending_range(0, 500, 100), Some(1..=100));
        assert_eq!(pending_range(42, 43, 100), Some(43..=43));
    }

    #[test]
    fn pending_units_cover_the_backlog_exactly_once() {
        let units: Vec<_> = PendingUnits::new(0, 25, 10).collect();
        assert_eq!(units, vec![1..=10, 11..=20, 21..=25]);
    }

    #[test]
    fn pending_units_single_block_granularity() {
        let units: Vec<_> = PendingUnits::new(4, 7, 1).collect();
        assert_eq!(units, vec![5..=5, 6..=6, 7..=7]);
    }

    #[test]
    fn pending_units_empty_when_caught_up() {
        assert_eq!(PendingUnits::new(7, 7, 10).count(), 0);
    }

    #[test]
    fn retrieval_mode_deserializes_from_config() {
        assert_eq!(serde_json::from_str::<RetrievalMode>("\"filter\"").unwrap(), RetrievalMode::Filter);
        assert_eq!(serde_json::from_str::<RetrievalMode>("\"walk\"").unwrap(), RetrievalMode::Walk);
    }
}
