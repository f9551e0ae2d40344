//! HD address discovery
//!
//! Scans derivation indices in ascending batches, asks the chain whether
//! each derived address was ever used, and reduces the active set to the
//! contiguous prefix starting at index 0. Only that prefix counts as the
//! wallet's used addresses; anything after the first hole waits for a later
//! scan with a wider gap limit.
//!
//! The engine runs behind [`DiscoveryHandle`], a worker task reached only
//! through typed request/response messages.

pub mod gap;
pub mod worker;


pub use gap::find_max_index_before_first_gap;
pub use worker::{DiscoveryCommand, DiscoveryHandle};

use crate::addresses::{AddressDeriver, DerivedAddress, WalletSeed};
use crate::config::DiscoveryConfig;
use crate::errors::{SyncError, SyncResult};
use crate::gateway::{with_retry, ChainGateway, ExponentialBackoff};
use crate::logger::{self, LogTag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Indices already known to the wallet; never queried, treated as active
    pub skip_indexes: BTreeSet<u32>,
    pub gap_limit: u32,
    pub batch_size: u32,
}

impl DiscoveryRequest {
    pub fn from_config(config: &DiscoveryConfig, skip_indexes: BTreeSet<u32>) -> Self {
        Self {
            skip_indexes,
            gap_limit: config.gap_limit,
            batch_size: config.batch_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub active_indices: BTreeSet<u32>,
    pub highest_contiguous_index: Option<u32>,
}

impl DiscoveryResult {
    pub fn from_active(active_indices: BTreeSet<u32>) -> Self {
        let highest_contiguous_index = find_max_index_before_first_gap(&active_indices);
        Self {
            active_indices,
            highest_contiguous_index,
        }
    }

    /// Indices treated as used: `0..=highest_contiguous_index`
    pub fn used_indices(&self) -> Vec<u32> {
        match self.highest_contiguous_index {
            Some(highest) => (0..=highest).collect(),
            None => Vec::new(),
        }
    }
}

/// Outcome of one scan; `error` is set when a batch failed and the scan stopped early
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub result: DiscoveryResult,
    /// Newly confirmed addresses inside the contiguous prefix (skipped indexes excluded)
    pub used_addresses: Vec<DerivedAddress>,
    pub batches_scanned: usize,
    pub scanned_through: Option<u32>,
    pub error: Option<SyncError>,
}

impl DiscoveryReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// One batch: the full index range it spans and the indices actually queried
struct Batch {
    start: u32,
    end: u32,
    queried: Vec<u32>,
}

pub struct DiscoveryEngine {
    gateway: Arc<dyn ChainGateway>,
    deriver: Arc<dyn AddressDeriver>,
    retry: ExponentialBackoff,
    network: String,
}

impl DiscoveryEngine {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        deriver: Arc<dyn AddressDeriver>,
        retry: ExponentialBackoff,
        network: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            deriver,
            retry,
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Scan for used addresses
    ///
    /// Stops after `gap_limit` consecutive inactive indices, or after a batch
    /// of `batch_size` consecutive unscanned indices without any activity.
    /// A batch whose queries fail after retries ends the scan; everything
    /// confirmed before it is kept and the report carries the error.
    pub async fn discover(
        &self,
        seed: &WalletSeed,
        request: &DiscoveryRequest,
    ) -> SyncResult<DiscoveryReport> {
        if request.gap_limit == 0 || request.batch_size == 0 {
            return Err(SyncError::configuration(
                "discovery gap_limit and batch_size must be at least 1",
            ));
        }

        logger::info(
            LogTag::Discovery,
            &format!(
                "Starting discovery on {} (gap limit {}, batch size {}, {} known indices)",
                self.network,
                request.gap_limit,
                request.batch_size,
                request.skip_indexes.len()
            ),
        );

        let skip = &request.skip_indexes;
        let mut active: BTreeSet<u32> = skip.clone();
        let mut derived: BTreeMap<u32, DerivedAddress> = BTreeMap::new();
        let mut inactive_run = 0u32;
        let mut next = Some(0u32);
        let mut batches_scanned = 0usize;
        let mut scanned_through = None;
        let mut error = None;

        while let Some(start) = next {
            let batch = next_batch(start, request.batch_size, skip);
            let addresses: Vec<DerivedAddress> = batch
                .queried
                .iter()
                .map(|&index| self.deriver.derive(seed, index))
                .collect();

            let used: BTreeMap<u32, bool> = match self.check_batch(&batch, &addresses).await {
                Ok(flags) => addresses.iter().map(|a| a.index).zip(flags).collect(),
                Err(cause) => {
                    logger::warning(
                        LogTag::Discovery,
                        &format!(
                            "Batch {}..={} failed, keeping {} confirmed batches: {}",
                            batch.start, batch.end, batches_scanned, cause
                        ),
                    );
                    error = Some(SyncError::PartialBatchFailure {
                        completed_batches: batches_scanned,
                        failed_range: (batch.start, batch.end),
                        cause: Box::new(cause),
                    });
                    break;
                }
            };

            for address in addresses {
                derived.insert(address.index, address);
            }

            let mut batch_active = 0usize;
            let mut gap_reached = false;
            for index in batch.start..=batch.end {
                scanned_through = Some(index);
                if skip.contains(&index) {
                    inactive_run = 0;
                    continue;
                }
                if used.get(&index).copied().unwrap_or(false) {
                    active.insert(index);
                    batch_active += 1;
                    inactive_run = 0;
                } else {
                    inactive_run += 1;
                    if inactive_run >= request.gap_limit {
                        gap_reached = true;
                        break;
                    }
                }
            }
            batches_scanned += 1;

            logger::debug(
                LogTag::Discovery,
                &format!(
                    "Batch {}..={}: {} active, inactive run {}",
                    batch.start, batch.end, batch_active, inactive_run
                ),
            );

            // a full batch with no skipped index inside it
            let span = u64::from(batch.end - batch.start) + 1;
            let untouched_batch = batch.queried.len() == request.batch_size as usize
                && batch.queried.len() as u64 == span;
            if gap_reached || (untouched_batch && batch_active == 0) {
                break;
            }
            next = batch.end.checked_add(1);
        }

        let result = DiscoveryResult::from_active(active);
        let used_addresses = match result.highest_contiguous_index {
            Some(highest) => derived.range(..=highest).map(|(_, a)| a.clone()).collect(),
            None => Vec::new(),
        };

        logger::info(
            LogTag::Discovery,
            &format!(
                "Discovery finished: {} active indices, highest contiguous {:?}, {} batches{}",
                result.active_indices.len(),
                result.highest_contiguous_index,
                batches_scanned,
                if error.is_some() { " (incomplete)" } else { "" }
            ),
        );

        Ok(DiscoveryReport {
            result,
            used_addresses,
            batches_scanned,
            scanned_through,
            error,
        })
    }

    async fn check_batch(
        &self,
        batch: &Batch,
        addresses: &[DerivedAddress],
    ) -> SyncResult<Vec<bool>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let hashes: Vec<String> = addresses.iter().map(|a| a.hash.clone()).collect();
        let label = format!("activity {}..={}", batch.start, batch.end);
        let used = with_retry(&self.retry, &label, || {
            self.gateway.get_addresses_used(&hashes, &self.network)
        })
        .await?;
        if used.len() != hashes.len() {
            return Err(SyncError::malformed(
                "addresses/used",
                format!("expected {} flags, got {}", hashes.len(), used.len()),
            ));
        }
        Ok(used)
    }
}

/// Next `batch_size` indices from `start` that are not skipped
fn next_batch(start: u32, batch_size: u32, skip: &BTreeSet<u32>) -> Batch {
    let mut queried = Vec::with_capacity(batch_size as usize);
    let mut index = start;
    let mut end;
    loop {
        end = index;
        if !skip.contains(&index) {
            queried.push(index);
            if queried.len() == batch_size as usize {
                break;
            }
        }
        match index.checked_add(1) {
            Some(n) => index = n,
            None => break,
        }
    }
    Batch { start, end, queried }
}
