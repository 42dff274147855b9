//! Nonce coordination.
//!
//! Per-(chain, signer) serialized nonce reservation with staged commit and
//! rollback. A lane's mutex is held for the whole life of a reservation, so
//! one reservation is in flight per lane at a time; the dashmap lock is only
//! taken briefly to clone the lane `Arc` and never held across an await.

use crate::{
    error::StorageError,
    metrics::NonceMetrics,
    storage::{BridgeStorage, StorageApi},
    types::NonceRecord,
};
use alloy::primitives::{Address, ChainId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Nonce coordination failure.
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    /// Persisted nonce state could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The authoritative on-chain nonce could not be queried.
    #[error("on-chain nonce query failed")]
    Chain(#[source] eyre::Error),
}

/// Source of the authoritative on-chain nonce.
#[async_trait]
pub trait NonceSource: std::fmt::Debug + Send + Sync {
    /// Returns the next unused nonce of `signer` on `chain_id`, including
    /// pending transactions.
    async fn transaction_count(&self, chain_id: ChainId, signer: Address) -> eyre::Result<u64>;
}

/// When a handed-out nonce is persisted as used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Persist the instant the nonce is handed out.
    ///
    /// Guarantees no two obligations are ever assigned the same nonce even if
    /// the caller crashes before broadcasting; a rollback leaves the value
    /// consumed.
    OnSubmit,
    /// Persist only once the caller confirms a successful broadcast.
    ///
    /// A rollback before broadcast returns the value to the lane.
    OnAccept,
}

/// Hands out strictly increasing nonces per (chain, signer) lane.
#[derive(Debug, Clone)]
pub struct NonceCoordinator {
    storage: BridgeStorage,
    source: Arc<dyn NonceSource>,
    lanes: Arc<DashMap<(ChainId, Address), Arc<Mutex<()>>>>,
    metrics: Arc<NonceMetrics>,
}

impl NonceCoordinator {
    /// Creates a new coordinator.
    pub fn new(storage: BridgeStorage, source: Arc<dyn NonceSource>) -> Self {
        Self {
            storage,
            source,
            lanes: Arc::new(DashMap::new()),
            metrics: Arc::new(NonceMetrics::default()),
        }
    }

    fn lane(&self, chain_id: ChainId, signer: Address) -> Arc<Mutex<()>> {
        Arc::clone(&self.lanes.entry((chain_id, signer)).or_default())
    }

    /// Reserves the next nonce of a lane.
    ///
    /// Waits until no other reservation is in flight on the lane, then takes
    /// the greater of the persisted and the freshly queried on-chain value.
    pub async fn reserve(
        &self,
        chain_id: ChainId,
        signer: Address,
        policy: CommitPolicy,
    ) -> Result<NonceReservation, NonceError> {
        let guard = self.lane(chain_id, signer).lock_owned().await;

        let persisted =
            self.storage.read_nonce(chain_id, signer).await?.map(|record| record.nonce);
        let on_chain = self
            .source
            .transaction_count(chain_id, signer)
            .await
            .map_err(NonceError::Chain)?;

        let nonce = persisted.unwrap_or(0).max(on_chain);
        if persisted.is_some_and(|persisted| on_chain > persisted) {
            self.metrics.chain_corrections.increment(1);
            debug!(chain_id, %signer, on_chain, "lane corrected from on-chain nonce");
        }

        if policy == CommitPolicy::OnSubmit {
            self.persist(chain_id, signer, nonce + 1).await?;
        }
        self.metrics.reserved.increment(1);

        Ok(NonceReservation {
            coordinator: self.clone(),
            chain_id,
            signer,
            nonce,
            policy,
            _lane: guard,
        })
    }

    /// Reconciles every known lane's persisted nonce upward against the chain.
    ///
    /// Monotonic: the persisted value is never lowered, so a lagging RPC node
    /// cannot cause a replay.
    pub async fn refresh(&self) {
        let keys: Vec<_> = self.lanes.iter().map(|lane| *lane.key()).collect();
        for (chain_id, signer) in keys {
            if let Err(err) = self.refresh_lane(chain_id, signer).await {
                warn!(chain_id, %signer, %err, "nonce refresh failed");
            }
        }
    }

    async fn refresh_lane(&self, chain_id: ChainId, signer: Address) -> Result<(), NonceError> {
        let _guard = self.lane(chain_id, signer).lock_owned().await;

        let persisted =
            self.storage.read_nonce(chain_id, signer).await?.map_or(0, |record| record.nonce);
        let on_chain = self
            .source
            .transaction_count(chain_id, signer)
            .await
            .map_err(NonceError::Chain)?;

        if on_chain > persisted {
            self.persist(chain_id, signer, on_chain).await?;
            self.metrics.chain_corrections.increment(1);
            debug!(chain_id, %signer, persisted, on_chain, "lane refreshed upward");
        }
        Ok(())
    }

    async fn persist(
        &self,
        chain_id: ChainId,
        signer: Address,
        next: u64,
    ) -> Result<(), StorageError> {
        self.storage
            .write_nonce(&NonceRecord { chain_id, signer, nonce: next, last_used: Utc::now() })
            .await
    }
}

/// An in-flight nonce reservation.
///
/// Holds the lane mutex until committed, rolled back, or dropped. Dropping an
/// unresolved reservation counts as a rollback, so a cancelled worker never
/// leaves a reservation dangling.
#[must_use]
pub struct NonceReservation {
    coordinator: NonceCoordinator,
    chain_id: ChainId,
    signer: Address,
    nonce: u64,
    policy: CommitPolicy,
    _lane: OwnedMutexGuard<()>,
}

impl NonceReservation {
    /// The reserved nonce value.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Marks the nonce as used and releases the lane.
    ///
    /// Must be called once the dispatch was broadcast, or when its outcome is
    /// uncertain after broadcast: the value may have been consumed on-chain and
    /// must never be handed out again.
    pub async fn commit(self) -> Result<(), StorageError> {
        if self.policy == CommitPolicy::OnAccept {
            self.coordinator.persist(self.chain_id, self.signer, self.nonce + 1).await?;
        }
        Ok(())
    }

    /// Releases the reservation before broadcast.
    ///
    /// Under [`CommitPolicy::OnAccept`] the value returns to the lane; under
    /// [`CommitPolicy::OnSubmit`] it was already persisted and stays consumed.
    pub fn rollback(self) {
        self.coordinator.metrics.rolled_back.increment(1);
    }
}

impl std::fmt::Debug for NonceReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceReservation")
            .field("chain_id", &self.chain_id)
            .field("signer", &self.signer)
            .field("nonce", &self.nonce)
            .field("policy", &self.policy)
            .finish()
    }
}
