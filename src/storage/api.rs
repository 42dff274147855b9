//! Storage api.

use crate::{
    error::StorageError,
    types::{DeployRecord, IntentId, NonceRecord, ProcessStatus, SettlementIntent, Transfer},
};
use alloy::primitives::{Address, ChainId, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Type alias for `Result<T, StorageError>`.
pub type Result<T> = core::result::Result<T, StorageError>;

/// Storage API.
///
/// Conditional transitions return `Ok(false)` when the row was not in the
/// expected state. A `false` from [`StorageApi::settle_intent`] is the expected
/// signal that another path already completed the pairing and must be treated
/// as success-no-op, never as an error.
#[async_trait]
pub trait StorageApi: Debug + Send + Sync {
    /// Upserts a transfer observation. Redelivery is a no-op.
    async fn write_transfer(&self, transfer: &Transfer) -> Result<()>;

    /// Reads a transfer by its unique reference.
    async fn read_transfer(&self, chain_id: ChainId, hash: B256) -> Result<Option<Transfer>>;

    /// Updates the derivation outcome of a transfer.
    async fn update_transfer_status(
        &self,
        chain_id: ChainId,
        hash: B256,
        status: &ProcessStatus,
    ) -> Result<()>;

    /// Inserts a settlement intent.
    ///
    /// Returns `false` when an intent for the same source reference already
    /// exists; the unique constraint on `(source_chain, source_hash)` makes
    /// derivation idempotent under redelivery.
    async fn insert_intent(&self, intent: &SettlementIntent) -> Result<bool>;

    /// Reads an intent by id.
    async fn read_intent(&self, id: IntentId) -> Result<Option<SettlementIntent>>;

    /// Reads all pending intents the bridge itself must pay out.
    async fn pending_self_dispatch_intents(&self) -> Result<Vec<SettlementIntent>>;

    /// Reads all intents in `Sent` or `Crashed` state.
    async fn dispatched_intents(&self) -> Result<Vec<SettlementIntent>>;

    /// Reads all intents stuck in `Reserved` since before `older_than`.
    ///
    /// A reservation always resolves to `Sent`, `Crashed` or a release within
    /// one dispatch attempt; one older than the threshold belongs to a run
    /// that died mid-dispatch.
    async fn stale_reserved_intents(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SettlementIntent>>;

    /// Finds pending intents by their resolved target coordinates.
    async fn find_pending_by_target(
        &self,
        target_chain: ChainId,
        target_address: Address,
        target_token: Address,
        target_amount: U256,
    ) -> Result<Vec<SettlementIntent>>;

    /// Completes an intent with a matched repayment, conditional on it still
    /// being pending. Also flags both transfer rows settled, atomically.
    async fn settle_intent(
        &self,
        id: IntentId,
        target_chain: ChainId,
        target_hash: B256,
    ) -> Result<bool>;

    /// Transitions `Pending -> Reserved` for payout dispatch.
    async fn reserve_intent(&self, id: IntentId) -> Result<bool>;

    /// Rolls a reservation back, `Reserved -> Pending`.
    async fn release_intent(&self, id: IntentId) -> Result<bool>;

    /// Records a broadcast payout, `Reserved -> Sent`.
    async fn mark_sent(&self, id: IntentId, dispatch_hash: B256) -> Result<bool>;

    /// Records a broadcast-uncertain payout, `Reserved -> Crashed`.
    async fn mark_crashed(&self, id: IntentId, dispatch_hash: Option<B256>) -> Result<bool>;

    /// Promotes a confirmed dispatch, `Sent | Crashed -> Matched`.
    async fn finalize_dispatched(&self, id: IntentId, target_hash: B256) -> Result<bool>;

    /// Reads the persisted nonce state of a lane.
    async fn read_nonce(&self, chain_id: ChainId, signer: Address) -> Result<Option<NonceRecord>>;

    /// Persists the nonce state of a lane.
    async fn write_nonce(&self, record: &NonceRecord) -> Result<()>;

    /// Reads an inscription deploy record.
    async fn read_deploy_record(&self, protocol: u32, tick: u64) -> Result<Option<DeployRecord>>;

    /// Writes an inscription deploy record. First deploy wins.
    async fn write_deploy_record(&self, record: &DeployRecord) -> Result<()>;

    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<()>;
}
