//! Bridge storage

mod api;
pub use api::StorageApi;
mod memory;
mod pg;

use crate::types::{
    DeployRecord, IntentId, NonceRecord, ProcessStatus, SettlementIntent, Transfer,
};
use alloy::primitives::{Address, ChainId, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

/// Bridge storage interface.
#[derive(Debug, Clone)]
pub struct BridgeStorage {
    inner: Arc<dyn StorageApi>,
}

impl BridgeStorage {
    /// Create [`BridgeStorage`] with a in-memory backend. Used for testing only.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(memory::InMemoryStorage::default()) }
    }

    /// Create [`BridgeStorage`] backed by PostgreSQL.
    pub fn pg(pool: PgPool) -> Self {
        Self { inner: Arc::new(pg::PgStorage::new(pool)) }
    }
}

#[async_trait]
impl StorageApi for BridgeStorage {
    async fn write_transfer(&self, transfer: &Transfer) -> api::Result<()> {
        self.inner.write_transfer(transfer).await
    }

    async fn read_transfer(&self, chain_id: ChainId, hash: B256) -> api::Result<Option<Transfer>> {
        self.inner.read_transfer(chain_id, hash).await
    }

    async fn update_transfer_status(
        &self,
        chain_id: ChainId,
        hash: B256,
        status: &ProcessStatus,
    ) -> api::Result<()> {
        self.inner.update_transfer_status(chain_id, hash, status).await
    }

    async fn insert_intent(&self, intent: &SettlementIntent) -> api::Result<bool> {
        self.inner.insert_intent(intent).await
    }

    async fn read_intent(&self, id: IntentId) -> api::Result<Option<SettlementIntent>> {
        self.inner.read_intent(id).await
    }

    async fn pending_self_dispatch_intents(&self) -> api::Result<Vec<SettlementIntent>> {
        self.inner.pending_self_dispatch_intents().await
    }

    async fn dispatched_intents(&self) -> api::Result<Vec<SettlementIntent>> {
        self.inner.dispatched_intents().await
    }

    async fn stale_reserved_intents(
        &self,
        older_than: DateTime<Utc>,
    ) -> api::Result<Vec<SettlementIntent>> {
        self.inner.stale_reserved_intents(older_than).await
    }

    async fn find_pending_by_target(
        &self,
        target_chain: ChainId,
        target_address: Address,
        target_token: Address,
        target_amount: U256,
    ) -> api::Result<Vec<SettlementIntent>> {
        self.inner
            .find_pending_by_target(target_chain, target_address, target_token, target_amount)
            .await
    }

    async fn settle_intent(
        &self,
        id: IntentId,
        target_chain: ChainId,
        target_hash: B256,
    ) -> api::Result<bool> {
        self.inner.settle_intent(id, target_chain, target_hash).await
    }

    async fn reserve_intent(&self, id: IntentId) -> api::Result<bool> {
        self.inner.reserve_intent(id).await
    }

    async fn release_intent(&self, id: IntentId) -> api::Result<bool> {
        self.inner.release_intent(id).await
    }

    async fn mark_sent(&self, id: IntentId, dispatch_hash: B256) -> api::Result<bool> {
        self.inner.mark_sent(id, dispatch_hash).await
    }

    async fn mark_crashed(&self, id: IntentId, dispatch_hash: Option<B256>) -> api::Result<bool> {
        self.inner.mark_crashed(id, dispatch_hash).await
    }

    async fn finalize_dispatched(&self, id: IntentId, target_hash: B256) -> api::Result<bool> {
        self.inner.finalize_dispatched(id, target_hash).await
    }

    async fn read_nonce(
        &self,
        chain_id: ChainId,
        signer: Address,
    ) -> api::Result<Option<NonceRecord>> {
        self.inner.read_nonce(chain_id, signer).await
    }

    async fn write_nonce(&self, record: &NonceRecord) -> api::Result<()> {
        self.inner.write_nonce(record).await
    }

    async fn read_deploy_record(
        &self,
        protocol: u32,
        tick: u64,
    ) -> api::Result<Option<DeployRecord>> {
        self.inner.read_deploy_record(protocol, tick).await
    }

    async fn write_deploy_record(&self, record: &DeployRecord) -> api::Result<()> {
        self.inner.write_deploy_record(record).await
    }

    async fn ping(&self) -> api::Result<()> {
        self.inner.ping().await
    }
}
