//! Storage implementation in-memory. For testing only.

use super::api::Result;
use crate::types::{
    DeployRecord, IntentId, IntentStatus, NonceRecord, ProcessStatus, SettlementIntent, Transfer,
};
use alloy::primitives::{Address, ChainId, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

/// [`super::StorageApi`] implementation in-memory. Used for testing.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    transfers: DashMap<(ChainId, B256), Transfer>,
    intents: DashMap<IntentId, SettlementIntent>,
    /// Uniqueness index on the source transfer reference.
    source_refs: DashMap<(ChainId, B256), IntentId>,
    nonces: DashMap<(ChainId, Address), NonceRecord>,
    deploy_records: DashMap<(u32, u64), DeployRecord>,
}

impl InMemoryStorage {
    /// Conditionally transitions an intent, returning whether it applied.
    ///
    /// The per-key dashmap guard makes the check-and-set atomic, mirroring the
    /// row-level conditional update of the relational backend.
    fn transition(
        &self,
        id: IntentId,
        from: &[IntentStatus],
        apply: impl FnOnce(&mut SettlementIntent),
    ) -> bool {
        let Some(mut intent) = self.intents.get_mut(&id) else { return false };
        if !from.contains(&intent.status) {
            return false;
        }
        apply(&mut intent);
        intent.updated_at = Utc::now();
        true
    }

    fn set_transfer_settled(&self, chain_id: ChainId, hash: B256) {
        if let Some(mut transfer) = self.transfers.get_mut(&(chain_id, hash)) {
            transfer.process_status = ProcessStatus::Settled;
        }
    }
}

#[async_trait]
impl super::StorageApi for InMemoryStorage {
    async fn write_transfer(&self, transfer: &Transfer) -> Result<()> {
        // First observation wins; redelivery must not clobber the outcome.
        if let Entry::Vacant(slot) = self.transfers.entry(transfer.source_ref()) {
            slot.insert(transfer.clone());
        }
        Ok(())
    }

    async fn read_transfer(&self, chain_id: ChainId, hash: B256) -> Result<Option<Transfer>> {
        Ok(self.transfers.get(&(chain_id, hash)).map(|t| t.clone()))
    }

    async fn update_transfer_status(
        &self,
        chain_id: ChainId,
        hash: B256,
        status: &ProcessStatus,
    ) -> Result<()> {
        if let Some(mut transfer) = self.transfers.get_mut(&(chain_id, hash)) {
            transfer.process_status = status.clone();
        }
        Ok(())
    }

    async fn insert_intent(&self, intent: &SettlementIntent) -> Result<bool> {
        match self.source_refs.entry((intent.source_chain, intent.source_hash)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(intent.id);
                self.intents.insert(intent.id, intent.clone());
                Ok(true)
            }
        }
    }

    async fn read_intent(&self, id: IntentId) -> Result<Option<SettlementIntent>> {
        Ok(self.intents.get(&id).map(|intent| intent.clone()))
    }

    async fn pending_self_dispatch_intents(&self) -> Result<Vec<SettlementIntent>> {
        Ok(self
            .intents
            .iter()
            .filter(|intent| intent.status == IntentStatus::Pending && intent.dispatch_self)
            .map(|intent| intent.clone())
            .collect())
    }

    async fn dispatched_intents(&self) -> Result<Vec<SettlementIntent>> {
        Ok(self
            .intents
            .iter()
            .filter(|intent| {
                matches!(intent.status, IntentStatus::Sent | IntentStatus::Crashed)
            })
            .map(|intent| intent.clone())
            .collect())
    }

    async fn stale_reserved_intents(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SettlementIntent>> {
        Ok(self
            .intents
            .iter()
            .filter(|intent| {
                intent.status == IntentStatus::Reserved && intent.updated_at < older_than
            })
            .map(|intent| intent.clone())
            .collect())
    }

    async fn find_pending_by_target(
        &self,
        target_chain: ChainId,
        target_address: Address,
        target_token: Address,
        target_amount: U256,
    ) -> Result<Vec<SettlementIntent>> {
        Ok(self
            .intents
            .iter()
            .filter(|intent| {
                intent.status == IntentStatus::Pending
                    && intent.target_chain == target_chain
                    && intent.target_address == target_address
                    && intent.target_token == target_token
                    && intent.target_amount == target_amount
            })
            .map(|intent| intent.clone())
            .collect())
    }

    async fn settle_intent(
        &self,
        id: IntentId,
        target_chain: ChainId,
        target_hash: B256,
    ) -> Result<bool> {
        let applied = self.transition(id, &[IntentStatus::Pending], |intent| {
            intent.status = IntentStatus::Matched;
            intent.target_hash = Some(target_hash);
        });

        if applied {
            if let Some(intent) = self.intents.get(&id) {
                self.set_transfer_settled(intent.source_chain, intent.source_hash);
            }
            self.set_transfer_settled(target_chain, target_hash);
        }

        Ok(applied)
    }

    async fn reserve_intent(&self, id: IntentId) -> Result<bool> {
        Ok(self.transition(id, &[IntentStatus::Pending], |intent| {
            intent.status = IntentStatus::Reserved;
        }))
    }

    async fn release_intent(&self, id: IntentId) -> Result<bool> {
        Ok(self.transition(id, &[IntentStatus::Reserved], |intent| {
            intent.status = IntentStatus::Pending;
        }))
    }

    async fn mark_sent(&self, id: IntentId, dispatch_hash: B256) -> Result<bool> {
        Ok(self.transition(id, &[IntentStatus::Reserved], |intent| {
            intent.status = IntentStatus::Sent;
            intent.dispatch_hash = Some(dispatch_hash);
        }))
    }

    async fn mark_crashed(&self, id: IntentId, dispatch_hash: Option<B256>) -> Result<bool> {
        Ok(self.transition(id, &[IntentStatus::Reserved], |intent| {
            intent.status = IntentStatus::Crashed;
            intent.dispatch_hash = dispatch_hash;
        }))
    }

    async fn finalize_dispatched(&self, id: IntentId, target_hash: B256) -> Result<bool> {
        let applied =
            self.transition(id, &[IntentStatus::Sent, IntentStatus::Crashed], |intent| {
                intent.status = IntentStatus::Matched;
                intent.target_hash = Some(target_hash);
            });

        if applied {
            if let Some(intent) = self.intents.get(&id) {
                self.set_transfer_settled(intent.source_chain, intent.source_hash);
            }
        }

        Ok(applied)
    }

    async fn read_nonce(&self, chain_id: ChainId, signer: Address) -> Result<Option<NonceRecord>> {
        Ok(self.nonces.get(&(chain_id, signer)).map(|record| record.clone()))
    }

    async fn write_nonce(&self, record: &NonceRecord) -> Result<()> {
        self.nonces.insert((record.chain_id, record.signer), record.clone());
        Ok(())
    }

    async fn read_deploy_record(&self, protocol: u32, tick: u64) -> Result<Option<DeployRecord>> {
        Ok(self.deploy_records.get(&(protocol, tick)).map(|record| record.clone()))
    }

    async fn write_deploy_record(&self, record: &DeployRecord) -> Result<()> {
        if let Entry::Vacant(slot) = self.deploy_records.entry((record.protocol, record.tick)) {
            slot.insert(record.clone());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
