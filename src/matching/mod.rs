//! Repayment matching.
//!
//! Reconciles observed repayment transfers against open settlement intents.
//! Two paths run in order, a windowed in-memory cache and a durable-store
//! fallback; both commit through the same conditional storage transaction, so
//! concurrent and redundant runs are safe. Zero rows affected is the expected
//! signal that another path already completed the pairing.

mod cache;
pub use cache::{MatchCache, MatchKey};

use crate::{
    error::StorageError,
    metrics::MatchingMetrics,
    notify::{Notifier, SettlementEvent},
    storage::{BridgeStorage, StorageApi},
    types::{IntentStatus, SettlementIntent, Transfer},
};
use alloy::primitives::B256;
use chrono::TimeDelta;
use std::time::Duration;
use tracing::debug;

/// Matches repayments to settlement intents.
#[derive(Debug)]
pub struct MatchingEngine {
    storage: BridgeStorage,
    cache: MatchCache,
    notifier: Notifier,
    /// Clock skew tolerated when ordering a repayment against its intent.
    skew: TimeDelta,
    metrics: MatchingMetrics,
}

impl MatchingEngine {
    /// Creates a new engine.
    pub fn new(
        storage: BridgeStorage,
        notifier: Notifier,
        window: Duration,
        skew: Duration,
    ) -> Self {
        Self {
            storage,
            cache: MatchCache::new(window),
            notifier,
            skew: TimeDelta::from_std(skew).unwrap_or_else(|_| TimeDelta::zero()),
            metrics: MatchingMetrics::default(),
        }
    }

    /// Whether `repayment` satisfies `intent`.
    ///
    /// Target coordinates, responder membership, and the ordering constraint
    /// that the repayment happened after the intent's source transfer, within
    /// the skew tolerance.
    fn accepts(&self, intent: &SettlementIntent, repayment: &Transfer) -> bool {
        intent.status == IntentStatus::Pending
            && intent.target_token == repayment.token
            && intent.target_symbol == repayment.symbol
            && intent.is_responder(repayment.sender)
            && repayment.timestamp >= intent.source_timestamp - self.skew
    }

    async fn commit(&self, intent: &SettlementIntent, repayment: &Transfer) -> Result<bool, StorageError> {
        let committed =
            self.storage.settle_intent(intent.id, repayment.chain_id, repayment.hash).await?;
        if committed {
            debug!(intent_id = ?intent.id, target_hash = ?repayment.hash, "intent settled");
            self.notifier
                .notify(SettlementEvent::Completed {
                    intent_id: intent.id,
                    target_chain: repayment.chain_id,
                    target_hash: repayment.hash,
                })
                .await;
        } else {
            self.metrics.conflicts.increment(1);
        }
        Ok(committed)
    }

    /// Registers a freshly derived intent.
    ///
    /// Tries the reverse path first: a repayment observed before the intent
    /// was derived may already be waiting. Returns whether the intent settled
    /// immediately.
    pub async fn register_intent(&self, intent: SettlementIntent) -> Result<bool, StorageError> {
        if let Some(repayment) =
            self.cache.take_matching_repayment(&intent, |transfer| self.accepts(&intent, transfer))
        {
            if self.commit(&intent, &repayment).await? {
                self.metrics.cache_matches.increment(1);
                return Ok(true);
            }
            // Another path completed it; the intent is terminal, do not cache.
            return Ok(false);
        }

        self.cache.insert_intent(intent);
        Ok(false)
    }

    /// Processes an observed repayment transfer.
    ///
    /// Returns whether an intent was settled by it.
    pub async fn process_repayment(&self, repayment: &Transfer) -> Result<bool, StorageError> {
        // The settle transaction flags the repayment row; it must exist first.
        self.storage.write_transfer(repayment).await?;

        // Cache path. Entries leave the cache whether the commit wins or not;
        // a conflict means the entry was stale.
        while let Some(intent) = self
            .cache
            .take_matching_intent(repayment, |intent| self.accepts(intent, repayment))
        {
            if self.commit(&intent, repayment).await? {
                self.metrics.cache_matches.increment(1);
                return Ok(true);
            }
        }

        // Store fallback: the intent may have been evicted or derived before a
        // restart.
        let candidates = self
            .storage
            .find_pending_by_target(
                repayment.chain_id,
                repayment.receiver,
                repayment.token,
                repayment.value,
            )
            .await?;
        for intent in candidates {
            if !self.accepts(&intent, repayment) {
                continue;
            }
            if self.commit(&intent, repayment).await? {
                self.metrics.store_matches.increment(1);
                return Ok(true);
            }
        }

        // Hold the repayment for an intent that may still be derived.
        self.cache.insert_repayment(repayment.clone());
        Ok(false)
    }

    /// Runs one eviction sweep over the cache.
    pub fn evict(&self) {
        let evicted = self.cache.evict_expired();
        if evicted > 0 {
            self.metrics.evictions.increment(evicted as u64);
            debug!(evicted, "matching cache entries evicted");
        }
        self.metrics.cached_intents.set(self.cache.intent_count() as f64);
        self.metrics.cached_repayments.set(self.cache.repayment_count() as f64);
    }

    /// Marks a dispatched intent settled by its own payout transaction.
    pub async fn finalize_dispatched(
        &self,
        intent: &SettlementIntent,
        target_hash: B256,
    ) -> Result<bool, StorageError> {
        let finalized = self.storage.finalize_dispatched(intent.id, target_hash).await?;
        if finalized {
            self.notifier
                .notify(SettlementEvent::Completed {
                    intent_id: intent.id,
                    target_chain: intent.target_chain,
                    target_hash,
                })
                .await;
        }
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::{DEFAULT_MATCH_SKEW, DEFAULT_MATCH_WINDOW},
        types::{intent_id, ProcessStatus},
    };
    use alloy::primitives::{address, Address, ChainId, U256};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const TARGET_CHAIN: ChainId = 42161;

    fn responder() -> Address {
        address!("00000000000000000000000000000000000a11ce")
    }

    fn recipient() -> Address {
        address!("000000000000000000000000000000000000b0b0")
    }

    fn engine() -> (Arc<MatchingEngine>, mpsc::Receiver<SettlementEvent>) {
        let (notifier, rx) = Notifier::new(64);
        let engine = MatchingEngine::new(
            BridgeStorage::in_memory(),
            notifier,
            DEFAULT_MATCH_WINDOW,
            DEFAULT_MATCH_SKEW,
        );
        (Arc::new(engine), rx)
    }

    fn intent(amount: u64) -> SettlementIntent {
        let source_hash = B256::with_last_byte(1);
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        SettlementIntent {
            id: intent_id(1, source_hash),
            source_chain: 1,
            source_hash,
            source_amount: U256::from(amount),
            source_address: recipient(),
            source_maker: responder(),
            source_symbol: "ETH".into(),
            source_timestamp: now,
            target_chain: TARGET_CHAIN,
            target_token: Address::ZERO,
            target_symbol: "ETH".into(),
            target_amount: U256::from(amount),
            target_address: recipient(),
            rule_id: "rule-1".into(),
            responders: vec![responder()],
            dispatch_self: false,
            status: IntentStatus::Pending,
            target_hash: None,
            dispatch_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn repayment(amount: u64, sender: Address) -> Transfer {
        Transfer {
            chain_id: TARGET_CHAIN,
            hash: B256::with_last_byte(2),
            sender,
            receiver: recipient(),
            amount: amount.to_string(),
            value: U256::from(amount),
            token: Address::ZERO,
            symbol: "ETH".into(),
            nonce: 1,
            calldata: None,
            timestamp: Utc.timestamp_opt(1_100, 0).unwrap(),
            confirmed: true,
            version: None,
            process_status: ProcessStatus::Pending,
        }
    }

    async fn seed(engine: &MatchingEngine, intent: &SettlementIntent) {
        assert!(engine.storage.insert_intent(intent).await.unwrap());
        engine.register_intent(intent.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn responder_repayment_matches() {
        let (engine, mut rx) = engine();
        let intent = intent(1_000_009_044);
        seed(&engine, &intent).await;

        assert!(engine.process_repayment(&repayment(1_000_009_044, responder())).await.unwrap());

        let stored = engine.storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Matched);
        assert_eq!(stored.target_hash, Some(B256::with_last_byte(2)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SettlementEvent::Completed { intent_id, .. } if intent_id == intent.id
        ));
    }

    #[tokio::test]
    async fn non_responder_does_not_match() {
        let (engine, _rx) = engine();
        let intent = intent(1_000_009_044);
        seed(&engine, &intent).await;

        let stranger = address!("000000000000000000000000000000000000dead");
        assert!(!engine.process_repayment(&repayment(1_000_009_044, stranger)).await.unwrap());

        let stored = engine.storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn wrong_amount_does_not_match() {
        let (engine, _rx) = engine();
        let intent = intent(1_000_009_044);
        seed(&engine, &intent).await;

        assert!(!engine.process_repayment(&repayment(1_000_009_055, responder())).await.unwrap());
    }

    #[tokio::test]
    async fn repayment_before_source_timestamp_does_not_match() {
        let (engine, _rx) = engine();
        let intent = intent(1_000_009_044);
        seed(&engine, &intent).await;

        let mut early = repayment(1_000_009_044, responder());
        // Well before the source transfer, beyond any skew tolerance.
        early.timestamp = Utc.timestamp_opt(0, 0).unwrap();
        assert!(!engine.process_repayment(&early).await.unwrap());
    }

    #[tokio::test]
    async fn repayment_observed_before_intent_matches_on_registration() {
        let (engine, _rx) = engine();
        let intent = intent(1_000_009_044);

        // Repayment arrives first and is held.
        assert!(!engine.process_repayment(&repayment(1_000_009_044, responder())).await.unwrap());

        assert!(engine.storage.insert_intent(&intent).await.unwrap());
        assert!(engine.register_intent(intent.clone()).await.unwrap());

        let stored = engine.storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Matched);
    }

    #[tokio::test]
    async fn store_fallback_after_eviction() {
        let (notifier, _rx) = Notifier::new(64);
        // Zero window: every cache entry is immediately evictable.
        let engine = MatchingEngine::new(
            BridgeStorage::in_memory(),
            notifier,
            Duration::ZERO,
            DEFAULT_MATCH_SKEW,
        );
        let intent = intent(1_000_009_044);
        assert!(engine.storage.insert_intent(&intent).await.unwrap());
        engine.register_intent(intent.clone()).await.unwrap();
        engine.evict();

        assert!(engine.process_repayment(&repayment(1_000_009_044, responder())).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_matches_commit_at_most_once() {
        let (engine, _rx) = engine();
        let intent = intent(1_000_009_044);
        seed(&engine, &intent).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let repayment = repayment(1_000_009_044, responder());
            handles.push(tokio::spawn(async move {
                engine.process_repayment(&repayment).await.unwrap()
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
    }
}
