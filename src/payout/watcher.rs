//! Payout confirmation watcher.

use crate::{
    metrics::PayoutMetrics,
    notify::{Notifier, SettlementEvent},
    storage::{BridgeStorage, StorageApi},
    wallet::WalletAdapter,
};
use alloy::primitives::ChainId;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Promotes dispatched payouts to their terminal status once confirmed.
///
/// Covers both cleanly sent payouts and crashed ones that left a transaction
/// hash behind: a crashed dispatch whose transaction confirms was a payout
/// after all. Crashed obligations without a hash stay flagged for manual
/// reconciliation.
#[derive(Debug)]
pub struct ConfirmationWatcher {
    storage: BridgeStorage,
    wallets: HashMap<ChainId, Arc<dyn WalletAdapter>>,
    notifier: Notifier,
    timeout: Duration,
    metrics: Arc<PayoutMetrics>,
}

impl ConfirmationWatcher {
    /// Creates a new watcher.
    pub fn new(
        storage: BridgeStorage,
        wallets: HashMap<ChainId, Arc<dyn WalletAdapter>>,
        notifier: Notifier,
        timeout: Duration,
        metrics: Arc<PayoutMetrics>,
    ) -> Self {
        Self { storage, wallets, notifier, timeout, metrics }
    }

    /// Runs one confirmation pass over every dispatched intent.
    pub async fn run_once(&self) {
        let dispatched = match self.storage.dispatched_intents().await {
            Ok(dispatched) => dispatched,
            Err(err) => {
                warn!(%err, "dispatched intent scan failed");
                return;
            }
        };

        for intent in dispatched {
            let Some(tx_hash) = intent.dispatch_hash else { continue };
            let Some(wallet) = self.wallets.get(&intent.target_chain) else { continue };

            let started = std::time::Instant::now();
            match wallet.wait_for_confirmation(tx_hash, self.timeout).await {
                Ok(()) => {
                    let finalized =
                        match self.storage.finalize_dispatched(intent.id, tx_hash).await {
                            Ok(finalized) => finalized,
                            Err(err) => {
                                warn!(intent_id = ?intent.id, %err, "finalize failed");
                                continue;
                            }
                        };
                    if finalized {
                        self.metrics.confirmed.increment(1);
                        self.metrics
                            .confirmation_time
                            .record(started.elapsed().as_millis() as f64);
                        debug!(intent_id = ?intent.id, ?tx_hash, "payout confirmed");
                        self.notifier
                            .notify(SettlementEvent::Completed {
                                intent_id: intent.id,
                                target_chain: intent.target_chain,
                                target_hash: tx_hash,
                            })
                            .await;
                    }
                }
                Err(err) => {
                    // Stays dispatched; the next pass looks again.
                    debug!(intent_id = ?intent.id, %err, "payout not confirmed yet");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::DEFAULT_CONFIRMATION_TIMEOUT,
        types::{intent_id, IntentStatus, SettlementIntent},
        wallet::WalletError,
    };
    use alloy::primitives::{address, Address, B256, U256};
    use async_trait::async_trait;
    use chrono::Utc;

    const CHAIN: ChainId = 42161;

    #[derive(Debug)]
    struct ConfirmingWallet {
        confirms: bool,
    }

    #[async_trait]
    impl WalletAdapter for ConfirmingWallet {
        fn address(&self) -> Address {
            address!("00000000000000000000000000000000005e11e0")
        }

        fn chain_id(&self) -> ChainId {
            CHAIN
        }

        async fn transfer(
            &self,
            _: u64,
            _: Address,
            _: Address,
            _: U256,
        ) -> Result<B256, WalletError> {
            unimplemented!("watcher tests never dispatch")
        }

        async fn transfer_many(
            &self,
            _: u64,
            _: Address,
            _: &[(Address, U256)],
        ) -> Result<B256, WalletError> {
            unimplemented!("watcher tests never dispatch")
        }

        async fn get_balance(&self, _: Address) -> Result<U256, WalletError> {
            Ok(U256::MAX)
        }

        async fn wait_for_confirmation(
            &self,
            hash: B256,
            _: Duration,
        ) -> Result<(), WalletError> {
            if self.confirms {
                Ok(())
            } else {
                Err(WalletError::ConfirmationTimeout(hash))
            }
        }
    }

    fn dispatched_intent(status: IntentStatus, dispatch_hash: Option<B256>) -> SettlementIntent {
        let source_hash = B256::with_last_byte(1);
        let now = Utc::now();
        SettlementIntent {
            id: intent_id(1, source_hash),
            source_chain: 1,
            source_hash,
            source_amount: U256::from(1_000u64),
            source_address: address!("000000000000000000000000000000000000b0b0"),
            source_maker: address!("00000000000000000000000000000000000a11ce"),
            source_symbol: "ETH".into(),
            source_timestamp: now,
            target_chain: CHAIN,
            target_token: Address::ZERO,
            target_symbol: "ETH".into(),
            target_amount: U256::from(1_000u64),
            target_address: address!("000000000000000000000000000000000000b0b0"),
            rule_id: "rule-1".into(),
            responders: vec![],
            dispatch_self: true,
            status,
            target_hash: None,
            dispatch_hash,
            created_at: now,
            updated_at: now,
        }
    }

    fn watcher(storage: BridgeStorage, confirms: bool) -> ConfirmationWatcher {
        let (notifier, _rx) = Notifier::new(64);
        let wallets: HashMap<ChainId, Arc<dyn WalletAdapter>> =
            [(CHAIN, Arc::new(ConfirmingWallet { confirms }) as Arc<dyn WalletAdapter>)]
                .into_iter()
                .collect();
        ConfirmationWatcher::new(
            storage,
            wallets,
            notifier,
            DEFAULT_CONFIRMATION_TIMEOUT,
            Arc::new(PayoutMetrics::default()),
        )
    }

    #[tokio::test]
    async fn confirmed_sent_intent_is_finalized() {
        let storage = BridgeStorage::in_memory();
        let hash = B256::with_last_byte(0xaa);
        let intent = dispatched_intent(IntentStatus::Sent, Some(hash));
        assert!(storage.insert_intent(&intent).await.unwrap());

        watcher(storage.clone(), true).run_once().await;

        let stored = storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Matched);
        assert_eq!(stored.target_hash, Some(hash));
    }

    #[tokio::test]
    async fn crashed_intent_with_hash_is_promoted_once_confirmed() {
        let storage = BridgeStorage::in_memory();
        let hash = B256::with_last_byte(0xcc);
        let intent = dispatched_intent(IntentStatus::Crashed, Some(hash));
        assert!(storage.insert_intent(&intent).await.unwrap());

        watcher(storage.clone(), true).run_once().await;

        let stored = storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Matched);
    }

    #[tokio::test]
    async fn unconfirmed_intent_stays_dispatched() {
        let storage = BridgeStorage::in_memory();
        let intent = dispatched_intent(IntentStatus::Sent, Some(B256::with_last_byte(0xaa)));
        assert!(storage.insert_intent(&intent).await.unwrap());

        watcher(storage.clone(), false).run_once().await;

        let stored = storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Sent);
    }

    #[tokio::test]
    async fn crashed_intent_without_hash_is_left_for_reconciliation() {
        let storage = BridgeStorage::in_memory();
        let intent = dispatched_intent(IntentStatus::Crashed, None);
        assert!(storage.insert_intent(&intent).await.unwrap());

        watcher(storage.clone(), true).run_once().await;

        let stored = storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Crashed);
    }
}
