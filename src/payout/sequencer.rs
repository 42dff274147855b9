//! Payout queues and dispatch.

use super::Obligation;
use crate::{
    constants::DEFAULT_RESERVATION_TIMEOUT,
    error::StorageError,
    metrics::PayoutMetrics,
    nonce::{CommitPolicy, NonceCoordinator},
    notify::{Notifier, SettlementEvent},
    storage::{BridgeStorage, StorageApi},
    types::{IntentStatus, SettlementIntent},
    wallet::{WalletAdapter, WalletError},
};
use alloy::primitives::{Address, ChainId, U256};
use chrono::Utc;
use dashmap::DashMap;
use std::{collections::HashMap, collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// A per-(chain, signer) payout queue.
#[derive(Debug, Default)]
struct Lane {
    queue: Mutex<VecDeque<Obligation>>,
    /// Idle gate: a drain pass holds this so no two passes overlap.
    draining: Mutex<()>,
}

/// Dispatches ready obligations from per-lane queues.
#[derive(Debug)]
pub struct PayoutSequencer {
    storage: BridgeStorage,
    nonces: NonceCoordinator,
    wallets: HashMap<ChainId, Arc<dyn WalletAdapter>>,
    lanes: DashMap<(ChainId, Address), Arc<Lane>>,
    notifier: Notifier,
    batch_size: usize,
    commit_policy: CommitPolicy,
    reservation_timeout: Duration,
    metrics: Arc<PayoutMetrics>,
}

impl PayoutSequencer {
    /// Creates a new sequencer.
    pub fn new(
        storage: BridgeStorage,
        nonces: NonceCoordinator,
        wallets: HashMap<ChainId, Arc<dyn WalletAdapter>>,
        notifier: Notifier,
        batch_size: usize,
        commit_policy: CommitPolicy,
    ) -> Self {
        Self {
            storage,
            nonces,
            wallets,
            lanes: DashMap::new(),
            notifier,
            batch_size,
            commit_policy,
            reservation_timeout: DEFAULT_RESERVATION_TIMEOUT,
            metrics: Arc::new(PayoutMetrics::default()),
        }
    }

    /// Sets the age after which a reservation without a dispatch outcome is
    /// released on rescan.
    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }

    /// Shared metric handles, also used by the confirmation watcher.
    pub fn metrics(&self) -> Arc<PayoutMetrics> {
        Arc::clone(&self.metrics)
    }

    fn lane(&self, chain_id: ChainId, signer: Address) -> Arc<Lane> {
        Arc::clone(&self.lanes.entry((chain_id, signer)).or_default())
    }

    /// Enqueues a ready obligation.
    ///
    /// A no-op when no wallet serves the target chain or the obligation is
    /// already queued. Announces the obligation downstream.
    pub async fn enqueue(&self, intent: &SettlementIntent) {
        let Some(wallet) = self.wallets.get(&intent.target_chain) else {
            warn!(
                intent_id = ?intent.id,
                target_chain = intent.target_chain,
                "no wallet for target chain, obligation not queued"
            );
            return;
        };

        let obligation = Obligation::of_intent(intent);
        let lane = self.lane(intent.target_chain, wallet.address());
        {
            let mut queue = lane.queue.lock().await;
            if queue.iter().any(|queued| queued.id == obligation.id) {
                return;
            }
            queue.push_back(obligation);
            self.metrics.queued.increment(1.0);
        }

        self.notifier
            .notify(SettlementEvent::ReadyForPayout {
                intent_id: intent.id,
                target_chain: intent.target_chain,
                target_address: intent.target_address,
                target_token: intent.target_token,
                target_amount: intent.target_amount,
            })
            .await;
    }

    /// Re-enqueues pending self-dispatch intents from the store.
    ///
    /// Recovers queue state after a restart and retries obligations that hit a
    /// transient failure on an earlier pass. Reservations abandoned by a run
    /// that died mid-dispatch are released back to pending first; the age
    /// threshold keeps a live drain pass out of reach.
    pub async fn rescan(&self) -> Result<(), StorageError> {
        let stale_before = Utc::now() - self.reservation_timeout;
        for intent in self.storage.stale_reserved_intents(stale_before).await? {
            if self.storage.release_intent(intent.id).await? {
                warn!(intent_id = ?intent.id, "abandoned reservation released");
            }
        }

        for intent in self.storage.pending_self_dispatch_intents().await? {
            self.enqueue(&intent).await;
        }
        Ok(())
    }

    /// Runs one drain pass over every lane.
    pub async fn drain(&self) {
        let lanes: Vec<_> =
            self.lanes.iter().map(|entry| (*entry.key(), Arc::clone(entry.value()))).collect();

        for ((chain_id, signer), lane) in lanes {
            // Skip lanes another pass is still draining.
            let Ok(_guard) = lane.draining.try_lock() else { continue };
            let Some(wallet) = self.wallets.get(&chain_id) else { continue };

            if let Err(err) = self.drain_lane(&lane, wallet.as_ref()).await {
                error!(chain_id, %signer, %err, "payout drain pass failed");
            }
        }
    }

    async fn drain_lane(
        &self,
        lane: &Lane,
        wallet: &dyn WalletAdapter,
    ) -> Result<(), StorageError> {
        loop {
            let batch = self.pop_batch(lane).await;
            if batch.is_empty() {
                return Ok(());
            }
            let batch = self.revalidate(batch).await?;
            if batch.is_empty() {
                continue;
            }
            self.dispatch(wallet, batch).await?;
        }
    }

    /// Pops up to `batch_size` obligations of the same token.
    async fn pop_batch(&self, lane: &Lane) -> Vec<Obligation> {
        let mut queue = lane.queue.lock().await;
        let Some(token) = queue.front().map(|obligation| obligation.token) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        while batch.len() < self.batch_size
            && queue.front().is_some_and(|obligation| obligation.token == token)
        {
            // The loop condition checked the front exists.
            if let Some(obligation) = queue.pop_front() {
                batch.push(obligation);
            }
        }
        self.metrics.queued.decrement(batch.len() as f64);
        batch
    }

    /// Drops obligations whose stored intent no longer matches the snapshot.
    ///
    /// Dropped entries are not marked in the store; a still-pending intent
    /// re-enters a queue on the next rescan.
    async fn revalidate(&self, batch: Vec<Obligation>) -> Result<Vec<Obligation>, StorageError> {
        let mut valid = Vec::with_capacity(batch.len());
        for obligation in batch {
            let keep = match self.storage.read_intent(obligation.id).await? {
                Some(intent) => {
                    intent.status == IntentStatus::Pending && obligation.still_valid(&intent)
                }
                None => false,
            };
            if keep {
                valid.push(obligation);
            } else {
                self.metrics.stale_dropped.increment(1);
                debug!(intent_id = ?obligation.id, "stale queue entry dropped");
            }
        }
        Ok(valid)
    }

    async fn dispatch(
        &self,
        wallet: &dyn WalletAdapter,
        batch: Vec<Obligation>,
    ) -> Result<(), StorageError> {
        // Conditionally reserve each obligation; a lost race drops it here.
        let mut reserved = Vec::with_capacity(batch.len());
        for obligation in batch {
            if self.storage.reserve_intent(obligation.id).await? {
                reserved.push(obligation);
            } else {
                self.metrics.stale_dropped.increment(1);
            }
        }
        if reserved.is_empty() {
            return Ok(());
        }

        let token = reserved[0].token;
        let need: U256 = reserved.iter().map(|obligation| obligation.amount).sum();

        // Balance check ahead of the nonce: a short wallet is a pre-broadcast
        // failure and must not consume a nonce value.
        match wallet.get_balance(token).await {
            Ok(have) if have >= need => {}
            Ok(have) => {
                warn!(
                    chain_id = wallet.chain_id(),
                    signer = %wallet.address(),
                    %have,
                    %need,
                    "insufficient balance, payout deferred"
                );
                return self.release(reserved).await;
            }
            Err(err) => {
                warn!(chain_id = wallet.chain_id(), %err, "balance query failed");
                return self.release(reserved).await;
            }
        }

        let reservation = match self
            .nonces
            .reserve(wallet.chain_id(), wallet.address(), self.commit_policy)
            .await
        {
            Ok(reservation) => reservation,
            Err(err) => {
                warn!(chain_id = wallet.chain_id(), %err, "nonce reservation failed");
                return self.release(reserved).await;
            }
        };
        let nonce = reservation.nonce();

        let result = if reserved.len() > 1 {
            let recipients: Vec<_> = reserved
                .iter()
                .map(|obligation| (obligation.to, obligation.amount))
                .collect();
            wallet.transfer_many(nonce, token, &recipients).await
        } else {
            let obligation = &reserved[0];
            wallet.transfer(nonce, token, obligation.to, obligation.amount).await
        };

        match result {
            Ok(tx_hash) => {
                reservation.commit().await?;
                for obligation in &reserved {
                    self.storage.mark_sent(obligation.id, tx_hash).await?;
                }
                self.metrics.sent.increment(reserved.len() as u64);
                if reserved.len() > 1 {
                    self.metrics.batched.increment(reserved.len() as u64);
                }
                debug!(
                    chain_id = wallet.chain_id(),
                    ?tx_hash,
                    count = reserved.len(),
                    "payout broadcast"
                );
                Ok(())
            }
            Err(err) if err.is_post_broadcast() => {
                // The nonce may have been consumed on-chain: commit it and flag
                // the obligations for reconciliation, never retry silently.
                reservation.commit().await?;
                let tx_hash = match &err {
                    WalletError::BroadcastUncertain { tx_hash, .. } => Some(*tx_hash),
                    _ => None,
                };
                for obligation in &reserved {
                    self.storage.mark_crashed(obligation.id, tx_hash).await?;
                }
                self.metrics.crashed.increment(reserved.len() as u64);
                error!(
                    chain_id = wallet.chain_id(),
                    nonce,
                    %err,
                    "broadcast outcome uncertain, obligations flagged"
                );
                Ok(())
            }
            Err(err) => {
                reservation.rollback();
                self.metrics.rolled_back.increment(1);
                warn!(chain_id = wallet.chain_id(), %err, "pre-broadcast failure, rolled back");
                self.release(reserved).await
            }
        }
    }

    async fn release(&self, reserved: Vec<Obligation>) -> Result<(), StorageError> {
        for obligation in reserved {
            self.storage.release_intent(obligation.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        nonce::NonceSource,
        types::{intent_id, IntentId},
    };
    use alloy::primitives::{address, B256};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    const CHAIN: ChainId = 42161;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Ok,
        PreBroadcast,
        PostBroadcast,
    }

    #[derive(Debug)]
    struct MockWallet {
        address: Address,
        balance: std::sync::Mutex<U256>,
        mode: std::sync::Mutex<Mode>,
        calls: std::sync::Mutex<Vec<(u64, Vec<(Address, U256)>)>>,
    }

    impl MockWallet {
        fn new() -> Self {
            Self {
                address: address!("00000000000000000000000000000000005e11e0"),
                balance: std::sync::Mutex::new(U256::MAX),
                mode: std::sync::Mutex::new(Mode::Ok),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn set_balance(&self, balance: U256) {
            *self.balance.lock().unwrap() = balance;
        }

        fn dispatch(
            &self,
            nonce: u64,
            recipients: Vec<(Address, U256)>,
        ) -> Result<B256, WalletError> {
            match *self.mode.lock().unwrap() {
                Mode::Ok => {
                    self.calls.lock().unwrap().push((nonce, recipients));
                    Ok(B256::with_last_byte(nonce as u8 + 1))
                }
                Mode::PreBroadcast => Err(WalletError::PreBroadcast("node rejected".into())),
                Mode::PostBroadcast => Err(WalletError::BroadcastUncertain {
                    tx_hash: B256::with_last_byte(0xcc),
                    reason: "timeout".into(),
                }),
            }
        }
    }

    #[async_trait]
    impl WalletAdapter for MockWallet {
        fn address(&self) -> Address {
            self.address
        }

        fn chain_id(&self) -> ChainId {
            CHAIN
        }

        async fn transfer(
            &self,
            nonce: u64,
            _token: Address,
            to: Address,
            amount: U256,
        ) -> Result<B256, WalletError> {
            self.dispatch(nonce, vec![(to, amount)])
        }

        async fn transfer_many(
            &self,
            nonce: u64,
            _token: Address,
            recipients: &[(Address, U256)],
        ) -> Result<B256, WalletError> {
            self.dispatch(nonce, recipients.to_vec())
        }

        async fn get_balance(&self, _token: Address) -> Result<U256, WalletError> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn wait_for_confirmation(
            &self,
            _hash: B256,
            _timeout: Duration,
        ) -> Result<(), WalletError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct ZeroSource;

    #[async_trait]
    impl NonceSource for ZeroSource {
        async fn transaction_count(&self, _: ChainId, _: Address) -> eyre::Result<u64> {
            Ok(0)
        }
    }

    fn intent(tag: u8, amount: u64) -> SettlementIntent {
        let source_hash = B256::with_last_byte(tag);
        let now = Utc::now();
        SettlementIntent {
            id: intent_id(1, source_hash),
            source_chain: 1,
            source_hash,
            source_amount: U256::from(amount),
            source_address: address!("000000000000000000000000000000000000b0b0"),
            source_maker: address!("00000000000000000000000000000000000a11ce"),
            source_symbol: "ETH".into(),
            source_timestamp: now,
            target_chain: CHAIN,
            target_token: Address::ZERO,
            target_symbol: "ETH".into(),
            target_amount: U256::from(amount),
            target_address: Address::with_last_byte(tag),
            rule_id: "rule-1".into(),
            responders: vec![address!("00000000000000000000000000000000000a11ce")],
            dispatch_self: true,
            status: IntentStatus::Pending,
            target_hash: None,
            dispatch_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sequencer(wallet: Arc<MockWallet>) -> PayoutSequencer {
        let storage = BridgeStorage::in_memory();
        let nonces = NonceCoordinator::new(storage.clone(), Arc::new(ZeroSource));
        let (notifier, _rx) = Notifier::new(64);
        let wallets: HashMap<ChainId, Arc<dyn WalletAdapter>> =
            [(CHAIN, wallet as Arc<dyn WalletAdapter>)].into_iter().collect();
        PayoutSequencer::new(storage, nonces, wallets, notifier, 10, CommitPolicy::OnAccept)
    }

    async fn seed(sequencer: &PayoutSequencer, intent: &SettlementIntent) {
        assert!(sequencer.storage.insert_intent(intent).await.unwrap());
        sequencer.enqueue(intent).await;
    }

    async fn status(sequencer: &PayoutSequencer, id: IntentId) -> IntentStatus {
        sequencer.storage.read_intent(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn single_obligation_dispatches_singly() {
        let wallet = Arc::new(MockWallet::new());
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        seed(&sequencer, &intent).await;

        sequencer.drain().await;

        let calls = wallet.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 0);
        assert_eq!(calls[0].1, vec![(intent.target_address, intent.target_amount)]);
        drop(calls);

        let stored = sequencer.storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Sent);
        assert!(stored.dispatch_hash.is_some());
    }

    #[tokio::test]
    async fn same_token_obligations_batch_under_one_nonce() {
        let wallet = Arc::new(MockWallet::new());
        let sequencer = sequencer(wallet.clone());
        for tag in 1..=3 {
            seed(&sequencer, &intent(tag, 1_000_000_000 + tag as u64)).await;
        }

        sequencer.drain().await;

        let calls = wallet.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 0);
        assert_eq!(calls[0].1.len(), 3);
    }

    #[tokio::test]
    async fn pre_broadcast_failure_rolls_back() {
        let wallet = Arc::new(MockWallet::new());
        wallet.set_mode(Mode::PreBroadcast);
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        seed(&sequencer, &intent).await;

        sequencer.drain().await;
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Pending);

        // The nonce returned to the lane: the retry dispatches with it.
        wallet.set_mode(Mode::Ok);
        sequencer.rescan().await.unwrap();
        sequencer.drain().await;
        assert_eq!(wallet.calls.lock().unwrap()[0].0, 0);
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Sent);
    }

    #[tokio::test]
    async fn post_broadcast_failure_flags_crashed_and_keeps_nonce() {
        let wallet = Arc::new(MockWallet::new());
        wallet.set_mode(Mode::PostBroadcast);
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        seed(&sequencer, &intent).await;

        sequencer.drain().await;

        let stored = sequencer.storage.read_intent(intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Crashed);
        assert_eq!(stored.dispatch_hash, Some(B256::with_last_byte(0xcc)));

        // Crashed obligations are never re-queued automatically, and the next
        // dispatch must use the next nonce.
        wallet.set_mode(Mode::Ok);
        sequencer.rescan().await.unwrap();
        sequencer.drain().await;
        assert!(wallet.calls.lock().unwrap().is_empty());

        let other = self::intent(2, 2_000_000_000);
        seed(&sequencer, &other).await;
        sequencer.drain().await;
        assert_eq!(wallet.calls.lock().unwrap()[0].0, 1);
    }

    #[tokio::test]
    async fn insufficient_balance_defers_without_consuming_a_nonce() {
        let wallet = Arc::new(MockWallet::new());
        wallet.set_balance(U256::from(1u64));
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        seed(&sequencer, &intent).await;

        sequencer.drain().await;
        assert!(wallet.calls.lock().unwrap().is_empty());
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Pending);

        wallet.set_balance(U256::MAX);
        sequencer.rescan().await.unwrap();
        sequencer.drain().await;
        assert_eq!(wallet.calls.lock().unwrap()[0].0, 0);
    }

    #[tokio::test]
    async fn abandoned_reservation_is_released_on_rescan() {
        let wallet = Arc::new(MockWallet::new());
        let sequencer =
            sequencer(wallet.clone()).with_reservation_timeout(Duration::from_millis(0));
        let intent = intent(1, 1_000_009_044);

        // A previous run reserved the intent and died before any outcome was
        // recorded: it is in the store but in no queue.
        assert!(sequencer.storage.insert_intent(&intent).await.unwrap());
        assert!(sequencer.storage.reserve_intent(intent.id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(5)).await;
        sequencer.rescan().await.unwrap();
        sequencer.drain().await;

        assert_eq!(wallet.calls.lock().unwrap().len(), 1);
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Sent);
    }

    #[tokio::test]
    async fn fresh_reservation_survives_a_rescan() {
        let wallet = Arc::new(MockWallet::new());
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        assert!(sequencer.storage.insert_intent(&intent).await.unwrap());
        assert!(sequencer.storage.reserve_intent(intent.id).await.unwrap());

        // Under the default timeout a reservation this young belongs to a live
        // dispatch attempt and must not be touched.
        sequencer.rescan().await.unwrap();
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Reserved);
    }

    #[tokio::test]
    async fn stale_queue_entry_is_dropped() {
        let wallet = Arc::new(MockWallet::new());
        let sequencer = sequencer(wallet.clone());
        let intent = intent(1, 1_000_009_044);
        seed(&sequencer, &intent).await;

        // Settled by a maker repayment while queued.
        assert!(sequencer
            .storage
            .settle_intent(intent.id, CHAIN, B256::with_last_byte(0xee))
            .await
            .unwrap());

        sequencer.drain().await;
        assert!(wallet.calls.lock().unwrap().is_empty());
        assert_eq!(status(&sequencer, intent.id).await, IntentStatus::Matched);
    }
}
