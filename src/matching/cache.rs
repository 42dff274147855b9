//! Windowed matching cache.
//!
//! A bounded in-memory index of recent pending intents and recent unmatched
//! repayments, keyed by target coordinates. Entries older than the window are
//! evicted regardless of match outcome; the durable store remains the source
//! of truth for anything the cache no longer holds.

use crate::types::{SettlementIntent, Transfer};
use alloy::primitives::{Address, ChainId, U256};
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Target coordinates a repayment is matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    /// Target chain.
    pub chain_id: ChainId,
    /// Payout recipient.
    pub address: Address,
    /// Token symbol.
    pub symbol: String,
    /// Exact amount, routing tail included.
    pub amount: U256,
}

impl MatchKey {
    /// Key of a pending intent's expected repayment.
    pub fn of_intent(intent: &SettlementIntent) -> Self {
        Self {
            chain_id: intent.target_chain,
            address: intent.target_address,
            symbol: intent.target_symbol.clone(),
            amount: intent.target_amount,
        }
    }

    /// Key of an observed repayment transfer.
    pub fn of_repayment(transfer: &Transfer) -> Self {
        Self {
            chain_id: transfer.chain_id,
            address: transfer.receiver,
            symbol: transfer.symbol.clone(),
            amount: transfer.value,
        }
    }
}

/// Time-windowed two-sided match index.
#[derive(Debug)]
pub struct MatchCache {
    window: Duration,
    intents: DashMap<MatchKey, Vec<(SettlementIntent, Instant)>>,
    repayments: DashMap<MatchKey, Vec<(Transfer, Instant)>>,
}

impl MatchCache {
    /// Creates a cache with the given entry lifetime.
    pub fn new(window: Duration) -> Self {
        Self { window, intents: DashMap::new(), repayments: DashMap::new() }
    }

    /// Caches a pending intent.
    pub fn insert_intent(&self, intent: SettlementIntent) {
        self.intents
            .entry(MatchKey::of_intent(&intent))
            .or_default()
            .push((intent, Instant::now()));
    }

    /// Caches an unmatched repayment.
    pub fn insert_repayment(&self, transfer: Transfer) {
        self.repayments
            .entry(MatchKey::of_repayment(&transfer))
            .or_default()
            .push((transfer, Instant::now()));
    }

    /// Removes and returns a cached intent the repayment satisfies.
    ///
    /// The entry leaves the cache either way the caller's commit goes: a
    /// conflicting commit means another path completed the pairing and the
    /// entry is stale.
    pub fn take_matching_intent(
        &self,
        repayment: &Transfer,
        accepts: impl Fn(&SettlementIntent) -> bool,
    ) -> Option<SettlementIntent> {
        let mut slot = self.intents.get_mut(&MatchKey::of_repayment(repayment))?;
        let index = slot.iter().position(|(intent, _)| accepts(intent))?;
        Some(slot.remove(index).0)
    }

    /// Removes and returns a cached repayment satisfying the intent.
    pub fn take_matching_repayment(
        &self,
        intent: &SettlementIntent,
        accepts: impl Fn(&Transfer) -> bool,
    ) -> Option<Transfer> {
        let mut slot = self.repayments.get_mut(&MatchKey::of_intent(intent))?;
        let index = slot.iter().position(|(transfer, _)| accepts(transfer))?;
        Some(slot.remove(index).0)
    }

    /// Evicts entries older than the window, returning how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let window = self.window;
        let mut evicted = 0;

        self.intents.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(_, cached_at)| cached_at.elapsed() < window);
            evicted += before - entries.len();
            !entries.is_empty()
        });
        self.repayments.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(_, cached_at)| cached_at.elapsed() < window);
            evicted += before - entries.len();
            !entries.is_empty()
        });

        evicted
    }

    /// Number of cached intents.
    pub fn intent_count(&self) -> usize {
        self.intents.iter().map(|entries| entries.len()).sum()
    }

    /// Number of cached repayments.
    pub fn repayment_count(&self) -> usize {
        self.repayments.iter().map(|entries| entries.len()).sum()
    }
}
