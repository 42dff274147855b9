//! Payout dispatch.
//!
//! Drains per-(target chain, signer) queues of ready obligations through the
//! nonce coordinator and the wallet adapter, and watches dispatched payouts
//! until the chain confirms them.

mod sequencer;
pub use sequencer::PayoutSequencer;

mod watcher;
pub use watcher::ConfirmationWatcher;

use crate::types::{IntentId, SettlementIntent};
use alloy::primitives::{Address, ChainId, U256};

/// Snapshot of an obligation taken at enqueue time.
///
/// Revalidated against the durable store before dispatch; a stale snapshot is
/// dropped from the queue without touching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obligation {
    /// Intent this obligation pays out.
    pub id: IntentId,
    /// Payout chain.
    pub target_chain: ChainId,
    /// Payout token.
    pub token: Address,
    /// Payout recipient.
    pub to: Address,
    /// Payout amount.
    pub amount: U256,
}

impl Obligation {
    /// Snapshots an intent's payout coordinates.
    pub fn of_intent(intent: &SettlementIntent) -> Self {
        Self {
            id: intent.id,
            target_chain: intent.target_chain,
            token: intent.target_token,
            to: intent.target_address,
            amount: intent.target_amount,
        }
    }

    /// Whether the stored intent still matches this snapshot.
    pub fn still_valid(&self, intent: &SettlementIntent) -> bool {
        intent.target_chain == self.target_chain
            && intent.target_token == self.token
            && intent.target_address == self.to
            && intent.target_amount == self.amount
    }
}
