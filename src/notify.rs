//! Downstream notification.
//!
//! Completion and ready-for-payout events are handed to an external dispatch
//! collaborator over a bounded channel. Delivery is at-least-once; consumers
//! deduplicate by intent id.

use crate::types::IntentId;
use alloy::primitives::{Address, ChainId, B256, U256};
use tokio::sync::mpsc;
use tracing::warn;

/// Event emitted to the downstream collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementEvent {
    /// A settlement intent reached its terminal status.
    Completed {
        /// Completed intent.
        intent_id: IntentId,
        /// Chain the repayment landed on.
        target_chain: ChainId,
        /// Repayment transaction.
        target_hash: B256,
    },
    /// An obligation the bridge itself must pay out became ready.
    ReadyForPayout {
        /// Ready intent.
        intent_id: IntentId,
        /// Payout chain.
        target_chain: ChainId,
        /// Payout recipient.
        target_address: Address,
        /// Payout token.
        target_token: Address,
        /// Payout amount.
        target_amount: U256,
    },
}

/// Sender half of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<SettlementEvent>,
}

impl Notifier {
    /// Creates a bounded notifier, returning the consumer half.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SettlementEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Emits an event, awaiting channel capacity.
    ///
    /// A closed channel is logged and dropped; notification delivery is
    /// best-effort on top of the durable store, never the source of truth.
    pub async fn notify(&self, event: SettlementEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("notification channel closed, event dropped");
        }
    }
}
