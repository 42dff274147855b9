use alloy::primitives::{keccak256, Address, ChainId, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a [`SettlementIntent`].
pub type IntentId = B256;

/// Derives the intent id from the unique source transfer reference.
pub fn intent_id(chain_id: ChainId, hash: B256) -> IntentId {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&chain_id.to_be_bytes());
    buf[8..].copy_from_slice(hash.as_slice());
    keccak256(buf)
}

/// Lifecycle status of a [`SettlementIntent`].
///
/// Maker-settled intents go `Pending -> Matched` directly. Intents the bridge
/// itself pays out pass through `Reserved` and `Sent` (or `Crashed` on a
/// broadcast-uncertain failure) before the confirmation watcher promotes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Open obligation, not yet satisfied.
    Pending,
    /// Reserved by the payout sequencer for dispatch.
    Reserved,
    /// Payout broadcast, awaiting confirmation.
    Sent,
    /// Payout outcome unknown after broadcast; never retried automatically.
    Crashed,
    /// Terminal: a matching repayment was confirmed.
    Matched,
}

/// The durable record of an obligation to repay a source-chain deposit on a
/// target chain.
///
/// At most one non-terminal intent exists per source transfer, enforced by the
/// storage uniqueness constraint on `(source_chain, source_hash)`. Intents are
/// never deleted, only status-transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementIntent {
    /// Intent identifier, derived from the source reference.
    pub id: IntentId,
    /// Source chain.
    pub source_chain: ChainId,
    /// Source transaction hash.
    pub source_hash: B256,
    /// Raw deposited value on the source chain.
    pub source_amount: U256,
    /// Depositor address.
    pub source_address: Address,
    /// Maker the deposit was addressed to.
    pub source_maker: Address,
    /// Source token symbol.
    pub source_symbol: String,
    /// Observation time of the source transfer.
    pub source_timestamp: DateTime<Utc>,
    /// Resolved target chain.
    pub target_chain: ChainId,
    /// Resolved target token.
    pub target_token: Address,
    /// Resolved target token symbol.
    pub target_symbol: String,
    /// Owed payout amount in target base units, routing code embedded in the tail.
    pub target_amount: U256,
    /// Payout recipient on the target chain.
    pub target_address: Address,
    /// Identifier of the rule the intent was derived under.
    pub rule_id: String,
    /// Addresses permitted to satisfy this intent.
    pub responders: Vec<Address>,
    /// Whether the bridge itself must dispatch the payout.
    pub dispatch_self: bool,
    /// Lifecycle status.
    pub status: IntentStatus,
    /// Matched repayment transaction, once known.
    pub target_hash: Option<B256>,
    /// Hash of the dispatched payout, recorded before confirmation.
    pub dispatch_hash: Option<B256>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status transition time.
    pub updated_at: DateTime<Utc>,
}

impl SettlementIntent {
    /// Whether `address` is permitted to satisfy this intent.
    pub fn is_responder(&self, address: Address) -> bool {
        self.responders.contains(&address)
    }
}
