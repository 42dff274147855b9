use alloy::primitives::{Address, ChainId, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dealer-protocol coordinates addressing a [`Rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DealerKey {
    /// Maker owner address the dealer route belongs to.
    pub owner: Address,
    /// Two-digit dealer identifier, non-zero.
    pub dealer_id: u8,
    /// One-digit fee-rule (ebc) identifier, non-zero.
    pub ebc_id: u8,
    /// Two-digit target chain index, non-zero.
    pub target_chain_index: u16,
}

/// Fee and routing rule governing one source -> target route.
///
/// Read-only reference data supplied by configuration; rules are versioned by
/// `effective_from` and resolved as point-in-time snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier.
    pub id: String,
    /// Source chain.
    pub source_chain: ChainId,
    /// Target chain.
    pub target_chain: ChainId,
    /// Source token symbol.
    pub source_symbol: String,
    /// Target token symbol.
    pub target_symbol: String,
    /// Proportional fee in parts per million of the routed value.
    pub trade_fee_ppm: u32,
    /// Flat fee withheld from the payout, in base units.
    pub withholding_fee: U256,
    /// Maker expected to satisfy intents derived under this rule.
    pub maker: Address,
    /// Dealer coordinates, when the rule is addressable by the dealer protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealer: Option<DealerKey>,
    /// Time this rule version becomes effective.
    pub effective_from: DateTime<Utc>,
}
