use alloy::primitives::{Address, Bytes, ChainId, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encoding protocol version of a transfer.
///
/// Assigned once by the builder's structural predicate chain and never mutated
/// afterwards. The order of the variants is the order in which the predicates
/// are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// Dealer-routed transfer through the current-generation router contract.
    RouterV3,
    /// Plain-routed transfer through the first-generation router contract.
    RouterV1,
    /// Chain-family specific bridge contract call with a padded cross-VM recipient.
    ContractCall,
    /// Direct transfer; routing rides in the amount tail or an inscription payload.
    Plain,
}

/// Derivation outcome recorded on a source transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Not yet examined by the builder.
    Pending,
    /// A settlement intent was derived from this transfer.
    Routed,
    /// The transfer participated in a completed settlement.
    Settled,
    /// Derivation was rejected.
    ///
    /// Non-retryable rejections are terminal; the builder never re-examines them.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
        /// Whether a later builder pass may succeed.
        retryable: bool,
    },
}

/// An immutable observation of a chain event, produced by ingestion.
///
/// The pipeline consumes transfers read-only; only `process_status` is ever
/// updated, and only by the builder or the matching engine through storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Chain the transfer was observed on.
    pub chain_id: ChainId,
    /// Transaction hash.
    pub hash: B256,
    /// Sending address.
    pub sender: Address,
    /// Receiving address.
    pub receiver: Address,
    /// Human-readable decimal amount, as reported by ingestion.
    pub amount: String,
    /// Raw value in base units.
    pub value: U256,
    /// Token contract address. [`Address::ZERO`] denotes the native asset.
    pub token: Address,
    /// Token symbol.
    pub symbol: String,
    /// Account nonce of the sending address.
    pub nonce: u64,
    /// Opaque call payload, protocol specific.
    pub calldata: Option<Bytes>,
    /// Observation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the transfer has reached the required confirmation depth.
    pub confirmed: bool,
    /// Protocol version tag, assigned once.
    pub version: Option<ProtocolVersion>,
    /// Derivation outcome.
    pub process_status: ProcessStatus,
}

impl Transfer {
    /// Returns the unique source reference `(chain, hash)` of this transfer.
    pub fn source_ref(&self) -> (ChainId, B256) {
        (self.chain_id, self.hash)
    }
}
