//! Core data model of the settlement pipeline.

mod intent;
pub use intent::{intent_id, IntentId, IntentStatus, SettlementIntent};

mod rule;
pub use rule::{DealerKey, Rule};

mod transfer;
pub use transfer::{ProcessStatus, ProtocolVersion, Transfer};

use alloy::primitives::{Address, ChainId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted nonce state for one `(chain, signer)` lane.
///
/// There is exactly one writer at a time per key; the [`crate::nonce::NonceCoordinator`]
/// serializes access through a per-lane mutex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    /// Chain the signer operates on.
    pub chain_id: ChainId,
    /// Signer address.
    pub signer: Address,
    /// Next unused nonce for the lane.
    pub nonce: u64,
    /// Last time the lane handed out or reconciled a nonce.
    pub last_used: DateTime<Utc>,
}

/// Durable record of an inscription `deploy` operation.
///
/// `mint` and `cross` operations referencing a tick with no deploy record are
/// rejected non-retryably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    /// Inscription protocol id.
    pub protocol: u32,
    /// Tick identifier within the protocol.
    pub tick: u64,
    /// Chain the deploy was observed on.
    pub chain_id: ChainId,
    /// Address that sent the deploy transfer.
    pub deployer: Address,
    /// Observation time of the deploy transfer.
    pub deployed_at: DateTime<Utc>,
}
