//! Chain and token reference data.
//!
//! Maps the small internal ids embedded in routing codes to chain ids and back,
//! and carries per-chain token tables and router contract addresses. Loaded from
//! configuration, read-only afterwards.

use alloy::primitives::{Address, ChainId};
use eyre::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chain family, selecting the contract-call decoding variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    /// EVM chains; recipients are 20-byte addresses.
    Evm,
    /// Chains whose account format needs fixed-width big-endian padding.
    CrossVm,
}

/// Router contract generation deployed on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    /// Current-generation router; dealer-encoded routing.
    V3,
    /// First-generation router; plain-encoded routing.
    V1,
    /// Chain-family bridge contract with padded cross-VM recipients.
    Forwarder,
}

/// A token known on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token contract address. [`Address::ZERO`] denotes the native asset.
    pub address: Address,
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
}

/// Configuration of a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Canonical chain id.
    pub chain_id: ChainId,
    /// Internal id used by routing codes, in `1..=999`.
    pub internal_id: u16,
    /// Chain family.
    pub family: ChainFamily,
    /// Router contracts deployed on this chain.
    #[serde(default)]
    pub routers: HashMap<Address, RouterKind>,
    /// Tokens bridgeable on this chain.
    #[serde(default)]
    pub tokens: Vec<TokenInfo>,
}

/// Registry of configured chains and tokens.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    by_chain: HashMap<ChainId, ChainEntry>,
    by_internal: HashMap<u16, ChainId>,
}

impl ChainRegistry {
    /// Builds a registry from configured entries.
    ///
    /// Internal ids must be unique, within `1..=999`, not divisible by 10 (a
    /// trailing zero in the routing code would be eaten by the amount-tail trim)
    /// and outside `901..=909` (those codes fall in the float-echo correction
    /// pattern and decode realigned). Either way the code could never
    /// round-trip.
    pub fn new(entries: Vec<ChainEntry>) -> eyre::Result<Self> {
        let mut by_chain = HashMap::with_capacity(entries.len());
        let mut by_internal = HashMap::with_capacity(entries.len());

        for entry in entries {
            ensure!(
                (1..=999).contains(&entry.internal_id),
                "internal id {} for chain {} outside 1..=999",
                entry.internal_id,
                entry.chain_id
            );
            ensure!(
                entry.internal_id % 10 != 0,
                "internal id {} for chain {} ends in zero and cannot round-trip",
                entry.internal_id,
                entry.chain_id
            );
            ensure!(
                !(901..=909).contains(&entry.internal_id),
                "internal id {} for chain {} collides with the echo correction pattern",
                entry.internal_id,
                entry.chain_id
            );
            if by_internal.insert(entry.internal_id, entry.chain_id).is_some() {
                bail!("duplicate internal id {}", entry.internal_id);
            }
            if by_chain.insert(entry.chain_id, entry).is_some() {
                bail!("duplicate chain entry");
            }
        }

        Ok(Self { by_chain, by_internal })
    }

    /// Returns the entry for a chain id.
    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainEntry> {
        self.by_chain.get(&chain_id)
    }

    /// Returns the entry for an internal routing id.
    pub fn by_internal_id(&self, internal_id: u16) -> Option<&ChainEntry> {
        self.by_internal.get(&internal_id).and_then(|id| self.by_chain.get(id))
    }

    /// Returns the internal routing id of a chain.
    pub fn internal_id(&self, chain_id: ChainId) -> Option<u16> {
        self.by_chain.get(&chain_id).map(|entry| entry.internal_id)
    }

    /// Looks up a token by contract address.
    pub fn token(&self, chain_id: ChainId, address: Address) -> Option<&TokenInfo> {
        self.chain(chain_id)?.tokens.iter().find(|token| token.address == address)
    }

    /// Looks up a token by symbol.
    pub fn token_by_symbol(&self, chain_id: ChainId, symbol: &str) -> Option<&TokenInfo> {
        self.chain(chain_id)?.tokens.iter().find(|token| token.symbol == symbol)
    }

    /// Returns the router generation deployed at `address` on `chain_id`, if any.
    pub fn router(&self, chain_id: ChainId, address: Address) -> Option<RouterKind> {
        self.chain(chain_id)?.routers.get(&address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chain_id: ChainId, internal_id: u16) -> ChainEntry {
        ChainEntry {
            chain_id,
            internal_id,
            family: ChainFamily::Evm,
            routers: HashMap::new(),
            tokens: vec![TokenInfo {
                address: Address::ZERO,
                symbol: "ETH".into(),
                decimals: 18,
            }],
        }
    }

    #[test]
    fn bidirectional_lookup() {
        let registry = ChainRegistry::new(vec![entry(1, 1), entry(42161, 42)]).unwrap();
        assert_eq!(registry.by_internal_id(42).unwrap().chain_id, 42161);
        assert_eq!(registry.internal_id(1), Some(1));
        assert!(registry.by_internal_id(99).is_none());
    }

    #[test]
    fn rejects_trailing_zero_internal_id() {
        assert!(ChainRegistry::new(vec![entry(10, 40)]).is_err());
    }

    #[test]
    fn rejects_echo_pattern_internal_id() {
        assert!(ChainRegistry::new(vec![entry(10, 905)]).is_err());
    }

    #[test]
    fn rejects_duplicate_internal_id() {
        assert!(ChainRegistry::new(vec![entry(1, 7), entry(2, 7)]).is_err());
    }
}
