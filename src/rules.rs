//! Rule resolution.
//!
//! Point-in-time snapshot lookups over versioned fee/price rules. Rules are
//! read-only reference data loaded from configuration; the resolver selects the
//! rule version effective at the transfer's timestamp and has no side effects.

use crate::types::Rule;
use alloy::primitives::{Address, ChainId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Route coordinates of a plainly-addressed rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    source_chain: ChainId,
    target_chain: ChainId,
    source_symbol: String,
    target_symbol: String,
    maker: Address,
}

/// Dealer-protocol coordinates of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DealerIndex {
    owner: Address,
    dealer_id: u8,
    ebc_id: u8,
    target_chain_index: u16,
}

/// Snapshot resolver over versioned rules.
#[derive(Debug, Default)]
pub struct RuleResolver {
    /// Rule versions per route, sorted ascending by `effective_from`.
    by_route: HashMap<RouteKey, Vec<Rule>>,
    /// Rule versions per dealer coordinates, sorted ascending by `effective_from`.
    by_dealer: HashMap<DealerIndex, Vec<Rule>>,
}

impl RuleResolver {
    /// Builds a resolver from configured rules.
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut resolver = Self::default();

        for rule in rules {
            if let Some(dealer) = rule.dealer {
                resolver
                    .by_dealer
                    .entry(DealerIndex {
                        owner: dealer.owner,
                        dealer_id: dealer.dealer_id,
                        ebc_id: dealer.ebc_id,
                        target_chain_index: dealer.target_chain_index,
                    })
                    .or_default()
                    .push(rule.clone());
            }
            resolver
                .by_route
                .entry(RouteKey {
                    source_chain: rule.source_chain,
                    target_chain: rule.target_chain,
                    source_symbol: rule.source_symbol.clone(),
                    target_symbol: rule.target_symbol.clone(),
                    maker: rule.maker,
                })
                .or_default()
                .push(rule);
        }

        for versions in resolver.by_route.values_mut() {
            versions.sort_by_key(|rule| rule.effective_from);
        }
        for versions in resolver.by_dealer.values_mut() {
            versions.sort_by_key(|rule| rule.effective_from);
        }

        resolver
    }

    /// Resolves the rule governing a route, effective at `at`.
    pub fn resolve(
        &self,
        source_chain: ChainId,
        target_chain: ChainId,
        source_symbol: &str,
        target_symbol: &str,
        maker: Address,
        at: DateTime<Utc>,
    ) -> Option<&Rule> {
        let key = RouteKey {
            source_chain,
            target_chain,
            source_symbol: source_symbol.to_string(),
            target_symbol: target_symbol.to_string(),
            maker,
        };
        effective_at(self.by_route.get(&key)?, at)
    }

    /// Resolves a rule by dealer coordinates, effective at `at`.
    pub fn resolve_dealer(
        &self,
        owner: Address,
        dealer_id: u8,
        ebc_id: u8,
        target_chain_index: u16,
        at: DateTime<Utc>,
    ) -> Option<&Rule> {
        let key = DealerIndex { owner, dealer_id, ebc_id, target_chain_index };
        effective_at(self.by_dealer.get(&key)?, at)
    }
}

/// Picks the latest version effective at `at` from an ascending-sorted slice.
fn effective_at(versions: &[Rule], at: DateTime<Utc>) -> Option<&Rule> {
    versions.iter().rev().find(|rule| rule.effective_from <= at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DealerKey;
    use alloy::primitives::{address, U256};
    use chrono::TimeZone;

    fn maker() -> Address {
        address!("00000000000000000000000000000000000a11ce")
    }

    fn rule(id: &str, fee_ppm: u32, effective_from: DateTime<Utc>) -> Rule {
        Rule {
            id: id.into(),
            source_chain: 1,
            target_chain: 42161,
            source_symbol: "ETH".into(),
            target_symbol: "ETH".into(),
            trade_fee_ppm: fee_ppm,
            withholding_fee: U256::from(100_000u64),
            maker: maker(),
            dealer: Some(DealerKey {
                owner: maker(),
                dealer_id: 1,
                ebc_id: 2,
                target_chain_index: 3,
            }),
            effective_from,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn selects_version_effective_at_timestamp() {
        let resolver = RuleResolver::new(vec![
            rule("v1", 1000, ts(0)),
            rule("v2", 2000, ts(1000)),
        ]);

        let before = resolver.resolve(1, 42161, "ETH", "ETH", maker(), ts(500)).unwrap();
        assert_eq!(before.id, "v1");
        let after = resolver.resolve(1, 42161, "ETH", "ETH", maker(), ts(1500)).unwrap();
        assert_eq!(after.id, "v2");
    }

    #[test]
    fn no_version_effective_before_first() {
        let resolver = RuleResolver::new(vec![rule("v1", 1000, ts(100))]);
        assert!(resolver.resolve(1, 42161, "ETH", "ETH", maker(), ts(50)).is_none());
    }

    #[test]
    fn dealer_lookup() {
        let resolver = RuleResolver::new(vec![rule("v1", 1000, ts(0))]);
        assert!(resolver.resolve_dealer(maker(), 1, 2, 3, ts(10)).is_some());
        assert!(resolver.resolve_dealer(maker(), 1, 2, 4, ts(10)).is_none());
    }

    #[test]
    fn unknown_route_is_not_found() {
        let resolver = RuleResolver::new(vec![rule("v1", 1000, ts(0))]);
        assert!(resolver.resolve(1, 10, "ETH", "ETH", maker(), ts(10)).is_none());
    }
}
