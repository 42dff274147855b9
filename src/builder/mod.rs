//! Settlement intent derivation.
//!
//! Combines a normalized transfer, the routing codec and the rule resolver into
//! a durable [`SettlementIntent`]. Rejections are reported, never thrown;
//! structural ones are persisted as a terminal status on the source transfer so
//! the pipeline never re-examines them.

use crate::{
    constants::{DEALER_CODE_MODULUS, ROUTING_CODE_MIN, ROUTING_CODE_MODULUS, ROUTING_NONCE_MAX},
    error::StorageError,
    metrics::BuilderMetrics,
    registry::{ChainFamily, ChainRegistry, RouterKind},
    routing::{
        bridgeOutCall, decode_bridge_out, decode_dealer_value, decode_forward, decode_forward_to,
        decode_inscription, decode_plain_value, encode_target_amount, forwardCall, forwardToCall,
        selector, unpad_account, DecodeError, InscriptionOp, InscriptionPayload, RouteDetail,
        RoutingInfo,
    },
    rules::RuleResolver,
    storage::{BridgeStorage, StorageApi},
    types::{
        intent_id, DeployRecord, IntentStatus, ProcessStatus, ProtocolVersion, Rule,
        SettlementIntent, Transfer,
    },
};
use alloy::{
    primitives::{Address, U256},
    sol_types::SolCall,
};
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

/// Derivation failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The transfer has not reached the required confirmation depth yet.
    #[error("transfer not yet confirmed")]
    Unconfirmed,

    /// The account nonce collides with the routing code space.
    #[error("account nonce {0} collides with the routing code space")]
    NonceOutOfRange(u64),

    /// Source chain or token is not configured.
    #[error("source chain or token not configured")]
    SourceChainOrTokenNotFound,

    /// Target chain or token is not configured.
    #[error("target chain or token not configured")]
    TargetChainOrTokenNotFound,

    /// No rule governs the decoded route at the transfer's timestamp.
    #[error("no rule governs this route")]
    RuleNotFound,

    /// The derived target amount is non-positive.
    #[error("derived target amount is too small")]
    AmountTooSmall,

    /// An inscription op referenced a tick that was never deployed.
    #[error("no deploy record for protocol {protocol} tick {tick}")]
    DeployRecordNotFound {
        /// Inscription protocol id.
        protocol: u32,
        /// Tick identifier.
        tick: u64,
    },

    /// Routing metadata did not decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Storage failure during derivation.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BuildError {
    /// Whether retrying the same transfer can never succeed.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Unconfirmed | Self::Storage(_))
    }
}

/// Outcome of processing one transfer.
#[derive(Debug)]
pub enum BuildOutcome {
    /// A settlement intent was derived and persisted.
    Intent(Box<SettlementIntent>),
    /// An intent for this source reference already exists, or the transfer was
    /// already processed to a terminal outcome. Expected under redelivery.
    Duplicate,
    /// An inscription deploy record was written; no obligation arises.
    DeployRecorded,
    /// A valid same-chain inscription op; nothing is owed cross-chain.
    NoObligation,
    /// Derivation was rejected.
    Rejected(BuildError),
}

/// Derives settlement intents from observed transfers.
#[derive(Debug)]
pub struct IntentBuilder {
    registry: Arc<ChainRegistry>,
    rules: Arc<RuleResolver>,
    storage: BridgeStorage,
    /// Configured look-alike addresses also permitted to respond per maker.
    aliases: HashMap<Address, Vec<Address>>,
    /// Makers whose payouts the bridge dispatches itself.
    self_makers: HashSet<Address>,
    metrics: BuilderMetrics,
}

impl IntentBuilder {
    /// Creates a new builder.
    pub fn new(
        registry: Arc<ChainRegistry>,
        rules: Arc<RuleResolver>,
        storage: BridgeStorage,
    ) -> Self {
        Self {
            registry,
            rules,
            storage,
            aliases: HashMap::new(),
            self_makers: HashSet::new(),
            metrics: BuilderMetrics::default(),
        }
    }

    /// Configures look-alike responder addresses per maker.
    pub fn with_aliases(mut self, aliases: HashMap<Address, Vec<Address>>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Configures the makers whose payouts the bridge dispatches itself.
    pub fn with_self_makers(mut self, makers: HashSet<Address>) -> Self {
        self.self_makers = makers;
        self
    }

    /// Processes one transfer delivery end to end.
    ///
    /// Idempotent under redelivery: the transfer upsert and the intent
    /// uniqueness constraint make a second delivery a [`BuildOutcome::Duplicate`].
    pub async fn process(&self, transfer: &Transfer) -> Result<BuildOutcome, StorageError> {
        // Record the assigned protocol version on the observation; the
        // first-observation-wins upsert keeps it stable under redelivery.
        let mut transfer = transfer.clone();
        transfer.version = Some(self.classify(&transfer));
        let transfer = &transfer;
        self.storage.write_transfer(transfer).await?;

        // An earlier delivery that reached a terminal outcome is final.
        if let Some(existing) =
            self.storage.read_transfer(transfer.chain_id, transfer.hash).await?
        {
            let terminal = match &existing.process_status {
                ProcessStatus::Routed | ProcessStatus::Settled => true,
                ProcessStatus::Rejected { retryable, .. } => !retryable,
                ProcessStatus::Pending => false,
            };
            if terminal {
                self.metrics.duplicates.increment(1);
                return Ok(BuildOutcome::Duplicate);
            }
        }

        match self.try_build(transfer).await {
            Ok(BuildOutcome::Intent(intent)) => {
                if !self.storage.insert_intent(&intent).await? {
                    self.metrics.duplicates.increment(1);
                    return Ok(BuildOutcome::Duplicate);
                }
                self.storage
                    .update_transfer_status(transfer.chain_id, transfer.hash, &ProcessStatus::Routed)
                    .await?;
                self.metrics.derived.increment(1);
                debug!(
                    intent_id = ?intent.id,
                    source_chain = transfer.chain_id,
                    target_chain = intent.target_chain,
                    "derived settlement intent"
                );
                Ok(BuildOutcome::Intent(intent))
            }
            Ok(outcome @ (BuildOutcome::DeployRecorded | BuildOutcome::NoObligation)) => {
                if matches!(outcome, BuildOutcome::DeployRecorded) {
                    self.metrics.deploys.increment(1);
                }
                self.storage
                    .update_transfer_status(transfer.chain_id, transfer.hash, &ProcessStatus::Routed)
                    .await?;
                Ok(outcome)
            }
            Ok(outcome) => Ok(outcome),
            Err(BuildError::Storage(err)) => Err(err),
            Err(err) => {
                let retryable = !err.is_structural();
                warn!(
                    chain_id = transfer.chain_id,
                    hash = ?transfer.hash,
                    %err,
                    retryable,
                    "transfer rejected"
                );
                if !retryable {
                    self.storage
                        .update_transfer_status(
                            transfer.chain_id,
                            transfer.hash,
                            &ProcessStatus::Rejected { reason: err.to_string(), retryable },
                        )
                        .await?;
                    self.metrics.rejected.increment(1);
                }
                Ok(BuildOutcome::Rejected(err))
            }
        }
    }

    /// Assigns the protocol version by structural predicate, in fixed priority
    /// order.
    pub fn classify(&self, transfer: &Transfer) -> ProtocolVersion {
        let Some(calldata) = transfer.calldata.as_deref() else {
            return ProtocolVersion::Plain;
        };
        let Some(sel) = selector(calldata) else {
            return ProtocolVersion::Plain;
        };
        match self.registry.router(transfer.chain_id, transfer.receiver) {
            Some(RouterKind::V3) if sel == forwardToCall::SELECTOR => ProtocolVersion::RouterV3,
            Some(RouterKind::V1) if sel == forwardCall::SELECTOR => ProtocolVersion::RouterV1,
            Some(RouterKind::Forwarder) if sel == bridgeOutCall::SELECTOR => {
                ProtocolVersion::ContractCall
            }
            _ => ProtocolVersion::Plain,
        }
    }

    /// Decodes the routing metadata of a transfer under an assigned version.
    pub fn decode(
        &self,
        transfer: &Transfer,
        version: ProtocolVersion,
    ) -> Result<RoutingInfo, DecodeError> {
        match version {
            ProtocolVersion::RouterV3 => {
                let calldata = transfer.calldata.as_deref().ok_or(DecodeError::NotRouted)?;
                let maker = decode_forward_to(calldata)?;
                let (dealer_id, ebc_id, target_chain_index) =
                    decode_dealer_value(transfer.value)?;
                Ok(RoutingInfo {
                    target_internal_id: None,
                    maker: Some(maker),
                    recipient: None,
                    detail: RouteDetail::Dealer { dealer_id, ebc_id, target_chain_index },
                })
            }
            ProtocolVersion::RouterV1 => {
                let calldata = transfer.calldata.as_deref().ok_or(DecodeError::NotRouted)?;
                let maker = decode_forward(calldata)?;
                let code = decode_plain_value(transfer.value)?;
                Ok(RoutingInfo {
                    target_internal_id: Some(code % 1000),
                    maker: Some(maker),
                    recipient: None,
                    detail: RouteDetail::Plain { code },
                })
            }
            ProtocolVersion::ContractCall => {
                let calldata = transfer.calldata.as_deref().ok_or(DecodeError::NotRouted)?;
                let (maker, recipient) = decode_bridge_out(calldata)?;
                // Cross-VM accounts are fixed-width padded words with strict
                // zero padding; EVM accounts take the ABI convention, low 20
                // bytes with the high bytes ignored.
                let recipient =
                    match self.registry.chain(transfer.chain_id).map(|entry| entry.family) {
                        Some(ChainFamily::CrossVm) => unpad_account(recipient)?,
                        _ => Address::from_word(recipient),
                    };
                let code = decode_plain_value(transfer.value)?;
                Ok(RoutingInfo {
                    target_internal_id: Some(code % 1000),
                    maker: Some(maker),
                    recipient: Some(recipient),
                    detail: RouteDetail::Plain { code },
                })
            }
            ProtocolVersion::Plain => {
                if let Some(calldata) = transfer.calldata.as_deref() {
                    if calldata.starts_with(b"data:,") || calldata.starts_with(b"{") {
                        let payload = decode_inscription(calldata)?;
                        return Ok(RoutingInfo {
                            target_internal_id: payload.from_chain_internal_id,
                            maker: None,
                            recipient: None,
                            detail: RouteDetail::Inscription(payload),
                        });
                    }
                }
                let code = decode_plain_value(transfer.value)?;
                Ok(RoutingInfo {
                    target_internal_id: Some(code % 1000),
                    maker: None,
                    recipient: None,
                    detail: RouteDetail::Plain { code },
                })
            }
        }
    }

    async fn try_build(&self, transfer: &Transfer) -> Result<BuildOutcome, BuildError> {
        if !transfer.confirmed {
            return Err(BuildError::Unconfirmed);
        }
        if transfer.nonce > ROUTING_NONCE_MAX {
            return Err(BuildError::NonceOutOfRange(transfer.nonce));
        }
        if self.registry.chain(transfer.chain_id).is_none()
            || self.registry.token(transfer.chain_id, transfer.token).is_none()
        {
            return Err(BuildError::SourceChainOrTokenNotFound);
        }

        let version = self.classify(transfer);
        let routing = self.decode(transfer, version)?;

        match routing.detail.clone() {
            RouteDetail::Inscription(payload) => {
                self.build_inscription(transfer, &payload).await
            }
            RouteDetail::Dealer { dealer_id, ebc_id, target_chain_index } => {
                let maker = routing.maker.unwrap_or(transfer.receiver);
                let rule = self
                    .rules
                    .resolve_dealer(
                        maker,
                        dealer_id,
                        ebc_id,
                        target_chain_index,
                        transfer.timestamp,
                    )
                    .ok_or(BuildError::RuleNotFound)?;
                let internal_id = self
                    .registry
                    .internal_id(rule.target_chain)
                    .ok_or(BuildError::TargetChainOrTokenNotFound)?;
                let amount =
                    derive_target_amount(transfer.value, DEALER_CODE_MODULUS, rule, internal_id)?;
                let intent = self.assemble(transfer, maker, rule, amount, routing.recipient)?;
                Ok(BuildOutcome::Intent(Box::new(intent)))
            }
            RouteDetail::Plain { code } => {
                let internal_id = code % 1000;
                let target = self
                    .registry
                    .by_internal_id(internal_id)
                    .ok_or(DecodeError::UnknownInternalId(internal_id))?;
                let maker = routing.maker.unwrap_or(transfer.receiver);
                let rule = self
                    .rules
                    .resolve(
                        transfer.chain_id,
                        target.chain_id,
                        &transfer.symbol,
                        &transfer.symbol,
                        maker,
                        transfer.timestamp,
                    )
                    .ok_or(BuildError::RuleNotFound)?;
                let amount =
                    derive_target_amount(transfer.value, ROUTING_CODE_MODULUS, rule, internal_id)?;
                let intent = self.assemble(transfer, maker, rule, amount, routing.recipient)?;
                Ok(BuildOutcome::Intent(Box::new(intent)))
            }
        }
    }

    /// Handles inscription payloads.
    ///
    /// `deploy` establishes the tick record, first deploy wins. Every other op
    /// requires the record to exist. Only `cross`/`crossover` create a
    /// cross-chain obligation; the payload amount is owed as-is, fees are
    /// settled at the inscription protocol layer.
    async fn build_inscription(
        &self,
        transfer: &Transfer,
        payload: &InscriptionPayload,
    ) -> Result<BuildOutcome, BuildError> {
        if payload.op == InscriptionOp::Deploy {
            self.storage
                .write_deploy_record(&DeployRecord {
                    protocol: payload.protocol,
                    tick: payload.tick,
                    chain_id: transfer.chain_id,
                    deployer: transfer.sender,
                    deployed_at: transfer.timestamp,
                })
                .await?;
            return Ok(BuildOutcome::DeployRecorded);
        }

        if self.storage.read_deploy_record(payload.protocol, payload.tick).await?.is_none() {
            return Err(BuildError::DeployRecordNotFound {
                protocol: payload.protocol,
                tick: payload.tick,
            });
        }

        match payload.op {
            InscriptionOp::Cross | InscriptionOp::CrossOver => {
                let internal_id = payload
                    .from_chain_internal_id
                    .ok_or(DecodeError::MissingField("fc"))?;
                let target = self
                    .registry
                    .by_internal_id(internal_id)
                    .ok_or(DecodeError::UnknownInternalId(internal_id))?;
                let maker = transfer.receiver;
                let rule = self
                    .rules
                    .resolve(
                        transfer.chain_id,
                        target.chain_id,
                        &transfer.symbol,
                        &transfer.symbol,
                        maker,
                        transfer.timestamp,
                    )
                    .ok_or(BuildError::RuleNotFound)?;
                let amount = payload.amount.ok_or(DecodeError::MissingField("amt"))?;
                if amount.is_zero() {
                    return Err(BuildError::AmountTooSmall);
                }
                let intent = self.assemble(transfer, maker, rule, amount, None)?;
                Ok(BuildOutcome::Intent(Box::new(intent)))
            }
            _ => Ok(BuildOutcome::NoObligation),
        }
    }

    fn assemble(
        &self,
        transfer: &Transfer,
        maker: Address,
        rule: &Rule,
        target_amount: U256,
        recipient: Option<Address>,
    ) -> Result<SettlementIntent, BuildError> {
        let target_token = self
            .registry
            .token_by_symbol(rule.target_chain, &rule.target_symbol)
            .ok_or(BuildError::TargetChainOrTokenNotFound)?;

        let mut responders = vec![maker];
        if let Some(aliases) = self.aliases.get(&maker) {
            responders.extend(aliases.iter().copied());
        }

        let now = Utc::now();
        Ok(SettlementIntent {
            id: intent_id(transfer.chain_id, transfer.hash),
            source_chain: transfer.chain_id,
            source_hash: transfer.hash,
            source_amount: transfer.value,
            source_address: transfer.sender,
            source_maker: maker,
            source_symbol: transfer.symbol.clone(),
            source_timestamp: transfer.timestamp,
            target_chain: rule.target_chain,
            target_token: target_token.address,
            target_symbol: rule.target_symbol.clone(),
            target_amount,
            target_address: recipient.unwrap_or(transfer.sender),
            rule_id: rule.id.clone(),
            responders,
            dispatch_self: self.self_makers.contains(&maker),
            status: IntentStatus::Pending,
            target_hash: None,
            dispatch_hash: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Derives the owed target amount from the source value.
///
/// The embedded routing digits are stripped first, then the withholding fee and
/// the trade fee; the resolved target routing code is written back into the
/// tail. Re-decoding the result reproduces the route, which the registry's
/// internal-id validation guarantees.
fn derive_target_amount(
    value: U256,
    code_modulus: u64,
    rule: &Rule,
    target_internal_id: u16,
) -> Result<U256, BuildError> {
    let base = value - value % U256::from(code_modulus);
    let trade_fee = base * U256::from(rule.trade_fee_ppm) / U256::from(1_000_000u64);
    let owed = base
        .checked_sub(rule.withholding_fee)
        .and_then(|rest| rest.checked_sub(trade_fee))
        .ok_or(BuildError::AmountTooSmall)?;
    if owed <= U256::from(ROUTING_CODE_MODULUS) {
        return Err(BuildError::AmountTooSmall);
    }

    let encoded = encode_target_amount(owed, target_internal_id);
    debug_assert_eq!(
        decode_plain_value(encoded),
        Ok(ROUTING_CODE_MIN + target_internal_id % 1000)
    );
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{ChainEntry, ChainFamily, TokenInfo},
        types::DealerKey,
    };
    use alloy::primitives::{address, Bytes, B256};
    use chrono::{TimeZone, Utc};

    const SOURCE_CHAIN: u64 = 1;
    const TARGET_CHAIN: u64 = 42161;

    fn maker() -> Address {
        address!("00000000000000000000000000000000000a11ce")
    }

    fn router_v3() -> Address {
        address!("0000000000000000000000000000000000000333")
    }

    fn registry() -> Arc<ChainRegistry> {
        let eth = TokenInfo { address: Address::ZERO, symbol: "ETH".into(), decimals: 18 };
        Arc::new(
            ChainRegistry::new(vec![
                ChainEntry {
                    chain_id: SOURCE_CHAIN,
                    internal_id: 1,
                    family: ChainFamily::Evm,
                    routers: [(router_v3(), RouterKind::V3)].into_iter().collect(),
                    tokens: vec![eth.clone()],
                },
                ChainEntry {
                    chain_id: TARGET_CHAIN,
                    internal_id: 44,
                    family: ChainFamily::Evm,
                    routers: Default::default(),
                    tokens: vec![eth],
                },
            ])
            .unwrap(),
        )
    }

    fn rule() -> Rule {
        Rule {
            id: "rule-1".into(),
            source_chain: SOURCE_CHAIN,
            target_chain: TARGET_CHAIN,
            source_symbol: "ETH".into(),
            target_symbol: "ETH".into(),
            trade_fee_ppm: 1000,
            withholding_fee: U256::from(100_000u64),
            maker: maker(),
            dealer: Some(DealerKey {
                owner: maker(),
                dealer_id: 1,
                ebc_id: 2,
                target_chain_index: 3,
            }),
            effective_from: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    fn builder() -> IntentBuilder {
        IntentBuilder::new(
            registry(),
            Arc::new(RuleResolver::new(vec![rule()])),
            BridgeStorage::in_memory(),
        )
    }

    fn transfer(value: u64, calldata: Option<Bytes>) -> Transfer {
        Transfer {
            chain_id: SOURCE_CHAIN,
            hash: B256::with_last_byte(1),
            sender: address!("000000000000000000000000000000000000b0b0"),
            receiver: maker(),
            amount: value.to_string(),
            value: U256::from(value),
            token: Address::ZERO,
            symbol: "ETH".into(),
            nonce: 7,
            calldata,
            timestamp: Utc.timestamp_opt(1_000, 0).unwrap(),
            confirmed: true,
            version: None,
            process_status: ProcessStatus::Pending,
        }
    }

    #[tokio::test]
    async fn plain_transfer_derives_intent() {
        let builder = builder();
        let transfer = transfer(2_000_000_000_000_009_044, None);

        let BuildOutcome::Intent(intent) = builder.process(&transfer).await.unwrap() else {
            panic!("expected intent");
        };

        assert_eq!(intent.target_chain, TARGET_CHAIN);
        assert_eq!(intent.target_address, transfer.sender);
        assert_eq!(intent.responders, vec![maker()]);
        // base 2e18, ppm fee 2e15, withholding 1e5, tail rewritten to 9044.
        assert_eq!(intent.target_amount, U256::from(1_997_999_999_999_909_044u64));
        assert_eq!(decode_plain_value(intent.target_amount), Ok(9044));

        let stored =
            builder.storage.read_transfer(transfer.chain_id, transfer.hash).await.unwrap();
        assert_eq!(stored.unwrap().process_status, ProcessStatus::Routed);
    }

    #[tokio::test]
    async fn redelivery_is_a_duplicate() {
        let builder = builder();
        let transfer = transfer(2_000_000_000_000_009_044, None);

        assert!(matches!(
            builder.process(&transfer).await.unwrap(),
            BuildOutcome::Intent(_)
        ));
        assert!(matches!(builder.process(&transfer).await.unwrap(), BuildOutcome::Duplicate));
    }

    #[tokio::test]
    async fn unconfigured_code_is_rejected_non_retryably() {
        let builder = builder();
        let transfer = transfer(2_000_000_000_000_001_234, None);

        let outcome = builder.process(&transfer).await.unwrap();
        assert!(matches!(
            outcome,
            BuildOutcome::Rejected(BuildError::Decode(DecodeError::OutOfBand(1234)))
        ));

        let stored = builder
            .storage
            .read_transfer(transfer.chain_id, transfer.hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.process_status,
            ProcessStatus::Rejected {
                reason: "routing code 1234 outside the guard band".into(),
                retryable: false
            }
        );
    }

    #[tokio::test]
    async fn routing_nonce_guard() {
        let builder = builder();
        let mut transfer = transfer(2_000_000_000_000_009_044, None);
        transfer.nonce = ROUTING_NONCE_MAX + 1;

        assert!(matches!(
            builder.process(&transfer).await.unwrap(),
            BuildOutcome::Rejected(BuildError::NonceOutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn dealer_route_through_router_v3() {
        let builder = builder();
        let calldata: Bytes = forwardToCall { maker: maker() }.abi_encode().into();
        let mut transfer = transfer(5_000_000_000_000_001_203, Some(calldata));
        transfer.receiver = router_v3();

        let BuildOutcome::Intent(intent) = builder.process(&transfer).await.unwrap() else {
            panic!("expected intent");
        };

        assert_eq!(intent.source_maker, maker());
        assert_eq!(intent.target_chain, TARGET_CHAIN);
        assert_eq!(intent.rule_id, "rule-1");
        // The five dealer digits are stripped and the plain tail written back.
        assert_eq!(decode_plain_value(intent.target_amount), Ok(9044));
    }

    #[tokio::test]
    async fn protocol_version_is_recorded_on_the_transfer() {
        let builder = builder();

        let plain = transfer(2_000_000_000_000_009_044, None);
        builder.process(&plain).await.unwrap();
        let stored =
            builder.storage.read_transfer(plain.chain_id, plain.hash).await.unwrap().unwrap();
        assert_eq!(stored.version, Some(ProtocolVersion::Plain));

        let calldata: Bytes = forwardToCall { maker: maker() }.abi_encode().into();
        let mut routed = transfer(5_000_000_000_000_001_203, Some(calldata));
        routed.hash = B256::with_last_byte(2);
        routed.receiver = router_v3();
        builder.process(&routed).await.unwrap();
        let stored =
            builder.storage.read_transfer(routed.chain_id, routed.hash).await.unwrap().unwrap();
        assert_eq!(stored.version, Some(ProtocolVersion::RouterV3));
    }

    fn forwarder() -> Address {
        address!("0000000000000000000000000000000000000444")
    }

    fn family_builder(chain_id: u64, family: ChainFamily) -> IntentBuilder {
        let eth = TokenInfo { address: Address::ZERO, symbol: "ETH".into(), decimals: 18 };
        let registry = Arc::new(
            ChainRegistry::new(vec![
                ChainEntry {
                    chain_id,
                    internal_id: 1,
                    family,
                    routers: [(forwarder(), RouterKind::Forwarder)].into_iter().collect(),
                    tokens: vec![eth.clone()],
                },
                ChainEntry {
                    chain_id: TARGET_CHAIN,
                    internal_id: 44,
                    family: ChainFamily::Evm,
                    routers: Default::default(),
                    tokens: vec![eth],
                },
            ])
            .unwrap(),
        );
        let mut rule = rule();
        rule.source_chain = chain_id;
        IntentBuilder::new(
            registry,
            Arc::new(RuleResolver::new(vec![rule])),
            BridgeStorage::in_memory(),
        )
    }

    #[tokio::test]
    async fn evm_bridge_out_takes_low_bytes_of_the_recipient_word() {
        let builder = family_builder(SOURCE_CHAIN, ChainFamily::Evm);
        let recipient = address!("000000000000000000000000000000000000c0de");
        let mut word = recipient.into_word();
        word[0] = 0xff;
        let calldata: Bytes = bridgeOutCall { maker: maker(), recipient: word }
            .abi_encode()
            .into();
        let mut transfer = transfer(2_000_000_000_000_009_044, Some(calldata));
        transfer.receiver = forwarder();

        let BuildOutcome::Intent(intent) = builder.process(&transfer).await.unwrap() else {
            panic!("expected intent");
        };
        assert_eq!(intent.target_address, recipient);
    }

    #[tokio::test]
    async fn cross_vm_bridge_out_requires_strict_padding() {
        let builder = family_builder(777, ChainFamily::CrossVm);
        let recipient = address!("000000000000000000000000000000000000c0de");

        let clean: Bytes = bridgeOutCall { maker: maker(), recipient: recipient.into_word() }
            .abi_encode()
            .into();
        let mut transfer = transfer(2_000_000_000_000_009_044, Some(clean));
        transfer.chain_id = 777;
        transfer.receiver = forwarder();
        let BuildOutcome::Intent(intent) = builder.process(&transfer).await.unwrap() else {
            panic!("expected intent");
        };
        assert_eq!(intent.target_address, recipient);

        let mut word = recipient.into_word();
        word[0] = 0xff;
        let dirty: Bytes = bridgeOutCall { maker: maker(), recipient: word }
            .abi_encode()
            .into();
        let mut transfer = self::transfer(2_000_000_000_000_009_044, Some(dirty));
        transfer.chain_id = 777;
        transfer.hash = B256::with_last_byte(2);
        transfer.receiver = forwarder();
        assert!(matches!(
            builder.process(&transfer).await.unwrap(),
            BuildOutcome::Rejected(BuildError::Decode(DecodeError::Calldata(_)))
        ));
    }

    #[tokio::test]
    async fn mint_without_deploy_record_is_structural() {
        let builder = builder();
        let calldata: Bytes =
            Bytes::from_static(br#"data:,{"op":"mint","p":1,"tick":8,"amt":"5"}"#);
        let transfer = transfer(1_000, Some(calldata));

        let outcome = builder.process(&transfer).await.unwrap();
        assert!(matches!(
            outcome,
            BuildOutcome::Rejected(BuildError::DeployRecordNotFound { protocol: 1, tick: 8 })
        ));

        let stored = builder
            .storage
            .read_transfer(transfer.chain_id, transfer.hash)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            stored.process_status,
            ProcessStatus::Rejected { retryable: false, .. }
        ));
    }

    #[tokio::test]
    async fn cross_after_deploy_takes_payload_amount() {
        let builder = builder();

        let deploy: Bytes = Bytes::from_static(br#"data:,{"op":"deploy","p":1,"tick":8}"#);
        let mut deploy_transfer = transfer(1_000, Some(deploy));
        deploy_transfer.hash = B256::with_last_byte(9);
        assert!(matches!(
            builder.process(&deploy_transfer).await.unwrap(),
            BuildOutcome::DeployRecorded
        ));

        let cross: Bytes = Bytes::from_static(
            br#"data:,{"op":"cross","p":1,"tick":8,"amt":"25000000000000000000","fc":44}"#,
        );
        let BuildOutcome::Intent(intent) =
            builder.process(&transfer(1_000, Some(cross))).await.unwrap()
        else {
            panic!("expected intent");
        };
        assert_eq!(intent.target_chain, TARGET_CHAIN);
        assert_eq!(intent.target_amount, U256::from(25_000_000_000_000_000_000u128));
    }

    #[tokio::test]
    async fn unconfirmed_transfer_stays_retryable() {
        let builder = builder();
        let mut transfer = transfer(2_000_000_000_000_009_044, None);
        transfer.confirmed = false;

        assert!(matches!(
            builder.process(&transfer).await.unwrap(),
            BuildOutcome::Rejected(BuildError::Unconfirmed)
        ));

        let stored = builder
            .storage
            .read_transfer(transfer.chain_id, transfer.hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.process_status, ProcessStatus::Pending);
    }
}
