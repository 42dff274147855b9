//! Wallet adapters.
//!
//! The dispatch boundary of the payout sequencer. Every failure is classified
//! pre- versus post-broadcast; the distinction decides between rollback and
//! flagging the obligation for reconciliation, so an adapter must never report
//! a transport failure after submission as a clean error.

use crate::{
    constants::{BATCH_TRANSFER_GAS_PER_RECIPIENT, ERC20_TRANSFER_GAS, NATIVE_TRANSFER_GAS},
    nonce::NonceSource,
    signers::DynSigner,
};
use alloy::{
    consensus::{TxEip1559, TypedTransaction},
    eips::Encodable2718,
    network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder},
    primitives::{Address, Bytes, ChainId, TxKind, B256, U256},
    providers::{DynProvider, PendingTransactionConfig, Provider},
    rpc::types::TransactionRequest,
    sol,
    sol_types::SolCall,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug, time::Duration};

sol! {
    function transfer(address to, uint256 amount) returns (bool);
    function balanceOf(address owner) returns (uint256);

    /// Multi-recipient native disperse entrypoint.
    function disperse(address[] recipients, uint256[] values);

    /// Multi-recipient token disperse entrypoint.
    function disperseToken(address token, address[] recipients, uint256[] values);
}

/// Dispatch failure, classified pre- versus post-broadcast.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The signer balance does not cover the dispatch.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Current balance.
        have: U256,
        /// Required balance.
        need: U256,
    },

    /// The dispatch parameters are invalid.
    #[error("invalid dispatch parameters: {0}")]
    InvalidParams(String),

    /// The dispatch failed before anything reached the network.
    #[error("dispatch failed before broadcast: {0}")]
    PreBroadcast(String),

    /// The transaction was submitted but its outcome is unknown.
    ///
    /// The highest-severity class in the system: the nonce may have been
    /// consumed on-chain, so the dispatch must never be silently retried.
    #[error("broadcast outcome uncertain for {tx_hash}: {reason}")]
    BroadcastUncertain {
        /// Hash of the submitted transaction.
        tx_hash: B256,
        /// Underlying transport failure.
        reason: String,
    },

    /// Confirmation was not observed within the timeout.
    #[error("confirmation timed out for {0}")]
    ConfirmationTimeout(B256),
}

impl WalletError {
    /// Whether the failure occurred after broadcast.
    pub fn is_post_broadcast(&self) -> bool {
        matches!(self, Self::BroadcastUncertain { .. })
    }
}

/// Per-chain-family wallet boundary used by the payout sequencer.
#[async_trait]
pub trait WalletAdapter: Debug + Send + Sync {
    /// Signer address of this wallet.
    fn address(&self) -> Address;

    /// Chain this wallet dispatches on.
    fn chain_id(&self) -> ChainId;

    /// Dispatches a single payout. [`Address::ZERO`] token denotes the native
    /// asset.
    async fn transfer(
        &self,
        nonce: u64,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<B256, WalletError>;

    /// Dispatches a multi-recipient payout under one nonce.
    async fn transfer_many(
        &self,
        nonce: u64,
        token: Address,
        recipients: &[(Address, U256)],
    ) -> Result<B256, WalletError>;

    /// Returns the signer's balance of `token`.
    async fn get_balance(&self, token: Address) -> Result<U256, WalletError>;

    /// Waits until `hash` is confirmed, up to `timeout`.
    async fn wait_for_confirmation(&self, hash: B256, timeout: Duration)
        -> Result<(), WalletError>;
}

/// EVM wallet adapter over an alloy provider.
#[derive(Debug)]
pub struct EvmWallet {
    provider: DynProvider,
    wallet: EthereumWallet,
    address: Address,
    chain_id: ChainId,
    /// Disperse contract used for batched payouts.
    disperse: Option<Address>,
}

impl EvmWallet {
    /// Creates a new EVM wallet adapter.
    pub fn new(
        provider: DynProvider,
        signer: DynSigner,
        chain_id: ChainId,
        disperse: Option<Address>,
    ) -> Self {
        let address = signer.address();
        Self { provider, wallet: EthereumWallet::new(signer.0), address, chain_id, disperse }
    }

    /// Signs and broadcasts a transaction.
    ///
    /// The hash is known before submission, so a transport failure on
    /// submission is reported as broadcast-uncertain with the hash attached.
    async fn send(&self, tx: TxEip1559) -> Result<B256, WalletError> {
        let signed = NetworkWallet::<Ethereum>::sign_transaction_from(
            &self.wallet,
            self.address,
            TypedTransaction::Eip1559(tx),
        )
        .await
        .map_err(|err| WalletError::PreBroadcast(err.to_string()))?;
        let tx_hash = *signed.tx_hash();

        match self.provider.send_raw_transaction(&signed.encoded_2718()).await {
            Ok(_) => Ok(tx_hash),
            Err(err) => Err(classify_rpc_error(tx_hash, err)),
        }
    }

    async fn fees(&self) -> Result<(u128, u128), WalletError> {
        let estimate = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|err| WalletError::PreBroadcast(err.to_string()))?;
        Ok((estimate.max_fee_per_gas, estimate.max_priority_fee_per_gas))
    }

    fn tx(
        &self,
        nonce: u64,
        to: Address,
        value: U256,
        input: Bytes,
        gas_limit: u64,
        fees: (u128, u128),
    ) -> TxEip1559 {
        TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            to: TxKind::Call(to),
            value,
            input,
            gas_limit,
            max_fee_per_gas: fees.0,
            max_priority_fee_per_gas: fees.1,
            ..Default::default()
        }
    }
}

/// Classifies a submission error.
///
/// A node that answered with an error response never accepted the payload;
/// anything else, a timeout included, may have reached the network.
fn classify_rpc_error(tx_hash: B256, err: RpcError<TransportErrorKind>) -> WalletError {
    match err {
        RpcError::ErrorResp(payload) => WalletError::PreBroadcast(payload.to_string()),
        RpcError::SerError(err) => WalletError::PreBroadcast(err.to_string()),
        err => WalletError::BroadcastUncertain { tx_hash, reason: err.to_string() },
    }
}

#[async_trait]
impl WalletAdapter for EvmWallet {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn transfer(
        &self,
        nonce: u64,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<B256, WalletError> {
        let fees = self.fees().await?;
        let tx = if token == Address::ZERO {
            self.tx(nonce, to, amount, Bytes::new(), NATIVE_TRANSFER_GAS, fees)
        } else {
            let input = transferCall { to, amount }.abi_encode().into();
            self.tx(nonce, token, U256::ZERO, input, ERC20_TRANSFER_GAS, fees)
        };
        self.send(tx).await
    }

    async fn transfer_many(
        &self,
        nonce: u64,
        token: Address,
        recipients: &[(Address, U256)],
    ) -> Result<B256, WalletError> {
        let Some(disperse) = self.disperse else {
            return Err(WalletError::InvalidParams(
                "no disperse contract configured for this chain".into(),
            ));
        };
        if recipients.is_empty() {
            return Err(WalletError::InvalidParams("empty recipient list".into()));
        }

        let fees = self.fees().await?;
        let (tos, values): (Vec<_>, Vec<_>) = recipients.iter().copied().unzip();
        let gas_limit =
            NATIVE_TRANSFER_GAS + BATCH_TRANSFER_GAS_PER_RECIPIENT * recipients.len() as u64;

        let tx = if token == Address::ZERO {
            let value = values.iter().sum();
            let input = disperseCall { recipients: tos, values }.abi_encode().into();
            self.tx(nonce, disperse, value, input, gas_limit, fees)
        } else {
            let input =
                disperseTokenCall { token, recipients: tos, values }.abi_encode().into();
            self.tx(nonce, disperse, U256::ZERO, input, gas_limit, fees)
        };
        self.send(tx).await
    }

    async fn get_balance(&self, token: Address) -> Result<U256, WalletError> {
        if token == Address::ZERO {
            return self
                .provider
                .get_balance(self.address)
                .await
                .map_err(|err| WalletError::PreBroadcast(err.to_string()));
        }

        let request = TransactionRequest::default()
            .with_to(token)
            .with_input(balanceOfCall { owner: self.address }.abi_encode());
        let response = self
            .provider
            .call(request)
            .await
            .map_err(|err| WalletError::PreBroadcast(err.to_string()))?;
        balanceOfCall::abi_decode_returns(&response)
            .map_err(|err| WalletError::PreBroadcast(err.to_string()))
    }

    async fn wait_for_confirmation(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<(), WalletError> {
        let handle = self
            .provider
            .watch_pending_transaction(
                PendingTransactionConfig::new(hash).with_timeout(Some(timeout)),
            )
            .await
            .map_err(|_| WalletError::ConfirmationTimeout(hash))?;
        handle.await.map(|_| ()).map_err(|_| WalletError::ConfirmationTimeout(hash))
    }
}

/// [`NonceSource`] backed by the per-chain providers.
#[derive(Debug, Default)]
pub struct ProviderNonceSource {
    providers: HashMap<ChainId, DynProvider>,
}

impl ProviderNonceSource {
    /// Creates a source over per-chain providers.
    pub fn new(providers: HashMap<ChainId, DynProvider>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NonceSource for ProviderNonceSource {
    async fn transaction_count(&self, chain_id: ChainId, signer: Address) -> eyre::Result<u64> {
        let provider = self
            .providers
            .get(&chain_id)
            .ok_or_else(|| eyre::eyre!("no provider for chain {chain_id}"))?;
        Ok(provider.get_transaction_count(signer).pending().await?)
    }
}
