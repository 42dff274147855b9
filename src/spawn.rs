//! Spawning of the bridge pipeline.

use crate::{
    builder::{BuildOutcome, IntentBuilder},
    cli::Args,
    config::BridgeConfig,
    matching::MatchingEngine,
    metrics::setup_exporter,
    nonce::NonceCoordinator,
    notify::{Notifier, SettlementEvent},
    payout::{ConfirmationWatcher, PayoutSequencer},
    registry::ChainRegistry,
    rules::RuleResolver,
    signers::DynSigner,
    storage::BridgeStorage,
    types::Transfer,
    wallet::{EvmWallet, ProviderNonceSource, WalletAdapter},
};
use alloy::{
    primitives::{Address, ChainId},
    providers::{DynProvider, Provider, ProviderBuilder},
};
use eyre::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    net::Ipv4Addr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{error, info, warn};

/// Handle to a spawned bridge instance.
#[derive(Debug)]
pub struct BridgeHandle {
    /// The storage backing the instance.
    pub storage: BridgeStorage,
    /// Sender half of the transfer ingestion channel.
    pub ingest: mpsc::Sender<Transfer>,
    /// Settlement event stream.
    pub events: mpsc::Receiver<SettlementEvent>,
    /// Prometheus metrics handle.
    pub metrics: PrometheusHandle,
    /// Shutdown signal for the spawned workers.
    pub shutdown: watch::Sender<bool>,
}

/// Loads the configuration referenced by `args` and spawns the bridge.
///
/// A missing configuration file is created with default values first.
pub async fn try_spawn_with_args(args: Args) -> eyre::Result<BridgeHandle> {
    let config = if args.config.exists() {
        BridgeConfig::load_from_file(&args.config)?
    } else {
        info!(path = %args.config.display(), "config file not found, storing defaults");
        let config = BridgeConfig::default();
        config.save_to_file(&args.config)?;
        config
    };

    try_spawn(args.merge_bridge_config(config)).await
}

/// Spawns the bridge pipeline, returning a handle to it.
pub async fn try_spawn(config: BridgeConfig) -> eyre::Result<BridgeHandle> {
    let storage = match &config.database_url {
        Some(url) => {
            let pool =
                PgPool::connect(url).await.wrap_err("failed to connect to the database")?;
            sqlx::migrate!().run(&pool).await?;
            BridgeStorage::pg(pool)
        }
        None => {
            warn!("no database url configured, using volatile in-memory storage");
            BridgeStorage::in_memory()
        }
    };

    let metrics = setup_exporter((Ipv4Addr::UNSPECIFIED, config.metrics_port)).await;

    let registry = Arc::new(ChainRegistry::new(
        config.chains.iter().map(|chain| chain.entry.clone()).collect(),
    )?);
    let rules = Arc::new(RuleResolver::new(config.rules.clone()));

    // Repayments are recognized by sender: any configured maker or one of its
    // dispatch aliases.
    let responders: Arc<HashSet<Address>> = Arc::new(
        config
            .rules
            .iter()
            .map(|rule| rule.maker)
            .chain(config.responder_aliases.values().flatten().copied())
            .collect(),
    );

    let mut providers: HashMap<ChainId, DynProvider> = HashMap::new();
    for chain in &config.chains {
        let provider = ProviderBuilder::new().connect_http(chain.endpoint.clone()).erased();
        providers.insert(chain.entry.chain_id, provider);
    }

    let mut wallets: HashMap<ChainId, Arc<dyn WalletAdapter>> = HashMap::new();
    if let Some(key) = &config.secrets.payout_key {
        let signer = DynSigner::from_signing_key(key)?;
        info!(signer = %signer.address(), "payout dispatch enabled");
        for chain in &config.chains {
            let provider = providers[&chain.entry.chain_id].clone();
            wallets.insert(
                chain.entry.chain_id,
                Arc::new(EvmWallet::new(
                    provider,
                    signer.clone(),
                    chain.entry.chain_id,
                    chain.disperse,
                )),
            );
        }
    } else {
        warn!("no payout key configured, dispatch disabled");
    }

    let (notifier, events) = Notifier::new(config.notify_buffer);
    let (ingest, mut ingest_rx) = mpsc::channel::<Transfer>(config.ingest_buffer);
    let (shutdown, _) = watch::channel(false);

    let builder = Arc::new(
        IntentBuilder::new(registry, Arc::clone(&rules), storage.clone())
            .with_aliases(config.responder_aliases.clone())
            .with_self_makers(config.payout.self_makers.iter().copied().collect()),
    );
    let engine = Arc::new(MatchingEngine::new(
        storage.clone(),
        notifier.clone(),
        config.matching.window(),
        config.matching.skew(),
    ));
    let nonces = NonceCoordinator::new(
        storage.clone(),
        Arc::new(ProviderNonceSource::new(providers)),
    );
    let sequencer = Arc::new(PayoutSequencer::new(
        storage.clone(),
        nonces.clone(),
        wallets.clone(),
        notifier.clone(),
        config.payout.batch_size,
        config.payout.commit_policy(),
    ));
    let watcher = Arc::new(ConfirmationWatcher::new(
        storage.clone(),
        wallets,
        notifier,
        config.payout.confirmation_timeout(),
        sequencer.metrics(),
    ));

    // Obligations left over from a previous run are queued again first.
    if let Err(err) = sequencer.rescan().await {
        warn!(%err, "startup obligation rescan failed");
    }

    // Ingestion worker: classifies each observed transfer as a repayment from
    // a configured maker (or one of its aliases) or as a deposit to derive an
    // intent from.
    {
        let builder = Arc::clone(&builder);
        let engine = Arc::clone(&engine);
        let sequencer = Arc::clone(&sequencer);
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    transfer = ingest_rx.recv() => {
                        let Some(transfer) = transfer else { break };
                        ingest_transfer(&builder, &engine, &sequencer, &responders, transfer)
                            .await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    {
        let engine = Arc::clone(&engine);
        spawn_periodic(shutdown.subscribe(), config.matching.eviction_interval(), move || {
            let engine = Arc::clone(&engine);
            async move { engine.evict() }
        });
    }
    {
        let sequencer = Arc::clone(&sequencer);
        spawn_periodic(shutdown.subscribe(), config.payout.drain_interval(), move || {
            let sequencer = Arc::clone(&sequencer);
            async move { sequencer.drain().await }
        });
    }
    {
        let sequencer = Arc::clone(&sequencer);
        spawn_periodic(shutdown.subscribe(), config.payout.rescan_interval(), move || {
            let sequencer = Arc::clone(&sequencer);
            async move {
                if let Err(err) = sequencer.rescan().await {
                    warn!(%err, "obligation rescan failed");
                }
            }
        });
    }
    {
        let nonces = nonces.clone();
        spawn_periodic(shutdown.subscribe(), config.payout.nonce_refresh_interval(), move || {
            let nonces = nonces.clone();
            async move { nonces.refresh().await }
        });
    }
    {
        let watcher = Arc::clone(&watcher);
        spawn_periodic(shutdown.subscribe(), config.payout.watch_interval(), move || {
            let watcher = Arc::clone(&watcher);
            async move { watcher.run_once().await }
        });
    }

    Ok(BridgeHandle { storage, ingest, events, metrics, shutdown })
}

/// Routes one observed transfer through the pipeline.
async fn ingest_transfer(
    builder: &IntentBuilder,
    engine: &MatchingEngine,
    sequencer: &PayoutSequencer,
    responders: &HashSet<Address>,
    transfer: Transfer,
) {
    if responders.contains(&transfer.sender) {
        if let Err(err) = engine.process_repayment(&transfer).await {
            error!(%err, hash = ?transfer.hash, "repayment processing failed");
        }
        return;
    }

    match builder.process(&transfer).await {
        Ok(BuildOutcome::Intent(intent)) => {
            if intent.dispatch_self {
                sequencer.enqueue(&intent).await;
            } else if let Err(err) = engine.register_intent(*intent).await {
                error!(%err, hash = ?transfer.hash, "intent registration failed");
            }
        }
        Ok(_) => {}
        Err(err) => error!(%err, hash = ?transfer.hash, "transfer processing failed"),
    }
}

/// Spawns a worker running `task` on a fixed period until shutdown.
fn spawn_periodic<F, Fut>(mut shutdown: watch::Receiver<bool>, period: Duration, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => task().await,
                _ = shutdown.changed() => break,
            }
        }
    });
}
