//! Pipeline metrics.

use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{net::SocketAddr, sync::Mutex, time::Duration};

/// Builds a Prometheus exporter serving on `metrics_addr`, returning a handle.
///
/// The recorder will perform upkeep every 5 seconds. Idempotent: subsequent
/// calls return the handle of the first exporter.
///
/// # Panics
///
/// This will panic if the Prometheus recorder could not be set as the global metrics recorder.
pub async fn setup_exporter(metrics_addr: impl Into<SocketAddr>) -> PrometheusHandle {
    static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

    let mut lock = HANDLE.lock().expect("metrics handle lock poisoned");
    if let Some(handle) = &*lock {
        return handle.clone();
    }

    let addr: SocketAddr = metrics_addr.into();
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .upkeep_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build metrics recorder");

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).expect("could not set metrics recorder");
    tokio::spawn(exporter);

    tracing::info!(%addr, "Started metrics server");

    *lock = Some(handle.clone());

    handle
}

/// Metrics for the [`IntentBuilder`](crate::builder::IntentBuilder).
#[derive(Metrics)]
#[metrics(scope = "bridge_builder")]
pub struct BuilderMetrics {
    /// Number of settlement intents derived.
    pub derived: Counter,
    /// Number of transfers rejected non-retryably.
    pub rejected: Counter,
    /// Number of redelivered transfers skipped.
    pub duplicates: Counter,
    /// Number of inscription deploy records written.
    pub deploys: Counter,
}

/// Metrics for the [`MatchingEngine`](crate::matching::MatchingEngine).
#[derive(Metrics)]
#[metrics(scope = "bridge_matching")]
pub struct MatchingMetrics {
    /// Number of intents settled through the cache path.
    pub cache_matches: Counter,
    /// Number of intents settled through the store fallback path.
    pub store_matches: Counter,
    /// Number of matches abandoned because another path committed first.
    pub conflicts: Counter,
    /// Number of cache entries evicted by the window sweep.
    pub evictions: Counter,
    /// Number of intents currently cached.
    pub cached_intents: Gauge,
    /// Number of unmatched repayments currently cached.
    pub cached_repayments: Gauge,
}

/// Metrics for the [`NonceCoordinator`](crate::nonce::NonceCoordinator).
#[derive(Metrics)]
#[metrics(scope = "bridge_nonce")]
pub struct NonceMetrics {
    /// Number of nonce reservations handed out.
    pub reserved: Counter,
    /// Number of reservations rolled back.
    pub rolled_back: Counter,
    /// Number of upward corrections from the on-chain value.
    pub chain_corrections: Counter,
}

/// Metrics for the [`PayoutSequencer`](crate::payout::PayoutSequencer).
#[derive(Metrics)]
#[metrics(scope = "bridge_payout")]
pub struct PayoutMetrics {
    /// Number of payouts broadcast.
    pub sent: Counter,
    /// Number of payouts dispatched in a batch call.
    pub batched: Counter,
    /// Number of pre-broadcast dispatch failures rolled back.
    pub rolled_back: Counter,
    /// Number of broadcast-uncertain payouts flagged for reconciliation.
    pub crashed: Counter,
    /// Number of stale queue entries dropped at revalidation.
    pub stale_dropped: Counter,
    /// Number of payouts confirmed by the watcher.
    pub confirmed: Counter,
    /// Number of obligations currently queued.
    pub queued: Gauge,
    /// Time from broadcast to confirmation, in milliseconds.
    pub confirmation_time: Histogram,
}
