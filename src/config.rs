//! Bridge configuration.

use crate::{
    constants::{
        DEFAULT_BATCH_SIZE, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_DRAIN_INTERVAL,
        DEFAULT_EVICTION_INTERVAL, DEFAULT_INGEST_BUFFER, DEFAULT_MATCH_SKEW,
        DEFAULT_MATCH_WINDOW, DEFAULT_NONCE_REFRESH_INTERVAL, DEFAULT_NOTIFY_BUFFER,
        DEFAULT_RESCAN_INTERVAL, DEFAULT_WATCH_INTERVAL,
    },
    nonce::CommitPolicy,
    registry::ChainEntry,
    types::Rule,
};
use alloy::primitives::Address;
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use url::Url;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Database URL. Volatile in-memory storage is used when unset.
    pub database_url: Option<String>,
    /// The port metrics are served on.
    pub metrics_port: u16,
    /// Capacity of the transfer ingestion channel.
    pub ingest_buffer: usize,
    /// Capacity of the settlement event channel.
    pub notify_buffer: usize,
    /// Configured chains.
    pub chains: Vec<ChainConfig>,
    /// Versioned fee rules.
    pub rules: Vec<Rule>,
    /// Look-alike responder addresses also accepted per maker.
    pub responder_aliases: HashMap<Address, Vec<Address>>,
    /// Matching engine settings.
    pub matching: MatchingConfig,
    /// Payout settings.
    pub payout: PayoutConfig,
    /// Secrets.
    pub secrets: SecretsConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            metrics_port: 9000,
            ingest_buffer: DEFAULT_INGEST_BUFFER,
            notify_buffer: DEFAULT_NOTIFY_BUFFER,
            chains: Vec::new(),
            rules: Vec::new(),
            responder_aliases: HashMap::new(),
            matching: MatchingConfig::default(),
            payout: PayoutConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Sets the database URL.
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if database_url.is_some() {
            self.database_url = database_url;
        }
        self
    }

    /// Sets the metrics port.
    pub fn with_metrics_port(mut self, metrics_port: Option<u16>) -> Self {
        if let Some(port) = metrics_port {
            self.metrics_port = port;
        }
        self
    }

    /// Sets the configured chains.
    pub fn with_chains(mut self, chains: Vec<ChainConfig>) -> Self {
        self.chains = chains;
        self
    }

    /// Sets the fee rules.
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Sets the payout signing key.
    pub fn with_payout_key(mut self, payout_key: Option<String>) -> Self {
        if payout_key.is_some() {
            self.secrets.payout_key = payout_key;
        }
        self
    }

    /// Sets the payout batch size.
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        if let Some(batch_size) = batch_size {
            self.payout.batch_size = batch_size;
        }
        self
    }

    /// Sets the payout confirmation timeout.
    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.payout.confirmation_timeout_secs = timeout.as_secs();
        }
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration of one chain the bridge observes and dispatches on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain reference data.
    #[serde(flatten)]
    pub entry: ChainEntry,
    /// JSON-RPC endpoint of the chain.
    pub endpoint: Url,
    /// Disperse contract used for batched payouts, if deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disperse: Option<Address>,
}

/// Matching engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Lifetime of a cache entry, in seconds.
    pub window_secs: u64,
    /// Clock skew tolerated when ordering a repayment against its intent, in
    /// seconds.
    pub skew_secs: u64,
    /// Interval between cache eviction sweeps, in seconds.
    pub eviction_interval_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_MATCH_WINDOW.as_secs(),
            skew_secs: DEFAULT_MATCH_SKEW.as_secs(),
            eviction_interval_secs: DEFAULT_EVICTION_INTERVAL.as_secs(),
        }
    }
}

impl MatchingConfig {
    /// Cache entry lifetime.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Tolerated clock skew.
    pub fn skew(&self) -> Duration {
        Duration::from_secs(self.skew_secs)
    }

    /// Eviction sweep interval.
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// Payout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// Maximum obligations dispatched in one batch call.
    pub batch_size: usize,
    /// Interval between queue drains, in seconds.
    pub drain_interval_secs: u64,
    /// Interval between durable-store rescans for pending obligations, in
    /// seconds.
    pub rescan_interval_secs: u64,
    /// Interval between nonce lane reconciliations against the chain, in
    /// seconds.
    pub nonce_refresh_interval_secs: u64,
    /// Interval between confirmation watcher passes, in seconds.
    pub watch_interval_secs: u64,
    /// Timeout for one payout confirmation attempt, in seconds.
    pub confirmation_timeout_secs: u64,
    /// Persist a reserved nonce at hand-out rather than at acceptance.
    ///
    /// Trades nonce gaps on crashed dispatches for never reusing a possibly
    /// consumed value.
    pub commit_on_submit: bool,
    /// Makers whose payouts this instance dispatches itself.
    pub self_makers: Vec<Address>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL.as_secs(),
            rescan_interval_secs: DEFAULT_RESCAN_INTERVAL.as_secs(),
            nonce_refresh_interval_secs: DEFAULT_NONCE_REFRESH_INTERVAL.as_secs(),
            watch_interval_secs: DEFAULT_WATCH_INTERVAL.as_secs(),
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            commit_on_submit: false,
            self_makers: Vec::new(),
        }
    }
}

impl PayoutConfig {
    /// Queue drain interval.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    /// Store rescan interval.
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    /// Nonce reconciliation interval.
    pub fn nonce_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_refresh_interval_secs)
    }

    /// Confirmation watcher interval.
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    /// Confirmation timeout.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Nonce commit policy derived from `commit_on_submit`.
    pub fn commit_policy(&self) -> CommitPolicy {
        if self.commit_on_submit {
            CommitPolicy::OnSubmit
        } else {
            CommitPolicy::OnAccept
        }
    }
}

/// Secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Private key payouts are signed with. Dispatch is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_yaml() {
        let config = BridgeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: BridgeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.metrics_port, config.metrics_port);
        assert_eq!(parsed.payout.batch_size, DEFAULT_BATCH_SIZE);
        assert!(matches!(parsed.payout.commit_policy(), CommitPolicy::OnAccept));
    }

    #[test]
    fn cli_overlay_wins_over_file_values() {
        let config = BridgeConfig::default()
            .with_database_url(Some("postgres://localhost/bridge".into()))
            .with_metrics_port(Some(9100))
            .with_batch_size(Some(4));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/bridge"));
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.payout.batch_size, 4);
    }
}
