//! Pipeline constants.

use std::time::Duration;

/// Lower bound (inclusive) of the plain routing code guard band.
pub const ROUTING_CODE_MIN: u16 = 9000;

/// Upper bound (exclusive) of the plain routing code guard band.
pub const ROUTING_CODE_MAX: u16 = 10000;

/// Modulus isolating the four trailing routing digits of a raw value.
pub const ROUTING_CODE_MODULUS: u64 = 10_000;

/// Modulus isolating the five trailing dealer-route digits of a raw value.
pub const DEALER_CODE_MODULUS: u64 = 100_000;

/// Maximum account nonce a routed source transfer may carry.
///
/// Nonces above this collide with the routing code space and are rejected
/// non-retryably before decoding.
pub const ROUTING_NONCE_MAX: u64 = 8999;

/// Default lifetime of a matching cache entry.
pub const DEFAULT_MATCH_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Default clock skew tolerance when ordering a repayment against its intent.
pub const DEFAULT_MATCH_SKEW: Duration = Duration::from_secs(3 * 60);

/// Default number of obligations popped per payout drain pass.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default interval between payout drain passes.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between re-scans of still-pending payout obligations.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default age after which a reservation without a dispatch outcome is
/// considered abandoned and released back to pending.
pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default interval between matching cache eviction sweeps.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval between upward nonce reconciliations against the chain.
pub const DEFAULT_NONCE_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// Default timeout when waiting for a payout confirmation.
///
/// Wallet dispatch and confirmation polling carry the longest timeouts in the
/// system, measured in minutes.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default interval between confirmation watcher passes.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Default capacity of the ingestion channel.
pub const DEFAULT_INGEST_BUFFER: usize = 1024;

/// Default capacity of the downstream notification channel.
pub const DEFAULT_NOTIFY_BUFFER: usize = 1024;

/// Gas limit used for native payouts.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Gas limit used for ERC-20 payouts.
pub const ERC20_TRANSFER_GAS: u64 = 90_000;

/// Gas limit budgeted per recipient in a batched payout.
pub const BATCH_TRANSFER_GAS_PER_RECIPIENT: u64 = 60_000;
