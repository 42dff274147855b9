//! # Bridge Relay
//!
//! Library for the implementation of the bridge settlement pipeline: routing
//! code decoding, settlement intent derivation, repayment matching, and payout
//! dispatch.

pub mod builder;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod nonce;
pub mod notify;
pub mod payout;
pub mod registry;
pub mod routing;
pub mod rules;
pub mod signers;
pub mod spawn;
pub mod storage;
pub mod types;
pub mod wallet;
