//! Routing codec.
//!
//! Decodes the protocol-specific routing metadata embedded in a transfer's
//! amount or call payload: the plain amount-tail code, the dealer five-digit
//! split, inscription JSON payloads, and router calldata. Decoding never panics
//! on malformed but well-typed input; it returns a typed [`DecodeError`] that
//! the builder uses to tag the transfer non-retryably.

mod contract;
pub use contract::{
    decode_bridge_out, decode_forward, decode_forward_to, selector, unpad_account,
    bridgeOutCall, forwardCall, forwardToCall,
};

mod dealer;
pub use dealer::decode_dealer_value;

mod inscription;
pub use inscription::{decode_inscription, InscriptionOp, InscriptionPayload};

mod plain;
pub use plain::{decode_plain_value, encode_target_amount};

use alloy::primitives::Address;

/// Typed routing decode failure.
///
/// All variants are structural: retrying the same input cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The amount carries no routing code at all.
    #[error("amount carries no routing code")]
    NotRouted,

    /// The four trailing digits fall outside the `[9000, 10000)` guard band.
    #[error("routing code {0} outside the guard band")]
    OutOfBand(u16),

    /// No chain is configured for the decoded internal id.
    #[error("no chain configured for internal id {0}")]
    UnknownInternalId(u16),

    /// A dealer route field decoded to zero.
    #[error("dealer route field `{0}` is zero")]
    ZeroDealerField(&'static str),

    /// The call payload is not an inscription record.
    #[error("calldata is not an inscription payload")]
    NotInscription,

    /// A required inscription field is missing.
    #[error("inscription field `{0}` missing")]
    MissingField(&'static str),

    /// An inscription field is present but not an integer.
    #[error("inscription field `{0}` is not an integer")]
    NotInteger(&'static str),

    /// An inscription field is out of its permitted range.
    #[error("inscription field `{0}` out of range")]
    OutOfRange(&'static str),

    /// Unknown inscription operation tag.
    #[error("unknown inscription op `{0}`")]
    UnknownOp(String),

    /// Router calldata did not decode.
    #[error("malformed router calldata: {0}")]
    Calldata(String),
}

/// Route detail recovered from a transfer, per protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDetail {
    /// Plain amount-tail code.
    Plain {
        /// The raw code inside the guard band.
        code: u16,
    },
    /// Dealer five-digit split.
    Dealer {
        /// Two-digit dealer identifier.
        dealer_id: u8,
        /// One-digit fee-rule (ebc) identifier.
        ebc_id: u8,
        /// Two-digit target chain index.
        target_chain_index: u16,
    },
    /// Inscription payload.
    Inscription(InscriptionPayload),
}

/// Routing metadata recovered from a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfo {
    /// Internal id of the target chain, when the encoding carries one directly.
    ///
    /// Dealer routes resolve the target through the rule instead and leave this
    /// unset until resolution.
    pub target_internal_id: Option<u16>,
    /// Maker decoded from router calldata, overriding the transfer receiver.
    pub maker: Option<Address>,
    /// Payout recipient decoded from calldata, overriding the depositor.
    pub recipient: Option<Address>,
    /// Protocol-specific detail.
    pub detail: RouteDetail,
}
