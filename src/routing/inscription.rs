//! Inscription payload codec.
//!
//! The call payload is a JSON record with an explicit operation tag and
//! numeric fields. Fields are validated for presence, integer-ness and range
//! before acceptance; nothing about a malformed payload is retryable.

use super::DecodeError;
use alloy::primitives::U256;
use serde_json::Value;
use std::str::FromStr;

/// Inscription operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InscriptionOp {
    /// Claim previously minted supply.
    Claim,
    /// Mint against a deployed tick.
    Mint,
    /// Deploy a new tick.
    Deploy,
    /// Cross to another chain.
    Cross,
    /// Cross back from another chain.
    CrossOver,
    /// Same-chain transfer.
    Transfer,
}

impl FromStr for InscriptionOp {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claim" => Ok(Self::Claim),
            "mint" => Ok(Self::Mint),
            "deploy" => Ok(Self::Deploy),
            "cross" => Ok(Self::Cross),
            "crossover" => Ok(Self::CrossOver),
            "transfer" => Ok(Self::Transfer),
            other => Err(DecodeError::UnknownOp(other.to_string())),
        }
    }
}

/// Validated inscription payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InscriptionPayload {
    /// Operation tag.
    pub op: InscriptionOp,
    /// Inscription protocol id.
    pub protocol: u32,
    /// Tick identifier.
    pub tick: u64,
    /// Routed amount, required for everything but `deploy`.
    pub amount: Option<U256>,
    /// Internal id of the originating chain, required for `cross`/`crossover`.
    pub from_chain_internal_id: Option<u16>,
}

/// Decodes and validates an inscription payload from raw calldata.
///
/// The payload is UTF-8 JSON, optionally prefixed with `data:,` as emitted by
/// inscription wallets.
pub fn decode_inscription(calldata: &[u8]) -> Result<InscriptionPayload, DecodeError> {
    let text = std::str::from_utf8(calldata).map_err(|_| DecodeError::NotInscription)?;
    let text = text.strip_prefix("data:,").unwrap_or(text);
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::NotInscription)?;
    let record = value.as_object().ok_or(DecodeError::NotInscription)?;

    let op: InscriptionOp = record
        .get("op")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("op"))?
        .parse()?;

    let protocol = required_int(record.get("p"), "p")?;
    let protocol = u32::try_from(protocol).map_err(|_| DecodeError::OutOfRange("p"))?;
    let tick = required_int(record.get("tick"), "tick")?;

    let amount = match op {
        InscriptionOp::Deploy => optional_amount(record.get("amt"))?,
        _ => Some(
            optional_amount(record.get("amt"))?.ok_or(DecodeError::MissingField("amt"))?,
        ),
    };

    let from_chain_internal_id = match op {
        InscriptionOp::Cross | InscriptionOp::CrossOver => {
            let fc = required_int(record.get("fc"), "fc")?;
            let fc = u16::try_from(fc).map_err(|_| DecodeError::OutOfRange("fc"))?;
            if !(1..9000).contains(&fc) {
                return Err(DecodeError::OutOfRange("fc"));
            }
            Some(fc)
        }
        _ => None,
    };

    Ok(InscriptionPayload { op, protocol, tick, amount, from_chain_internal_id })
}

/// Reads a required integer field, accepting either a JSON number or a decimal
/// string rendering of one.
fn required_int(value: Option<&Value>, field: &'static str) -> Result<u64, DecodeError> {
    let value = value.ok_or(DecodeError::MissingField(field))?;
    match value {
        Value::Number(n) => n.as_u64().ok_or(DecodeError::NotInteger(field)),
        Value::String(s) => s.parse().map_err(|_| DecodeError::NotInteger(field)),
        _ => Err(DecodeError::NotInteger(field)),
    }
}

/// Reads an optional amount field as an arbitrary-precision decimal integer.
fn optional_amount(value: Option<&Value>) -> Result<Option<U256>, DecodeError> {
    let Some(value) = value else { return Ok(None) };
    let parsed = match value {
        Value::Number(n) => {
            let n = n.as_u64().ok_or(DecodeError::NotInteger("amt"))?;
            U256::from(n)
        }
        Value::String(s) => U256::from_str(s).map_err(|_| DecodeError::NotInteger("amt"))?,
        _ => return Err(DecodeError::NotInteger("amt")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cross_payload() {
        let payload = decode_inscription(
            br#"data:,{"op":"cross","p":1,"tick":8,"amt":"25000000000000000000","fc":44}"#,
        )
        .unwrap();
        assert_eq!(payload.op, InscriptionOp::Cross);
        assert_eq!(payload.protocol, 1);
        assert_eq!(payload.tick, 8);
        assert_eq!(payload.amount, Some(U256::from(25_000_000_000_000_000_000u128)));
        assert_eq!(payload.from_chain_internal_id, Some(44));
    }

    #[test]
    fn deploy_needs_no_amount() {
        let payload = decode_inscription(br#"{"op":"deploy","p":1,"tick":8}"#).unwrap();
        assert_eq!(payload.op, InscriptionOp::Deploy);
        assert_eq!(payload.amount, None);
    }

    #[test]
    fn rejects_missing_and_malformed_fields() {
        assert_eq!(
            decode_inscription(br#"{"op":"mint","p":1,"tick":8}"#),
            Err(DecodeError::MissingField("amt"))
        );
        assert_eq!(
            decode_inscription(br#"{"op":"cross","p":1,"tick":8,"amt":"1"}"#),
            Err(DecodeError::MissingField("fc"))
        );
        assert_eq!(
            decode_inscription(br#"{"op":"cross","p":1,"tick":8,"amt":"1","fc":"abc"}"#),
            Err(DecodeError::NotInteger("fc"))
        );
        assert_eq!(
            decode_inscription(br#"{"op":"cross","p":1,"tick":8,"amt":"1","fc":9000}"#),
            Err(DecodeError::OutOfRange("fc"))
        );
        assert_eq!(
            decode_inscription(br#"{"op":"burn","p":1,"tick":8}"#),
            Err(DecodeError::UnknownOp("burn".into()))
        );
        assert_eq!(decode_inscription(b"not json"), Err(DecodeError::NotInscription));
    }
}
