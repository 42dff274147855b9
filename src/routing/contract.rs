//! Router calldata decoding.
//!
//! Router contracts carry the counterparty account in structurally-encoded
//! call arguments. Cross-VM account formats are normalized to 32 bytes with
//! fixed-width big-endian padding.

use super::DecodeError;
use alloy::{
    primitives::{Address, B256},
    sol,
    sol_types::SolCall,
};

sol! {
    /// Current-generation router entrypoint. The maker owner rides in the
    /// calldata; the dealer route rides in the value's trailing digits.
    function forwardTo(address maker);

    /// First-generation router entrypoint carrying the maker and an opaque
    /// extension blob; the plain code rides in the value's trailing digits.
    function forward(address maker, bytes ext);

    /// Chain-family bridge entrypoint with a fixed-width padded recipient.
    function bridgeOut(address maker, bytes32 recipient);
}

/// Returns the four-byte selector of `calldata`, if long enough.
pub fn selector(calldata: &[u8]) -> Option<[u8; 4]> {
    calldata.get(..4)?.try_into().ok()
}

/// Recovers a 20-byte account from a fixed-width padded word.
///
/// The twelve high-order bytes must be zero.
pub fn unpad_account(word: B256) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(DecodeError::Calldata("recipient padding is not zero".into()));
    }
    Ok(Address::from_slice(&word[12..]))
}

/// Decodes a `forwardTo` call, returning the maker.
pub fn decode_forward_to(calldata: &[u8]) -> Result<Address, DecodeError> {
    let call = forwardToCall::abi_decode(calldata)
        .map_err(|err| DecodeError::Calldata(err.to_string()))?;
    Ok(call.maker)
}

/// Decodes a `forward` call, returning the maker.
pub fn decode_forward(calldata: &[u8]) -> Result<Address, DecodeError> {
    let call =
        forwardCall::abi_decode(calldata).map_err(|err| DecodeError::Calldata(err.to_string()))?;
    Ok(call.maker)
}

/// Decodes a `bridgeOut` call, returning the maker and the raw recipient word.
///
/// Recipient interpretation is chain-family dependent and left to the caller:
/// EVM chains take the low 20 bytes, cross-VM chains require strict padding.
pub fn decode_bridge_out(calldata: &[u8]) -> Result<(Address, B256), DecodeError> {
    let call = bridgeOutCall::abi_decode(calldata)
        .map_err(|err| DecodeError::Calldata(err.to_string()))?;
    Ok((call.maker, call.recipient))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{primitives::address, sol_types::SolCall};

    #[test]
    fn unpad_recovers_a_clean_word() {
        let account = address!("00000000000000000000000000000000000a11ce");
        assert_eq!(unpad_account(account.into_word()).unwrap(), account);
    }

    #[test]
    fn unpad_rejects_dirty_padding() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(unpad_account(B256::from(word)).is_err());
    }

    #[test]
    fn decodes_forward_to() {
        let maker = address!("00000000000000000000000000000000000a11ce");
        let calldata = forwardToCall { maker }.abi_encode();
        assert_eq!(selector(&calldata), Some(forwardToCall::SELECTOR));
        assert_eq!(decode_forward_to(&calldata).unwrap(), maker);
    }

    #[test]
    fn decodes_bridge_out() {
        let maker = address!("00000000000000000000000000000000000a11ce");
        let recipient = address!("000000000000000000000000000000000000b0b0");
        let calldata =
            bridgeOutCall { maker, recipient: recipient.into_word() }.abi_encode();
        assert_eq!(decode_bridge_out(&calldata).unwrap(), (maker, recipient.into_word()));
    }

    #[test]
    fn malformed_calldata_is_typed() {
        assert!(matches!(decode_forward_to(&[0u8; 3]), Err(DecodeError::Calldata(_))));
    }
}
