//! Dealer five-digit routing codec.
//!
//! The last five digits of a raw value split into `dealer (2) | ebc (1) |
//! target chain index (2)`. All three fields must be non-zero; the target
//! chain itself is resolved through the dealer-indexed rule lookup.

use super::DecodeError;
use alloy::primitives::U256;

/// Decodes the dealer route from a raw value.
pub fn decode_dealer_value(value: U256) -> Result<(u8, u8, u16), DecodeError> {
    let rendered = value.to_string();
    if rendered.len() < 5 {
        return Err(DecodeError::NotRouted);
    }

    let tail = &rendered[rendered.len() - 5..];
    let dealer_id: u8 = tail[..2].parse().expect("two decimal digits");
    let ebc_id: u8 = tail[2..3].parse().expect("one decimal digit");
    let target_chain_index: u16 = tail[3..5].parse().expect("two decimal digits");

    if dealer_id == 0 {
        return Err(DecodeError::ZeroDealerField("dealer"));
    }
    if ebc_id == 0 {
        return Err(DecodeError::ZeroDealerField("ebc"));
    }
    if target_chain_index == 0 {
        return Err(DecodeError::ZeroDealerField("target chain index"));
    }

    Ok((dealer_id, ebc_id, target_chain_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_five_digit_tail() {
        // ...01 2 03 -> dealer 1, ebc 2, chain index 3
        assert_eq!(decode_dealer_value(U256::from(5_000_000_000_001_203u64)), Ok((1, 2, 3)));
        assert_eq!(decode_dealer_value(U256::from(1_999_999_912_399u64)), Ok((12, 3, 99)));
    }

    #[test]
    fn rejects_zero_fields() {
        assert_eq!(
            decode_dealer_value(U256::from(5_000_000_000_000_203u64)),
            Err(DecodeError::ZeroDealerField("dealer"))
        );
        assert_eq!(
            decode_dealer_value(U256::from(5_000_000_000_001_003u64)),
            Err(DecodeError::ZeroDealerField("ebc"))
        );
        assert_eq!(
            decode_dealer_value(U256::from(5_000_000_000_001_200u64)),
            Err(DecodeError::ZeroDealerField("target chain index"))
        );
    }

    #[test]
    fn rejects_short_values() {
        assert_eq!(decode_dealer_value(U256::from(1203u64)), Err(DecodeError::NotRouted));
    }
}
