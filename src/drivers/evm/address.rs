//! EIP-55 checksummed address derivation for the EVM driver.

use alloy_primitives::{keccak256, Address};

use crate::error::{ChainError, ChainResult};

/// Recovers the EIP-55 checksummed address for an uncompressed secp256k1
/// public key (65 bytes, `0x04` prefix, or the bare 64-byte form).
pub fn address_from_uncompressed_pubkey(pubkey_bytes: &[u8]) -> ChainResult<Address> {
    let tail = match pubkey_bytes.len() {
        65 if pubkey_bytes[0] == 0x04 => &pubkey_bytes[1..],
        64 => pubkey_bytes,
        _ => {
            return Err(ChainError::InvalidRequest(
                "expected a 64 or 65-byte uncompressed public key".into(),
            ))
        }
    };
    let hash = keccak256(tail);
    Ok(Address::from_slice(&hash[12..]))
}

/// EIP-55 mixed-case checksum string for an address, the only textual form
/// this driver ever emits — never lowercase, never all-caps.
pub fn to_checksum(address: &Address) -> String {
    address.to_checksum(None)
}

/// BIP44-shaped derivation path for Ethereum, coin type 60: `m/44'/60'/0'/0/{index}`.
pub fn default_derivation_path(index: u32) -> String {
    format!("m/44'/60'/0'/0/{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_compressed_pubkey() {
        let compressed = [0x02u8; 33];
        assert!(address_from_uncompressed_pubkey(&compressed).is_err());
    }

    #[test]
    fn derivation_path_uses_coin_type_sixty() {
        assert_eq!(default_derivation_path(2), "m/44'/60'/0'/0/2");
    }

    #[test]
    fn checksum_is_mixed_case() {
        let addr = Address::from_slice(&[0xABu8; 20]);
        let checksum = to_checksum(&addr);
        assert!(checksum.starts_with("0x"));
        assert!(checksum.chars().any(|c| c.is_ascii_uppercase()));
    }
}
