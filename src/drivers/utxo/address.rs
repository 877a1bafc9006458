//! SegWit address derivation for the UTXO driver.

use bitcoin::{CompressedPublicKey, Network};

use crate::error::{ChainError, ChainResult};

/// Native SegWit (P2WPKH, bech32) address for a compressed public key —
/// the only address format this driver produces; legacy/P2SH-wrapped
/// addresses are out of scope for this driver.
pub fn p2wpkh_address(pubkey_bytes: &[u8], network: Network) -> ChainResult<bitcoin::Address> {
    let compressed = CompressedPublicKey::from_slice(pubkey_bytes)
        .map_err(|e| ChainError::InvalidRequest(format!("invalid compressed public key: {e}")))?;
    Ok(bitcoin::Address::p2wpkh(&compressed, network))
}

/// BIP44-shaped derivation path for Bitcoin, coin type 0: `m/84'/0'/0'/0/{index}`
/// (purpose 84 for native SegWit, per BIP84).
pub fn default_derivation_path(network: Network, index: u32) -> String {
    let coin_type = if network == Network::Bitcoin { 0 } else { 1 };
    format!("m/84'/{coin_type}'/0'/0/{index}")
}
