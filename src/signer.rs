use std::future::Future;

use crate::error::ChainResult;

/// Injected signing capability. Implementations live outside the core (an
/// in-process key derived from a decrypted mnemonic, or a hardware-wallet
/// transport) — the core never touches private key material directly, only
/// `(payload, expected_address) -> signature`.
pub trait Signer {
    /// Signs `payload` and returns the raw signature bytes. Implementations
    /// must internally verify `expected_address` matches the key they hold
    /// before signing, or reject.
    fn sign(
        &self,
        payload: &[u8],
        expected_address: &str,
    ) -> impl Future<Output = ChainResult<Vec<u8>>> + Send;

    /// The address this signer signs on behalf of.
    fn address(&self) -> &str;

    /// The signer's public key, compressed SEC1 for UTXO chains or
    /// uncompressed/Keccak-derivable for EVM chains as the driver expects.
    /// Needed to verify the returned signature and, for UTXO chains, to
    /// assemble the P2WPKH witness.
    fn public_key(&self) -> &[u8];
}

/// One of {mnemonic, extended public key, hardware-wallet handle}. Exposes
/// only what `Derive` needs: a public key at a given derivation path. Object
/// safe so `Adapter::derive` can accept any key source behind a `&dyn`.
pub trait KeySource {
    /// Returns the raw public key bytes at `path`. Synchronous because all
    /// known key sources can answer this without I/O (an in-memory xpub, or
    /// a cached hardware-wallet public key export).
    fn public_key(&self, path: &str) -> ChainResult<Vec<u8>>;
}
