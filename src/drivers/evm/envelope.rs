//! EIP-1559 transaction assembly: builds the unsigned `TxEip1559`, exposes
//! its signing hash, and reassembles a signed `TxEnvelope` from a 65-byte
//! raw `r || s || v` signature handed back by a [`crate::signer::Signer`].

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, Signature, TxKind, B256, U256};

use crate::error::{ChainError, ChainResult};

pub struct UnsignedEip1559 {
    pub tx: TxEip1559,
}

#[allow(clippy::too_many_arguments)]
pub fn build_unsigned(
    chain_id: u64,
    nonce: u64,
    to: Address,
    value: U256,
    input: Bytes,
    gas_limit: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
) -> UnsignedEip1559 {
    UnsignedEip1559 {
        tx: TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            to: TxKind::Call(to),
            value,
            input,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            access_list: Default::default(),
        },
    }
}

/// The 32-byte digest a [`crate::signer::Signer`] must sign for this
/// transaction — EIP-1559's RLP-encoded, type-prefixed payload hash.
pub fn signing_hash(unsigned: &UnsignedEip1559) -> B256 {
    unsigned.tx.signature_hash()
}

/// Reassembles a signed transaction from its 65-byte `r || s || v` signature,
/// verifies the recovered address matches `expected_sender`, and returns the
/// EIP-2718 wire bytes plus the canonical transaction hash.
pub fn finalize(
    unsigned: UnsignedEip1559,
    raw_signature: &[u8],
    expected_sender: Address,
) -> ChainResult<(Vec<u8>, B256)> {
    let signature = Signature::try_from(raw_signature).map_err(|_| ChainError::InvalidSignature)?;

    let hash = unsigned.tx.signature_hash();
    let recovered = signature
        .recover_address_from_prehash(&hash)
        .map_err(|_| ChainError::InvalidSignature)?;
    if recovered != expected_sender {
        return Err(ChainError::AddressMismatch {
            signer: recovered.to_checksum(None),
            expected: expected_sender.to_checksum(None),
        });
    }

    let signed = unsigned.tx.into_signed(signature);
    let tx_hash = *signed.tx_hash();
    let envelope = TxEnvelope::Eip1559(signed);
    let wire_bytes = envelope.encoded_2718();
    Ok((wire_bytes, tx_hash))
}
