//! Coin selection and PSBT assembly for the UTXO driver.
//!
//! Scope decision (see `DESIGN.md`): exactly one input is selected per
//! transaction — the smallest UTXO that alone covers `amount + fee` — rather
//! than a general multi-input selector. The adapter contract carries a
//! single `signing_payload`/`signature` pair per `Sign` call, which maps
//! cleanly onto one sighash; a multi-input selector would need per-input
//! sighashes and a richer signer contract than this one provides.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::ecdsa::Signature as EcdsaSignature;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::script::ScriptBuf;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Address, Amount, CompressedPublicKey, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::rpc_types::UnspentEntry;
use crate::error::{ChainError, ChainResult};
use crate::types::SelectedUtxo;

pub const DUST_LIMIT_SATS: u64 = 546;

/// Picks the smallest available UTXO whose value alone covers `target_sats`.
pub fn select_utxo(utxos: &[UnspentEntry], target_sats: u64) -> ChainResult<UnspentEntry> {
    let mut candidates: Vec<&UnspentEntry> = utxos
        .iter()
        .filter(|u| u.spendable && u.value_sats() >= target_sats)
        .collect();
    candidates.sort_by_key(|u| u.value_sats());

    candidates.into_iter().next().cloned().ok_or_else(|| {
        let available = utxos.iter().map(|u| u.value_sats() as u128).max().unwrap_or(0);
        ChainError::InsufficientFunds {
            needed: target_sats as u128,
            available,
        }
    })
}

pub struct UnsignedPsbt {
    pub psbt: Psbt,
    pub selected: SelectedUtxo,
    pub sighash: [u8; 32],
}

/// Builds an unsigned, single-input PSBT paying `amount_sats` to `to` from
/// `selected`, with any change above the dust limit returned to `from`.
pub fn build_psbt(
    selected: &UnspentEntry,
    from: &Address,
    to: &Address,
    amount_sats: u64,
    fee_sats: u64,
) -> ChainResult<UnsignedPsbt> {
    let input_value = selected.value_sats();
    let spend = amount_sats
        .checked_add(fee_sats)
        .ok_or_else(|| ChainError::InvalidRequest("amount + fee overflowed".into()))?;
    if input_value < spend {
        return Err(ChainError::InsufficientFunds {
            needed: spend as u128,
            available: input_value as u128,
        });
    }
    let change = input_value - spend;

    let txid = Txid::from_str(&selected.txid)
        .map_err(|e| ChainError::MalformedTransaction(format!("bad utxo txid: {e}")))?;
    let outpoint = OutPoint::new(txid, selected.vout);

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sats),
        script_pubkey: to.script_pubkey(),
    }];
    if change > DUST_LIMIT_SATS {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: from.script_pubkey(),
        });
    }

    let tx = Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            // BIP125 replace-by-fee signaling, per `Capabilities::replace_by_fee`.
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: outputs,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|e| ChainError::MalformedTransaction(format!("psbt construction failed: {e}")))?;

    let from_script = from.script_pubkey();
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(input_value),
        script_pubkey: from_script.clone(),
    });

    let sighash = SighashCache::new(&psbt.unsigned_tx)
        .p2wpkh_signature_hash(0, &from_script, Amount::from_sat(input_value), EcdsaSighashType::All)
        .map_err(|e| ChainError::MalformedTransaction(format!("sighash computation failed: {e}")))?;

    Ok(UnsignedPsbt {
        psbt,
        selected: SelectedUtxo {
            txid: selected.txid.clone(),
            vout: selected.vout,
            value: input_value,
        },
        sighash: sighash.to_byte_array(),
    })
}

/// Finalizes `psbt` with `signature` and `pubkey`, extracts the final
/// transaction, and returns its hex-serialized wire bytes plus txid.
pub fn finalize(
    mut psbt: Psbt,
    signature: &[u8],
    pubkey: &[u8],
) -> ChainResult<(Vec<u8>, String)> {
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .or_else(|_| secp256k1::ecdsa::Signature::from_der(signature))
        .map_err(|_| ChainError::InvalidSignature)?;
    let compressed = CompressedPublicKey::from_slice(pubkey).map_err(|_| ChainError::InvalidSignature)?;
    let ecdsa_sig = EcdsaSignature {
        signature: sig,
        sighash_type: EcdsaSighashType::All,
    };
    psbt.inputs[0].final_script_witness = Some(Witness::p2wpkh(&ecdsa_sig, &compressed.0));

    let tx = psbt
        .extract_tx()
        .map_err(|e| ChainError::MalformedTransaction(format!("psbt extraction failed: {e}")))?;
    let wire_bytes = bitcoin::consensus::encode::serialize(&tx);
    let txid = tx.compute_txid().to_string();
    Ok((wire_bytes, txid))
}

pub fn psbt_to_base64(psbt: &Psbt) -> String {
    STANDARD.encode(psbt.serialize())
}
