pub mod address;
pub mod fee;
pub mod psbt;
pub mod rpc_types;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Network;
use chrono::Utc;
use secp256k1::{ecdsa, Message, PublicKey, SECP256K1};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::error::{ChainError, ChainResult};
use crate::ledger::{LedgerKey, StateLedger};
use crate::metrics;
use crate::rpc::RpcPool;
use crate::signer::{KeySource, Signer};
use crate::subscription;
use crate::types::{
    Address, BroadcastReceipt, Capabilities, FeeEstimate, ReconstructionData, SelectedUtxo, SignedTransaction,
    StatusKind, TransactionRequest, TransactionStatus, UnsignedTransaction,
};

use rpc_types::{RawTransactionVerbose, UnspentEntry};

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Maps a driver-specific wallet capability gap: a UTXO node without an
/// indexed, address-aware mempool can't answer "what can `source` spend"
/// except through a wallet that has imported/watches the address. This
/// driver assumes such a wallet is loaded on the node behind the pool and
/// uses `listunspent`'s address filter accordingly.
pub struct UtxoDriver {
    chain_id: Arc<str>,
    network: Network,
    pool: RpcPool,
    ledger: Arc<StateLedger>,
    capabilities: Capabilities,
}

impl Clone for UtxoDriver {
    fn clone(&self) -> Self {
        Self {
            chain_id: self.chain_id.clone(),
            network: self.network,
            pool: self.pool.clone(),
            ledger: self.ledger.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

impl UtxoDriver {
    pub fn new(chain_id: impl Into<Arc<str>>, network: Network, pool: RpcPool, ledger: Arc<StateLedger>) -> Self {
        Self {
            chain_id: chain_id.into(),
            network,
            pool,
            ledger,
            capabilities: Capabilities {
                dynamic_fee_market: true,
                memo_field: false,
                multi_signature: false,
                fee_delegation: false,
                // bitcoind has no native push-subscription surface for
                // transaction status; this driver always polls.
                subscription_transport: false,
                replace_by_fee: true,
                max_memo_len: 0,
                confirmations_for_finality: 6,
                interface_version: 1,
            },
        }
    }

    async fn fetch_unspent(&self, address: &str, cancel: &CancellationToken) -> ChainResult<Vec<UnspentEntry>> {
        self.pool
            .call(
                "listunspent",
                &[json!(1), json!(9_999_999), json!([address])],
                cancel,
            )
            .await
    }

    fn parse_address(&self, encoded: &str) -> ChainResult<bitcoin::Address> {
        bitcoin::Address::from_str(encoded)
            .map_err(|e| ChainError::InvalidRequest(format!("invalid bitcoin address {encoded}: {e}")))?
            .require_network(self.network)
            .map_err(|e| ChainError::InvalidRequest(format!("address network mismatch: {e}")))
    }

    fn classify_broadcast_error(reason: &str) -> ChainError {
        let lower = reason.to_lowercase();
        if lower.contains("missingorspent") || lower.contains("already in block chain") {
            ChainError::ConflictingBroadcast
        } else if lower.contains("min relay fee not met") || lower.contains("insufficient fee") {
            ChainError::FeeTooLow(reason.to_string())
        } else if lower.contains("replace-by-fee") || lower.contains("txn-mempool-conflict") {
            ChainError::ReplaceByFeeRequired
        } else {
            ChainError::MalformedTransaction(reason.to_string())
        }
    }

    fn status_from_raw(&self, hash: &str, raw: &RawTransactionVerbose) -> TransactionStatus {
        let status = if raw.confirmations == 0 {
            StatusKind::Pending
        } else if raw.confirmations < self.capabilities.confirmations_for_finality {
            StatusKind::Confirmed
        } else {
            StatusKind::Finalized
        };
        TransactionStatus {
            hash: hash.to_string(),
            status,
            confirmations: raw.confirmations,
            block_number: None,
            block_hash: raw.block_hash.clone(),
            last_update: Utc::now(),
            error: None,
        }
    }
}

impl Adapter for UtxoDriver {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn build(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<UnsignedTransaction>> + Send {
        async move {
            request.validate().map_err(ChainError::InvalidRequest)?;
            let from = self.parse_address(&request.source)?;
            let to = self.parse_address(&request.destination)?;

            let rates = fee::fetch_fee_rates(&self.pool, cancel).await?;
            let (rate_sat_vb, _) = fee::rate_for_speed(&rates, request.fee_speed);
            let approx_fee = (rate_sat_vb * fee::PLACEHOLDER_VSIZE as f64).round() as u64;

            let amount_sats: u64 = request
                .amount
                .try_into()
                .map_err(|_| ChainError::InvalidRequest("amount exceeds u64 range".into()))?;
            if let Some(max_fee) = request.max_fee {
                if (approx_fee as u128) > max_fee {
                    return Err(ChainError::FeeTooLow(
                        "estimated fee exceeds caller's max_fee".into(),
                    ));
                }
            }

            let utxos = self.fetch_unspent(&request.source, cancel).await?;
            let selected = psbt::select_utxo(&utxos, amount_sats + approx_fee)?;
            let unsigned_psbt = psbt::build_psbt(&selected, &from, &to, amount_sats, approx_fee)?;

            let identifier = UnsignedTransaction::compute_identifier(
                &self.chain_id,
                &request.source,
                &request.destination,
                request.amount,
                approx_fee as u128,
                None,
                &unsigned_psbt.sighash,
            );

            Ok(UnsignedTransaction {
                identifier,
                chain_id: self.chain_id.to_string(),
                from: request.source.clone(),
                to: request.destination.clone(),
                amount: request.amount,
                fee: approx_fee as u128,
                sequence: None,
                signing_payload: unsigned_psbt.sighash.to_vec(),
                human_readable: format!(
                    "send {amount_sats} sat from {} to {} (fee {approx_fee} sat)",
                    request.source, request.destination
                ),
                reconstruction: ReconstructionData::Utxo {
                    selected_inputs: vec![SelectedUtxo {
                        txid: unsigned_psbt.selected.txid,
                        vout: unsigned_psbt.selected.vout,
                        value: unsigned_psbt.selected.value,
                    }],
                    psbt_base64: psbt::psbt_to_base64(&unsigned_psbt.psbt),
                },
                created_at: Utc::now(),
            })
        }
    }

    fn estimate(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<FeeEstimate>> + Send {
        async move {
            request.validate().map_err(ChainError::InvalidRequest)?;
            let rates = fee::fetch_fee_rates(&self.pool, cancel).await?;
            let estimate = fee::estimate_for_vsize(&rates, request.fee_speed, fee::PLACEHOLDER_VSIZE);
            estimate.validate().map_err(|_| ChainError::Internal)?;
            metrics::record_fee_confidence(&self.chain_id, estimate.confidence);
            Ok(estimate)
        }
    }

    fn sign<S: Signer + Sync>(
        &self,
        unsigned: UnsignedTransaction,
        signer: &S,
    ) -> impl Future<Output = ChainResult<SignedTransaction>> + Send {
        async move {
            if signer.address() != unsigned.from {
                return Err(ChainError::AddressMismatch {
                    signer: signer.address().to_string(),
                    expected: unsigned.from.clone(),
                });
            }
            let ReconstructionData::Utxo {
                selected_inputs,
                psbt_base64,
            } = &unsigned.reconstruction
            else {
                return Err(ChainError::Internal);
            };
            use base64::{engine::general_purpose::STANDARD, Engine};
            let psbt_bytes = STANDARD
                .decode(psbt_base64)
                .map_err(|e| ChainError::MalformedTransaction(format!("bad psbt base64: {e}")))?;
            let psbt = bitcoin::psbt::Psbt::deserialize(&psbt_bytes)
                .map_err(|e| ChainError::MalformedTransaction(format!("bad psbt bytes: {e}")))?;

            let signature = signer.sign(&unsigned.signing_payload, &unsigned.from).await?;

            let message = Message::from_digest(
                unsigned
                    .signing_payload
                    .clone()
                    .try_into()
                    .map_err(|_| ChainError::Internal)?,
            );
            let pubkey = PublicKey::from_slice(signer.public_key()).map_err(|_| ChainError::InvalidSignature)?;
            let sig = ecdsa::Signature::from_compact(&signature)
                .or_else(|_| ecdsa::Signature::from_der(&signature))
                .map_err(|_| ChainError::InvalidSignature)?;
            SECP256K1
                .verify_ecdsa(&message, &sig, &pubkey)
                .map_err(|_| ChainError::InvalidSignature)?;

            let (wire_bytes, txid) = psbt::finalize(psbt, &signature, signer.public_key())?;
            let _ = selected_inputs;

            Ok(SignedTransaction {
                unsigned,
                signature,
                signer_address: signer.address().to_string(),
                transaction_hash: txid,
                wire_bytes,
                signed_at: Utc::now(),
            })
        }
    }

    fn broadcast(
        &self,
        signed: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<BroadcastReceipt>> + Send {
        async move {
            let key = LedgerKey::new(self.chain_id.to_string(), signed.transaction_hash.clone());
            let metrics_key = key.clone();
            let pool = self.pool.clone();
            let chain_id = self.chain_id.to_string();
            let hex_tx = hex::encode(&signed.wire_bytes);
            let tx_hash = signed.transaction_hash.clone();
            let cancel = cancel.clone();

            let receipt = self
                .ledger
                .broadcast_or_submit(key, signed.wire_bytes.clone(), move || async move {
                    let txid: String = pool
                        .call("sendrawtransaction", &[json!(hex_tx)], &cancel)
                        .await
                        .map_err(|e| match e {
                            ChainError::Rpc { reason, .. } => Self::classify_broadcast_error(&reason),
                            other => other,
                        })?;
                    Ok(BroadcastReceipt {
                        transaction_hash: txid,
                        chain_id: chain_id.clone(),
                        submitted_at: Utc::now(),
                        endpoint_id: "rpc-pool".to_string(),
                        status_url: None,
                        initial_status: TransactionStatus {
                            hash: tx_hash.clone(),
                            status: StatusKind::Pending,
                            confirmations: 0,
                            block_number: None,
                            block_hash: None,
                            last_update: Utc::now(),
                            error: None,
                        },
                    })
                })
                .await?;

            if let Some(record) = self.ledger.get(&metrics_key).await {
                metrics::record_broadcast_retry(&self.chain_id, record.retry_count);
            }
            Ok(receipt)
        }
    }

    fn query_status(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<TransactionStatus>> + Send {
        async move {
            let raw: RawTransactionVerbose = self
                .pool
                .call("getrawtransaction", &[json!(hash), json!(true)], cancel)
                .await
                .map_err(|_| ChainError::NotFound(hash.to_string()))?;
            Ok(self.status_from_raw(hash, &raw))
        }
    }

    fn subscribe_status(&self, hash: &str, cancel: CancellationToken) -> tokio::sync::mpsc::Receiver<TransactionStatus> {
        let driver = self.clone();
        let hash = hash.to_string();
        subscription::spawn_polling_only(
            hash.clone(),
            move |hash| {
                let driver = driver.clone();
                async move {
                    let cancel = CancellationToken::new();
                    driver.query_status(&hash, &cancel).await
                }
            },
            POLL_INTERVAL,
            cancel,
        )
    }

    fn derive(
        &self,
        key_source: &dyn KeySource,
        path: &str,
    ) -> impl Future<Output = ChainResult<Address>> + Send {
        async move {
            let pubkey = key_source.public_key(path)?;
            let address = address::p2wpkh_address(&pubkey, self.network)?;
            Ok(Address {
                encoded: address.to_string(),
                chain_id: self.chain_id.to_string(),
                derivation_path: path.to_string(),
                public_key: pubkey,
                format: "p2wpkh".to_string(),
            })
        }
    }
}
