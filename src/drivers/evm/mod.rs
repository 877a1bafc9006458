pub mod address;
pub mod envelope;
pub mod fee;
pub mod rpc_types;

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address as AlloyAddress, Bytes, U256};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::error::{ChainError, ChainResult, Classification};
use crate::ledger::{LedgerKey, StateLedger};
use crate::metrics;
use crate::rpc::RpcPool;
use crate::signer::{KeySource, Signer};
use crate::subscription::{self, WsTransport};
use crate::types::{
    Address, BroadcastReceipt, Capabilities, FeeEstimate, ReconstructionData, SignedTransaction,
    StatusKind, TransactionRequest, TransactionStatus, UnsignedTransaction,
};

use rpc_types::{parse_hex_u64, TransactionByHash, TransactionReceipt};

const DEFAULT_GAS_LIMIT: u64 = 21_000;
const POLL_INTERVAL: Duration = Duration::from_secs(12);
/// Finality depth for an account-based chain, a conservative default in the
/// absence of a finalized-checkpoint RPC (`eth_getBlockByNumber("finalized")`
/// is not available on every EVM-compatible network this driver might run
/// against).
const CONFIRMATIONS_FOR_FINALITY: u32 = 12;

/// Wallet capability gap mirroring the UTXO driver's own note: an EVM node
/// has no concept of "balances by address" beyond `eth_getBalance` and
/// account nonces, so this driver sources inputs entirely from `from`/`to`
/// in the request plus whatever the node reports for that account — no
/// indexed UTXO set to reconcile against.
#[derive(Clone)]
pub struct EvmDriver {
    chain_id: Arc<str>,
    numeric_chain_id: u64,
    pool: RpcPool,
    ledger: Arc<StateLedger>,
    capabilities: Capabilities,
    ws_endpoint: Option<Arc<str>>,
}

impl EvmDriver {
    pub fn new(
        chain_id: impl Into<Arc<str>>,
        numeric_chain_id: u64,
        pool: RpcPool,
        ledger: Arc<StateLedger>,
        ws_endpoint: Option<String>,
    ) -> Self {
        let ws_endpoint: Option<Arc<str>> = ws_endpoint.map(Into::into);
        Self {
            chain_id: chain_id.into(),
            numeric_chain_id,
            pool,
            ledger,
            capabilities: Capabilities {
                dynamic_fee_market: true,
                memo_field: true,
                multi_signature: false,
                fee_delegation: false,
                subscription_transport: ws_endpoint.is_some(),
                replace_by_fee: true,
                max_memo_len: 8192,
                confirmations_for_finality: CONFIRMATIONS_FOR_FINALITY,
                interface_version: 1,
            },
            ws_endpoint,
        }
    }

    fn parse_address(&self, encoded: &str) -> ChainResult<AlloyAddress> {
        AlloyAddress::from_str(encoded)
            .map_err(|e| ChainError::InvalidRequest(format!("invalid evm address {encoded}: {e}")))
    }

    async fn fetch_nonce(&self, address: &AlloyAddress, cancel: &CancellationToken) -> ChainResult<u64> {
        let raw: String = self
            .pool
            .call(
                "eth_getTransactionCount",
                &[json!(address.to_checksum(None)), json!("pending")],
                cancel,
            )
            .await?;
        parse_hex_u64(&raw).map_err(ChainError::MalformedTransaction)
    }

    async fn estimate_gas(
        &self,
        from: &AlloyAddress,
        to: &AlloyAddress,
        value: U256,
        input: &Bytes,
        cancel: &CancellationToken,
    ) -> ChainResult<u64> {
        let raw: String = self
            .pool
            .call(
                "eth_estimateGas",
                &[json!({
                    "from": from.to_checksum(None),
                    "to": to.to_checksum(None),
                    "value": format!("0x{value:x}"),
                    "data": format!("0x{}", hex::encode(input.as_ref())),
                })],
                cancel,
            )
            .await?;
        parse_hex_u64(&raw).map_err(ChainError::MalformedTransaction)
    }

    fn classify_broadcast_error(reason: &str) -> ChainError {
        let lower = reason.to_lowercase();
        if lower.contains("nonce too low") {
            // Transient: the account's nonce advanced between build and
            // broadcast (a prior submission landed, or another sender won a
            // race). Re-deriving against the current nonce and resubmitting
            // is expected to succeed, so this is retryable rather than a
            // permanent conflict.
            ChainError::rpc("eth_sendRawTransaction", reason, Classification::Retryable)
        } else if lower.contains("already known") {
            ChainError::ConflictingBroadcast
        } else if lower.contains("replacement transaction underpriced") || lower.contains("fee too low") {
            ChainError::FeeTooLow(reason.to_string())
        } else if lower.contains("underpriced") {
            ChainError::ReplaceByFeeRequired
        } else {
            ChainError::MalformedTransaction(reason.to_string())
        }
    }

    async fn current_block_number(&self, cancel: &CancellationToken) -> ChainResult<u64> {
        let raw: String = self.pool.call("eth_blockNumber", &[], cancel).await?;
        parse_hex_u64(&raw).map_err(ChainError::MalformedTransaction)
    }

    async fn status_from_receipt(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> ChainResult<TransactionStatus> {
        let receipt: Option<TransactionReceipt> = self
            .pool
            .call("eth_getTransactionReceipt", &[json!(hash)], cancel)
            .await?;

        let Some(receipt) = receipt else {
            let pending: Option<TransactionByHash> =
                self.pool.call("eth_getTransactionByHash", &[json!(hash)], cancel).await?;
            return Ok(TransactionStatus {
                hash: hash.to_string(),
                status: if pending.is_some() { StatusKind::Pending } else { StatusKind::Failed },
                confirmations: 0,
                block_number: None,
                block_hash: None,
                last_update: Utc::now(),
                error: if pending.is_some() { None } else { Some("not found in mempool or chain".into()) },
            });
        };

        if receipt.status == "0x0" {
            return Ok(TransactionStatus {
                hash: hash.to_string(),
                status: StatusKind::Failed,
                confirmations: 0,
                block_number: parse_hex_u64(&receipt.block_number).ok(),
                block_hash: Some(receipt.block_hash.clone()),
                last_update: Utc::now(),
                error: Some("transaction reverted".into()),
            });
        }

        let receipt_block = parse_hex_u64(&receipt.block_number).map_err(ChainError::MalformedTransaction)?;
        let head = self.current_block_number(cancel).await?;
        let confirmations = head.saturating_sub(receipt_block).saturating_add(1) as u32;

        let status = if confirmations >= self.capabilities.confirmations_for_finality {
            StatusKind::Finalized
        } else {
            StatusKind::Confirmed
        };

        Ok(TransactionStatus {
            hash: hash.to_string(),
            status,
            confirmations,
            block_number: Some(receipt_block),
            block_hash: Some(receipt.block_hash),
            last_update: Utc::now(),
            error: None,
        })
    }
}

impl Adapter for EvmDriver {
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
            let value = U256::from(request.amount);
            let input: Bytes = match &request.memo {
                Some(memo) if !memo.is_empty() => Bytes::from(memo.clone().into_bytes()),
                _ => Bytes::new(),
            };
            if input.len() > self.capabilities.max_memo_len {
                return Err(ChainError::InvalidRequest(format!(
                    "memo of {} bytes exceeds max_memo_len {}",
                    input.len(),
                    self.capabilities.max_memo_len
                )));
            }

            let rates = fee::fetch_fee_history(&self.pool, cancel).await?;
            let max_fee_per_gas = fee::max_fee_for_speed(&rates, request.fee_speed);
            let max_priority_fee_per_gas = fee::priority_fee_for_speed(&rates, request.fee_speed);

            let gas_limit = if let Some(v) = request.overrides.get("gas_limit").and_then(|v| v.as_u64()) {
                v
            } else if input.is_empty() {
                DEFAULT_GAS_LIMIT
            } else {
                self.estimate_gas(&from, &to, value, &input, cancel).await?
            };

            let fee_total = max_fee_per_gas.saturating_mul(gas_limit as u128);
            if let Some(max_fee) = request.max_fee {
                if fee_total > max_fee {
                    return Err(ChainError::FeeTooLow(
                        "estimated fee exceeds caller's max_fee".into(),
                    ));
                }
            }

            let nonce = self.fetch_nonce(&from, cancel).await?;

            let unsigned_tx = envelope::build_unsigned(
                self.numeric_chain_id,
                nonce,
                to,
                value,
                input.clone(),
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            );
            let signing_hash = envelope::signing_hash(&unsigned_tx);

            let identifier = UnsignedTransaction::compute_identifier(
                &self.chain_id,
                &request.source,
                &request.destination,
                request.amount,
                fee_total,
                Some(nonce),
                signing_hash.as_slice(),
            );

            Ok(UnsignedTransaction {
                identifier,
                chain_id: self.chain_id.to_string(),
                from: from.to_checksum(None),
                to: to.to_checksum(None),
                amount: request.amount,
                fee: fee_total,
                sequence: Some(nonce),
                signing_payload: signing_hash.to_vec(),
                human_readable: format!(
                    "send {} wei from {} to {} (nonce {nonce}, max fee {fee_total} wei)",
                    request.amount,
                    from.to_checksum(None),
                    to.to_checksum(None)
                ),
                reconstruction: ReconstructionData::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    gas_limit,
                    chain_id: self.numeric_chain_id,
                    input: input.to_vec(),
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
            let rates = fee::fetch_fee_history(&self.pool, cancel).await?;
            let gas_limit = request
                .overrides
                .get("gas_limit")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_GAS_LIMIT);
            let estimate = fee::compose_estimate(&rates, request.fee_speed, gas_limit);
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
            let ReconstructionData::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                gas_limit,
                chain_id,
                input,
            } = &unsigned.reconstruction
            else {
                return Err(ChainError::Internal);
            };
            let Some(nonce) = unsigned.sequence else {
                return Err(ChainError::Internal);
            };

            let from = self.parse_address(&unsigned.from)?;
            let to = self.parse_address(&unsigned.to)?;
            let value = U256::from(unsigned.amount);
            let unsigned_tx = envelope::build_unsigned(
                *chain_id,
                nonce,
                to,
                value,
                Bytes::from(input.clone()),
                *gas_limit,
                *max_fee_per_gas,
                *max_priority_fee_per_gas,
            );

            let raw_signature = signer.sign(&unsigned.signing_payload, &unsigned.from).await?;
            let (wire_bytes, tx_hash) = envelope::finalize(unsigned_tx, &raw_signature, from)?;

            Ok(SignedTransaction {
                unsigned,
                signature: raw_signature,
                signer_address: signer.address().to_string(),
                transaction_hash: tx_hash.to_string(),
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
            let hex_tx = format!("0x{}", hex::encode(&signed.wire_bytes));
            let tx_hash = signed.transaction_hash.clone();
            let cancel = cancel.clone();

            let receipt = self
                .ledger
                .broadcast_or_submit(key, signed.wire_bytes.clone(), move || async move {
                    let returned_hash: String = pool
                        .call("eth_sendRawTransaction", &[json!(hex_tx)], &cancel)
                        .await
                        .map_err(|e| match e {
                            ChainError::Rpc { reason, .. } => Self::classify_broadcast_error(&reason),
                            other => other,
                        })?;
                    Ok(BroadcastReceipt {
                        transaction_hash: returned_hash,
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
        async move { self.status_from_receipt(hash, cancel).await }
    }

    fn subscribe_status(&self, hash: &str, cancel: CancellationToken) -> tokio::sync::mpsc::Receiver<TransactionStatus> {
        let hash_owned = hash.to_string();
        let poll_driver = self.clone();
        let poll = move |h: String| {
            let driver = poll_driver.clone();
            async move {
                let cancel = CancellationToken::new();
                driver.query_status(&h, &cancel).await
            }
        };

        if self.capabilities.subscription_transport {
            subscription::spawn(
                self.chain_id.clone(),
                Arc::new(self.clone()),
                hash_owned,
                poll,
                POLL_INTERVAL,
                cancel,
            )
        } else {
            subscription::spawn_polling_only(hash_owned, poll, POLL_INTERVAL, cancel)
        }
    }

    fn derive(
        &self,
        key_source: &dyn KeySource,
        path: &str,
    ) -> impl Future<Output = ChainResult<Address>> + Send {
        async move {
            let pubkey = key_source.public_key(path)?;
            let address = address::address_from_uncompressed_pubkey(&pubkey)?;
            Ok(Address {
                encoded: address::to_checksum(&address),
                chain_id: self.chain_id.to_string(),
                derivation_path: path.to_string(),
                public_key: pubkey,
                format: "eip55".to_string(),
            })
        }
    }
}

impl WsTransport for EvmDriver {
    fn endpoint(&self) -> &str {
        self.ws_endpoint.as_deref().unwrap_or("")
    }

    /// Subscribes to new block headers rather than a per-transaction feed —
    /// most nodes don't offer the latter, and a new head is exactly the
    /// event that can change this transaction's confirmation depth.
    fn subscribe_message(&self, _hash: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        })
        .to_string()
    }

    fn parse_message(
        &self,
        hash: &str,
        text: &str,
    ) -> impl Future<Output = Option<TransactionStatus>> + Send {
        let driver = self.clone();
        let hash = hash.to_string();
        let text = text.to_string();
        async move {
            if serde_json::from_str::<serde_json::Value>(&text).is_err() {
                return None;
            }
            let cancel = CancellationToken::new();
            driver.status_from_receipt(&hash, &cancel).await.ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_too_low_is_retryable() {
        let err = EvmDriver::classify_broadcast_error("nonce too low");
        assert_eq!(err.classification(), Classification::Retryable);
    }

    #[test]
    fn already_known_is_a_nonretryable_conflict() {
        let err = EvmDriver::classify_broadcast_error("already known");
        assert!(matches!(err, ChainError::ConflictingBroadcast));
        assert_eq!(err.classification(), Classification::NonRetryable);
    }

    #[test]
    fn replacement_underpriced_requires_user_intervention() {
        let err = EvmDriver::classify_broadcast_error("replacement transaction underpriced");
        assert!(matches!(err, ChainError::FeeTooLow(_)));
        assert_eq!(err.classification(), Classification::UserIntervention);
    }
}
