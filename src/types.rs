use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Fee-speed preference a caller can request for `Build`/`Estimate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSpeed {
    Slow,
    Normal,
    Fast,
}

/// Chain-agnostic transaction intent, constructed by the caller and consumed
/// by `Build`/`Estimate`. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub source: String,
    pub destination: String,
    pub asset: String,
    /// Amount in the asset's smallest unit (satoshi, wei, ...).
    pub amount: u128,
    pub memo: Option<String>,
    pub max_fee: Option<u128>,
    pub deadline: Option<DateTime<Utc>>,
    pub fee_speed: FeeSpeed,
    /// Chain-specific overrides (e.g. `gas_limit`). A `BTreeMap` rather than
    /// a `HashMap` so canonical serialization of the derived
    /// `UnsignedTransaction` is deterministic across processes.
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
}

impl TransactionRequest {
    /// Validates the invariants the adapter contract requires of every request,
    /// independent of any chain-specific validation a driver layers on top.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount == 0 {
            return Err("amount must be greater than zero".into());
        }
        if self.source.is_empty() {
            return Err("source address must not be empty".into());
        }
        if self.destination.is_empty() {
            return Err("destination address must not be empty".into());
        }
        if self.asset.is_empty() {
            return Err("asset symbol must not be empty".into());
        }
        Ok(())
    }
}

/// Chain-specific data carried inside an `UnsignedTransaction`, opaque to
/// everything except the driver that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ReconstructionData {
    /// Selected UTXOs plus the PSBT envelope, base64-encoded.
    Utxo {
        selected_inputs: Vec<SelectedUtxo>,
        psbt_base64: String,
    },
    /// Gas parameters plus the unsigned EIP-1559 envelope fields. `nonce`
    /// is carried in `UnsignedTransaction::sequence`, not duplicated here.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        gas_limit: u64,
        chain_id: u64,
        #[serde(default, with = "base64_bytes")]
        input: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// Reconstructible artifact produced by `Build`.
///
/// Two `Build` calls against the same request and the same on-chain view
/// must yield an identical `identifier` and `signing_payload` — the
/// determinism invariant tested in `tests/invariants.rs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    /// Hash of the canonical serialization of this transaction's fields
    /// (excluding `created_at`, which is not part of the deterministic
    /// identity).
    pub identifier: String,
    pub chain_id: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub fee: u128,
    pub sequence: Option<u64>,
    /// Opaque bytes the signer operates on (sighash preimage for UTXO,
    /// EIP-2718 typed-transaction signing hash for account-based chains).
    pub signing_payload: Vec<u8>,
    /// Human-readable rendering for audit/display purposes.
    pub human_readable: String,
    pub reconstruction: ReconstructionData,
    pub created_at: DateTime<Utc>,
}

impl UnsignedTransaction {
    /// Computes the deterministic identifier from everything but
    /// `created_at`. Drivers call this once all other fields are final.
    pub fn compute_identifier(
        chain_id: &str,
        from: &str,
        to: &str,
        amount: u128,
        fee: u128,
        sequence: Option<u64>,
        signing_payload: &[u8],
    ) -> String {
        use bitcoin::hashes::{sha256, Hash};
        use std::fmt::Write as _;

        let mut canonical = String::new();
        let _ = write!(
            canonical,
            "{chain_id}|{from}|{to}|{amount}|{fee}|{}|",
            sequence.map(|s| s.to_string()).unwrap_or_default()
        );
        sha256::Hash::hash([canonical.as_bytes(), signing_payload].concat().as_slice()).to_string()
    }
}

/// Fee bounds with a calibrated confidence number. `confidence` is an
/// ordinal band (low/medium/high mapped to an integer range), not a
/// probability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub minimum: u128,
    pub recommended: u128,
    pub maximum: u128,
    /// 0-100.
    pub confidence: u8,
    pub estimated_blocks: u32,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub base_fee: Option<u128>,
}

impl FeeEstimate {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.minimum > 0 && self.minimum <= self.recommended && self.recommended <= self.maximum) {
            return Err(format!(
                "fee bounds out of order: {} <= {} <= {}",
                self.minimum, self.recommended, self.maximum
            ));
        }
        if self.confidence > 100 {
            return Err("confidence must be 0-100".into());
        }
        Ok(())
    }
}

/// Output of `Sign`. Holds a strong reference to the `UnsignedTransaction`
/// it was produced from so the audit chain is always reconstructible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub signature: Vec<u8>,
    pub signer_address: String,
    pub transaction_hash: String,
    pub wire_bytes: Vec<u8>,
    pub signed_at: DateTime<Utc>,
}

/// Output of `Broadcast`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub transaction_hash: String,
    pub chain_id: String,
    pub submitted_at: DateTime<Utc>,
    pub endpoint_id: String,
    pub status_url: Option<String>,
    pub initial_status: TransactionStatus,
}

/// Canonical status enum every driver maps its chain-specific confirmation
/// depth onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Pending,
    Confirmed,
    Finalized,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub hash: String,
    pub status: StatusKind,
    pub confirmations: u32,
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub last_update: DateTime<Utc>,
    pub error: Option<String>,
}

impl TransactionStatus {
    /// True once a status is a terminal sink: no further values should
    /// follow it on a subscription stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StatusKind::Finalized | StatusKind::Failed)
    }
}

/// Derived address, the output of `Derive`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub encoded: String,
    pub chain_id: String,
    pub derivation_path: String,
    pub public_key: Vec<u8>,
    pub format: String,
}

/// Feature vector + quantitative limits a driver advertises. Pure and
/// cached after construction (see the adapter contract's immutability guarantee).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub dynamic_fee_market: bool,
    pub memo_field: bool,
    pub multi_signature: bool,
    pub fee_delegation: bool,
    pub subscription_transport: bool,
    pub replace_by_fee: bool,
    pub max_memo_len: usize,
    pub confirmations_for_finality: u32,
    pub interface_version: u32,
}
