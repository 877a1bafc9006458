//! UTXO JSON-RPC response shapes this driver actually consumes — trimmed
//! down from the prior client's much larger response type set to the
//! handful of methods the adapter contract needs: `estimatesmartfee`,
//! `sendrawtransaction`, `getrawtransaction`, `listunspent`.

use serde::{Deserialize, Serialize};

/// Result of `estimatesmartfee <conf_target>`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EstimateSmartFee {
    /// Estimated fee rate in BTC/kvB. Absent when the node has insufficient
    /// data, in which case `errors` is populated instead.
    pub feerate: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub blocks: u32,
}

/// Result of `getrawtransaction <txid> true`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawTransactionVerbose {
    pub txid: String,
    pub hex: String,
    #[serde(default)]
    pub confirmations: u32,
    #[serde(rename = "blockhash")]
    pub block_hash: Option<String>,
}

/// One entry of `listunspent <minconf> <maxconf> [addresses]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnspentEntry {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    /// Value in BTC, as Bitcoin Core's JSON-RPC reports it.
    pub amount: f64,
    pub confirmations: u32,
    pub spendable: bool,
    pub solvable: bool,
}

impl UnspentEntry {
    pub fn value_sats(&self) -> u64 {
        (self.amount * 100_000_000.0).round() as u64
    }
}

/// Result of `getmempoolinfo`, used to widen fee estimates under congestion.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MempoolInfo {
    pub size: u64,
    #[serde(rename = "mempoolminfee")]
    pub mempool_min_fee: f64,
}
