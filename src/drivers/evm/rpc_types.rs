//! EVM JSON-RPC response shapes this driver consumes: `eth_getTransactionCount`,
//! `eth_feeHistory`, `eth_estimateGas`, `eth_sendRawTransaction`,
//! `eth_getTransactionByHash`, `eth_getTransactionReceipt`, `eth_blockNumber`.

use serde::{Deserialize, Serialize};

/// Parses a `0x`-prefixed hex quantity into a `u128`. Used for every numeric
/// field in the `eth_*` JSON-RPC surface, which encodes integers as hex
/// strings rather than JSON numbers.
pub fn parse_hex_u128(value: &str) -> Result<u128, String> {
    let trimmed = value.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).map_err(|e| format!("bad hex quantity {value}: {e}"))
}

pub fn parse_hex_u64(value: &str) -> Result<u64, String> {
    parse_hex_u128(value).map(|v| v as u64)
}

/// Result of `eth_feeHistory(blockCount, newestBlock, rewardPercentiles)`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FeeHistory {
    /// `blockCount + 1` entries: the trailing entry is the *next* block's
    /// projected base fee.
    #[serde(rename = "baseFeePerGas")]
    pub base_fee_per_gas: Vec<String>,
    /// One row per block, one column per requested percentile.
    #[serde(default)]
    pub reward: Vec<Vec<String>>,
    #[serde(rename = "oldestBlock")]
    pub oldest_block: String,
}

/// Result of `eth_getTransactionReceipt`. `None` when the transaction has not
/// yet been mined.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransactionReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    /// `"0x1"` success, `"0x0"` reverted.
    pub status: String,
}

/// Result of `eth_getTransactionByHash`. `block_number` is `None` while the
/// transaction sits in the mempool.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransactionByHash {
    pub hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}
