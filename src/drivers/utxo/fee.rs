//! Fee estimation for the UTXO driver: `estimatesmartfee` at three
//! confirmation targets, widened by mempool congestion, fanned out across
//! the three `FeeSpeed` tiers instead of one target.

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::rpc_types::{EstimateSmartFee, MempoolInfo};
use crate::error::ChainResult;
use crate::rpc::RpcPool;
use crate::types::{FeeEstimate, FeeSpeed};

/// Minimum relay fee rate assumed if the node has no estimate yet (e.g.
/// freshly started regtest), in sat/vB.
const FALLBACK_SAT_VB: f64 = 1.0;

/// A typical native-SegWit 1-input/2-output transaction, used to size an
/// `Estimate` before any UTXOs have actually been selected.
pub const PLACEHOLDER_VSIZE: u64 = 141;

pub struct FeeRates {
    pub slow_sat_vb: f64,
    pub normal_sat_vb: f64,
    pub fast_sat_vb: f64,
    pub fast_blocks: u32,
    pub normal_blocks: u32,
    pub slow_blocks: u32,
}

async fn estimate_smart_fee(pool: &RpcPool, conf_target: u16, cancel: &CancellationToken) -> ChainResult<f64> {
    let result: EstimateSmartFee = pool
        .call("estimatesmartfee", &[json!(conf_target)], cancel)
        .await?;
    match result.feerate {
        // BTC/kvB -> sat/vB
        Some(rate) => Ok((rate * 100_000.0).max(FALLBACK_SAT_VB)),
        None => Ok(FALLBACK_SAT_VB),
    }
}

pub async fn fetch_fee_rates(pool: &RpcPool, cancel: &CancellationToken) -> ChainResult<FeeRates> {
    let fast = estimate_smart_fee(pool, 1, cancel).await?;
    let normal = estimate_smart_fee(pool, 3, cancel).await?;
    let slow = estimate_smart_fee(pool, 6, cancel).await?;

    let congestion_floor: f64 = match pool.call::<MempoolInfo>("getmempoolinfo", &[], cancel).await {
        Ok(info) => info.mempool_min_fee * 100_000.0,
        Err(_) => FALLBACK_SAT_VB,
    };

    Ok(FeeRates {
        slow_sat_vb: slow.max(congestion_floor),
        normal_sat_vb: normal.max(congestion_floor),
        fast_sat_vb: fast.max(congestion_floor),
        fast_blocks: 1,
        normal_blocks: 3,
        slow_blocks: 6,
    })
}

pub fn rate_for_speed(rates: &FeeRates, speed: FeeSpeed) -> (f64, u32) {
    match speed {
        FeeSpeed::Slow => (rates.slow_sat_vb, rates.slow_blocks),
        FeeSpeed::Normal => (rates.normal_sat_vb, rates.normal_blocks),
        FeeSpeed::Fast => (rates.fast_sat_vb, rates.fast_blocks),
    }
}

/// Builds a `FeeEstimate` for `vsize` virtual bytes at `speed`. `minimum` is
/// the slow-tier rate and `maximum` is 150% of the fast tier, so callers get
/// genuine bounds rather than three identical numbers.
pub fn estimate_for_vsize(rates: &FeeRates, speed: FeeSpeed, vsize: u64) -> FeeEstimate {
    let (rate, blocks) = rate_for_speed(rates, speed);
    let minimum = (rates.slow_sat_vb * vsize as f64).round() as u128;
    let recommended = (rate * vsize as f64).round() as u128;
    let maximum = (rates.fast_sat_vb * 1.5 * vsize as f64).round() as u128;
    let maximum = maximum.max(recommended);

    FeeEstimate {
        minimum: minimum.min(recommended),
        recommended,
        maximum,
        confidence: if rate > FALLBACK_SAT_VB { 80 } else { 40 },
        estimated_blocks: blocks,
        reason: format!("estimatesmartfee target={blocks}"),
        timestamp: Utc::now(),
        base_fee: None,
    }
}
