//! EIP-1559 fee composition for the EVM driver, built from `eth_feeHistory`
//! the way [`super::super::utxo::fee`] builds its estimate from
//! `estimatesmartfee` — same three-speed shape, different source data.

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::rpc_types::{parse_hex_u128, FeeHistory};
use crate::error::{ChainError, ChainResult};
use crate::rpc::RpcPool;
use crate::types::{FeeEstimate, FeeSpeed};

const BLOCK_COUNT: u64 = 10;
const REWARD_PERCENTILES: [f64; 3] = [10.0, 50.0, 90.0];

pub struct Eip1559Rates {
    pub base_fee_per_gas: u128,
    pub slow_priority_fee: u128,
    pub normal_priority_fee: u128,
    pub fast_priority_fee: u128,
    /// Coefficient of variation of the base fee over the trailing window,
    /// used to derive confidence: a volatile base fee makes any fixed
    /// max-fee cap less likely to still cover inclusion by the time the
    /// transaction lands.
    pub base_fee_volatility: f64,
}

pub async fn fetch_fee_history(
    pool: &RpcPool,
    cancel: &CancellationToken,
) -> ChainResult<Eip1559Rates> {
    let percentiles: Vec<_> = REWARD_PERCENTILES.iter().map(|p| json!(p)).collect();
    let history: FeeHistory = pool
        .call(
            "eth_feeHistory",
            &[json!(format!("0x{:x}", BLOCK_COUNT)), json!("latest"), json!(percentiles)],
            cancel,
        )
        .await?;

    if history.base_fee_per_gas.is_empty() {
        return Err(ChainError::MalformedTransaction("empty fee history".into()));
    }

    let base_fees: Vec<u128> = history
        .base_fee_per_gas
        .iter()
        .map(|s| parse_hex_u128(s))
        .collect::<Result<_, _>>()
        .map_err(ChainError::MalformedTransaction)?;

    // The last entry is the projected next-block base fee — the one that
    // will actually apply to a transaction submitted now.
    let next_base_fee = *base_fees.last().unwrap();

    let mut slow_rewards = Vec::new();
    let mut normal_rewards = Vec::new();
    let mut fast_rewards = Vec::new();
    for row in &history.reward {
        if row.len() != REWARD_PERCENTILES.len() {
            continue;
        }
        slow_rewards.push(parse_hex_u128(&row[0]).unwrap_or(0));
        normal_rewards.push(parse_hex_u128(&row[1]).unwrap_or(0));
        fast_rewards.push(parse_hex_u128(&row[2]).unwrap_or(0));
    }

    let volatility = coefficient_of_variation(&base_fees);

    Ok(Eip1559Rates {
        base_fee_per_gas: next_base_fee,
        slow_priority_fee: median(&slow_rewards),
        normal_priority_fee: median(&normal_rewards),
        fast_priority_fee: median(&fast_rewards),
        base_fee_volatility: volatility,
    })
}

fn median(values: &[u128]) -> u128 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

fn coefficient_of_variation(values: &[u128]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let floats: Vec<f64> = values.iter().map(|v| *v as f64).collect();
    let mean = floats.iter().sum::<f64>() / floats.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = floats.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / floats.len() as f64;
    variance.sqrt() / mean
}

/// Composes a [`FeeEstimate`] from raw fee-history rates, in wei, at
/// `speed`'s confirmation target. `minimum` and `maximum` are the slow and
/// fast tiers so callers get genuine bounds, mirroring
/// [`super::super::utxo::fee::estimate_for_vsize`]. `max_fee_per_gas` for
/// every speed is capped at `2 * base_fee_per_gas` plus its priority fee,
/// the conventional EIP-1559 headroom against a doubling base fee before
/// the next block.
pub fn compose_estimate(rates: &Eip1559Rates, speed: FeeSpeed, gas_limit: u64) -> FeeEstimate {
    let slow_total = max_fee_for_speed(rates, FeeSpeed::Slow).saturating_mul(gas_limit as u128);
    let normal_total = max_fee_for_speed(rates, FeeSpeed::Normal).saturating_mul(gas_limit as u128);
    let fast_total = max_fee_for_speed(rates, FeeSpeed::Fast).saturating_mul(gas_limit as u128);
    let recommended = match speed {
        FeeSpeed::Slow => slow_total,
        FeeSpeed::Normal => normal_total,
        FeeSpeed::Fast => fast_total,
    };
    let estimated_blocks = match speed {
        FeeSpeed::Slow => 6,
        FeeSpeed::Normal => 3,
        FeeSpeed::Fast => 1,
    };

    let confidence = if rates.base_fee_volatility < 0.05 {
        95
    } else if rates.base_fee_volatility < 0.15 {
        70
    } else {
        45
    };

    FeeEstimate {
        minimum: slow_total.min(recommended),
        recommended,
        maximum: fast_total.max(recommended),
        confidence,
        estimated_blocks,
        reason: "eth_feeHistory 10-block window, 10/50/90 reward percentiles".to_string(),
        timestamp: Utc::now(),
        base_fee: Some(rates.base_fee_per_gas),
    }
}

pub fn priority_fee_for_speed(rates: &Eip1559Rates, speed: FeeSpeed) -> u128 {
    match speed {
        FeeSpeed::Slow => rates.slow_priority_fee,
        FeeSpeed::Normal => rates.normal_priority_fee,
        FeeSpeed::Fast => rates.fast_priority_fee,
    }
}

pub fn max_fee_for_speed(rates: &Eip1559Rates, speed: FeeSpeed) -> u128 {
    rates
        .base_fee_per_gas
        .saturating_mul(2)
        .saturating_add(priority_fee_for_speed(rates, speed))
}
