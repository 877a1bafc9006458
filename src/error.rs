use std::fmt;
use std::time::Duration;

/// How a caller should react to a [`ChainError`].
///
/// This is the three-way split from the adapter contract: every error
/// surfaced across the `Adapter` boundary carries one of these, so callers
/// never have to pattern-match on a message string to decide whether to
/// retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Transient; safe to retry, optionally after `retry_after`.
    Retryable,
    /// Permanent given the current inputs; the caller must change them.
    NonRetryable,
    /// Needs out-of-band action (signer confirmation, fee bump, RBF).
    UserIntervention,
}

/// A classified error surfaced by any layer of the core.
///
/// Mirrors the shape of the prior client's `ClientError`: one variant per failure
/// mode with a `thiserror` `Display`, but with a [`Classification`] attached
/// to every public-facing variant and no raw provider payload, credential,
/// or key material ever appearing in the message.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The RPC transport exhausted every endpoint in the pool.
    #[error("all endpoints exhausted for {method}: {reason}")]
    RpcExhausted { method: String, reason: String },

    /// A single RPC call failed classified this way (used internally before
    /// failover has had a chance to try another endpoint).
    #[error("rpc call to {method} failed: {reason}")]
    Rpc {
        method: String,
        reason: String,
        classification: Classification,
    },

    /// Request validation failed (bad address, non-positive amount,
    /// unrecognised asset, memo over the capability limit, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The source account/address does not have sufficient funds to cover
    /// `amount + fee`.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    /// `Sign` was called with a signer whose address doesn't match
    /// `unsigned.from`. The signer is never invoked in this case.
    #[error("signer address {signer} does not match unsigned.from {expected}")]
    AddressMismatch { signer: String, expected: String },

    /// The signer returned a signature that doesn't verify against the
    /// signing payload and the expected public key.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The signer capability timed out or the user rejected the request.
    #[error("signer did not respond in time")]
    SignerTimeout,

    /// The underlying RPC server rejected the transaction as malformed.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    /// The transaction already appears in a conflicting, already-mined
    /// block (broadcast came in too late to matter).
    #[error("transaction already mined in a conflicting block")]
    ConflictingBroadcast,

    /// Fee too low to be accepted under current mempool congestion.
    #[error("fee too low for current congestion: {0}")]
    FeeTooLow(String),

    /// The mempool demands a replace-by-fee bump before accepting this
    /// transaction.
    #[error("replace-by-fee required")]
    ReplaceByFeeRequired,

    /// `QueryStatus` found nothing for this hash after a reasonable window.
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// The driver does not support a capability the request required.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// A caller-provided cancellation handle fired mid-call.
    #[error("operation was cancelled")]
    Cancelled,

    /// The state ledger hit an internal invariant violation (corrupted
    /// entry, unreachable branch). Never caused by caller input.
    #[error("internal ledger error")]
    Internal,

    /// Persistence (snapshot read/write) failed.
    #[error("ledger snapshot error: {0}")]
    Snapshot(String),

    /// Config loading/parsing failed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// The classification a caller should act on.
    pub fn classification(&self) -> Classification {
        use Classification::*;
        match self {
            ChainError::RpcExhausted { .. } => Retryable,
            ChainError::Rpc { classification, .. } => *classification,
            ChainError::InvalidRequest(_) => NonRetryable,
            ChainError::InsufficientFunds { .. } => NonRetryable,
            ChainError::AddressMismatch { .. } => NonRetryable,
            ChainError::InvalidSignature => NonRetryable,
            ChainError::SignerTimeout => UserIntervention,
            ChainError::MalformedTransaction(_) => NonRetryable,
            ChainError::ConflictingBroadcast => NonRetryable,
            ChainError::FeeTooLow(_) => UserIntervention,
            ChainError::ReplaceByFeeRequired => UserIntervention,
            ChainError::NotFound(_) => NonRetryable,
            ChainError::UnsupportedCapability(_) => NonRetryable,
            ChainError::Cancelled => NonRetryable,
            ChainError::Internal => NonRetryable,
            ChainError::Snapshot(_) => Retryable,
            ChainError::Config(_) => NonRetryable,
        }
    }

    /// A retry-after hint, when one is known. Only ever populated for
    /// `Retryable` errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChainError::RpcExhausted { .. } => Some(Duration::from_secs(1)),
            ChainError::Rpc {
                classification: Classification::Retryable,
                ..
            } => Some(Duration::from_millis(500)),
            _ => None,
        }
    }

    pub(crate) fn rpc(method: impl Into<String>, reason: impl fmt::Display, classification: Classification) -> Self {
        ChainError::Rpc {
            method: method.into(),
            reason: reason.to_string(),
            classification,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
