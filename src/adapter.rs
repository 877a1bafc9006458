use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::ChainResult;
use crate::signer::Signer;
use crate::types::{
    Address, Capabilities, FeeEstimate, SignedTransaction, TransactionRequest, TransactionStatus,
    UnsignedTransaction,
};

/// The stable polymorphic surface every chain driver implements identically.
///
/// Modeled the same way the bitcoind async client models `Reader`/`Broadcaster`/
/// `Wallet`/`Signer`: plain async trait methods via return-position
/// `impl Future`, no `async-trait` boxing, no `dyn Adapter` (the registry
/// dispatches through the closed `ChainDriver` enum instead — see
/// `src/registry.rs`).
pub trait Adapter {
    /// Stable chain identifier, e.g. `"bitcoin"` or `"ethereum"`.
    fn chain_id(&self) -> &str;

    /// Pure, cached feature vector.
    fn capabilities(&self) -> &Capabilities;

    /// Validates `request`, gathers on-chain preconditions, computes a fee
    /// at the requested speed and produces a canonical signing payload.
    ///
    /// Determinism: the same request against an identical on-chain view
    /// must yield the same `identifier` and `signing_payload`.
    fn build(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<UnsignedTransaction>> + Send;

    /// Idempotent; may be called repeatedly without side effects.
    fn estimate(
        &self,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<FeeEstimate>> + Send;

    /// Verifies `signer.address() == unsigned.from` *before* invoking the
    /// signer, invokes it over `unsigned.signing_payload`, verifies the
    /// returned signature, and assembles the wire form.
    fn sign<S: Signer + Sync>(
        &self,
        unsigned: UnsignedTransaction,
        signer: &S,
    ) -> impl Future<Output = ChainResult<SignedTransaction>> + Send;

    /// Consults the state ledger keyed by `signed.transaction_hash`: if a
    /// prior successful broadcast is recorded, returns it unchanged
    /// (idempotency); otherwise dispatches through the RPC pool.
    fn broadcast(
        &self,
        signed: &SignedTransaction,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<crate::types::BroadcastReceipt>> + Send;

    /// Single RPC call, interprets chain-specific confirmation depth into
    /// the canonical status enum.
    fn query_status(
        &self,
        hash: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ChainResult<TransactionStatus>> + Send;

    /// Long-lived; returns a channel of status updates. See
    /// `src/subscription.rs` for the reconnect/fallback machinery shared by
    /// both drivers.
    fn subscribe_status(
        &self,
        hash: &str,
        cancel: CancellationToken,
    ) -> tokio::sync::mpsc::Receiver<TransactionStatus>;

    /// Deterministic hierarchical derivation along the chain's standard
    /// path.
    fn derive(
        &self,
        key_source: &dyn crate::signer::KeySource,
        path: &str,
    ) -> impl Future<Output = ChainResult<Address>> + Send;
}
