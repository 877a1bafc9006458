//! Shared subscription harness: WebSocket push with exponential-backoff
//! reconnect, degrading to HTTP polling when the socket won't stay up.
//! Drivers supply the wire-level specifics through [`WsTransport`]; this
//! module owns the reconnect/backoff/cancellation/fallback policy so
//! neither driver has to reimplement it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChainResult;
use crate::metrics;
use crate::types::TransactionStatus;

/// Reconnects after this many consecutive WebSocket failures, the
/// subscription gives up on push delivery for good and polls instead.
const MAX_RECONNECT_ATTEMPTS: u32 = 6;
const BACKOFF_SCHEDULE_SECS: [u64; 6] = [1, 2, 4, 8, 16, 32];
const CHANNEL_CAPACITY: usize = 16;

/// Per-chain wire format for status subscriptions. UTXO and EVM drivers each
/// implement this against their own node's subscription protocol.
pub trait WsTransport: Send + Sync + 'static {
    fn endpoint(&self) -> &str;
    fn subscribe_message(&self, hash: &str) -> String;
    /// Reacts to one inbound text frame; resolves to `Some` only once it has
    /// recognized a status update for `hash` (ignores unrelated traffic,
    /// e.g. other subscriptions sharing the socket). `async` because chains
    /// whose push notification is a block header rather than a transaction
    /// event (the EVM driver's `newHeads`) need a follow-up RPC call to turn
    /// "a new block arrived" into a concrete confirmation count.
    fn parse_message(
        &self,
        hash: &str,
        text: &str,
    ) -> impl Future<Output = Option<TransactionStatus>> + Send;
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[idx])
}

/// Drives a single subscription to completion: connects `transport`'s
/// WebSocket endpoint, emits parsed status updates until a terminal state is
/// seen (then closes the channel), reconnecting with backoff in between. If
/// the socket can't be kept up after `MAX_RECONNECT_ATTEMPTS`, falls back to
/// calling `poll` on `poll_interval`, which is expected to be the driver's
/// own `query_status`.
pub fn spawn<T, P, Fut>(
    chain_id: Arc<str>,
    transport: Arc<T>,
    hash: String,
    poll: P,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<TransactionStatus>
where
    T: WsTransport,
    P: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChainResult<TransactionStatus>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        run(chain_id, transport, hash, poll, poll_interval, cancel, tx).await;
    });
    rx
}

/// For drivers with no push transport (`Capabilities::subscription_transport
/// == false`, e.g. the UTXO driver against plain bitcoind RPC): polls
/// `poll` on `poll_interval` until a terminal status, with no WebSocket
/// attempt at all.
pub fn spawn_polling_only<P, Fut>(
    hash: String,
    poll: P,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<TransactionStatus>
where
    P: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChainResult<TransactionStatus>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        poll_until_terminal(&hash, &poll, poll_interval, &cancel, &tx).await;
    });
    rx
}

async fn run<T, P, Fut>(
    chain_id: Arc<str>,
    transport: Arc<T>,
    hash: String,
    poll: P,
    poll_interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<TransactionStatus>,
) where
    T: WsTransport,
    P: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChainResult<TransactionStatus>> + Send + 'static,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match run_websocket(&transport, &hash, &tx, &cancel).await {
            WsOutcome::Closed => return,
            WsOutcome::Cancelled => return,
            WsOutcome::Failed => {
                attempt += 1;
                metrics::record_subscription_reconnect(&chain_id);
                if attempt >= MAX_RECONNECT_ATTEMPTS {
                    warn!(
                        chain = %chain_id,
                        hash = %hash,
                        "subscription websocket exhausted reconnect attempts, falling back to polling"
                    );
                    poll_until_terminal(&hash, &poll, poll_interval, &cancel, &tx).await;
                    return;
                }
                let backoff = backoff_for_attempt(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

enum WsOutcome {
    /// Terminal status delivered; subscription is done.
    Closed,
    Cancelled,
    /// Socket dropped or errored before a terminal status arrived.
    Failed,
}

async fn run_websocket<T: WsTransport>(
    transport: &Arc<T>,
    hash: &str,
    tx: &mpsc::Sender<TransactionStatus>,
    cancel: &CancellationToken,
) -> WsOutcome {
    let connect = tokio_tungstenite::connect_async(transport.endpoint());
    let (stream, _) = tokio::select! {
        _ = cancel.cancelled() => return WsOutcome::Cancelled,
        result = connect => match result {
            Ok(pair) => pair,
            Err(e) => {
                debug!(endpoint = %transport.endpoint(), error = %e, "subscription connect failed");
                return WsOutcome::Failed;
            }
        },
    };

    let (mut write, mut read) = stream.split();
    if write
        .send(Message::Text(transport.subscribe_message(hash).into()))
        .await
        .is_err()
    {
        return WsOutcome::Failed;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return WsOutcome::Cancelled,
            next = read.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(status) = transport.parse_message(hash, &text).await {
                            let terminal = status.is_terminal();
                            if tx.send(status).await.is_err() {
                                return WsOutcome::Closed;
                            }
                            if terminal {
                                return WsOutcome::Closed;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return WsOutcome::Failed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "subscription websocket read error");
                        return WsOutcome::Failed;
                    }
                }
            }
        }
    }
}

async fn poll_until_terminal<P, Fut>(
    hash: &str,
    poll: &P,
    interval: Duration,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<TransactionStatus>,
) where
    P: Fn(String) -> Fut,
    Fut: Future<Output = ChainResult<TransactionStatus>>,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = poll(hash.to_string()) => {
                match result {
                    Ok(status) => {
                        let terminal = status.is_terminal();
                        if tx.send(status).await.is_err() || terminal {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(%hash, error = %e, "status poll failed, will retry");
                    }
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
