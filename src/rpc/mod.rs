pub mod circuit;
pub mod health;
pub mod limiter;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client as ReqwestClient;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::redact_url;
use crate::error::{ChainError, ChainResult, Classification};
use crate::metrics;
use health::EndpointHealth;
use limiter::RateLimiter;

/// Default per-endpoint retry budget before moving on to the next endpoint
/// in the pool — generalizes the prior client's single-URL `DEFAULT_MAX_RETRIES`.
const DEFAULT_MAX_RETRIES_PER_ENDPOINT: u8 = 2;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 250;
const DEFAULT_RATE_LIMIT_PER_SEC: f64 = 10.0;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct Response<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
    id: u64,
}

/// Pools HTTP JSON-RPC endpoints for a single chain. Presents one
/// `call(method, params)` surface and hides endpoint multiplicity, failover
/// and circuit-breaking from callers.
///
/// The inner per-endpoint attempt loop generalizes the bitcoind async client's
/// `Client::call` (`bitcoind-async-client/src/client.rs`): same JSON-RPC
/// envelope, same error taxonomy by `reqwest::Error` kind, same
/// retry-with-backoff discipline — but retried per-endpoint rather than
/// against a single fixed URL, with round-robin endpoint selection wrapped
/// around it.
#[derive(Clone)]
pub struct RpcPool {
    chain_id: Arc<str>,
    client: ReqwestClient,
    endpoints: Arc<Vec<Arc<EndpointHealth>>>,
    limiters: Arc<Vec<Arc<RateLimiter>>>,
    next: Arc<AtomicUsize>,
    id: Arc<AtomicUsize>,
    max_retries_per_endpoint: u8,
    retry_interval: Duration,
    timeout: Duration,
}

impl RpcPool {
    pub fn new(chain_id: impl Into<Arc<str>>, endpoints: Vec<String>, timeout: Duration) -> ChainResult<Self> {
        if endpoints.is_empty() {
            return Err(ChainError::Config("rpc endpoint list must not be empty".into()));
        }
        for endpoint in &endpoints {
            if !endpoint.starts_with("https://") {
                return Err(ChainError::Config(format!(
                    "refusing non-TLS rpc endpoint: {}",
                    redact_url(endpoint)
                )));
            }
        }
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Config(format!("could not build http client: {e}")))?;

        let endpoints: Vec<Arc<EndpointHealth>> = endpoints
            .into_iter()
            .enumerate()
            .map(|(priority, url)| Arc::new(EndpointHealth::new(url, priority)))
            .collect();
        let limiters = endpoints
            .iter()
            .map(|_| Arc::new(RateLimiter::new(DEFAULT_RATE_LIMIT_PER_SEC)))
            .collect();

        Ok(Self {
            chain_id: chain_id.into(),
            client,
            endpoints: Arc::new(endpoints),
            limiters: Arc::new(limiters),
            next: Arc::new(AtomicUsize::new(0)),
            id: Arc::new(AtomicUsize::new(0)),
            max_retries_per_endpoint: DEFAULT_MAX_RETRIES_PER_ENDPOINT,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            timeout,
        })
    }

    fn next_id(&self) -> u64 {
        self.id.fetch_add(1, Ordering::AcqRel) as u64
    }

    pub fn endpoint_health(&self) -> &[Arc<EndpointHealth>] {
        &self.endpoints
    }

    /// Dispatches `method` against the pool: round-robins across endpoints
    /// whose circuit is closed or half-open, and only returns a `Retryable`
    /// `RpcExhausted` error once every endpoint has been tried and failed
    /// (or none were healthy to begin with). A `NonRetryable` error is a
    /// terminal rejection of the request itself (bad params, a JSON-RPC
    /// `error` body) rather than an endpoint-availability problem, so it is
    /// returned to the caller immediately instead of being tried elsewhere
    /// and folded into `RpcExhausted`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> ChainResult<T> {
        let count = self.endpoints.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_reason = String::from("no endpoints configured");
        let mut attempted = 0usize;

        for offset in 0..count {
            let idx = (start + offset) % count;
            let endpoint = &self.endpoints[idx];
            if !endpoint.allow_request() {
                continue;
            }
            attempted += 1;
            self.limiters[idx].acquire().await;

            match self.call_one::<T>(endpoint, method, params, cancel).await {
                Ok(value) => {
                    if offset > 0 {
                        metrics::record_failover(&self.chain_id);
                    }
                    return Ok(value);
                }
                Err(ChainError::Cancelled) => return Err(ChainError::Cancelled),
                Err(e @ ChainError::Rpc { classification: Classification::NonRetryable, .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }
        }

        if attempted == 0 {
            warn!(chain = %self.chain_id, %method, "no healthy rpc endpoints");
        }
        Err(ChainError::RpcExhausted {
            method: method.to_string(),
            reason: last_reason,
        })
    }

    async fn call_one<T: DeserializeOwned>(
        &self,
        endpoint: &Arc<EndpointHealth>,
        method: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> ChainResult<T> {
        let mut retries = 0u8;
        loop {
            let id = self.next_id();
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            });
            trace!(chain = %self.chain_id, endpoint = %redact_url(&endpoint.url), %method, %retries, "dispatching rpc call");

            let started = Instant::now();
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ChainError::Cancelled);
                }
                resp = self.client.post(&endpoint.url).json(&body).send() => resp,
            };

            let outcome = self.handle_response::<T>(response).await;
            match outcome {
                Ok(RetryOutcome::Done(value)) => {
                    endpoint.record_success(started.elapsed());
                    metrics::record_rpc_duration(
                        &self.chain_id,
                        &redact_url(&endpoint.url),
                        method,
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(value);
                }
                Ok(RetryOutcome::Retry(kind)) => {
                    metrics::record_rpc_error(&self.chain_id, &redact_url(&endpoint.url), kind);
                    retries += 1;
                    if retries >= self.max_retries_per_endpoint {
                        endpoint.record_failure();
                        return Err(ChainError::rpc(
                            method,
                            format!("max retries exceeded on endpoint ({kind})"),
                            Classification::Retryable,
                        ));
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ChainError::Cancelled),
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
                Err(e) => {
                    endpoint.record_failure();
                    metrics::record_rpc_error(&self.chain_id, &redact_url(&endpoint.url), "fatal");
                    return Err(e);
                }
            }
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> ChainResult<RetryOutcome<T>> {
        match response {
            Ok(resp) => match resp.error_for_status() {
                Err(e) if e.is_status() => {
                    let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                    Err(ChainError::rpc(
                        "call",
                        format!("http status {status}"),
                        Classification::NonRetryable,
                    ))
                }
                Err(e) => Err(ChainError::rpc("call", e.to_string(), Classification::Retryable)),
                Ok(resp) => {
                    let text = resp
                        .text()
                        .await
                        .map_err(|e| ChainError::rpc("call", e.to_string(), Classification::Retryable))?;
                    let data: Response<T> = serde_json::from_str(&text)
                        .map_err(|e| ChainError::rpc("call", format!("malformed response: {e}"), Classification::Retryable))?;
                    if let Some(err) = data.error {
                        return Err(ChainError::rpc(
                            "call",
                            format!("server error {}: {}", err.code, err.message),
                            Classification::NonRetryable,
                        ));
                    }
                    match data.result {
                        Some(result) => Ok(RetryOutcome::Done(result)),
                        None => Err(ChainError::rpc(
                            "call",
                            "empty result",
                            Classification::NonRetryable,
                        )),
                    }
                }
            },
            Err(err) => {
                if err.is_body() {
                    Err(ChainError::rpc("call", err.to_string(), Classification::NonRetryable))
                } else if err.is_status() {
                    Err(ChainError::rpc("call", err.to_string(), Classification::NonRetryable))
                } else if err.is_decode() {
                    Ok(RetryOutcome::Retry("decode"))
                } else if err.is_connect() {
                    Ok(RetryOutcome::Retry("connect"))
                } else if err.is_timeout() {
                    Ok(RetryOutcome::Retry("timeout"))
                } else if err.is_request() {
                    Ok(RetryOutcome::Retry("request"))
                } else if err.is_builder() {
                    Err(ChainError::rpc("call", err.to_string(), Classification::NonRetryable))
                } else if err.is_redirect() {
                    Err(ChainError::rpc("call", err.to_string(), Classification::NonRetryable))
                } else {
                    Err(ChainError::rpc("call", "unknown transport error", Classification::Retryable))
                }
            }
        }
    }
}

enum RetryOutcome<T> {
    Done(T),
    Retry(&'static str),
}
