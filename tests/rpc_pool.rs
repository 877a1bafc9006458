//! Contract tests for the RPC transport layer: endpoint-list construction
//! and the per-endpoint health/circuit-breaker state `RpcPool::call` drives
//! its round-robin failover off of.
//!
//! A true end-to-end failover test would need a multi-endpoint mock JSON-RPC
//! server; none of this stack's dependencies provide one without either
//! standing up plaintext HTTP (which `RpcPool` refuses to dial by
//! construction) or adding a crate the corpus never reaches for. These tests
//! instead drive `EndpointHealth`/`CircuitBreaker` directly — the exact
//! state `RpcPool::call`'s round-robin loop reads before dispatching to each
//! endpoint — to cover the failover-transparency invariant at the
//! granularity that's actually reachable without a toolchain run.

use std::time::Duration;

use chain_adapter::rpc::circuit::CircuitState;
use chain_adapter::rpc::health::EndpointHealth;
use chain_adapter::rpc::RpcPool;

#[test]
fn accepts_a_pool_of_distinct_tls_endpoints_in_priority_order() {
    let pool = RpcPool::new(
        "bitcoin",
        vec![
            "https://primary.example/rpc".to_string(),
            "https://secondary.example/rpc".to_string(),
            "https://tertiary.example/rpc".to_string(),
        ],
        Duration::from_secs(5),
    )
    .unwrap();

    let endpoints = pool.endpoint_health();
    assert_eq!(endpoints.len(), 3);
    for (i, endpoint) in endpoints.iter().enumerate() {
        assert_eq!(endpoint.priority, i);
        assert!(endpoint.is_healthy());
    }
}

/// Invariant: once every known endpoint has failed enough to open its
/// circuit, none of them is selectable — the pool-level `RpcExhausted`
/// error `RpcPool::call` returns in that state has no healthy endpoint to
/// fall back to, by construction.
#[test]
fn all_endpoints_tripped_leaves_none_selectable() {
    let endpoints: Vec<EndpointHealth> = (0..3)
        .map(|i| EndpointHealth::new(format!("https://endpoint-{i}.example/"), i))
        .collect();

    for endpoint in &endpoints {
        for _ in 0..3 {
            endpoint.record_failure();
        }
        assert_eq!(endpoint.circuit_state(), CircuitState::Open);
    }

    assert!(endpoints.iter().all(|e| !e.allow_request()));
}

/// Invariant: a single failing endpoint among healthy ones doesn't take the
/// others down with it — `RpcPool::call`'s round-robin loop would have
/// skipped straight past the tripped endpoint to one still `allow_request`.
#[test]
fn one_tripped_endpoint_does_not_affect_its_siblings() {
    let primary = EndpointHealth::new("https://flaky.example/".to_string(), 0);
    let backup = EndpointHealth::new("https://steady.example/".to_string(), 1);

    for _ in 0..3 {
        primary.record_failure();
    }
    assert!(!primary.allow_request());
    assert!(backup.allow_request());

    backup.record_success(Duration::from_millis(40));
    assert!(backup.is_healthy());
    assert_eq!(backup.circuit_state(), CircuitState::Closed);
}

/// Invariant: a circuit that opened recovers through exactly one half-open
/// probe, and a successful probe fully resets its failure count — a second
/// unrelated failure afterwards should need the full threshold again, not
/// reopen immediately off leftover state.
#[test]
fn recovered_endpoint_gets_a_fresh_failure_budget() {
    let endpoint = EndpointHealth::new("https://recovering.example/".to_string(), 0);
    for _ in 0..3 {
        endpoint.record_failure();
    }
    assert_eq!(endpoint.circuit_state(), CircuitState::Open);

    // Can't wait out the real 30s cooldown here; confirm the probe-gate
    // behavior directly instead, since `allow_request` before the cooldown
    // elapses must stay closed to every caller.
    assert!(!endpoint.allow_request());

    endpoint.record_success(Duration::from_millis(10));
    assert_eq!(endpoint.circuit_state(), CircuitState::Closed);

    endpoint.record_failure();
    endpoint.record_failure();
    assert_eq!(endpoint.circuit_state(), CircuitState::Closed, "two failures must not reopen a fresh breaker");
}

#[test]
fn rejects_non_tls_and_empty_endpoint_lists() {
    assert!(RpcPool::new("bitcoin", vec![], Duration::from_secs(1)).is_err());
    assert!(RpcPool::new("bitcoin", vec!["http://plain.example/".to_string()], Duration::from_secs(1)).is_err());
    assert!(RpcPool::new(
        "bitcoin",
        vec![
            "https://ok.example/".to_string(),
            "http://not-ok.example/".to_string()
        ],
        Duration::from_secs(1)
    )
    .is_err());
}
