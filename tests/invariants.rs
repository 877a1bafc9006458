//! Property-style tests for the adapter contract's cross-chain invariants.
//!
//! Each test targets one numbered property from the adapter contract and
//! picks whichever driver(s) can exercise it without a live RPC endpoint.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Address as BtcAddress, CompressedPublicKey, Network};
use chrono::Utc;
use secp256k1::{PublicKey, SecretKey, SECP256K1};

use chain_adapter::drivers::evm::EvmDriver;
use chain_adapter::drivers::utxo::UtxoDriver;
use chain_adapter::ledger::{LedgerConfig, StateLedger};
use chain_adapter::rpc::RpcPool;
use chain_adapter::signer::{KeySource, Signer};
use chain_adapter::types::{
    Address, FeeEstimate, ReconstructionData, TransactionStatus, UnsignedTransaction, StatusKind,
};
use chain_adapter::{Adapter, ChainError, ChainResult};

fn utxo_driver() -> UtxoDriver {
    let pool = RpcPool::new(
        "bitcoin",
        vec!["https://rpc.invalid.example/".to_string()],
        Duration::from_secs(5),
    )
    .unwrap();
    let ledger = Arc::new(StateLedger::new(LedgerConfig::default()));
    UtxoDriver::new("bitcoin", Network::Regtest, pool, ledger)
}

fn evm_driver() -> EvmDriver {
    let pool = RpcPool::new(
        "ethereum",
        vec!["https://rpc.invalid.example/".to_string()],
        Duration::from_secs(5),
    )
    .unwrap();
    let ledger = Arc::new(StateLedger::new(LedgerConfig::default()));
    EvmDriver::new("ethereum", 1u64, pool, ledger, None)
}

/// Records whether it was ever invoked, so a test can assert the driver
/// rejected a mismatched address before reaching the signer at all.
struct RefusingSigner {
    address: String,
    public_key: Vec<u8>,
    invoked: AtomicBool,
}

impl Signer for RefusingSigner {
    fn sign(
        &self,
        _payload: &[u8],
        _expected_address: &str,
    ) -> impl Future<Output = ChainResult<Vec<u8>>> + Send {
        self.invoked.store(true, Ordering::SeqCst);
        async { Ok(Vec::new()) }
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

struct FixedKeySource(Vec<u8>);

impl KeySource for FixedKeySource {
    fn public_key(&self, _path: &str) -> ChainResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

fn dummy_utxo_unsigned(from: &str) -> UnsignedTransaction {
    UnsignedTransaction {
        identifier: "dummy".into(),
        chain_id: "bitcoin".into(),
        from: from.to_string(),
        to: "bc1qdestination".into(),
        amount: 10_000,
        fee: 300,
        sequence: None,
        signing_payload: vec![0u8; 32],
        human_readable: String::new(),
        reconstruction: ReconstructionData::Utxo {
            selected_inputs: vec![],
            psbt_base64: String::new(),
        },
        created_at: Utc::now(),
    }
}

fn dummy_evm_unsigned(from: &str) -> UnsignedTransaction {
    UnsignedTransaction {
        identifier: "dummy".into(),
        chain_id: "ethereum".into(),
        from: from.to_string(),
        to: "0x0000000000000000000000000000000000000001".into(),
        amount: 10_000,
        fee: 21_000_000_000_000,
        sequence: Some(0),
        signing_payload: vec![0u8; 32],
        human_readable: String::new(),
        reconstruction: ReconstructionData::Eip1559 {
            max_fee_per_gas: 1_000_000_000,
            max_priority_fee_per_gas: 1_000_000,
            gas_limit: 21_000,
            chain_id: 1,
            input: vec![],
        },
        created_at: Utc::now(),
    }
}

/// Invariant: `Sign` rejects a signer whose address doesn't match
/// `unsigned.from`, and never invokes the signer in that case.
#[tokio::test]
async fn utxo_sign_rejects_mismatched_signer_without_invoking_it() {
    let driver = utxo_driver();
    let unsigned = dummy_utxo_unsigned("bc1qexpectedsourceaddress");
    let signer = RefusingSigner {
        address: "bc1qwrongaddress".into(),
        public_key: vec![0u8; 33],
        invoked: AtomicBool::new(false),
    };

    let result = driver.sign(unsigned, &signer).await;
    assert!(matches!(result, Err(ChainError::AddressMismatch { .. })));
    assert!(!signer.invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn evm_sign_rejects_mismatched_signer_without_invoking_it() {
    let driver = evm_driver();
    let unsigned = dummy_evm_unsigned("0x000000000000000000000000000000000000dEaD");
    let signer = RefusingSigner {
        address: "0x0000000000000000000000000000000000beef".into(),
        public_key: vec![0u8; 65],
        invoked: AtomicBool::new(false),
    };

    let result = driver.sign(unsigned, &signer).await;
    assert!(matches!(result, Err(ChainError::AddressMismatch { .. })));
    assert!(!signer.invoked.load(Ordering::SeqCst));
}

/// Invariant: `Derive` is deterministic — the same key source and path
/// always produce the same address.
#[tokio::test]
async fn utxo_derive_is_deterministic() {
    let driver = utxo_driver();
    let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(SECP256K1, &secret);
    let key_source = FixedKeySource(pubkey.serialize().to_vec());

    let a: Address = driver.derive(&key_source, "m/84'/1'/0'/0/0").await.unwrap();
    let b: Address = driver.derive(&key_source, "m/84'/1'/0'/0/0").await.unwrap();
    assert_eq!(a.encoded, b.encoded);
    assert_eq!(a.public_key, b.public_key);
}

#[tokio::test]
async fn evm_derive_is_deterministic() {
    let driver = evm_driver();
    let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(SECP256K1, &secret);
    let key_source = FixedKeySource(pubkey.serialize_uncompressed().to_vec());

    let a: Address = driver.derive(&key_source, "m/44'/60'/0'/0/0").await.unwrap();
    let b: Address = driver.derive(&key_source, "m/44'/60'/0'/0/0").await.unwrap();
    assert_eq!(a.encoded, b.encoded);
    assert_eq!(a.public_key, b.public_key);
}

/// Invariant: `UnsignedTransaction::compute_identifier` is a pure function
/// of its inputs — same fields in, same identifier out, and any single
/// field change perturbs it.
#[test]
fn identifier_is_a_deterministic_function_of_its_inputs() {
    let a = UnsignedTransaction::compute_identifier("bitcoin", "from", "to", 1_000, 100, None, &[1, 2, 3]);
    let b = UnsignedTransaction::compute_identifier("bitcoin", "from", "to", 1_000, 100, None, &[1, 2, 3]);
    assert_eq!(a, b);

    let different_fee =
        UnsignedTransaction::compute_identifier("bitcoin", "from", "to", 1_000, 101, None, &[1, 2, 3]);
    assert_ne!(a, different_fee);

    let different_payload =
        UnsignedTransaction::compute_identifier("bitcoin", "from", "to", 1_000, 100, None, &[1, 2, 4]);
    assert_ne!(a, different_payload);
}

/// Invariant: a `FeeEstimate` must carry `minimum <= recommended <= maximum`
/// and a confidence in `0..=100`, both drivers' fee estimators rely on this.
#[test]
fn fee_estimate_validate_enforces_ordered_bounds() {
    let ordered = FeeEstimate {
        minimum: 10,
        recommended: 20,
        maximum: 30,
        confidence: 70,
        estimated_blocks: 3,
        reason: "steady mempool".into(),
        timestamp: Utc::now(),
        base_fee: None,
    };
    assert!(ordered.validate().is_ok());

    let out_of_order = FeeEstimate {
        minimum: 30,
        ..ordered.clone()
    };
    assert!(out_of_order.validate().is_err());

    let bad_confidence = FeeEstimate {
        confidence: 101,
        ..ordered
    };
    assert!(bad_confidence.validate().is_err());
}

/// Invariant: `Finalized`/`Failed` are the only terminal states — a
/// subscription consumer uses this to know when to stop listening.
#[test]
fn only_finalized_and_failed_are_terminal() {
    let base = TransactionStatus {
        hash: "h".into(),
        status: StatusKind::Pending,
        confirmations: 0,
        block_number: None,
        block_hash: None,
        last_update: Utc::now(),
        error: None,
    };
    assert!(!base.is_terminal());

    let confirmed = TransactionStatus {
        status: StatusKind::Confirmed,
        ..base.clone()
    };
    assert!(!confirmed.is_terminal());

    let finalized = TransactionStatus {
        status: StatusKind::Finalized,
        ..base.clone()
    };
    assert!(finalized.is_terminal());

    let failed = TransactionStatus {
        status: StatusKind::Failed,
        ..base
    };
    assert!(failed.is_terminal());
}

/// Invariant: the capability vector a driver advertises must be consistent
/// with how it's actually configured — callers build their retry/poll
/// strategy off this vector alone.
#[test]
fn capabilities_reflect_how_each_driver_is_configured() {
    let utxo = utxo_driver();
    let caps = utxo.capabilities();
    assert!(!caps.subscription_transport, "bitcoind driver has no push transport");
    assert!(caps.replace_by_fee);
    assert_eq!(caps.confirmations_for_finality, 6);

    let evm_no_ws = evm_driver();
    assert!(!evm_no_ws.capabilities().subscription_transport);

    let pool = RpcPool::new(
        "ethereum",
        vec!["https://rpc.invalid.example/".to_string()],
        Duration::from_secs(5),
    )
    .unwrap();
    let ledger = Arc::new(StateLedger::new(LedgerConfig::default()));
    let evm_with_ws = EvmDriver::new(
        "ethereum",
        1u64,
        pool,
        ledger,
        Some("wss://ws.invalid.example/".to_string()),
    );
    assert!(evm_with_ws.capabilities().subscription_transport);
    assert_eq!(evm_with_ws.capabilities().confirmations_for_finality, 12);
}

/// `RpcPool` never accepts a non-TLS endpoint, regardless of which chain
/// it's constructed for — the config layer relies on this as its last line
/// of defense against a plaintext endpoint slipping through.
#[test]
fn rpc_pool_refuses_every_non_tls_scheme() {
    for endpoint in ["http://example.com", "ws://example.com", "ftp://example.com", ""] {
        let result = RpcPool::new("bitcoin", vec![endpoint.to_string()], Duration::from_secs(1));
        assert!(result.is_err(), "expected {endpoint:?} to be rejected");
    }
}

/// Use `CompressedPublicKey`/`Address` to confirm the derive tests above are
/// grounded in a real, parseable secp256k1 key rather than an opaque byte
/// string the rest of the stack would never actually produce.
#[test]
fn utxo_derive_key_material_round_trips_through_bitcoin_address_types() {
    let secret = SecretKey::from_slice(&[0x33; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(SECP256K1, &secret);
    let compressed = CompressedPublicKey::from_slice(&pubkey.serialize()).unwrap();
    let address = BtcAddress::p2wpkh(&compressed, Network::Signet);
    assert!(address.to_string().starts_with("tb1"));
}
