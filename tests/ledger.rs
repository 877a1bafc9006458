//! Integration coverage for the state ledger's retention and status-update
//! paths — the inline unit tests in `src/ledger.rs` already cover the
//! idempotency primitive and snapshot round-trip; these exercise the public
//! surface that's easiest to drive from outside the crate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use chain_adapter::ledger::{LedgerConfig, LedgerKey, StateLedger};
use chain_adapter::types::{BroadcastReceipt, StatusKind, TransactionStatus};

fn receipt(hash: &str) -> BroadcastReceipt {
    BroadcastReceipt {
        transaction_hash: hash.to_string(),
        chain_id: "bitcoin".to_string(),
        submitted_at: Utc::now(),
        endpoint_id: "rpc-pool".to_string(),
        status_url: None,
        initial_status: TransactionStatus {
            hash: hash.to_string(),
            status: StatusKind::Pending,
            confirmations: 0,
            block_number: None,
            block_hash: None,
            last_update: Utc::now(),
            error: None,
        },
    }
}

#[tokio::test]
async fn update_status_is_visible_through_get() {
    let ledger = StateLedger::new(LedgerConfig::default());
    let key = LedgerKey::new("bitcoin", "feed");

    ledger
        .broadcast_or_submit(key.clone(), vec![1], || async { Ok(receipt("feed")) })
        .await
        .unwrap();

    ledger
        .update_status(&key, StatusKind::Confirmed, 2, Some(800_000), Some("0xblock".into()))
        .await
        .unwrap();

    let record = ledger.get(&key).await.unwrap();
    assert_eq!(record.status, StatusKind::Confirmed);
    assert_eq!(record.confirmations, 2);
    assert_eq!(record.block_number, Some(800_000));
}

#[tokio::test]
async fn update_status_on_an_unknown_key_is_not_found() {
    let ledger = StateLedger::new(LedgerConfig::default());
    let key = LedgerKey::new("bitcoin", "never-broadcast");
    let result = ledger.update_status(&key, StatusKind::Confirmed, 1, None, None).await;
    assert!(result.is_err());
}

/// Invariant: a terminal entry older than `finalized_retention` is swept,
/// while a fresh one in the same ledger survives the same sweep pass.
#[tokio::test]
async fn sweep_evicts_only_stale_terminal_entries() {
    let ledger = Arc::new(StateLedger::new(LedgerConfig {
        finalized_retention: Duration::from_millis(0),
        max_age: Duration::from_secs(7 * 24 * 3600),
    }));

    let stale_key = LedgerKey::new("bitcoin", "stale");
    ledger
        .broadcast_or_submit(stale_key.clone(), vec![1], || async { Ok(receipt("stale")) })
        .await
        .unwrap();
    ledger
        .update_status(&stale_key, StatusKind::Finalized, 6, Some(1), None)
        .await
        .unwrap();

    let pending_key = LedgerKey::new("bitcoin", "still-pending");
    ledger
        .broadcast_or_submit(pending_key.clone(), vec![2], || async { Ok(receipt("still-pending")) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let evicted = ledger.sweep().await;

    assert_eq!(evicted, 1);
    assert!(ledger.get(&stale_key).await.is_none());
    assert!(ledger.get(&pending_key).await.is_some());
}

#[tokio::test]
async fn sweeper_task_runs_until_cancelled() {
    let ledger = Arc::new(StateLedger::new(LedgerConfig {
        finalized_retention: Duration::from_millis(0),
        max_age: Duration::from_secs(7 * 24 * 3600),
    }));
    let key = LedgerKey::new("ethereum", "0xsweepme");
    ledger
        .broadcast_or_submit(key.clone(), vec![3], || async { Ok(receipt("0xsweepme")) })
        .await
        .unwrap();
    ledger
        .update_status(&key, StatusKind::Failed, 0, None, None)
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = ledger.spawn_sweeper(Duration::from_millis(5), cancel.clone());

    tokio::time::sleep(Duration::from_millis(40)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(ledger.get(&key).await.is_none());
}
