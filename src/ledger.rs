//! Concurrent state ledger: `(chain_id, tx_hash) -> BroadcastRecord`, with
//! durable JSON snapshotting and a retention sweeper.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ChainError, ChainResult};
use crate::types::{BroadcastReceipt, StatusKind};

/// Composite ledger key. Keeping chain id and hash separate (rather than a
/// pre-joined string) avoids accidental collisions if a hash ever contained
/// a literal `:`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub chain_id: String,
    pub tx_hash: String,
}

impl LedgerKey {
    pub fn new(chain_id: impl Into<String>, tx_hash: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            tx_hash: tx_hash.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.tx_hash)
    }
}

impl FromStr for LedgerKey {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(':')
            .map(|(chain_id, tx_hash)| LedgerKey::new(chain_id, tx_hash))
            .ok_or_else(|| ChainError::Snapshot(format!("malformed ledger key: {s}")))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Record kept per broadcast transaction. Shape matches the persisted JSON
/// snapshot schema in the adapter contract field-for-field (the `chain_id`/`tx_hash`
/// half of the key lives in the outer map key, not in this struct).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastRecord {
    #[serde(with = "base64_bytes")]
    pub signed_bytes: Vec<u8>,
    pub retry_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_retry: DateTime<Utc>,
    pub status: StatusKind,
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub confirmations: u32,
}

#[derive(Default)]
struct LedgerEntry {
    record: Option<BroadcastRecord>,
    receipt: Option<BroadcastReceipt>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: String,
    records: BTreeMap<String, BroadcastRecord>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Entries whose status is finalized/failed longer than this are swept.
    pub finalized_retention: Duration,
    /// Entries whose `first_seen` is older than this are swept regardless
    /// of status.
    pub max_age: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            finalized_retention: Duration::from_secs(24 * 3600),
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Concurrent map from `(chain_id, tx_hash)` to `BroadcastRecord`. Reads are
/// lock-free (dashmap shard reads); writes for a given key go through that
/// key's own `tokio::sync::Mutex`, so unrelated transactions never contend
/// — the "map of per-key mutexes" pattern, rather than one lock for the
/// whole ledger.
pub struct StateLedger {
    entries: DashMap<LedgerKey, Arc<Mutex<LedgerEntry>>>,
    config: LedgerConfig,
}

impl StateLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Loads a prior snapshot from `path`, if it exists, otherwise starts
    /// empty.
    pub async fn load(path: &Path, config: LedgerConfig) -> ChainResult<Self> {
        let ledger = Self::new(config);
        if !path.exists() {
            return Ok(ledger);
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChainError::Snapshot(format!("reading {}: {e}", path.display())))?;
        let snapshot: SnapshotFile = serde_json::from_str(&contents)
            .map_err(|e| ChainError::Snapshot(format!("parsing {}: {e}", path.display())))?;
        for (key, record) in snapshot.records {
            let key: LedgerKey = key.parse()?;
            ledger.entries.insert(
                key,
                Arc::new(Mutex::new(LedgerEntry {
                    record: Some(record),
                    receipt: None,
                })),
            );
        }
        Ok(ledger)
    }

    /// Atomic snapshot write: write to `<path>.tmp`, fsync, rename — matches
    /// the adapter contract/§6.
    pub async fn snapshot(&self, path: &Path) -> ChainResult<()> {
        let mut records = BTreeMap::new();
        for entry in self.entries.iter() {
            let guard = entry.value().lock().await;
            if let Some(record) = guard.record.clone() {
                records.insert(entry.key().to_string(), record);
            }
        }
        let file = SnapshotFile {
            version: "1.0".to_string(),
            records,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| ChainError::Snapshot(format!("serializing snapshot: {e}")))?;

        let tmp_path: PathBuf = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };
        let mut handle = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ChainError::Snapshot(format!("creating {}: {e}", tmp_path.display())))?;
        use tokio::io::AsyncWriteExt;
        handle
            .write_all(&json)
            .await
            .map_err(|e| ChainError::Snapshot(format!("writing {}: {e}", tmp_path.display())))?;
        handle
            .sync_all()
            .await
            .map_err(|e| ChainError::Snapshot(format!("fsync {}: {e}", tmp_path.display())))?;
        drop(handle);
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| ChainError::Snapshot(format!("renaming into {}: {e}", path.display())))?;
        Ok(())
    }

    /// Spawns a background task that snapshots on `config.snapshot_interval`
    /// until `cancel` fires.
    pub fn spawn_snapshotter(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = ledger.snapshot(&path).await {
                            warn!(error = %e, "ledger snapshot failed");
                        }
                    }
                }
            }
        })
    }

    /// The idempotency primitive: serializes concurrent `Broadcast` calls
    /// for the same key. The first caller to observe no cached receipt runs
    /// `submit`; everyone else — including every later retry of the same
    /// key — observes the cached receipt and returns it unchanged. Every
    /// call, cached or not, bumps `retry_count`/`last_retry`, matching the
    /// `retry_count == N` half of the broadcast-idempotency invariant.
    pub async fn broadcast_or_submit<F, Fut>(
        &self,
        key: LedgerKey,
        signed_bytes: Vec<u8>,
        submit: F,
    ) -> ChainResult<BroadcastReceipt>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChainResult<BroadcastReceipt>>,
    {
        let mutex = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(LedgerEntry::default())))
            .clone();
        let mut guard = mutex.lock().await;

        let now = Utc::now();
        match guard.record.as_mut() {
            Some(record) => {
                record.retry_count += 1;
                record.last_retry = now;
            }
            None => {
                guard.record = Some(BroadcastRecord {
                    signed_bytes,
                    retry_count: 1,
                    first_seen: now,
                    last_retry: now,
                    status: StatusKind::Pending,
                    block_number: None,
                    block_hash: None,
                    confirmations: 0,
                });
            }
        }

        if let Some(receipt) = guard.receipt.clone() {
            return Ok(receipt);
        }

        let receipt = submit().await?;
        guard.receipt = Some(receipt.clone());
        Ok(receipt)
    }

    /// Updates the confirmation state for a previously-broadcast key, e.g.
    /// from a `QueryStatus`/`SubscribeStatus` observation.
    pub async fn update_status(
        &self,
        key: &LedgerKey,
        status: StatusKind,
        confirmations: u32,
        block_number: Option<u64>,
        block_hash: Option<String>,
    ) -> ChainResult<()> {
        let Some(mutex) = self.entries.get(key).map(|e| e.clone()) else {
            return Err(ChainError::NotFound(key.to_string()));
        };
        let mut guard = mutex.lock().await;
        let Some(record) = guard.record.as_mut() else {
            return Err(ChainError::Internal);
        };
        record.status = status;
        record.confirmations = confirmations;
        record.block_number = block_number;
        record.block_hash = block_hash;
        Ok(())
    }

    pub async fn get(&self, key: &LedgerKey) -> Option<BroadcastRecord> {
        let mutex = self.entries.get(key)?.clone();
        mutex.lock().await.record.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts entries that are terminal and stale, or simply old, per
    /// the adapter contract's retention policy.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut to_remove = Vec::new();
        for entry in self.entries.iter() {
            let guard = entry.value().lock().await;
            if let Some(record) = &guard.record {
                let age = now.signed_duration_since(record.first_seen);
                let since_update = now.signed_duration_since(record.last_retry);
                let is_terminal = matches!(record.status, StatusKind::Finalized | StatusKind::Failed);
                let stale_terminal = is_terminal
                    && since_update
                        > chrono::Duration::from_std(self.config.finalized_retention).unwrap_or_default();
                let too_old = age > chrono::Duration::from_std(self.config.max_age).unwrap_or_default();
                if stale_terminal || too_old {
                    to_remove.push(entry.key().clone());
                }
            }
        }
        let count = to_remove.len();
        for key in to_remove {
            self.entries.remove(&key);
        }
        if count > 0 {
            info!(evicted = count, "state ledger sweep evicted stale entries");
        }
        count
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        ledger.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fake_receipt(hash: &str) -> BroadcastReceipt {
        BroadcastReceipt {
            transaction_hash: hash.to_string(),
            chain_id: "bitcoin".to_string(),
            submitted_at: Utc::now(),
            endpoint_id: "https://example.com".to_string(),
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
    async fn broadcast_retry_storm_submits_once() {
        let ledger = Arc::new(StateLedger::new(LedgerConfig::default()));
        let key = LedgerKey::new("bitcoin", "abc123");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let key = key.clone();
            let calls = calls.clone();
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .broadcast_or_submit(key, vec![1, 2, 3], || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(fake_receipt("abc123"))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let record = ledger.get(&key).await.unwrap();
        assert_eq!(record.retry_count, 10);
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let dir = std::env::temp_dir().join(format!("chainadapter-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("ledger.json");

        let ledger = StateLedger::new(LedgerConfig::default());
        let key = LedgerKey::new("ethereum", "0xdead");
        ledger
            .broadcast_or_submit(key.clone(), vec![9, 9, 9], || async { Ok(fake_receipt("0xdead")) })
            .await
            .unwrap();
        ledger.snapshot(&path).await.unwrap();

        let reloaded = StateLedger::load(&path, LedgerConfig::default()).await.unwrap();
        let record = reloaded.get(&key).await.unwrap();
        assert_eq!(record.signed_bytes, vec![9, 9, 9]);
        assert_eq!(record.retry_count, 1);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
