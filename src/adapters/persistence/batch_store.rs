//! Batch Store - JSONL Batch Log with Atomic Latest Snapshot
//!
//! Every stored batch is appended to `batches/YYYY-MM-DD.jsonl`, one
//! self-contained JSON object per line. The most recent batch is also
//! written to `latest.json` via tmp file + rename, so readers never
//! observe a partial file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::ScanResult;
use crate::ports::{Batch, BatchRepository};

/// File-backed `BatchRepository`.
pub struct JsonlBatchStore {
    batches_dir: PathBuf,
    latest_path: PathBuf,
    tmp_path: PathBuf,
    /// Serializes append + latest swap.
    write_lock: Mutex<()>,
}

impl JsonlBatchStore {
    /// Open (and create if needed) a store rooted at `data_dir`.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let batches_dir = data_dir.join("batches");

        fs::create_dir_all(&batches_dir)
            .await
            .with_context(|| format!("Failed to create {}", batches_dir.display()))?;

        Ok(Self {
            batches_dir,
            latest_path: data_dir.join("latest.json"),
            tmp_path: data_dir.join("latest.json.tmp"),
            write_lock: Mutex::new(()),
        })
    }

    /// Every batch logged on `date` (`YYYY-MM-DD`), oldest first.
    pub async fn load_day(&self, date: &str) -> Result<Vec<Batch>> {
        let path = self.batches_dir.join(format!("{date}.jsonl"));
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut batches = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Batch>(line) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping malformed batch record"),
            }
        }
        Ok(batches)
    }

    async fn append(&self, batch: &Batch) -> Result<()> {
        let date = batch.stored_at.format("%Y-%m-%d");
        let path = self.batches_dir.join(format!("{date}.jsonl"));

        let mut line = serde_json::to_string(batch).context("Failed to serialize batch")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append batch")?;
        file.flush().await.context("Failed to flush batch log")?;
        Ok(())
    }

    async fn write_latest(&self, batch: &Batch) -> Result<()> {
        let json = serde_json::to_vec_pretty(batch).context("Failed to serialize latest batch")?;
        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp latest file")?;
        fs::rename(&self.tmp_path, &self.latest_path)
            .await
            .context("Failed to rename latest file")?;
        Ok(())
    }
}

#[async_trait]
impl BatchRepository for JsonlBatchStore {
    #[instrument(skip(self, result), fields(snapshots = result.snapshots.len()))]
    async fn store_batch(&self, result: &ScanResult) -> Result<Batch> {
        let batch = Batch::new(result.clone());
        let _guard = self.write_lock.lock().await;

        self.append(&batch).await?;
        self.write_latest(&batch).await?;

        info!(
            batch_id = %batch.id,
            total_usd_value = batch.result.total_usd_value,
            failures = batch.result.failures.len(),
            "Batch stored"
        );
        Ok(batch)
    }

    async fn latest_batch(&self) -> Result<Option<Batch>> {
        if !fs::try_exists(&self.latest_path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read(&self.latest_path)
            .await
            .context("Failed to read latest batch")?;
        let batch = serde_json::from_slice(&content).context("Failed to parse latest batch")?;
        Ok(Some(batch))
    }

    async fn is_healthy(&self) -> bool {
        let marker = self.batches_dir.join(".health_check");
        let result = fs::write(&marker, b"ok").await;
        let _ = fs::remove_file(&marker).await;
        result.is_ok()
    }
}
