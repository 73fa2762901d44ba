//! Flat record files: line-delimited JSON logs and JSON arrays.
//!
//! Every output log has exactly one writer task. Producers hand it complete
//! lines over a channel so concurrent samples never interleave partial records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{error::StoreError, scene::SceneCategory};

pub fn meta_path(dir: &Path, scene: SceneCategory) -> PathBuf {
    dir.join(format!("{scene}_meta.jsonl"))
}

pub fn failed_path(dir: &Path, scene: SceneCategory) -> PathBuf {
    dir.join(format!("{scene}_failed.jsonl"))
}

pub fn filter_path(dir: &Path, scene: SceneCategory) -> PathBuf {
    dir.join(format!("{scene}_filter.jsonl"))
}

/// A sample that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSample {
    pub scene_type: String,
    pub image_path: String,
    pub error: String,
    pub timestamp: String,
}

impl FailedSample {
    pub fn new(scene_type: impl Into<String>, image_path: impl Into<String>, error: impl ToString) -> Self {
        Self {
            scene_type: scene_type.into(),
            image_path: image_path.into(),
            error: error.to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Reads a line-delimited JSON file. A missing file is an empty log; lines that
/// do not decode are skipped with a warning.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(decode_lines(path, &raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

/// [`read_jsonl`] for callers on the runtime.
pub async fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(decode_lines(path, &raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn decode_lines<T: DeserializeOwned>(path: &Path, raw: &str) -> Vec<T> {
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!("skipping malformed record at {}:{}: {err}", path.display(), line_no + 1),
        }
    }
    records
}

/// Values of a string field across a log, used to build the "already done" set.
pub async fn existing_keys(path: &Path, field: &str) -> Result<HashSet<String>, StoreError> {
    Ok(load_jsonl::<serde_json::Value>(path)
        .await?
        .into_iter()
        .filter_map(|record| record.get(field)?.as_str().map(str::to_string))
        .collect())
}

pub fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| StoreError::json(path, e))
}

pub async fn load_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let raw = fs::read_to_string(path).await.map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| StoreError::json(path, e))
}

pub fn write_json_array<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(records).map_err(|e| StoreError::json(path, e))?;
    std::fs::write(path, body).map_err(|e| StoreError::io(path, e))
}

/// Single writer for one append-only log.
///
/// The file is opened on the first record, so a sink that never receives
/// anything leaves no empty file behind.
pub struct JsonlSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
    handle: JoinHandle<Result<usize, StoreError>>,
}

impl JsonlSink {
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_lines(path.clone(), rx));
        Self { path, tx, handle }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(|e| StoreError::json(&self.path, e))?;
        self.tx
            .send(line)
            .map_err(|_| StoreError::WriterClosed(self.path.clone()))
    }

    /// Drains pending lines, fsyncs and returns how many records were written.
    pub async fn close(self) -> Result<usize, StoreError> {
        let Self { path, tx, handle } = self;
        drop(tx);
        match handle.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::WriterClosed(path)),
        }
    }
}

async fn write_lines(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) -> Result<usize, StoreError> {
    let mut writer: Option<BufWriter<fs::File>> = None;
    let mut written = 0usize;

    while let Some(line) = rx.recv().await {
        if writer.is_none() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            writer = Some(BufWriter::new(file));
        }

        if let Some(out) = writer.as_mut() {
            out.write_all(line.as_bytes())
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            out.write_all(b"\n").await.map_err(|e| StoreError::io(&path, e))?;
            out.flush().await.map_err(|e| StoreError::io(&path, e))?;
            written += 1;
        }
    }

    if let Some(mut out) = writer {
        out.flush().await.map_err(|e| StoreError::io(&path, e))?;
        out.get_ref()
            .sync_all()
            .await
            .map_err(|e| StoreError::io(&path, e))?;
    }

    debug!("closed {} after {written} records", path.display());
    Ok(written)
}
