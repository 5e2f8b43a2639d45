//! The data-channel receive loop (C9): decodes inbound `ChunkMessage`s,
//! writes each chunk to a staged file at its reported offset, and — once
//! every byte has arrived — verifies the whole-file hash before
//! committing the staged file to its final path.
//!
//! Writes are offset-aware even though the underlying [`DataChannel`] is
//! contractually ordered and reliable (§9): a slower, safer receiver that
//! tolerates a future relaxation of that guarantee costs nothing here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use fileferry_core::error::{Error, Result};
use fileferry_core::protocol::ChunkMessage;
use fileferry_core::transfer_store::TransferStore;
use fileferry_core::transport::DataChannel;

const HASH_READ_BUF: usize = 64 * 1024;

/// One file's in-flight reassembly state.
struct FileReception {
    staged_path: PathBuf,
    final_path: PathBuf,
    file: File,
    total_size: u64,
    expected_hash: String,
    received_bytes: u64,
}

impl FileReception {
    async fn open(
        output_root: &Path,
        staging_suffix: &str,
        relative_path: &str,
        total_size: u64,
        expected_hash: String,
    ) -> Result<Self> {
        let final_path = final_path_for(output_root, relative_path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged_path = staged_path_for(&final_path, staging_suffix);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staged_path)
            .await?;

        Ok(Self {
            staged_path,
            final_path,
            file,
            total_size,
            expected_hash,
            received_bytes: 0,
        })
    }

    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.received_bytes = self.received_bytes.max(offset + data.len() as u64);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.received_bytes >= self.total_size
    }

    /// Flushes, verifies the content hash (skipping verification if the
    /// sender supplied an empty `expected_hash`), and either commits the
    /// staged file to its final path or deletes it and reports failure.
    async fn finish(mut self) -> Result<()> {
        self.file.flush().await?;
        drop(self.file);

        if !self.expected_hash.is_empty() {
            let actual = hash_staged_file(&self.staged_path).await?;
            if actual != self.expected_hash {
                let _ = fs::remove_file(&self.staged_path).await;
                return Err(Error::IntegrityFailed(format!(
                    "checksum mismatch for {:?}: expected {}, got {actual}",
                    self.final_path, self.expected_hash
                )));
            }
        }

        fs::rename(&self.staged_path, &self.final_path).await?;
        Ok(())
    }
}

/// Joins `relative_path`'s (forward-slash-separated, as sent on the wire)
/// segments onto `output_root`, dropping empty/`.`/`..` segments so a
/// malicious or buggy sender can't escape `output_root` via a traversal
/// sequence. §6 requires directories be "materialized as needed": a
/// relative path of `vacation/spain.jpg` creates `output_root/vacation/`
/// if it doesn't already exist.
fn final_path_for(output_root: &Path, relative_path: &str) -> PathBuf {
    let mut path = output_root.to_path_buf();
    for segment in relative_path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        path.push(segment);
    }
    path
}

fn staged_path_for(final_path: &Path, staging_suffix: &str) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(staging_suffix);
    final_path.with_file_name(name)
}

async fn hash_staged_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Drives one session's data channel to completion: decodes each
/// `ChunkMessage`, reassembles it into `output_root`, and reports progress
/// through `store`. Returns once the channel closes cleanly (`recv`
/// returns `None`) or a transport error occurs.
pub async fn receive_session(
    mut channel: Box<dyn DataChannel>,
    store: TransferStore,
    output_root: PathBuf,
    staging_suffix: String,
) -> Result<()> {
    let mut receptions: HashMap<String, FileReception> = HashMap::new();

    loop {
        let raw = match channel.recv().await? {
            Some(raw) => raw,
            None => break,
        };

        let message: ChunkMessage = match serde_json::from_slice(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("discarding malformed chunk message: {e}");
                continue;
            }
        };

        let (file_id, file_name, relative_path, offset, data, total_size, expected_hash) =
            match message {
                ChunkMessage::ChunkData {
                    file_id,
                    file_name,
                    relative_path,
                    offset,
                    data,
                    total_size,
                    expected_hash,
                    ..
                } => (
                    file_id,
                    file_name,
                    relative_path,
                    offset,
                    data,
                    total_size,
                    expected_hash,
                ),
            };

        let payload = match BASE64.decode(data.as_bytes()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(file_id = %file_id, "discarding chunk with invalid base64 payload: {e}");
                continue;
            }
        };

        let file_key = PathBuf::from(&file_id);

        if !receptions.contains_key(&file_id) {
            let _ = store.add_file(file_key.clone(), file_name.clone(), total_size);
            let _ = store.start(&file_key);
            let reception = FileReception::open(
                &output_root,
                &staging_suffix,
                &relative_path,
                total_size,
                expected_hash,
            )
            .await?;
            receptions.insert(file_id.clone(), reception);
        }

        let reception = receptions.get_mut(&file_id).expect("just inserted");
        if let Err(e) = reception.write_chunk(offset, &payload).await {
            tracing::error!(file_id = %file_id, "failed writing chunk: {e}");
            let _ = store.fail(&file_key, &e);
            receptions.remove(&file_id);
            continue;
        }
        let _ = store.update_progress(&file_key, reception.received_bytes);

        if reception.is_complete() {
            let reception = receptions.remove(&file_id).expect("just matched");
            match reception.finish().await {
                Ok(()) => {
                    let _ = store.complete(&file_key);
                }
                Err(e) => {
                    tracing::error!(file_id = %file_id, "failed committing file: {e}");
                    let _ = store.fail(&file_key, &e);
                }
            }
        }
    }

    Ok(())
}
