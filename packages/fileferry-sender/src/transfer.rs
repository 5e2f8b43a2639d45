//! The data-channel sender loop (C8): walks every file node in the signed
//! manifest, chunks it, and pushes `ChunkMessage::ChunkData` frames over
//! the open data channel. A single file's failure is isolated — it's
//! marked `Failed` and the loop moves on to the next file rather than
//! aborting the whole batch (§5/§8).

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use fileferry_core::chunk::Chunker;
use fileferry_core::error::{Error, Result};
use fileferry_core::manifest::{relative_file_paths, FileNode};
use fileferry_core::protocol::{ChunkMessage, SessionRef};
use fileferry_core::transfer_store::TransferStore;
use fileferry_core::transport::DataChannel;

/// Sends every file descendant of `nodes` (recursing into directories),
/// continuing past any one file's failure. `store` must already have every
/// file registered via `add_file` so `fail`/`complete` have something to
/// transition. Checked for cancellation between files: a `ctx` cancelled
/// mid-batch stops the loop before the next file starts, rather than
/// racing cancellation against an in-flight chunk write.
pub async fn send_all(
    ctx: &CancellationToken,
    channel: &mut dyn DataChannel,
    store: &TransferStore,
    session: &SessionRef,
    nodes: &[FileNode],
    chunk_size: usize,
) -> Result<()> {
    for (relative_path, node) in relative_file_paths(nodes) {
        if ctx.is_cancelled() {
            tracing::warn!("transfer cancelled, {} not sent", node.name);
            return Err(Error::Cancelled);
        }
        if let Err(e) = send_file(ctx, channel, store, session, node, &relative_path, chunk_size).await
        {
            tracing::error!(file = %node.name, "transfer failed: {e}");
        }
    }
    Ok(())
}

/// Sends a single file, transitioning it through the store's
/// `Pending -> Active -> {Completed, Failed}` lifecycle around the
/// chunking loop. `relative_path` is the file's path relative to the
/// transfer's roots, sent on the wire so the receiver can recreate nested
/// directories instead of flattening every file into one place.
pub async fn send_file(
    ctx: &CancellationToken,
    channel: &mut dyn DataChannel,
    store: &TransferStore,
    session: &SessionRef,
    node: &FileNode,
    relative_path: &Path,
    chunk_size: usize,
) -> Result<()> {
    let path = node.path.clone();
    store.start(&path)?;

    match send_chunks(ctx, channel, store, session, node, relative_path, chunk_size).await {
        Ok(()) => {
            store.complete(&path)?;
            Ok(())
        }
        Err(e) => {
            store.fail(&path, &e)?;
            Err(e)
        }
    }
}

/// Joins a local relative path's components with `/` regardless of the
/// host platform's separator, so the wire format stays stable across
/// senders running on different operating systems.
fn relative_path_wire(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn send_chunks(
    ctx: &CancellationToken,
    channel: &mut dyn DataChannel,
    store: &TransferStore,
    session: &SessionRef,
    node: &FileNode,
    relative_path: &Path,
    chunk_size: usize,
) -> Result<()> {
    let file_id = node.path.to_string_lossy().to_string();
    let wire_relative_path = relative_path_wire(relative_path);
    let chunker = Chunker::open(&node.path, chunk_size)?;
    let total_size = chunker.file_size();

    for chunk in chunker {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let chunk = chunk?;
        let message = ChunkMessage::ChunkData {
            session: session.clone(),
            file_id: file_id.clone(),
            file_name: node.name.clone(),
            relative_path: wire_relative_path.clone(),
            sequence_no: chunk.sequence_no,
            offset: chunk.offset,
            data: BASE64.encode(&chunk.data),
            chunk_hash: chunk.hash,
            total_size,
            expected_hash: node.checksum.clone(),
        };
        channel.send(&serde_json::to_vec(&message)?).await?;
        store.update_progress(&node.path, chunk.offset + chunk.data.len() as u64)?;

        if chunk.is_last {
            break;
        }
    }
    channel.flush().await
}
