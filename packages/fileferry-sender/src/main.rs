mod config;
mod signaling;
mod transfer;

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::{SenderArgs, SenderConfig};
use fileferry_core::manifest;
use fileferry_core::protocol::SessionRef;
use fileferry_core::transfer_store::TransferStore;
use fileferry_core::transport::{peer, webrtc_adapter};
use fileferry_core::Error;

const SERVICE_TYPE: &str = "_fileferry._tcp.local.";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fileferry_sender=info".into()),
        )
        .init();

    let args = SenderArgs::parse();
    let config = SenderConfig::from(&args);

    if let Err(e) = run(config).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: SenderConfig) -> fileferry_core::Result<()> {
    let ctx = CancellationToken::new();
    let ctx_for_ctrl_c = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancelling transfer");
            ctx_for_ctrl_c.cancel();
        }
    });

    let target = resolve_target(&config).await?;
    let base_url = format!("http://{target}");

    tracing::info!(target = %target, paths = ?config.paths, "walking and signing manifest");
    let root_nodes = manifest::walk_roots(&config.paths)?;
    let signed = manifest::sign(root_nodes.clone())?;

    tracing::info!(
        total_files = signed.metadata.total_files,
        total_size = signed.metadata.total_size,
        "offering manifest"
    );

    let offerer = peer::create_offer().await?;
    let client = reqwest::Client::new();

    let outcome = signaling::send_offer(
        &ctx,
        &client,
        &base_url,
        &config.instance_name,
        signed,
        offerer.offer.clone(),
    )
    .await?;

    let (answer, mut remote_candidates) = match outcome {
        signaling::AskOutcome::Rejected => {
            println!("Receiver rejected the transfer.");
            return Ok(());
        }
        signaling::AskOutcome::Accepted {
            answer,
            candidates_rx,
        } => (answer, candidates_rx),
    };

    peer::set_remote_answer(&offerer.peer_connection, answer).await?;

    let peer_connection = offerer.peer_connection.clone();
    tokio::spawn(async move {
        while let Some(candidate) = remote_candidates.recv().await {
            if let Err(e) = peer::add_ice_candidate(&peer_connection, candidate).await {
                tracing::warn!("failed to add remote ice candidate: {e}");
            }
        }
    });

    let client_for_candidates = client.clone();
    let base_url_for_candidates = base_url.clone();
    let ctx_for_candidates = ctx.clone();
    let mut local_candidates = offerer.candidates;
    tokio::spawn(async move {
        while let Some(candidate) = local_candidates.recv().await {
            let Some(candidate) = candidate else { break };
            signaling::send_candidate(
                &ctx_for_candidates,
                &client_for_candidates,
                &base_url_for_candidates,
                &candidate,
            )
            .await;
        }
    });

    let channel = wait_for_channel_open(&ctx, &offerer.data_channel).await?;
    let mut channel = webrtc_adapter::wrap(channel).await;

    let store = TransferStore::default();
    for node in root_nodes.iter().flat_map(|n| n.iter()).filter(|n| !n.is_dir) {
        store.add_file(node.path.clone(), node.name.clone(), node.size as u64)?;
    }

    let session = SessionRef {
        service_id: config.instance_name.clone(),
        created_at: fileferry_core::time::now_timestamp(),
    };

    transfer::send_all(
        &ctx,
        &mut channel,
        &store,
        &session,
        &root_nodes,
        config.chunk_size,
    )
    .await?;

    let aggregate = store.aggregate();
    println!(
        "Transfer finished: {}/{} files completed, {} failed.",
        aggregate.completed_files, aggregate.total_files, aggregate.failed_files
    );

    Ok(())
}

async fn resolve_target(config: &SenderConfig) -> fileferry_core::Result<String> {
    if let Some(target) = &config.target {
        return Ok(target.clone());
    }

    let daemon = mdns_sd::ServiceDaemon::new()
        .map_err(|e| Error::Internal(format!("failed to start mDNS daemon: {e}")))?;
    let discovered = fileferry_core::discovery::discover(&daemon, SERVICE_TYPE)?;
    tokio::pin!(discovered);

    use futures::StreamExt;
    let found = tokio::time::timeout(config.discover_timeout, discovered.next()).await;
    let _ = daemon.shutdown();

    match found {
        Ok(Some(service)) => Ok(format!("{}:{}", service.addr, service.port)),
        _ => Err(Error::Internal(
            "no fileferry receiver found via mDNS discovery".to_string(),
        )),
    }
}

/// Blocks until the sender's own data channel reports the `open` state,
/// the 30s deadline expires, or `ctx` is cancelled.
async fn wait_for_channel_open(
    ctx: &CancellationToken,
    channel: &std::sync::Arc<webrtc::data_channel::RTCDataChannel>,
) -> fileferry_core::Result<std::sync::Arc<webrtc::data_channel::RTCDataChannel>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    channel.on_open(Box::new(move || {
        if let Ok(mut guard) = tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
        Box::pin(async {})
    }));

    tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        result = tokio::time::timeout(Duration::from_secs(30), rx) => {
            result
                .map_err(|_| Error::TransportFailure("data channel never opened".into()))?
                .map_err(|_| Error::TransportFailure("data channel open signal was dropped".into()))?;
        }
    }

    Ok(channel.clone())
}
