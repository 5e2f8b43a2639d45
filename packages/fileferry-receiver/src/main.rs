mod config;
mod handler;
mod negotiate;
mod reception;
mod state;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::{ReceiverArgs, ReceiverConfig};
use state::AppState;

const SERVICE_TYPE: &str = "_fileferry._tcp.local.";

/// Assembles the `/ask`, `/candidate`, `/healthz`, `/stats` router over
/// `state`. Pulled out of `main()` so integration tests can stand up the
/// same routes on an ephemeral port without going through mDNS or CLI
/// parsing.
fn build_router(state: std::sync::Arc<AppState>) -> Router {
    Router::new()
        .route("/ask", post(handler::ask))
        .route("/candidate", post(handler::candidate))
        .route("/healthz", get(handler::healthz))
        .route("/stats", get(handler::stats))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fileferry_receiver=info,tower_http=info".into()),
        )
        .init();

    let args = ReceiverArgs::parse();
    let config = ReceiverConfig::from(&args);

    if let Err(e) = std::fs::create_dir_all(&config.output_root) {
        tracing::error!("failed to create output directory {:?}: {e}", config.output_root);
        std::process::exit(1);
    }

    let mdns = match mdns_sd::ServiceDaemon::new() {
        Ok(daemon) => Some(daemon),
        Err(e) => {
            tracing::warn!("mDNS discovery disabled: {e}");
            None
        }
    };
    if let Some(daemon) = &mdns {
        if let Err(e) = fileferry_core::discovery::register(
            daemon,
            SERVICE_TYPE,
            &config.instance_name,
            config.bind_addr.port(),
        ) {
            tracing::warn!("failed to register mDNS service: {e}");
        }
    }

    let state = AppState::new(config.clone());
    let app = build_router(state);

    tracing::info!(
        bind_addr = %config.bind_addr,
        output_root = ?config.output_root,
        "fileferry-receiver listening"
    );

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    axum::serve(listener, app)
        .await
        .expect("receiver server exited unexpectedly");

    // Gives the mDNS daemon a chance to send a goodbye packet rather than
    // just dropping the socket on shutdown.
    if let Some(daemon) = mdns {
        let _ = daemon.shutdown();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[cfg(test)]
mod tests {
    //! End-to-end HTTP tests against a real ephemeral-port server, for the
    //! `/ask`/`/candidate` scenarios that don't require a live WebRTC
    //! negotiation: tamper detection (E5) and the no-session `/candidate`
    //! response.

    use std::net::SocketAddr;
    use std::time::Duration;

    use fileferry_core::manifest;

    use super::*;

    fn test_config(output_root: std::path::PathBuf) -> ReceiverConfig {
        ReceiverConfig {
            bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            output_root,
            instance_name: "test-receiver".into(),
            aggregate_throttle: Duration::from_millis(500),
            chunk_size: 4096,
            staging_suffix: ".part".into(),
        }
    }

    /// Binds the router on an ephemeral port and returns its base URL. The
    /// server task is detached; the test process tearing down is enough to
    /// reclaim it.
    async fn spawn_server(config: ReceiverConfig) -> String {
        let state = AppState::new(config);
        let app = build_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_server(test_config(tmp.path().to_path_buf())).await;

        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{base_url}/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn candidate_with_no_active_session_is_service_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_server(test_config(tmp.path().to_path_buf())).await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base_url}/candidate"))
            .json(&serde_json::json!({ "candidate": "candidate:1 1 UDP 1 127.0.0.1 1 typ host" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "busy");
    }

    #[tokio::test]
    async fn candidate_with_malformed_body_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_server(test_config(tmp.path().to_path_buf())).await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base_url}/candidate"))
            .json(&serde_json::json!({ "nonsense": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    /// E5: a manifest mutated after signing must be rejected with `400`
    /// before the concurrency guard is ever touched.
    #[tokio::test]
    async fn ask_with_tampered_manifest_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();

        let base_url = spawn_server(test_config(tmp.path().to_path_buf())).await;

        let roots = manifest::walk_roots(&[src.path().to_path_buf()]).unwrap();
        let mut signed = manifest::sign(roots).unwrap();
        if let Some(file) = signed.files.first_mut() {
            file.size += 1;
        } else {
            signed.root_nodes[0].size += 1;
        }

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base_url}/ask"))
            .json(&serde_json::json!({
                "signed_files": signed,
                "offer": { "type": "offer", "sdp": "v=0" },
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // The guard must not have been consumed: a second (also tampered)
        // request is rejected the same way, not with `503`.
        let resp2 = client
            .post(format!("{base_url}/ask"))
            .json(&serde_json::json!({
                "signed_files": signed,
                "offer": { "type": "offer", "sdp": "v=0" },
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp2.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_with_malformed_body_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let base_url = spawn_server(test_config(tmp.path().to_path_buf())).await;

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base_url}/ask"))
            .json(&serde_json::json!({ "nope": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
