//! Receiver server state: the single concurrency guard and the one
//! session it currently admits, if any.

use std::sync::Arc;

use parking_lot::Mutex;

use fileferry_core::guard::ConcurrencyGuard;
use fileferry_core::session::Session;
use fileferry_core::transfer_store::TransferStore;

use crate::config::ReceiverConfig;

/// Everything handlers need: the config, the guard, and (while a session
/// is admitted) the session itself and its transfer store.
pub struct AppState {
    pub config: ReceiverConfig,
    pub guard: ConcurrencyGuard,
    current: Mutex<Option<(Arc<Session>, TransferStore)>>,
}

impl AppState {
    pub fn new(config: ReceiverConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            guard: ConcurrencyGuard::new(),
            current: Mutex::new(None),
        })
    }

    pub fn set_session(&self, session: Arc<Session>, store: TransferStore) {
        *self.current.lock() = Some((session, store));
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.current.lock().as_ref().map(|(s, _)| s.clone())
    }

    pub fn current_store(&self) -> Option<TransferStore> {
        self.current.lock().as_ref().map(|(_, st)| st.clone())
    }

    pub fn clear_session(&self) {
        *self.current.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileferry_core::protocol::SessionDescription;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> ReceiverConfig {
        ReceiverConfig {
            bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            output_root: PathBuf::from("/tmp"),
            instance_name: "test".into(),
            aggregate_throttle: Duration::from_millis(500),
            chunk_size: 1024,
            staging_suffix: ".part".into(),
        }
    }

    #[test]
    fn no_session_by_default() {
        let state = AppState::new(test_config());
        assert!(state.current_session().is_none());
    }

    #[test]
    fn set_and_clear_session_round_trips() {
        let state = AppState::new(test_config());
        let session = Arc::new(Session::new(
            "s1".into(),
            "svc".into(),
            SessionDescription {
                sdp_type: "offer".into(),
                sdp: "v=0".into(),
            },
        ));
        state.set_session(session.clone(), TransferStore::default());
        assert!(state.current_session().is_some());
        state.clear_session();
        assert!(state.current_session().is_none());
    }
}
