//! Shared test fixtures used across the fileferry workspace: an in-memory
//! stand-in for a real WebRTC data channel, a staged-directory tree
//! builder for manifest/chunking tests, and a clock-free throttle probe.

pub mod fixtures {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Notify};

    use fileferry_core::error::{Error, Result};
    use fileferry_core::transport::DataChannel;

    /// One end of an in-memory channel pair, implementing [`DataChannel`]
    /// the way a real WebRTC data channel would: ordered, reliable,
    /// message-oriented. Dropping one end makes the other's `recv` return
    /// `Ok(None)` once its queue drains, matching a clean channel close.
    pub struct InMemoryDataChannel {
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    #[async_trait]
    impl DataChannel for InMemoryDataChannel {
        async fn send(&mut self, data: &[u8]) -> Result<()> {
            self.outbound
                .send(data.to_vec())
                .map_err(|_| Error::TransportFailure("peer channel closed".into()))
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.inbound.recv().await)
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Builds a connected pair of [`InMemoryDataChannel`]s: whatever the
    /// left side sends, the right side receives, and vice versa.
    pub fn in_memory_channel_pair() -> (InMemoryDataChannel, InMemoryDataChannel) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            InMemoryDataChannel {
                outbound: left_tx,
                inbound: left_rx,
            },
            InMemoryDataChannel {
                outbound: right_tx,
                inbound: right_rx,
            },
        )
    }

    /// A small file/directory tree under a fresh [`tempfile::TempDir`], for
    /// tests that walk, sign, chunk, or reassemble a fixture tree without
    /// hand-rolling `fs::write` calls at every call site.
    pub struct FixtureTree {
        dir: tempfile::TempDir,
    }

    impl FixtureTree {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                dir: tempfile::tempdir()?,
            })
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        /// Writes `contents` at `relative`, creating parent directories as
        /// needed, and returns the absolute path written.
        pub fn write_file(&self, relative: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
            let path = self.dir.path().join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
            Ok(path)
        }

        pub fn mkdir(&self, relative: &str) -> std::io::Result<PathBuf> {
            let path = self.dir.path().join(relative);
            std::fs::create_dir_all(&path)?;
            Ok(path)
        }
    }

    /// A clock-free way to assert "this fired, and that one (so far)
    /// didn't" for throttled listeners, without sleeping past the real
    /// throttle window. Each call to [`Self::notify`] wakes exactly one
    /// pending [`Self::notified`] waiter; tests drive the clock by calling
    /// `notify` and asserting on what arrives before advancing it further.
    #[derive(Default)]
    pub struct ThrottleProbe {
        notify: Notify,
    }

    impl ThrottleProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn notify(&self) {
            self.notify.notify_one();
        }

        pub async fn notified(&self) {
            self.notify.notified().await;
        }
    }
}
