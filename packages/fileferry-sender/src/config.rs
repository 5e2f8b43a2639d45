//! Command-line arguments and the resulting sender configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fileferry_core::chunk::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Parser)]
#[command(name = "fileferry-sender", about = "Offers one or more files to a fileferry receiver on the local network")]
pub struct SenderArgs {
    /// Files or directories to send.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Receiver address (host:port). Omit with `--discover` to find one
    /// over mDNS instead.
    #[arg(short, long, conflicts_with = "discover", env = "FILEFERRY_TARGET")]
    pub target: Option<String>,

    /// Browse mDNS for a fileferry receiver instead of dialing a fixed
    /// address.
    #[arg(long)]
    pub discover: bool,

    /// How long to wait for a discovery response before giving up.
    #[arg(long, default_value_t = 5_000, env = "FILEFERRY_DISCOVER_TIMEOUT_MS")]
    pub discover_timeout_ms: u64,

    /// Name this sender identifies itself as in the `x-service-id` header.
    #[arg(long, default_value = "fileferry-sender", env = "FILEFERRY_INSTANCE_NAME")]
    pub instance_name: String,

    /// Chunk size used when splitting files for transfer, in bytes.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "FILEFERRY_CHUNK_SIZE")]
    pub chunk_size: usize,
}

/// Resolved sender configuration, built from [`SenderArgs`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub paths: Vec<PathBuf>,
    pub target: Option<String>,
    pub discover: bool,
    pub discover_timeout: Duration,
    pub instance_name: String,
    pub chunk_size: usize,
}

impl From<&SenderArgs> for SenderConfig {
    fn from(args: &SenderArgs) -> Self {
        Self {
            paths: args.paths.clone(),
            target: args.target.clone(),
            discover: args.discover,
            discover_timeout: Duration::from_millis(args.discover_timeout_ms),
            instance_name: args.instance_name.clone(),
            chunk_size: args.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_have_sane_defaults() {
        SenderArgs::command().debug_assert();
        let args = SenderArgs::parse_from(["fileferry-sender", "--target", "127.0.0.1:7419", "a.txt"]);
        assert_eq!(args.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(args.target.as_deref(), Some("127.0.0.1:7419"));
    }

    #[test]
    fn target_and_discover_are_mutually_exclusive() {
        let result = SenderArgs::try_parse_from([
            "fileferry-sender",
            "--target",
            "127.0.0.1:7419",
            "--discover",
            "a.txt",
        ]);
        assert!(result.is_err());
    }
}
