//! Command-line arguments and the resulting receiver configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fileferry_core::chunk::DEFAULT_CHUNK_SIZE;
use fileferry_core::transfer_store::DEFAULT_AGGREGATE_THROTTLE;

#[derive(Debug, Parser)]
#[command(name = "fileferry-receiver", about = "Receives files offered by a fileferry sender on the local network")]
pub struct ReceiverArgs {
    /// Address to bind the HTTP signaling endpoint to.
    #[arg(short, long, default_value = "0.0.0.0:7419", env = "FILEFERRY_BIND_ADDR")]
    pub bind_addr: SocketAddr,

    /// Directory committed files are written into.
    #[arg(short, long, default_value = "./received", env = "FILEFERRY_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    /// mDNS instance name advertised for discovery.
    #[arg(long, default_value = "fileferry-receiver", env = "FILEFERRY_INSTANCE_NAME")]
    pub instance_name: String,

    /// Minimum milliseconds between aggregate progress listener notifications.
    #[arg(long, default_value_t = DEFAULT_AGGREGATE_THROTTLE.as_millis() as u64, env = "FILEFERRY_AGGREGATE_THROTTLE_MS")]
    pub aggregate_throttle_ms: u64,

    /// Chunk size hint reported to senders, in bytes.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "FILEFERRY_CHUNK_SIZE")]
    pub chunk_size: usize,

    /// Suffix appended to staged (in-flight) output files.
    #[arg(long, default_value = ".part", env = "FILEFERRY_STAGING_SUFFIX")]
    pub staging_suffix: String,
}

/// Resolved server configuration, built from [`ReceiverArgs`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind_addr: SocketAddr,
    pub output_root: PathBuf,
    pub instance_name: String,
    pub aggregate_throttle: Duration,
    pub chunk_size: usize,
    pub staging_suffix: String,
}

impl From<&ReceiverArgs> for ReceiverConfig {
    fn from(args: &ReceiverArgs) -> Self {
        Self {
            bind_addr: args.bind_addr,
            output_root: args.output_root.clone(),
            instance_name: args.instance_name.clone(),
            aggregate_throttle: Duration::from_millis(args.aggregate_throttle_ms),
            chunk_size: args.chunk_size,
            staging_suffix: args.staging_suffix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_have_sane_defaults() {
        ReceiverArgs::command().debug_assert();
        let args = ReceiverArgs::parse_from(["fileferry-receiver"]);
        assert_eq!(args.bind_addr.port(), 7419);
        assert_eq!(args.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
