//! The discovery adapter (C12): a thin wrapper over `mdns-sd` implementing
//! the `discover`/`register` interface of §6. The discovery mechanism
//! itself is an external collaborator per §1 — this module only adapts
//! its shape to the one this workspace's core is generic over.

use futures::Stream;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::error::{Error, Result};

/// A resolved peer, as yielded by [`discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub name: String,
    pub addr: std::net::IpAddr,
    pub port: u16,
}

/// Registers a typed service record so peers browsing the same service
/// type can find this host.
pub fn register(daemon: &ServiceDaemon, service_type: &str, instance_name: &str, port: u16) -> Result<()> {
    let host_name = format!("{instance_name}.local.");
    let ip = local_ip().ok_or_else(|| {
        Error::Internal("could not determine a local IP to advertise".to_string())
    })?;

    let service_info = ServiceInfo::new(
        service_type,
        instance_name,
        &host_name,
        ip,
        port,
        None::<std::collections::HashMap<String, String>>,
    )
    .map_err(|e| Error::Internal(format!("failed to build mDNS service record: {e}")))?;

    daemon
        .register(service_info)
        .map_err(|e| Error::Internal(format!("failed to register mDNS service: {e}")))
}

/// Browses `service_type`, yielding every resolved instance as it
/// appears. The stream never ends on its own; callers typically take the
/// first result or race it against a timeout.
pub fn discover(
    daemon: &ServiceDaemon,
    service_type: &str,
) -> Result<impl Stream<Item = DiscoveredService>> {
    let receiver = daemon
        .browse(service_type)
        .map_err(|e| Error::Internal(format!("failed to browse for {service_type}: {e}")))?;

    Ok(async_stream::stream! {
        while let Ok(event) = receiver.recv_async().await {
            if let ServiceEvent::ServiceResolved(info) = event {
                for addr in info.get_addresses() {
                    yield DiscoveredService {
                        name: info.get_fullname().to_string(),
                        addr: *addr,
                        port: info.get_port(),
                    };
                }
            }
        }
    })
}

fn local_ip() -> Option<std::net::IpAddr> {
    // Best-effort: connect a UDP socket to a public address (no packets
    // are sent) and read back the local address the OS would have used.
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}
