//
// response_listener.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use ykshared::connection_info::ConnectionInfo;
use ykshared::port_range::PortRange;

use crate::error::{YKError, YKResult};

/// Upper bound on a launcher's response payload
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

/// Time allowed for a connected launcher to finish sending
const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// The socket a remote launcher connects to in order to report the kernel's
/// connection info. The launcher writes one JSON object and closes.
#[derive(Debug)]
pub struct ResponseListener {
    /// The bound listener; converted to a tokio listener when receiving
    listener: std::net::TcpListener,

    /// The address advertised to the launcher
    address: SocketAddr,

    /// The range the port was picked from
    port_range: PortRange,
}

impl ResponseListener {
    /// Bind a listener within `port_range`. With no `ip`, binds all
    /// interfaces and advertises this host's outbound address.
    pub fn bind(ip: Option<IpAddr>, port_range: PortRange) -> YKResult<Self> {
        let bind_ip = ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let listener = port_range.bind(bind_ip).ok_or_else(|| {
            YKError::Config(format!(
                "No free port in range {} on {} for the response address",
                port_range, bind_ip
            ))
        })?;
        listener.set_nonblocking(true)?;

        let port = listener.local_addr()?.port();
        let advertised_ip = ip.unwrap_or_else(local_ip);
        let address = SocketAddr::new(advertised_ip, port);
        log::debug!("Listening for launcher responses on {}", address);

        Ok(Self {
            listener,
            address,
            port_range,
        })
    }

    /// The `ip:port` the launcher should report to.
    pub fn response_address(&self) -> SocketAddr {
        self.address
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }

    /// Wait up to `accept_timeout` for a launcher to connect, then read its
    /// connection info. Returns `None` when no launcher connected in time.
    pub async fn receive(
        &self,
        kernel_id: &str,
        accept_timeout: Duration,
    ) -> YKResult<Option<ConnectionInfo>> {
        let listener = tokio::net::TcpListener::from_std(self.listener.try_clone()?)?;

        let (stream, peer) = match tokio::time::timeout(accept_timeout, listener.accept()).await {
            Ok(accepted) => accepted?,
            Err(_) => return Ok(None),
        };
        log::debug!("[session {}] Launcher connected from {}", kernel_id, peer);

        let mut payload = Vec::new();
        tokio::time::timeout(
            PAYLOAD_TIMEOUT,
            stream.take(MAX_RESPONSE_BYTES).read_to_end(&mut payload),
        )
        .await
        .map_err(|_| YKError::ConnectionInfo {
            kernel_id: kernel_id.to_string(),
            reason: format!("launcher at {} stopped sending before closing", peer),
        })??;

        ConnectionInfo::from_slice(&payload)
            .map(Some)
            .map_err(|e| YKError::ConnectionInfo {
                kernel_id: kernel_id.to_string(),
                reason: format!("malformed response from {}: {}", peer, e),
            })
    }
}

/// This host's address on the interface used for outbound traffic. No
/// packets are sent; connecting a UDP socket only selects a route.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
