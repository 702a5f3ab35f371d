// Datagram Transport
//
// Best-effort UDP plumbing for the membership protocol. Sends go out on a
// throwaway socket and may be dropped locally to simulate network loss;
// receives come off one long-lived socket bound with SO_REUSEADDR. There is
// no retransmission and no framing beyond the datagram boundary.

use crate::config::MAX_DATAGRAM;
use crate::error::Result;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Receiving half of the transport. One per node, bound to the cluster port.
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    /// Binds an IPv4 datagram socket on the given port with `SO_REUSEADDR`
    /// set, so a restarted node can rebind immediately.
    pub fn bind(port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Awaits one datagram and returns `(payload, sender_address)`.
    ///
    /// The payload is truncated at MAX_DATAGRAM - 1 bytes; anything beyond
    /// that never fit the protocol's single-datagram contract anyway.
    pub async fn recv(&self) -> Result<(String, String)> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, sender) = self.socket.recv_from(&mut buf).await?;
        let len = len.min(MAX_DATAGRAM - 1);
        let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
        Ok((payload, sender.ip().to_string()))
    }
}

/// Sends one datagram to `address:port`, simulating loss locally.
///
/// With probability `loss_rate` the payload is discarded before it touches a
/// socket and the call returns false. Resolution and send errors also return
/// false; the failure detector treats either case as a dropped ping.
pub async fn try_send(payload: &str, address: &str, port: u16, loss_rate: f64) -> bool {
    if rand::rng().random::<f64>() < loss_rate {
        tracing::debug!(peer = %address, "outbound datagram dropped by loss simulation");
        return false;
    }

    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!(peer = %address, error = %e, "could not open sender socket");
            return false;
        }
    };

    match socket.send_to(payload.as_bytes(), (address, port)).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(peer = %address, port, error = %e, "datagram send failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_send_and_receive() {
        let receiver = UdpReceiver::bind(0).unwrap();
        let port = receiver.local_port().unwrap();

        assert!(try_send("4\n", "127.0.0.1", port, 0.0).await);

        let (payload, sender) = receiver.recv().await.unwrap();
        assert_eq!(payload, "4\n");
        assert_eq!(sender, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_full_loss_rate_drops_every_send() {
        // Nothing is listening on the target; a real send would still return
        // true, so false here proves the local gate fired.
        for _ in 0..16 {
            assert!(!try_send("4\n", "127.0.0.1", 9, 1.0).await);
        }
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_truncated() {
        let receiver = UdpReceiver::bind(0).unwrap();
        let port = receiver.local_port().unwrap();

        let big = "x".repeat(4 * MAX_DATAGRAM);
        assert!(try_send(&big, "127.0.0.1", port, 0.0).await);

        let (payload, _) = receiver.recv().await.unwrap();
        assert_eq!(payload.len(), MAX_DATAGRAM - 1);
    }

    #[tokio::test]
    async fn test_send_to_unresolvable_host_returns_false() {
        assert!(!try_send("4\n", "no-such-host.invalid", 4321, 0.0).await);
    }
}
