use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::error::TransportError;

/// Largest reply accepted from a bulb.
pub const MAX_REPLY_SIZE: usize = 1024;

/// A single request/response exchange with one device.
///
/// Implementations must not share a socket or buffer between calls, so that
/// concurrent exchanges never see each other's replies.
pub trait Transport: Sync {
    fn exchange(
        &self,
        target: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// Connectionless UDP: one fresh socket per exchange, one reply awaited.
#[derive(Debug, Clone, Copy)]
pub struct UdpTransport {
    pub bind_address: Ipv4Addr,
}

impl Default for UdpTransport {
    fn default() -> Self {
        UdpTransport {
            bind_address: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl Transport for UdpTransport {
    async fn exchange(
        &self,
        target: SocketAddr,
        payload: &[u8],
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let socket = UdpSocket::bind((self.bind_address, 0)).await?;
        socket.send_to(payload, target).await?;
        debug!("Sent {} bytes to {}", payload.len(), target);

        let deadline = Instant::now() + wait;
        let mut buffer = [0; MAX_REPLY_SIZE];
        loop {
            let (number_of_bytes, source) = timeout_at(deadline, socket.recv_from(&mut buffer))
                .await
                .map_err(|_| TransportError::Timeout(wait))??;
            // A stray datagram from someone else is not the reply.
            if source.ip() != target.ip() {
                debug!("Ignoring datagram from {} while waiting for {}", source, target);
                continue;
            }
            return Ok(buffer[..number_of_bytes].to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_exchange_round_trip() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_address = device.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buffer = [0; 256];
            let (n, from) = device.recv_from(&mut buffer).await.unwrap();
            assert_eq!(&buffer[..n], b"ping");
            device.send_to(b"pong", from).await.unwrap();
        });

        let transport = UdpTransport {
            bind_address: Ipv4Addr::LOCALHOST,
        };
        let reply = transport
            .exchange(device_address, b"ping", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn test_udp_exchange_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport {
            bind_address: Ipv4Addr::LOCALHOST,
        };
        let result = transport
            .exchange(
                silent.local_addr().unwrap(),
                b"hello?",
                Duration::from_millis(100),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
