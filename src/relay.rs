use crate::config::LossConfig;
use crate::lossy_channel::LossyChannel;
use crate::socket::DatagramSocket;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

/// A UDP relay that loses datagrams on purpose, for fault injection between two endpoints that
///  run without loss simulation of their own.
///
/// Datagrams from any address are forwarded to `forward_to`, and their sender becomes the
///  relay's client. Datagrams from `forward_to` go back to the client. So both endpoints must
///  use the relay's address as their peer address.
pub struct LossyRelay {
    channel: LossyChannel,
    forward_to: SocketAddr,
}

impl LossyRelay {
    /// the biggest datagram that is relayed without truncation
    pub const MAX_DATAGRAM_SIZE: usize = 65536;

    pub async fn bind(listen_addr: SocketAddr, forward_to: SocketAddr, loss: LossConfig) -> anyhow::Result<LossyRelay> {
        loss.validate()?;

        let socket = UdpSocket::bind(listen_addr).await?;
        info!("lossy relay bound to {:?}, forwarding to {:?} with {:?}", socket.local_addr()?, forward_to, loss);

        Ok(LossyRelay {
            channel: LossyChannel::new(Arc::new(socket), loss),
            forward_to,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.channel.local_addr()?)
    }

    pub fn dropped_count(&self) -> u64 {
        self.channel.dropped_count()
    }

    /// Relays datagrams until the socket fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut client_addr: Option<SocketAddr> = None;
        let mut buf = vec![0u8; Self::MAX_DATAGRAM_SIZE];

        loop {
            let (num_read, from) = match self.channel.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("relay socket error - stopping: {}", e);
                    return Err(e.into());
                }
            };

            let to = if from == self.forward_to {
                match client_addr {
                    Some(addr) => addr,
                    None => {
                        debug!("received datagram from {:?} before any client - dropping", from);
                        continue;
                    }
                }
            }
            else {
                if client_addr != Some(from) {
                    info!("relaying for client {:?}", from);
                    client_addr = Some(from);
                }
                self.forward_to
            };

            trace!("relaying {} bytes from {:?} to {:?}", num_read, from, to);
            if let Err(e) = self.channel.send_to(&buf[..num_read], to).await {
                warn!("error relaying datagram to {:?}: {}", to, e);
            }
        }
    }
}
