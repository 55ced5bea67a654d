use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::lossy_channel::LossyChannel;
use crate::message_dispatcher::MessageDispatcher;
use crate::selective_repeat::SelectiveRepeat;
use crate::socket::DatagramSocket;
use crate::stats::ConnectionStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, Instrument, Level};

/// A reliable, ordered message channel to a single peer over a UDP-like socket.
///
/// The connection owns its socket: it runs the only receive loop on it, and all sending goes
///  through the Selective-Repeat engine. Messages are passed to the registered
///  [MessageDispatcher] in the order they were sent, each exactly once.
///
/// There is no handshake - both sides start at sequence number 0 and must be created with each
///  other's address.
pub struct Connection {
    config: Arc<ConnectionConfig>,
    local_addr: SocketAddr,
    engine: Arc<SelectiveRepeat>,
    recv_loop_handle: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.recv_loop_handle.abort();
    }
}

impl Connection {
    pub async fn bind(config: ConnectionConfig) -> anyhow::Result<Connection> {
        config.validate()?;

        let socket = UdpSocket::bind(config.self_addr).await?;
        info!("bound socket to {:?}", socket.local_addr()?);
        Self::with_socket(config, Arc::new(socket))
    }

    /// Creates a connection over an existing socket. This must be called from inside a tokio
    ///  runtime since it spawns the receive loop.
    pub fn with_socket(config: ConnectionConfig, socket: Arc<dyn DatagramSocket>) -> anyhow::Result<Connection> {
        config.validate()?;
        let config = Arc::new(config);

        let local_addr = socket.local_addr()?;
        let channel: Arc<dyn DatagramSocket> = if config.loss.is_passthrough() {
            socket
        }
        else {
            info!("simulating packet loss: {:?}", config.loss);
            Arc::new(LossyChannel::new(socket, config.loss.clone()))
        };

        let engine = Arc::new(SelectiveRepeat::new(config.clone(), channel.clone()));

        let span = span!(Level::INFO, "connection", peer = ?config.peer_addr, id = config.connection_id);
        let recv_loop_handle = tokio::spawn(
            Self::recv_loop(engine.clone(), channel, config.clone())
                .instrument(span)
        );

        info!("connection from {:?} to {:?} established", local_addr, config.peer_addr);
        Ok(Connection {
            config,
            local_addr,
            engine,
            recv_loop_handle,
        })
    }

    /// Sends a message reliably. This suspends while the send window is full, and it returns
    ///  once the message is admitted to the send window - not when it is acknowledged.
    pub async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        self.engine.submit(message).await?;
        Ok(())
    }

    /// Registers the consumer of received messages, replacing any previous one.
    pub async fn on_message(&self, message_dispatcher: Arc<dyn MessageDispatcher>) {
        self.engine.set_message_dispatcher(message_dispatcher).await;
    }

    /// Stops the receive loop and all retransmission timers, and releases the socket. Messages
    ///  that are not acknowledged yet are abandoned.
    pub async fn close(&self) {
        if self.engine.is_closed() {
            return;
        }
        self.recv_loop_handle.abort();
        self.engine.close().await;
        info!("closed connection to {:?}", self.config.peer_addr);
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.config.peer_addr
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.engine.stats().await
    }

    async fn recv_loop(engine: Arc<SelectiveRepeat>, channel: Arc<dyn DatagramSocket>, config: Arc<ConnectionConfig>) {
        info!("starting receive loop");

        let mut buf = vec![0u8; config.max_datagram_size];
        loop {
            let (num_read, from) = match channel.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error - closing connection: {}", e);
                    engine.fail(TransportError::Io(e)).await;
                    return;
                }
            };

            if from != config.peer_addr {
                debug!("received datagram from {:?} which is not the peer - dropping", from);
                continue;
            }
            trace!("received datagram with {} bytes", num_read);

            engine.on_datagram(&buf[..num_read]).await;
        }
    }
}
