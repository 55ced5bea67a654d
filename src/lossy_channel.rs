use crate::config::LossConfig;
use crate::socket::DatagramSocket;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// A [DatagramSocket] wrapper that drops datagrams on purpose, emulating an unreliable network.
///
/// Dropping is silent: the caller of `send_to` sees success, and a dropped incoming datagram is
///  simply never returned from `recv_from`. The channel never duplicates or reorders datagrams.
pub struct LossyChannel {
    socket: Arc<dyn DatagramSocket>,
    config: LossConfig,
    state: Mutex<LossState>,
    dropped: AtomicU64,
}

struct LossState {
    rng: StdRng,
    /// number of upcoming datagrams that are subject to burst loss probability
    burst_remaining: usize,
}

impl LossState {
    fn should_drop(&mut self, config: &LossConfig) -> bool {
        if self.burst_remaining > 0 {
            if let Some(burst) = &config.burst {
                self.burst_remaining -= 1;
                return self.rng.gen::<f64>() < burst.elevated_probability;
            }
            self.burst_remaining = 0;
        }

        if config.loss_probability <= 0.0 {
            return false;
        }

        let dropped = self.rng.gen::<f64>() < config.loss_probability;
        if dropped {
            if let Some(burst) = &config.burst {
                self.burst_remaining = burst.length;
            }
        }
        dropped
    }
}

impl LossyChannel {
    pub fn new(socket: Arc<dyn DatagramSocket>, config: LossConfig) -> LossyChannel {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        LossyChannel {
            socket,
            config,
            state: Mutex::new(LossState {
                rng,
                burst_remaining: 0,
            }),
            dropped: AtomicU64::new(0),
        }
    }

    /// a channel that forwards everything
    pub fn passthrough(socket: Arc<dyn DatagramSocket>) -> LossyChannel {
        Self::new(socket, LossConfig::default())
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn should_drop(&self) -> bool {
        let dropped = match self.state.lock() {
            Ok(mut state) => state.should_drop(&self.config),
            Err(poisoned) => poisoned.into_inner().should_drop(&self.config),
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        dropped
    }
}

#[async_trait]
impl DatagramSocket for LossyChannel {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<()> {
        if self.config.direction.affects_send() && self.should_drop() {
            trace!("lossy channel: dropping outgoing datagram of {} bytes to {:?}", buf.len(), to);
            return Ok(());
        }
        self.socket.send_to(buf, to).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            if self.config.direction.affects_receive() && self.should_drop() {
                trace!("lossy channel: dropping incoming datagram of {} bytes from {:?}", len, from);
                continue;
            }
            return Ok((len, from));
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
