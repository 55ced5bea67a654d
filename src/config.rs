use crate::packet::Packet;
use crate::seq_nr::SeqNr;
use anyhow::bail;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// the local address to bind to - port 0 picks an ephemeral port
    pub self_addr: SocketAddr,
    pub peer_addr: SocketAddr,

    /// This is the maximum number of *packets* (not bytes) that are sent but not acknowledged
    ///  at any given time. Sending more messages than that suspends the sender until an ACK
    ///  frees up a slot.
    pub window_size: u16,

    /// The time after which a packet is re-sent if it was not acknowledged. Each outstanding
    ///  packet is checked twice per timeout interval.
    pub retransmission_timeout: Duration,

    /// This is carried in every packet's header, but it is not used to demultiplex packets:
    ///  a connection has its own socket.
    pub connection_id: u16,

    /// The biggest datagram that is sent or received, including the packet header. This
    ///  determines the receive buffer size and limits message size.
    pub max_datagram_size: usize,

    /// Loss simulation for testing and fault injection. Production use leaves this at the
    ///  default, which is a transparent pass-through.
    pub loss: LossConfig,
}

impl ConnectionConfig {
    pub fn new(self_addr: SocketAddr, peer_addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig {
            self_addr,
            peer_addr,
            window_size: 5,
            retransmission_timeout: Duration::from_millis(500),
            connection_id: 0,
            max_datagram_size: 4096,
            loss: LossConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if self.window_size > SeqNr::MAX_WINDOW_SIZE {
            bail!("window size {} exceeds half the sequence number space ({})", self.window_size, SeqNr::MAX_WINDOW_SIZE);
        }
        if self.retransmission_timeout.is_zero() {
            bail!("retransmission timeout must not be zero");
        }
        if self.max_datagram_size <= Packet::HEADER_LEN {
            bail!("max datagram size {} leaves no room for payload after the {} byte header", self.max_datagram_size, Packet::HEADER_LEN);
        }
        if self.self_addr.is_ipv4() != self.peer_addr.is_ipv4() {
            bail!("local address {:?} and peer address {:?} use different IP versions", self.self_addr, self.peer_addr);
        }
        self.loss.validate()
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_datagram_size - Packet::HEADER_LEN
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LossDirection {
    Send,
    Receive,
    Both,
}
impl LossDirection {
    pub fn affects_send(&self) -> bool {
        matches!(self, LossDirection::Send | LossDirection::Both)
    }

    pub fn affects_receive(&self) -> bool {
        matches!(self, LossDirection::Receive | LossDirection::Both)
    }
}

/// Correlated loss: after a datagram is dropped, the next `length` datagrams are dropped with
///  `elevated_probability` instead of the regular loss probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstLoss {
    pub elevated_probability: f64,
    pub length: usize,
}
impl Default for BurstLoss {
    fn default() -> Self {
        BurstLoss {
            elevated_probability: 0.5,
            length: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossConfig {
    /// number between 0.0 (no loss) and 1.0 (exclusive)
    pub loss_probability: f64,
    /// `None` for independent loss
    pub burst: Option<BurstLoss>,
    pub direction: LossDirection,
    /// fixed seed for reproducible loss patterns, or `None` to seed from entropy
    pub seed: Option<u64>,
}
impl Default for LossConfig {
    fn default() -> Self {
        LossConfig::independent(0.0)
    }
}

impl LossConfig {
    pub fn independent(loss_probability: f64) -> LossConfig {
        LossConfig {
            loss_probability,
            burst: None,
            direction: LossDirection::Send,
            seed: None,
        }
    }

    pub fn bursty(loss_probability: f64) -> LossConfig {
        LossConfig {
            burst: Some(BurstLoss::default()),
            ..Self::independent(loss_probability)
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.loss_probability == 0.0
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.loss_probability) {
            bail!("loss probability must be in [0.0, 1.0), was {}", self.loss_probability);
        }
        if let Some(burst) = &self.burst {
            if !(0.0..1.0).contains(&burst.elevated_probability) {
                bail!("burst loss probability must be in [0.0, 1.0), was {}", burst.elevated_probability);
            }
        }
        Ok(())
    }
}
