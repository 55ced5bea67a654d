use thiserror::Error;

/// Reasons for rejecting a received datagram before it reaches protocol logic. Both cases are
///  'corrupt packet' from the protocol's point of view: the datagram is dropped without an ACK,
///  and the sender's retransmission timer takes care of recovery.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than the packet header")]
    Truncated { len: usize },

    #[error("checksum mismatch: header says {expected:08x}, payload has {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("message of {len} bytes exceeds the maximum payload of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
