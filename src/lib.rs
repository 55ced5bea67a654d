//! Reliable, ordered message delivery over an unreliable datagram socket (UDP), based on
//!  Selective-Repeat ARQ.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages*, one message per packet and one packet
//!   per datagram. There is no chunking - a message must fit into a single datagram.
//! * Every message is delivered exactly once and in the order it was sent, regardless of lost,
//!   duplicated or reordered datagrams
//! * Each packet is acknowledged individually, and only packets that are not acknowledged in
//!   time are re-sent (as opposed to Go-Back-N which re-sends everything after a lost packet)
//! * A fixed-size send window limits the number of unacknowledged packets. Sending more
//!   *suspends* the sender, it never drops messages.
//! * There is a checksum per packet, corrupt packets are dropped silently and recovered by
//!   retransmission
//! * A connection is point-to-point and owns its socket. There is no handshake: both sides start
//!   at sequence number 0
//! * Loss can be simulated (independent or in bursts, on either side) for testing and fault
//!   injection, see [lossy_channel] and [relay]
//!
//! ## Packet format
//!
//! All numbers in network byte order (BE):
//! ```ascii
//! 0:  protocol version (u8) - currently always 1
//! 1:  flags (8 bits):
//!     * bit 0: ACK - the packet is a pure acknowledgment. Its payload is empty, the
//!              acknowledged sequence number is in the 'ack' field, and its 'sequence' is 0.
//!     * bits 1-7: unused, ignored on receipt
//! 2:  connection id (u16) - informational, connections are not multiplexed over a socket
//! 4:  sequence number (u16) - wraps around from FFFF to 0
//! 6:  ack (u16) - the acknowledged sequence number for ACK packets, 0 otherwise
//! 8:  checksum (u32) - CRC-32 (ISO-HDLC, i.e. 'zlib crc32') of the payload
//! 12: payload - the rest of the datagram
//! ```
//!
//! There is no length field, the payload length is derived from the datagram's length.
//!
//! ## Windows
//!
//! The sender's window starts at the oldest unacknowledged sequence number ('send base') and
//!  spans `window_size` sequence numbers. The receiver keeps its own 'receive base', the next
//!  sequence number to deliver. It buffers and acknowledges packets up to `window_size` ahead of
//!  that, and re-acknowledges packets before it (their original ACK may have been lost) without
//!  delivering them again.
//!
//! Sequence numbers are compared by their signed 16 bit distance, so the window size must not
//!  exceed half the sequence number space.

pub mod config;
pub mod connection;
pub mod error;
pub mod lossy_channel;
pub mod message_dispatcher;
pub mod packet;
pub mod relay;
pub mod selective_repeat;
pub mod seq_nr;
pub mod socket;
pub mod stats;

#[cfg(test)]
pub mod test_util;
