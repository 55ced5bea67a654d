use crate::error::PacketError;
use crate::seq_nr::SeqNr;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::fmt::Debug;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct PacketFlags: u8 {
        /// pure acknowledgment, the payload is empty and `ack` is the acknowledged sequence number
        const ACK = 0b0000_0001;
    }
}

/// A single datagram's worth of protocol data. Packets are immutable once created; the
///  checksum is always derived from the payload.
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub flags: PacketFlags,
    pub connection_id: u16,
    pub sequence: SeqNr,
    pub ack: SeqNr,
    pub checksum: u32,
    pub payload: Bytes,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ack() {
            write!(f, "PCKT{{V{}@{}:ACK({})}}", self.version, self.connection_id, self.ack)
        }
        else {
            write!(f, "PCKT{{V{}@{}:SEQ({}):{}b}}", self.version, self.connection_id, self.sequence, self.payload.len())
        }
    }
}

impl Packet {
    pub const PROTOCOL_VERSION_1: u8 = 1;

    /// version (1) + flags (1) + connection id (2) + sequence (2) + ack (2) + checksum (4)
    pub const HEADER_LEN: usize = 12;

    pub fn new(
        sequence: SeqNr,
        ack: SeqNr,
        payload: Bytes,
        connection_id: u16,
        version: u8,
        flags: PacketFlags,
    ) -> Packet {
        Packet {
            version,
            flags,
            connection_id,
            sequence,
            ack,
            checksum: Self::checksum_for(&payload),
            payload,
        }
    }

    pub fn data(connection_id: u16, sequence: SeqNr, payload: Bytes) -> Packet {
        Self::new(sequence, SeqNr::ZERO, payload, connection_id, Self::PROTOCOL_VERSION_1, PacketFlags::empty())
    }

    /// NB: The sequence number of an ACK packet carries no meaning, it is always 0
    pub fn ack(connection_id: u16, acked: SeqNr) -> Packet {
        Self::new(SeqNr::ZERO, acked, Bytes::new(), connection_id, Self::PROTOCOL_VERSION_1, PacketFlags::ACK)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(PacketFlags::ACK)
    }

    pub fn checksum_for(payload: &[u8]) -> u32 {
        CRC32.checksum(payload)
    }

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.connection_id);
        buf.put_u16(self.sequence.to_raw());
        buf.put_u16(self.ack.to_raw());
        buf.put_u32(self.checksum);
        buf.put_slice(&self.payload);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses a complete datagram. The payload is everything after the header, and its
    ///  checksum must match the header's. Nothing else is validated here.
    pub fn decode(datagram: &[u8]) -> Result<Packet, PacketError> {
        if datagram.len() < Self::HEADER_LEN {
            return Err(PacketError::Truncated { len: datagram.len() });
        }

        let mut buf = datagram;
        let version = buf.get_u8();
        let flags = PacketFlags::from_bits_retain(buf.get_u8());
        let connection_id = buf.get_u16();
        let sequence = SeqNr::from_raw(buf.get_u16());
        let ack = SeqNr::from_raw(buf.get_u16());
        let checksum = buf.get_u32();

        let actual = Self::checksum_for(buf);
        if actual != checksum {
            return Err(PacketError::ChecksumMismatch { expected: checksum, actual });
        }

        Ok(Packet {
            version,
            flags,
            connection_id,
            sequence,
            ack,
            checksum,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
