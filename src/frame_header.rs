use std::fmt::{Debug, Formatter};
use anyhow::{anyhow, bail};
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::checksum::Checksum;

#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    Ack = 1,
    Nak = 2,
    Heartbeat = 3,
    Hello = 4,
    Reset = 5,
}

bitflags! {
    #[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
    pub struct FrameFlags: u16 {
        const END_OF_MESSAGE   = 0b0000_0000_0000_0001;
        const CHECKSUM_PRESENT = 0b0000_0000_0000_0010;
    }
}

/// The fixed-length header in front of every payload. See the crate documentation for the
///  wire layout.
#[derive(Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub sequence_number: u64,
    pub send_time_ns: u64,
    pub stream_id: u32,
    pub fragment_index: u16,
    pub fragments_total: u16,
    pub payload_length: u16,
    pub checksum: Checksum,
}
impl Debug for FrameHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FRAME{{{:?}#{}@{}:{}b", self.frame_type, self.sequence_number, self.stream_id, self.payload_length)?;
        if self.flags.contains(FrameFlags::END_OF_MESSAGE) {
            write!(f, ",EOM")?;
        }
        if self.flags.contains(FrameFlags::CHECKSUM_PRESENT) {
            write!(f, ",CRC={:?}", self.checksum)?;
        }
        write!(f, "}}")
    }
}

impl FrameHeader {
    pub const MAGIC: u32 = 0x4853_5544;
    pub const PROTOCOL_VERSION_1: u8 = 1;

    pub const SERIALIZED_LEN: usize =
        size_of::<u64>()      // magic, version, frame type, flags
        + size_of::<u64>()    // sequence number
        + size_of::<u64>()    // send timestamp
        + size_of::<u32>()    // stream id
        + size_of::<u16>()    // fragment index
        + size_of::<u16>()    // fragments total
        + size_of::<u16>()    // payload length
        + size_of::<u16>()    // reserved
        + size_of::<u32>();   // checksum

    /// Header for a single-datagram data frame. The checksum is filled in only if requested.
    pub fn data(sequence_number: u64, send_time_ns: u64, stream_id: u32, payload: &[u8], end_of_message: bool, with_checksum: bool) -> FrameHeader {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::END_OF_MESSAGE, end_of_message);
        flags.set(FrameFlags::CHECKSUM_PRESENT, with_checksum);

        FrameHeader {
            frame_type: FrameType::Data,
            flags,
            sequence_number,
            send_time_ns,
            stream_id,
            fragment_index: 0,
            fragments_total: 1,
            payload_length: payload.len().try_into().unwrap_or(u16::MAX),
            checksum: if with_checksum { Checksum::of(payload) } else { Checksum::NONE },
        }
    }

    pub fn is_end_of_message(&self) -> bool {
        self.flags.contains(FrameFlags::END_OF_MESSAGE)
    }

    /// Verifies the payload against the checksum if the frame carries one. Frames without a
    ///  checksum always pass.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        !self.flags.contains(FrameFlags::CHECKSUM_PRESENT) || Checksum::of(payload) == self.checksum
    }

    fn identity_word(&self) -> u64 {
        ((Self::MAGIC as u64) << 32)
            | ((Self::PROTOCOL_VERSION_1 as u64) << 24)
            | ((u8::from(self.frame_type) as u64) << 16)
            | self.flags.bits() as u64
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.identity_word());
        buf.put_u64(self.sequence_number);
        buf.put_u64(self.send_time_ns);
        buf.put_u32(self.stream_id);
        buf.put_u16(self.fragment_index);
        buf.put_u16(self.fragments_total);
        buf.put_u16(self.payload_length);
        buf.put_u16(0); // reserved
        buf.put_u32(self.checksum.0);
    }

    /// Parses and validates a header. Nothing of a header that fails to parse can be trusted,
    ///  so the result is all or nothing.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("frame of {} bytes is shorter than the header", buf.remaining());
        }

        let identity = buf.try_get_u64()?;

        let magic = (identity >> 32) as u32;
        if magic != Self::MAGIC {
            bail!("wrong magic {:08x}", magic);
        }
        let version = (identity >> 24) as u8;
        if version != Self::PROTOCOL_VERSION_1 {
            bail!("unsupported protocol version {}", version);
        }
        let raw_frame_type = (identity >> 16) as u8;
        let frame_type = FrameType::try_from(raw_frame_type)
            .map_err(|_| anyhow!("unsupported frame type {}", raw_frame_type))?;
        let flags = FrameFlags::from_bits_truncate(identity as u16);

        let sequence_number = buf.try_get_u64()?;
        let send_time_ns = buf.try_get_u64()?;
        let stream_id = buf.try_get_u32()?;
        let fragment_index = buf.try_get_u16()?;
        let fragments_total = buf.try_get_u16()?;
        let payload_length = buf.try_get_u16()?;
        let _reserved = buf.try_get_u16()?;
        let checksum = Checksum(buf.try_get_u32()?);

        Ok(FrameHeader {
            frame_type,
            flags,
            sequence_number,
            send_time_ns,
            stream_id,
            fragment_index,
            fragments_total,
            payload_length,
            checksum,
        })
    }
}
