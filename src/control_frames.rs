//! Bodies of the ACK and NAK frames. They are part of the wire format so that a retransmission
//!  layer can be added without a protocol version change, but the transport in this crate
//!  neither sends nor acts on them: subscribers drop every non-DATA frame.

use anyhow::bail;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckFrame {
    /// All sequence numbers *below* (excluding) this one were received
    pub cumulative_ack: u64,
    /// Bit `n` set means `cumulative_ack + 1 + n` was received as well (selective ACK)
    pub sack_bitmap: u64,
}
impl AckFrame {
    pub const SERIALIZED_LEN: usize = 2 * size_of::<u64>();

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.cumulative_ack);
        buf.put_u64(self.sack_bitmap);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<AckFrame> {
        let cumulative_ack = buf.try_get_u64()?;
        let sack_bitmap = buf.try_get_u64()?;
        Ok(AckFrame { cumulative_ack, sack_bitmap })
    }

    /// The sequence numbers above the cumulative ACK that the bitmap reports as received
    pub fn selectively_acked(&self) -> impl Iterator<Item = u64> + '_ {
        (0..u64::BITS)
            .filter(|bit| self.sack_bitmap & (1 << bit) != 0)
            .filter_map(|bit| self.cumulative_ack.checked_add(1 + bit as u64))
    }
}

/// An inclusive range of sequence numbers requested for re-sending
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NakRange {
    pub start_seq: u64,
    pub end_seq: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NakFrame {
    pub ranges: Vec<NakRange>,
}
impl NakFrame {
    pub fn serialized_len(&self) -> usize {
        size_of::<u16>() + self.ranges.len() * 2 * size_of::<u64>()
    }

    /// NB: A NAK must fit into a single datagram, so callers split longer lists into several
    ///      frames. More than `u16::MAX` ranges is a bug on the caller side.
    pub fn ser(&self, buf: &mut impl BufMut) {
        let count: u16 = self.ranges.len().try_into()
            .expect("NAK frames are limited to u16::MAX ranges");
        buf.put_u16(count);
        for range in &self.ranges {
            buf.put_u64(range.start_seq);
            buf.put_u64(range.end_seq);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<NakFrame> {
        let count = buf.try_get_u16()? as usize;
        if buf.remaining() < count * 2 * size_of::<u64>() {
            bail!("NAK frame declares {} ranges but has only {} bytes left", count, buf.remaining());
        }

        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let start_seq = buf.try_get_u64()?;
            let end_seq = buf.try_get_u64()?;
            if end_seq < start_seq {
                bail!("inverted NAK range {}..={}", start_seq, end_seq);
            }
            ranges.push(NakRange { start_seq, end_seq });
        }
        Ok(NakFrame { ranges })
    }
}
