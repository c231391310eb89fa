use tracing::{debug, trace, warn};
use crate::channel::StreamId;

/// A message held in the reordering buffer, together with the metadata that is handed to the
///  application when it is delivered.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BufferedMessage {
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub stream_id: StreamId,
    pub receive_time_ns: u64,
    pub end_of_message: bool,
}
impl BufferedMessage {
    pub fn new(sequence: u64, payload: Vec<u8>, stream_id: StreamId) -> BufferedMessage {
        BufferedMessage {
            sequence,
            payload,
            stream_id,
            receive_time_ns: 0,
            end_of_message: true,
        }
    }
}

/// Restores sequence order for packets that arrive out of order.
///
/// The buffer is a fixed-capacity ring of slots covering the window
///  `next_expected .. next_expected + capacity`. A packet is stored in the slot at
///  `(head + (sequence - next_expected)) % capacity`, and the slot at `head` always corresponds
///  to `next_expected`. Delivering a packet advances both.
///
/// Packets are released strictly in sequence: if `next_expected` never arrives, nothing after
///  it is released either, no matter how many later packets are buffered. Skipping a gap is
///  the caller's decision (see [ReorderingBuffer::skip_to]).
///
/// Packets outside the window are rejected rather than growing the buffer, trading reordering
///  depth for bounded memory.
pub struct ReorderingBuffer {
    slots: Vec<Option<BufferedMessage>>,
    next_expected: u64,
    head: usize,
    count: usize,
}

impl ReorderingBuffer {
    pub fn new(capacity: usize) -> ReorderingBuffer {
        assert!(capacity > 0, "reordering buffer capacity must be positive");

        ReorderingBuffer {
            slots: (0..capacity).map(|_| None).collect(),
            next_expected: 0,
            head: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// number of buffered packets waiting for delivery
    pub fn size(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Returns `true` if the packet was stored, `false` if it was rejected as stale, duplicate or
    ///  too far ahead.
    pub fn add(&mut self, sequence: u64, payload: Vec<u8>, stream_id: StreamId) -> bool {
        self.insert(BufferedMessage::new(sequence, payload, stream_id))
    }

    /// Same as [ReorderingBuffer::add], for a message that carries receive metadata
    pub fn insert(&mut self, message: BufferedMessage) -> bool {
        let sequence = message.sequence;

        let Some(pos) = self.slot_index(sequence) else {
            if sequence < self.next_expected {
                trace!("packet #{} is below the next expected #{} - rejecting", sequence, self.next_expected);
            }
            else {
                debug!("packet #{} is too far ahead of the next expected #{} for a window of {} - rejecting", sequence, self.next_expected, self.capacity());
            }
            return false;
        };

        match &self.slots[pos] {
            Some(existing) if existing.sequence == sequence => {
                trace!("duplicate packet #{} - rejecting", sequence);
                return false;
            }
            Some(existing) => {
                // every buffered sequence lies in the window and the slot mapping is one-to-one,
                //  so this should never happen
                warn!("slot for packet #{} holds packet #{} - replacing it", sequence, existing.sequence);
            }
            None => {
                self.count += 1;
            }
        }

        self.slots[pos] = Some(message);
        true
    }

    /// Removes and returns the packet for `next_expected` if it is buffered
    pub fn get_next(&mut self) -> Option<BufferedMessage> {
        if !self.has_ready() {
            return None;
        }

        let message = self.slots[self.head].take()?;
        self.advance();
        self.count -= 1;
        Some(message)
    }

    pub fn has_ready(&self) -> bool {
        matches!(&self.slots[self.head], Some(m) if m.sequence == self.next_expected)
    }

    /// The lowest sequence number currently buffered, if any
    pub fn lowest_buffered(&self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }

        (0..self.capacity())
            .map(|offs| (self.head + offs) % self.capacity())
            .find_map(|pos| self.slots[pos].as_ref().map(|m| m.sequence))
    }

    /// Gives up on everything below `sequence`: buffered packets below it are discarded, and
    ///  `next_expected` moves forward to it. Returns the number of discarded packets.
    ///
    /// This is never done implicitly - it is the caller's way of recovering from a packet that
    ///  is lost for good. A target at or below `next_expected` does nothing.
    pub fn skip_to(&mut self, sequence: u64) -> usize {
        if sequence <= self.next_expected {
            return 0;
        }

        let distance = sequence - self.next_expected;
        if distance >= self.capacity() as u64 {
            // the entire window is skipped
            let discarded = self.count;
            self.reset_to(sequence);
            debug!("skipped to #{}, discarding {} buffered packets", sequence, discarded);
            return discarded;
        }

        let mut discarded = 0;
        for _ in 0..distance {
            if self.slots[self.head].take().is_some() {
                discarded += 1;
                self.count -= 1;
            }
            self.advance();
        }
        debug!("skipped to #{}, discarding {} buffered packets", sequence, discarded);
        discarded
    }

    /// Discards all buffered packets and restarts the window at `sequence`
    pub fn reset_to(&mut self, sequence: u64) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.next_expected = sequence;
        self.head = 0;
        self.count = 0;
    }

    /// Discards all buffered packets and restarts the window at sequence number 0
    pub fn clear(&mut self) {
        self.reset_to(0);
    }

    fn slot_index(&self, sequence: u64) -> Option<usize> {
        let offset = sequence.checked_sub(self.next_expected)?;
        if offset >= self.capacity() as u64 {
            return None;
        }
        Some((self.head + offset as usize) % self.capacity())
    }

    fn advance(&mut self) {
        self.head = (self.head + 1) % self.capacity();
        self.next_expected += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rstest::rstest;

    fn drain(buffer: &mut ReorderingBuffer) -> Vec<u64> {
        let mut result = Vec::new();
        while let Some(m) = buffer.get_next() {
            result.push(m.sequence);
        }
        result
    }

    #[test]
    fn test_initial_state() {
        let buffer = ReorderingBuffer::new(4);
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(buffer.next_expected(), 0);
        assert!(buffer.is_empty());
        assert!(!buffer.has_ready());
        assert_eq!(buffer.lowest_buffered(), None);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity() {
        ReorderingBuffer::new(0);
    }

    #[test]
    fn test_in_sequence() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(0, vec![1, 2, 3], 0));
        assert!(buffer.add(1, vec![4, 5, 6], 1));
        assert_eq!(buffer.size(), 2);
        assert!(buffer.has_ready());

        let first = buffer.get_next().unwrap();
        assert_eq!(first.payload, vec![1, 2, 3]);
        assert_eq!(first.stream_id, 0);
        assert_eq!(buffer.next_expected(), 1);

        let second = buffer.get_next().unwrap();
        assert_eq!(second.payload, vec![4, 5, 6]);
        assert_eq!(second.stream_id, 1);
        assert_eq!(buffer.next_expected(), 2);

        assert_eq!(buffer.size(), 0);
        assert!(!buffer.has_ready());
        assert!(buffer.get_next().is_none());
    }

    #[test]
    fn test_size_counts_packets_waiting_for_delivery() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(0, vec![0], 0));
        assert!(buffer.add(2, vec![2], 0));
        assert_eq!(buffer.size(), 2);

        assert!(buffer.get_next().is_some());
        assert_eq!(buffer.size(), 1);
        assert!(!buffer.is_empty());

        assert!(buffer.add(1, vec![1], 0));
        assert_eq!(drain(&mut buffer), vec![1, 2]);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_out_of_order() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(0, vec![1, 2, 3], 0));
        assert!(buffer.add(2, vec![7, 8, 9], 2));
        assert!(buffer.add(1, vec![4, 5, 6], 3));
        assert_eq!(buffer.size(), 3);

        assert_eq!(buffer.get_next().unwrap().payload, vec![1, 2, 3]);
        assert_eq!(buffer.get_next().unwrap().payload, vec![4, 5, 6]);
        let third = buffer.get_next().unwrap();
        assert_eq!(third.payload, vec![7, 8, 9]);
        assert_eq!(third.stream_id, 2);

        assert_eq!(buffer.size(), 0);
        assert!(!buffer.has_ready());
    }

    #[test]
    fn test_duplicate() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(0, vec![1, 2, 3], 0));
        assert!(!buffer.add(0, vec![1, 2, 3], 0));
        assert_eq!(buffer.size(), 1);
        assert!(buffer.has_ready());

        // a duplicate does not replace the original
        assert!(!buffer.add(0, vec![9], 0));
        assert_eq!(buffer.get_next().unwrap().payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_ahead_of_gap() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(2, vec![2], 0));
        assert!(!buffer.add(2, vec![2], 0));
        assert_eq!(buffer.size(), 1);
        assert!(!buffer.has_ready());
    }

    #[test]
    fn test_stale() {
        let mut buffer = ReorderingBuffer::new(8);

        for seq in 0..=5 {
            assert!(buffer.add(seq, vec![1, 2, 3], 0));
        }
        assert_eq!(drain(&mut buffer), vec![0, 1, 2, 3, 4, 5]);

        assert!(!buffer.add(4, vec![1, 2, 3], 0));
        assert!(!buffer.add(5, vec![1, 2, 3], 0));
        assert_eq!(buffer.size(), 0);
        assert!(buffer.add(6, vec![1, 2, 3], 0));
    }

    #[rstest]
    #[case::at_start(0)]
    #[case::after_delivery(5)]
    #[case::after_wrap_around(13)]
    fn test_capacity_bound(#[case] delivered: u64) {
        let mut buffer = ReorderingBuffer::new(4);
        for seq in 0..delivered {
            assert!(buffer.add(seq, vec![], 0));
            assert!(buffer.get_next().is_some());
        }

        let next = buffer.next_expected();
        assert_eq!(next, delivered);
        assert!(!buffer.add(next + 4, vec![], 0));
        assert!(!buffer.add(next + 100, vec![], 0));
        assert!(!buffer.add(u64::MAX, vec![], 0));
        assert!(buffer.add(next + 3, vec![], 0));
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_gap_is_not_skipped() {
        let mut buffer = ReorderingBuffer::new(4);

        assert!(buffer.add(1, vec![1], 0));
        assert!(buffer.add(2, vec![2], 0));
        assert!(buffer.add(3, vec![3], 0));
        assert_eq!(buffer.size(), 3);

        assert!(!buffer.has_ready());
        assert!(buffer.get_next().is_none());
        assert_eq!(buffer.next_expected(), 0);

        assert!(buffer.add(0, vec![0], 0));
        assert_eq!(drain(&mut buffer), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = ReorderingBuffer::new(4);

        for seq in 0..3 {
            buffer.add(seq, vec![1, 2, 3], 0);
        }
        buffer.get_next();
        buffer.add(5, vec![1], 0);
        assert_eq!(buffer.size(), 2);

        buffer.clear();

        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.next_expected(), 0);
        assert!(!buffer.has_ready());
        assert!(buffer.add(0, vec![1], 0));
        assert!(buffer.has_ready());
    }

    #[test]
    fn test_insert_keeps_metadata() {
        let mut buffer = ReorderingBuffer::new(4);
        let message = BufferedMessage {
            sequence: 0,
            payload: b"hello".to_vec(),
            stream_id: 7,
            receive_time_ns: 1234,
            end_of_message: false,
        };

        assert!(buffer.insert(message.clone()));
        assert_eq!(buffer.get_next(), Some(message));
    }

    #[rstest]
    #[case::capacity_1(1)]
    #[case::capacity_4(4)]
    #[case::capacity_16(16)]
    #[case::capacity_1024(1024)]
    fn test_random_arrival_within_window(#[case] capacity: usize) {
        let mut rng = StdRng::seed_from_u64(capacity as u64);
        let mut buffer = ReorderingBuffer::new(capacity);
        let mut delivered = Vec::new();

        // blocks of `capacity` packets arrive in random order, always within the window
        for block in 0..10u64 {
            let mut seqs = (block * capacity as u64 .. (block+1) * capacity as u64).collect::<Vec<_>>();
            seqs.shuffle(&mut rng);
            for seq in seqs {
                assert!(buffer.add(seq, seq.to_be_bytes().to_vec(), 0));
            }
            while let Some(m) = buffer.get_next() {
                assert_eq!(m.payload, m.sequence.to_be_bytes().to_vec());
                delivered.push(m.sequence);
            }
        }

        assert_eq!(delivered, (0..10 * capacity as u64).collect::<Vec<_>>());
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case::empty(vec![], None)]
    #[case::ready(vec![0, 2], Some(0))]
    #[case::gap(vec![3, 1, 2], Some(1))]
    fn test_lowest_buffered(#[case] seqs: Vec<u64>, #[case] expected: Option<u64>) {
        let mut buffer = ReorderingBuffer::new(4);
        for seq in seqs {
            buffer.add(seq, vec![], 0);
        }
        assert_eq!(buffer.lowest_buffered(), expected);
    }

    #[test]
    fn test_lowest_buffered_after_wrap_around() {
        let mut buffer = ReorderingBuffer::new(4);
        for seq in 0..3 {
            buffer.add(seq, vec![], 0);
        }
        assert_eq!(drain(&mut buffer), vec![0, 1, 2]);

        buffer.add(5, vec![], 0);
        buffer.add(4, vec![], 0);
        assert_eq!(buffer.lowest_buffered(), Some(4));
    }

    #[test]
    fn test_skip_to_inside_window() {
        let mut buffer = ReorderingBuffer::new(8);
        buffer.add(1, vec![1], 0);
        buffer.add(3, vec![3], 0);
        buffer.add(4, vec![4], 0);

        assert_eq!(buffer.skip_to(3), 1);
        assert_eq!(buffer.next_expected(), 3);
        assert_eq!(buffer.size(), 2);
        assert_eq!(drain(&mut buffer), vec![3, 4]);

        // skipped packets are stale now
        assert!(!buffer.add(2, vec![2], 0));
    }

    #[test]
    fn test_skip_to_beyond_window() {
        let mut buffer = ReorderingBuffer::new(4);
        buffer.add(1, vec![1], 0);
        buffer.add(2, vec![2], 0);

        assert_eq!(buffer.skip_to(100), 2);
        assert_eq!(buffer.next_expected(), 100);
        assert!(buffer.is_empty());
        assert!(buffer.add(103, vec![], 0));
        assert!(!buffer.add(104, vec![], 0));
        assert!(buffer.add(100, vec![], 0));
        assert_eq!(drain(&mut buffer), vec![100]);
    }

    #[rstest]
    #[case::same(5)]
    #[case::below(2)]
    fn test_skip_to_backwards_is_noop(#[case] target: u64) {
        let mut buffer = ReorderingBuffer::new(4);
        buffer.skip_to(5);
        buffer.add(6, vec![], 0);

        assert_eq!(buffer.skip_to(target), 0);
        assert_eq!(buffer.next_expected(), 5);
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_reset_to() {
        let mut buffer = ReorderingBuffer::new(4);
        buffer.add(0, vec![], 0);
        buffer.add(2, vec![], 0);

        buffer.reset_to(1000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_expected(), 1000);
        assert!(!buffer.add(999, vec![], 0));
        assert!(buffer.add(1000, vec![], 0));
        assert!(buffer.has_ready());
    }
}
