use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{bail, Context};
use tracing::{debug, info, trace, warn};
use crate::channel::{MessageView, StreamId, Subscription, ANY_STREAM};
use crate::config::{parse_endpoint, UdpConfig};
use crate::frame_header::{FrameHeader, FrameType};
use crate::reordering_buffer::{BufferedMessage, ReorderingBuffer};
use crate::time::now_ns;
use crate::udp::socket::{bind_unicast, multicast_receiver, DatagramSocket};
use crate::udp::ChannelKind;

/// Counters for what happened to received datagrams
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct SubscriptionStats {
    pub datagrams_received: u64,
    /// too short, wrong magic / version / frame type
    pub malformed_frames: u64,
    /// datagram shorter than the header's payload length
    pub truncated_payloads: u64,
    pub checksum_mismatches: u64,
    /// well-formed frames other than data frames
    pub control_frames: u64,
    /// duplicates, and frames outside the reordering window
    pub rejected_sequences: u64,
    /// messages for other streams that were skipped in sequence
    pub filtered_messages: u64,
    pub delivered_messages: u64,
    /// sequence numbers given up by [UdpSubscription::skip_gap]
    pub skipped_sequences: u64,
}

/// Receives datagrams, restores their sequence order and delivers them to the application.
///
/// Each subscription has its own reordering window, so several subscriptions on the same
///  multicast feed progress independently.
pub struct UdpSubscription {
    kind: ChannelKind,
    socket: Arc<dyn DatagramSocket>,
    stream_filter: StreamId,
    reordering_buffer: ReorderingBuffer,
    receive_buf: Vec<u8>,
    max_datagrams_per_poll: usize,
    /// `false` until the window is aligned with the sender's sequence numbers
    synced: bool,
    stats: SubscriptionStats,
}

impl UdpSubscription {
    pub(crate) fn new(kind: ChannelKind, socket: Arc<dyn DatagramSocket>, stream_filter: StreamId, config: &UdpConfig) -> UdpSubscription {
        debug!("creating {:?} subscription for stream {} on {:?}", kind, stream_filter, socket.local_addr().ok());

        UdpSubscription {
            kind,
            socket,
            stream_filter,
            reordering_buffer: ReorderingBuffer::new(config.recv_ring_size),
            receive_buf: vec![0; config.mtu],
            max_datagrams_per_poll: config.max_datagrams_per_poll,
            synced: !config.join_at_first_sequence,
            stats: SubscriptionStats::default(),
        }
    }

    /// A subscription with its own socket, bound to the configured local endpoint
    pub fn point_to_point(config: &UdpConfig) -> anyhow::Result<UdpSubscription> {
        config.validate()?;
        if config.local_endpoint.is_empty() {
            bail!("point-to-point subscription requires a local endpoint");
        }

        let socket = bind_unicast(parse_endpoint(&config.local_endpoint)?)?;
        Ok(Self::new(ChannelKind::PointToPoint, Arc::new(socket), config.stream_id, config))
    }

    /// A subscription with its own socket, joined to the configured multicast group
    pub fn multicast(config: &UdpConfig) -> anyhow::Result<UdpSubscription> {
        config.validate()?;
        let multicast = config.multicast.as_ref()
            .context("multicast subscription requires a multicast configuration")?;

        let socket = multicast_receiver(multicast)?;
        Ok(Self::new(ChannelKind::Multicast, Arc::new(socket), config.stream_id, config))
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.stats
    }

    pub fn stream_filter(&self) -> StreamId {
        self.stream_filter
    }

    /// The sequence number that is due for delivery next
    pub fn next_expected(&self) -> u64 {
        self.reordering_buffer.next_expected()
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Gives up on a missing sequence number if later messages are waiting behind it: delivery
    ///  continues with the lowest buffered message. Returns the number of sequence numbers that
    ///  were given up, 0 if there is no gap or nothing behind it.
    ///
    /// Sequence numbers are never retransmitted, so this is how an application recovers from a
    ///  lost datagram. When to give up is the application's decision.
    pub fn skip_gap(&mut self) -> u64 {
        if self.reordering_buffer.has_ready() {
            return 0;
        }
        let Some(lowest) = self.reordering_buffer.lowest_buffered() else {
            return 0;
        };

        let skipped = lowest - self.reordering_buffer.next_expected();
        self.reordering_buffer.skip_to(lowest);
        self.stats.skipped_sequences += skipped;
        info!("{:?} subscription: skipped {} missing sequence numbers, continuing at #{}", self.kind, skipped, lowest);
        skipped
    }

    /// Parses a datagram, returning `None` for anything that is not a valid data frame
    fn decode(datagram: &[u8], receive_time_ns: u64, stats: &mut SubscriptionStats) -> Option<BufferedMessage> {
        let mut parse_buf = datagram;
        let header = match FrameHeader::deser(&mut parse_buf) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping malformed datagram of {} bytes: {}", datagram.len(), e);
                stats.malformed_frames += 1;
                return None;
            }
        };
        trace!("received {:?}", header);

        if header.frame_type != FrameType::Data {
            debug!("ignoring {:?} frame", header.frame_type);
            stats.control_frames += 1;
            return None;
        }

        let payload_len = header.payload_length as usize;
        if payload_len > parse_buf.len() {
            debug!("dropping {:?}: datagram has only {} payload bytes", header, parse_buf.len());
            stats.truncated_payloads += 1;
            return None;
        }
        let payload = &parse_buf[..payload_len];

        if !header.verify_checksum(payload) {
            warn!("dropping {:?}: checksum mismatch", header);
            stats.checksum_mismatches += 1;
            return None;
        }

        Some(BufferedMessage {
            sequence: header.sequence_number,
            payload: payload.to_vec(),
            stream_id: header.stream_id,
            receive_time_ns,
            end_of_message: header.is_end_of_message(),
        })
    }

    fn accept(&mut self, message: BufferedMessage) {
        if !self.synced {
            info!("{:?} subscription: joining at #{}", self.kind, message.sequence);
            self.reordering_buffer.reset_to(message.sequence);
            self.synced = true;
        }

        if !self.reordering_buffer.insert(message) {
            self.stats.rejected_sequences += 1;
        }
    }

    /// Delivers messages that are ready in sequence, at most `max_messages`
    fn deliver_ready(&mut self, handler: &mut dyn FnMut(&MessageView), max_messages: usize) -> usize {
        let mut delivered = 0;
        while delivered < max_messages {
            let Some(message) = self.reordering_buffer.get_next() else {
                break;
            };
            if self.stream_filter != ANY_STREAM && message.stream_id != self.stream_filter {
                trace!("skipping #{} for stream {}", message.sequence, message.stream_id);
                self.stats.filtered_messages += 1;
                continue;
            }

            handler(&MessageView {
                data: &message.payload,
                stream_id: message.stream_id,
                sequence_number: message.sequence,
                receive_time_ns: message.receive_time_ns,
                end_of_message: message.end_of_message,
            });
            delivered += 1;
        }

        self.stats.delivered_messages += delivered as u64;
        delivered
    }
}

impl Subscription for UdpSubscription {
    fn poll(&mut self, handler: &mut dyn FnMut(&MessageView), max_messages: usize) -> usize {
        let mut delivered = self.deliver_ready(handler, max_messages);

        let mut datagrams_read = 0;
        while delivered < max_messages && datagrams_read < self.max_datagrams_per_poll {
            let len = match self.socket.recv_datagram(&mut self.receive_buf) {
                Ok(len) => len,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. ICMP 'port unreachable' from an earlier send on the same socket
                    debug!("{:?} subscription: error reading from socket: {}", self.kind, e);
                    break;
                }
            };
            datagrams_read += 1;
            self.stats.datagrams_received += 1;

            if let Some(message) = Self::decode(&self.receive_buf[..len], now_ns(), &mut self.stats) {
                self.accept(message);
                delivered += self.deliver_ready(handler, max_messages - delivered);
            }
        }

        delivered
    }

    fn has_data(&self) -> bool {
        self.reordering_buffer.has_ready()
    }
}
