use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use anyhow::Context;
use bytes::{BufMut, BytesMut};
use tracing::{debug, trace, warn};
use crate::channel::{Publication, PublishResult, StreamId};
use crate::config::{parse_endpoint, UdpConfig};
use crate::frame_header::FrameHeader;
use crate::time::now_ns;
use crate::udp::socket::{bind_sender, multicast_sender, DatagramSocket};
use crate::udp::ChannelKind;

/// Sends each offered message as a single datagram, numbering messages consecutively from 0.
///
/// There is no retransmission: a datagram that is lost on the network leaves a gap that the
///  receiver has to skip explicitly.
pub struct UdpPublication {
    kind: ChannelKind,
    socket: Arc<dyn DatagramSocket>,
    destination: Option<SocketAddr>,
    stream_id: StreamId,
    next_sequence: AtomicU64,
    max_payload_len: usize,
    with_checksum: bool,
    closed: AtomicBool,
}

impl UdpPublication {
    pub(crate) fn new(kind: ChannelKind, socket: Arc<dyn DatagramSocket>, destination: Option<SocketAddr>, stream_id: StreamId, config: &UdpConfig) -> UdpPublication {
        debug!("creating {:?} publication for stream {} to {:?}", kind, stream_id, destination);

        UdpPublication {
            kind,
            socket,
            destination,
            stream_id,
            next_sequence: AtomicU64::new(0),
            max_payload_len: config.max_payload_len(),
            with_checksum: config.enable_checksum,
            closed: AtomicBool::new(false),
        }
    }

    /// A publication with its own socket, sending to the configured remote endpoint
    pub fn point_to_point(config: &UdpConfig) -> anyhow::Result<UdpPublication> {
        config.validate()?;

        let destination = if config.remote_endpoint.is_empty() {
            None
        }
        else {
            Some(parse_endpoint(&config.remote_endpoint)?)
        };
        let socket = bind_sender(destination)?;
        Ok(Self::new(ChannelKind::PointToPoint, Arc::new(socket), destination, config.stream_id, config))
    }

    /// A publication with its own socket, sending to the configured multicast group
    pub fn multicast(config: &UdpConfig) -> anyhow::Result<UdpPublication> {
        config.validate()?;
        let multicast = config.multicast.as_ref()
            .context("multicast publication requires a multicast configuration")?;

        let socket = multicast_sender(multicast)?;
        Ok(Self::new(ChannelKind::Multicast, Arc::new(socket), Some(multicast.group_addr()), config.stream_id, config))
    }

    /// The stream this publication was created for. `offer` can still send on any stream.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// The sequence number that the next successful `offer` will use
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    /// Hands a reserved sequence number back after a failed send, so that the stream continues
    ///  without a gap. This is only possible if no other send reserved a number in the meantime.
    fn release_sequence(&self, sequence: u64) {
        if self.next_sequence.compare_exchange(sequence.wrapping_add(1), sequence, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("{:?} publication: sequence number #{} is lost because a concurrent send already used a later one - receivers will see a gap", self.kind, sequence);
        }
    }
}

impl Publication for UdpPublication {
    fn offer(&self, payload: &[u8], stream_id: StreamId, end_of_message: bool) -> PublishResult {
        if self.closed.load(Ordering::Acquire) {
            return PublishResult::Closed;
        }
        let Some(destination) = self.destination else {
            debug!("{:?} publication has no destination", self.kind);
            return PublishResult::NotConnected;
        };
        if payload.len() > self.max_payload_len {
            debug!("payload of {} bytes exceeds the maximum of {} bytes per frame", payload.len(), self.max_payload_len);
            return PublishResult::Error;
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        let header = FrameHeader::data(sequence, now_ns(), stream_id, payload, end_of_message, self.with_checksum);

        let mut buf = BytesMut::with_capacity(FrameHeader::SERIALIZED_LEN + payload.len());
        header.ser(&mut buf);
        buf.put_slice(payload);

        trace!("sending {:?} to {:?}", header, destination);
        match self.socket.send_datagram(destination, &buf) {
            Ok(len) if len == buf.len() => PublishResult::Ok,
            Ok(len) => {
                warn!("socket accepted only {} of {} bytes for #{}", len, buf.len(), sequence);
                self.release_sequence(sequence);
                PublishResult::Error
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("send buffer full for #{}", sequence);
                self.release_sequence(sequence);
                PublishResult::Backpressured
            }
            Err(e) => {
                warn!("error sending #{} to {:?}: {}", sequence, destination, e);
                self.release_sequence(sequence);
                PublishResult::Error
            }
        }
    }

    fn available_window(&self) -> u64 {
        u64::MAX
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closed {:?} publication to {:?}", self.kind, self.destination);
        }
    }
}
