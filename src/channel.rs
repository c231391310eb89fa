//! The application-facing abstraction: a [Transport] creates [Publication]s for sending and
//!  [Subscription]s for receiving, independent of whether the underlying channel is
//!  point-to-point or multicast.

use std::fmt::{Debug, Formatter};

pub type StreamId = u32;

/// A subscription created for this stream id delivers messages of all streams
pub const ANY_STREAM: StreamId = 0;

/// The outcome of [Publication::offer]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PublishResult {
    /// The datagram was handed to the socket layer. This is no guarantee of delivery.
    Ok,
    /// The send window or the socket's send buffer is full; retrying later may succeed
    Backpressured,
    /// There is no destination to send to
    NotConnected,
    /// The publication was closed
    Closed,
    /// Any other failure, including a payload too big for a single frame
    Error,
}
impl PublishResult {
    pub fn is_ok(&self) -> bool {
        *self == PublishResult::Ok
    }
}

/// A delivered message, borrowed from the subscription for the duration of a single handler
///  call. Handlers copy whatever they need to keep.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct MessageView<'a> {
    pub data: &'a [u8],
    pub stream_id: StreamId,
    pub sequence_number: u64,
    /// nanoseconds since the UNIX epoch at which the datagram was read from the socket
    pub receive_time_ns: u64,
    pub end_of_message: bool,
}
impl MessageView<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
impl Debug for MessageView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MSG{{#{}@{}:{}b{}}}", self.sequence_number, self.stream_id, self.data.len(), if self.end_of_message { ",EOM" } else { "" })
    }
}

/// Send side of a channel.
///
/// Publications can be shared between threads: sequence numbers are assigned atomically, so
///  concurrent `offer` calls each get their own number.
pub trait Publication: Send + Sync {
    /// Sends a single message as one datagram. This never blocks; the result says whether the
    ///  socket accepted the datagram, not whether it arrived.
    fn offer(&self, payload: &[u8], stream_id: StreamId, end_of_message: bool) -> PublishResult;

    /// Remaining send capacity. There is no flow control, so this is unlimited for now.
    fn available_window(&self) -> u64;

    /// Subsequent offers return [PublishResult::Closed]
    fn close(&self);
}

/// Receive side of a channel.
///
/// `poll` takes `&mut self`: a subscription is polled by one thread at a time. Sharing it
///  between threads requires the caller to serialize access.
pub trait Subscription: Send {
    /// Delivers up to `max_messages` messages to `handler` in sequence order, reading as many
    ///  datagrams from the socket as are available without blocking. Returns the number of
    ///  delivered messages, 0 if nothing was available.
    ///
    /// Every call is a finite batch; messages that do not fit into it stay buffered for the next
    ///  call.
    fn poll(&mut self, handler: &mut dyn FnMut(&MessageView), max_messages: usize) -> usize;

    /// `true` if a message is ready for delivery without reading from the socket
    fn has_data(&self) -> bool;
}

/// Factory for publications and subscriptions. An empty endpoint refers to the endpoint in the
///  transport's configuration.
pub trait Transport: Send + Sync {
    fn create_publication(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Publication>>;

    fn create_subscription(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Subscription>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::ok(PublishResult::Ok, true)]
    #[case::backpressured(PublishResult::Backpressured, false)]
    #[case::not_connected(PublishResult::NotConnected, false)]
    #[case::closed(PublishResult::Closed, false)]
    #[case::error(PublishResult::Error, false)]
    fn test_publish_result_is_ok(#[case] result: PublishResult, #[case] expected: bool) {
        assert_eq!(result.is_ok(), expected);
    }

    #[rstest]
    #[case::eom(true, "MSG{#12@3:5b,EOM}")]
    #[case::partial(false, "MSG{#12@3:5b}")]
    fn test_message_view_debug(#[case] end_of_message: bool, #[case] expected: &str) {
        let view = MessageView {
            data: b"hello",
            stream_id: 3,
            sequence_number: 12,
            receive_time_ns: 0,
            end_of_message,
        };
        assert_eq!(format!("{:?}", view), expected);
        assert_eq!(view.len(), 5);
        assert!(!view.is_empty());
    }
}
