//! Sequenced message delivery over UDP, for one publisher and one or more subscribers
//!  (point-to-point or multicast).
//!
//! The transport restores *order*, it does not restore *loss*: every frame carries a per-channel
//!  sequence number, subscribers buffer frames that arrive early and hand them to the application
//!  strictly in sequence. A frame that never arrives stalls delivery until the application
//!  decides to skip the gap (see [udp::UdpSubscription::skip_gap]).
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages*, one message per UDP datagram
//! * Non-blocking, single-threaded operation: `offer` sends one datagram, `poll` drains whatever
//!    is there and returns immediately. There are no internal threads, timers or runtimes - the
//!    application owns the loop
//! * Bounded memory on the receiving side: the reordering window has a fixed capacity, and
//!    frames too far ahead of the next expected sequence number are dropped
//! * Optional CRC-32C payload checksum, computed with hardware support where the CPU has it
//! * Multicast feeds: any number of subscribers join a group and each of them sees every
//!    message in order
//!
//! ## Frame
//!
//! Every datagram is a fixed-length header followed by the payload. All numbers are in network
//!  byte order (BE):
//!
//! ```ascii
//!  0: magic (u32) - 0x48535544
//!  4: protocol version (u8) - 1
//!  5: frame type (u8):
//!     * 0 DATA
//!     * 1 ACK
//!     * 2 NAK
//!     * 3 HEARTBEAT
//!     * 4 HELLO
//!     * 5 RESET
//!  6: flags (u16):
//!     * bit 0: end of message
//!     * bit 1: checksum present
//!  8: sequence number (u64) - per publication, starting at 0
//! 16: send timestamp (u64) - nanoseconds since the UNIX epoch
//! 24: stream id (u32)
//! 28: fragment index (u16) - always 0
//! 30: fragment count (u16) - always 1
//! 32: payload length (u16)
//! 34: reserved (u16)
//! 36: CRC-32C of the payload (u32), 0 if no checksum is present
//! 40: payload
//! ```
//!
//! Only DATA frames are produced and consumed. ACK and NAK bodies are defined in
//!  [control_frames] for a future retransmission layer; fragmentation fields are reserved.
//!
//! ## Related:
//! * Aeron
//!   * publication / subscription with `offer` and `poll` - the API shape is borrowed from there
//!   * unlike Aeron, there is no retransmission and no flow control

pub mod channel;
pub mod checksum;
pub mod config;
pub mod control_frames;
pub mod frame_header;
pub mod reordering_buffer;
pub mod udp;
mod time;
