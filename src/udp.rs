//! UDP implementation of the [channel](crate::channel) abstraction.
//!
//! There are two shapes of channel:
//!
//! * point-to-point ([UdpReliableTransport]): subscriptions read from a socket bound to a local
//!    endpoint, publications send to a fixed remote endpoint
//! * multicast feed ([MulticastFeedTransport]): publications send to a multicast group, and every
//!    subscription has its own socket that joins the group, so any number of subscribers receive
//!    every message
//!
//! Both use the same [UdpPublication] and [UdpSubscription]; they differ only in how the sockets
//!  are set up. Sockets are non-blocking, and there is no background activity: all I/O happens
//!  inside `offer` and `poll`.

pub mod socket;
mod publication;
mod subscription;
mod transport;
mod multicast;

pub use multicast::MulticastFeedTransport;
pub use publication::UdpPublication;
pub use subscription::{SubscriptionStats, UdpSubscription};
pub use transport::UdpReliableTransport;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChannelKind {
    PointToPoint,
    Multicast,
}
