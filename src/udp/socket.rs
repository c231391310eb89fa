use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use anyhow::Context;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace};
use crate::config::MulticastConfig;

/// This is an abstraction for non-blocking datagram I/O, introduced to facilitate mocking the
///  socket away for testing.
#[cfg_attr(test, automock)]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Sends a single datagram without blocking. A full send buffer is reported as
    ///  [io::ErrorKind::WouldBlock].
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> io::Result<usize>;

    /// Reads a single datagram without blocking, returning its length. If there is no datagram,
    ///  this returns [io::ErrorKind::WouldBlock]. Datagrams longer than `buf` are truncated.
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for UdpSocket {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> io::Result<usize> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        self.send_to(buf, to)
    }

    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, from) = self.recv_from(buf)?;
        trace!("UDP socket: received {} bytes from {:?}", len, from);
        Ok(len)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// A non-blocking socket bound to the given address, for receiving point-to-point traffic
pub fn bind_unicast(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    socket.bind(&addr.into())
        .with_context(|| format!("binding UDP socket to {}", addr))?;
    socket.set_nonblocking(true)?;

    let socket: UdpSocket = socket.into();
    info!("bound receive socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// A non-blocking socket on an ephemeral port, for sending to `peer`'s address family (IPv4 if
///  there is no peer)
pub fn bind_sender(peer: Option<SocketAddr>) -> anyhow::Result<UdpSocket> {
    let local: SocketAddr = match peer {
        Some(SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
    };

    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    socket.bind(&local.into())
        .with_context(|| format!("binding UDP send socket to {}", local))?;
    socket.set_nonblocking(true)?;

    let socket: UdpSocket = socket.into();
    debug!("bound send socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// A non-blocking socket for sending to a multicast group, with TTL, loopback and outgoing
///  interface taken from the configuration
pub fn multicast_sender(config: &MulticastConfig) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    socket.set_multicast_ttl_v4(config.ttl)
        .context("setting multicast TTL")?;
    socket.set_multicast_loop_v4(config.loopback)
        .context("setting multicast loopback")?;
    if !config.interface.is_unspecified() {
        socket.set_multicast_if_v4(&config.interface)
            .with_context(|| format!("setting multicast interface {}", config.interface))?;
    }

    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&local.into())
        .context("binding multicast send socket")?;
    socket.set_nonblocking(true)?;

    let socket: UdpSocket = socket.into();
    info!("bound multicast send socket to {:?} for group {:?}", socket.local_addr()?, config.group_addr());
    Ok(socket)
}

/// A non-blocking socket that joined the configured multicast group. Several of these can exist
///  for the same group and port, each receiving every datagram.
pub fn multicast_receiver(config: &MulticastConfig) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("creating UDP socket")?;
    socket.set_reuse_address(true)
        .context("setting SO_REUSEADDR")?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)
        .context("setting SO_REUSEPORT")?;

    // binding to the group address filters out traffic to other groups on the same port, but
    //  is not supported on Windows
    #[cfg(unix)]
    let bind_ip = config.group;
    #[cfg(not(unix))]
    let bind_ip = Ipv4Addr::UNSPECIFIED;

    let local = SocketAddr::from((bind_ip, config.port));
    socket.bind(&local.into())
        .with_context(|| format!("binding multicast receive socket to {}", local))?;
    socket.join_multicast_v4(&config.group, &config.interface)
        .with_context(|| format!("joining multicast group {} on interface {}", config.group, config.interface))?;
    socket.set_nonblocking(true)?;

    let socket: UdpSocket = socket.into();
    info!("joined multicast group {:?} on interface {}", config.group_addr(), config.interface);
    Ok(socket)
}
