use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use anyhow::{bail, Context};
use crate::channel::StreamId;
use crate::frame_header::FrameHeader;

/// The largest UDP payload that fits into an IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = 65_507;

#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// `"ip:port"` to bind the receive socket to, `":port"` for all interfaces. Empty for a
    ///  send-only transport.
    pub local_endpoint: String,
    /// `"ip:port"` of the peer that point-to-point publications send to. Empty means that
    ///  publications are not connected unless they are created with an explicit endpoint.
    pub remote_endpoint: String,

    pub multicast: Option<MulticastConfig>,

    /// The stream that the feed constructors publish on and filter for
    pub stream_id: StreamId,

    /// Upper bound for the size of a datagram, header included. This is the UDP payload size,
    ///  i.e. it does not include IP and UDP headers - with full Ethernet frames and no optional
    ///  IP headers, the largest unfragmented value is `1500 - 20 - 8 = 1472` for IPv4.
    ///
    /// Datagrams bigger than this are truncated by the receiver and then dropped.
    pub mtu: usize,

    /// If set, publications compute a CRC-32C over each payload, and subscribers verify it.
    ///  Subscribers verify every frame that carries a checksum, regardless of this setting.
    pub enable_checksum: bool,

    /// The capacity of each subscription's reordering window, in messages
    pub recv_ring_size: usize,
    /// Reserved for a send window with flow control
    pub tx_ring_size: usize,
    /// Reserved for retransmission
    pub retransmit_ring_size: usize,

    /// Upper bound for the number of datagrams a single `poll` reads from the socket. This
    ///  bounds the work per call when datagrams deliver nothing, e.g. traffic for other streams
    ///  or corrupted frames.
    pub max_datagrams_per_poll: usize,

    /// If set, a subscription that has not delivered anything yet starts at the sequence number
    ///  of the first data frame it sees rather than at 0. This allows joining a feed that is
    ///  already running.
    pub join_at_first_sequence: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            local_endpoint: String::new(),
            remote_endpoint: String::new(),
            multicast: None,
            stream_id: 1,
            mtu: 1500,
            enable_checksum: false,
            recv_ring_size: 1024,
            tx_ring_size: 1 << 16,
            retransmit_ring_size: 1 << 15,
            max_datagrams_per_poll: 1024,
            join_at_first_sequence: false,
        }
    }
}

impl UdpConfig {
    pub fn point_to_point(local_endpoint: &str, remote_endpoint: &str) -> UdpConfig {
        UdpConfig {
            local_endpoint: local_endpoint.to_string(),
            remote_endpoint: remote_endpoint.to_string(),
            ..UdpConfig::default()
        }
    }

    pub fn multicast(multicast: MulticastConfig) -> UdpConfig {
        UdpConfig {
            multicast: Some(multicast),
            ..UdpConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu <= FrameHeader::SERIALIZED_LEN {
            bail!("MTU of {} cannot hold a {} byte frame header and a payload", self.mtu, FrameHeader::SERIALIZED_LEN);
        }
        if self.mtu > MAX_UDP_PAYLOAD {
            bail!("MTU of {} exceeds the maximum UDP payload of {}", self.mtu, MAX_UDP_PAYLOAD);
        }
        if self.recv_ring_size == 0 {
            bail!("receive ring size must be positive");
        }
        if self.tx_ring_size == 0 {
            bail!("send ring size must be positive");
        }
        if self.retransmit_ring_size == 0 {
            bail!("retransmit ring size must be positive");
        }
        if self.max_datagrams_per_poll == 0 {
            bail!("datagrams per poll must be positive");
        }

        if !self.local_endpoint.is_empty() {
            parse_endpoint(&self.local_endpoint)
                .context("invalid local endpoint")?;
        }
        if !self.remote_endpoint.is_empty() {
            parse_endpoint(&self.remote_endpoint)
                .context("invalid remote endpoint")?;
        }
        if let Some(multicast) = &self.multicast {
            multicast.validate()?;
        }

        Ok(())
    }

    /// The largest payload that fits into a single frame
    pub fn max_payload_len(&self) -> usize {
        (self.mtu.saturating_sub(FrameHeader::SERIALIZED_LEN))
            .min(u16::MAX as usize)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// The local interface for sending and for joining the group, `0.0.0.0` to let the OS choose
    pub interface: Ipv4Addr,
    pub ttl: u32,
    /// Whether datagrams sent by a publication are looped back to subscribers on the same host
    pub loopback: bool,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        MulticastConfig {
            group: Ipv4Addr::new(239, 1, 1, 1),
            port: 8170,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            loopback: true,
        }
    }
}

impl MulticastConfig {
    pub fn new(group: Ipv4Addr, port: u16) -> MulticastConfig {
        MulticastConfig {
            group,
            port,
            ..MulticastConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.group.is_multicast() {
            bail!("{} is not a multicast address", self.group);
        }
        if self.port == 0 {
            bail!("multicast port must not be 0");
        }
        if self.ttl > 255 {
            bail!("multicast TTL of {} exceeds 255", self.ttl);
        }
        Ok(())
    }

    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::from((self.group, self.port))
    }

    /// Copy of this configuration with group and port taken from an `"ip:port"` endpoint
    pub fn with_endpoint(&self, endpoint: &str) -> anyhow::Result<MulticastConfig> {
        let addr = parse_endpoint(endpoint)?;
        let IpAddr::V4(group) = addr.ip() else {
            bail!("multicast endpoint {} is not IPv4", endpoint);
        };

        let result = MulticastConfig {
            group,
            port: addr.port(),
            ..self.clone()
        };
        result.validate()?;
        Ok(result)
    }
}

/// Parses `"ip:port"`, `"[ipv6]:port"` or `":port"` (all IPv4 interfaces)
pub fn parse_endpoint(endpoint: &str) -> anyhow::Result<SocketAddr> {
    let endpoint = endpoint.trim();
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let Some((host, port)) = endpoint.rsplit_once(':') else {
        bail!("endpoint '{}' is not of the form 'ip:port'", endpoint);
    };
    let port = port.parse::<u16>()
        .with_context(|| format!("invalid port in endpoint '{}'", endpoint))?;

    let ip = match host {
        "" | "*" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        _ => host.parse::<IpAddr>()
            .with_context(|| format!("invalid IP address in endpoint '{}'", endpoint))?,
    };
    Ok(SocketAddr::new(ip, port))
}
