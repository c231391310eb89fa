use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{anyhow, Context};
use tracing::{debug, info};
use crate::channel::{Publication, StreamId, Subscription, Transport};
use crate::config::{parse_endpoint, UdpConfig};
use crate::udp::socket::{bind_sender, bind_unicast, DatagramSocket};
use crate::udp::{ChannelKind, UdpPublication, UdpSubscription};

/// Point-to-point transport between two endpoints.
///
/// The transport binds its receive socket (if there is a local endpoint) and a send socket once,
///  and all publications and subscriptions it creates share them. Subscriptions for a different
///  local endpoint get a socket of their own.
///
/// NB: Subscriptions sharing a socket compete for datagrams - each datagram is delivered to only
///  one of them.
pub struct UdpReliableTransport {
    config: UdpConfig,
    receive_socket: Option<(SocketAddr, Arc<dyn DatagramSocket>)>,
    send_socket: Arc<dyn DatagramSocket>,
    send_socket_is_ipv4: bool,
    remote_addr: Option<SocketAddr>,
}

impl UdpReliableTransport {
    pub fn new(config: UdpConfig) -> anyhow::Result<UdpReliableTransport> {
        config.validate()?;

        let remote_addr = if config.remote_endpoint.is_empty() {
            None
        }
        else {
            Some(parse_endpoint(&config.remote_endpoint)?)
        };

        let receive_socket = if config.local_endpoint.is_empty() {
            None
        }
        else {
            let local_addr = parse_endpoint(&config.local_endpoint)?;
            let socket = bind_unicast(local_addr)
                .with_context(|| format!("binding local endpoint {}", config.local_endpoint))?;
            let socket: Arc<dyn DatagramSocket> = Arc::new(socket);
            Some((local_addr, socket))
        };

        let send_socket = bind_sender(remote_addr)?;
        let send_socket_is_ipv4 = send_socket.local_addr()?.is_ipv4();

        info!("point-to-point transport: local {:?}, remote {:?}", receive_socket.as_ref().map(|(addr, _)| addr), remote_addr);
        Ok(UdpReliableTransport {
            config,
            receive_socket,
            send_socket: Arc::new(send_socket),
            send_socket_is_ipv4,
            remote_addr,
        })
    }

    /// The address the receive socket is actually bound to, if there is one. This differs from
    ///  the configured endpoint if that has port 0.
    pub fn local_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match &self.receive_socket {
            Some((_, socket)) => Ok(Some(socket.local_addr()?)),
            None => Ok(None),
        }
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    fn send_socket_for(&self, destination: Option<SocketAddr>) -> anyhow::Result<Arc<dyn DatagramSocket>> {
        match destination {
            Some(addr) if addr.is_ipv4() != self.send_socket_is_ipv4 => {
                debug!("binding separate send socket for {:?}", addr);
                Ok(Arc::new(bind_sender(destination)?))
            }
            _ => Ok(self.send_socket.clone()),
        }
    }

    fn receive_socket_for(&self, endpoint: &str) -> anyhow::Result<Arc<dyn DatagramSocket>> {
        if endpoint.is_empty() {
            return self.receive_socket.as_ref()
                .map(|(_, socket)| socket.clone())
                .ok_or_else(|| anyhow!("transport has no local endpoint to subscribe to"));
        }

        let addr = parse_endpoint(endpoint)?;
        if let Some((local_addr, socket)) = &self.receive_socket {
            if *local_addr == addr {
                return Ok(socket.clone());
            }
        }
        Ok(Arc::new(bind_unicast(addr)?))
    }
}

impl Transport for UdpReliableTransport {
    fn create_publication(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Publication>> {
        let destination = if endpoint.is_empty() {
            self.remote_addr
        }
        else {
            Some(parse_endpoint(endpoint)?)
        };

        let socket = self.send_socket_for(destination)?;
        Ok(Box::new(UdpPublication::new(ChannelKind::PointToPoint, socket, destination, stream, &self.config)))
    }

    fn create_subscription(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Subscription>> {
        let socket = self.receive_socket_for(endpoint)
            .with_context(|| format!("subscribing to '{}'", endpoint))?;
        Ok(Box::new(UdpSubscription::new(ChannelKind::PointToPoint, socket, stream, &self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use crate::channel::{PublishResult, ANY_STREAM};

    /// Polls until `n` messages arrived, returning `(stream, sequence number, payload)`
    fn receive(subscription: &mut dyn Subscription, n: usize) -> Vec<(StreamId, u64, Vec<u8>)> {
        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while received.len() < n {
            assert!(Instant::now() < deadline, "timeout: received {} of {} messages", received.len(), n);
            let remaining = n - received.len();
            let delivered = subscription.poll(&mut |msg| received.push((msg.stream_id, msg.sequence_number, msg.data.to_vec())), remaining);
            if delivered == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        received
    }

    #[test]
    fn test_loopback() {
        let transport = UdpReliableTransport::new(UdpConfig::point_to_point("127.0.0.1:9101", "127.0.0.1:9102")).unwrap();
        let peer = UdpReliableTransport::new(UdpConfig::point_to_point("127.0.0.1:9102", "127.0.0.1:9101")).unwrap();

        let publication = transport.create_publication("", 1).unwrap();
        let mut subscription = peer.create_subscription("", 1).unwrap();

        assert_eq!(publication.offer(b"hello", 1, true), PublishResult::Ok);

        let mut delivered = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while delivered.is_empty() {
            assert!(Instant::now() < deadline, "timeout");
            subscription.poll(&mut |msg| {
                assert_eq!(msg.len(), 5);
                delivered.push(msg.data.to_vec());
            }, 10);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(delivered, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_many_messages_in_order() {
        let receiver = UdpReliableTransport::new(UdpConfig::point_to_point("127.0.0.1:0", "")).unwrap();
        let receiver_addr = receiver.local_addr().unwrap().unwrap();
        let sender = UdpReliableTransport::new(UdpConfig::point_to_point("", &receiver_addr.to_string())).unwrap();

        let mut subscription = receiver.create_subscription("", ANY_STREAM).unwrap();
        let publication = sender.create_publication("", 1).unwrap();

        for i in 0..100u32 {
            assert_eq!(publication.offer(&i.to_be_bytes(), 1 + i % 2, true), PublishResult::Ok);
        }

        let received = receive(subscription.as_mut(), 100);
        for (i, (stream, sequence, payload)) in received.into_iter().enumerate() {
            assert_eq!(sequence, i as u64);
            assert_eq!(stream, 1 + i as u32 % 2);
            assert_eq!(payload, (i as u32).to_be_bytes());
        }
    }

    #[test]
    fn test_publication_to_explicit_endpoint() {
        let receiver = UdpReliableTransport::new(UdpConfig::point_to_point("127.0.0.1:0", "")).unwrap();
        let receiver_addr = receiver.local_addr().unwrap().unwrap();
        let sender = UdpReliableTransport::new(UdpConfig::default()).unwrap();

        let mut subscription = receiver.create_subscription("", 5).unwrap();
        let publication = sender.create_publication(&receiver_addr.to_string(), 5).unwrap();
        assert_eq!(publication.offer(b"explicit", 5, true), PublishResult::Ok);

        assert_eq!(receive(subscription.as_mut(), 1), vec![(5, 0, b"explicit".to_vec())]);
    }

    #[test]
    fn test_subscription_to_other_endpoint() {
        let transport = UdpReliableTransport::new(UdpConfig::default()).unwrap();
        let placeholder = bind_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        let free_addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let mut subscription = transport.create_subscription(&free_addr.to_string(), ANY_STREAM).unwrap();
        let publication = transport.create_publication(&free_addr.to_string(), 1).unwrap();
        assert_eq!(publication.offer(b"x", 1, true), PublishResult::Ok);

        assert_eq!(receive(subscription.as_mut(), 1), vec![(1, 0, b"x".to_vec())]);
    }

    #[test]
    fn test_publication_without_remote_is_not_connected() {
        let transport = UdpReliableTransport::new(UdpConfig::default()).unwrap();
        let publication = transport.create_publication("", 1).unwrap();
        assert_eq!(publication.offer(b"x", 1, true), PublishResult::NotConnected);
    }

    #[test]
    fn test_subscription_without_local_endpoint_fails() {
        let transport = UdpReliableTransport::new(UdpConfig::default()).unwrap();
        assert!(transport.local_addr().unwrap().is_none());
        assert!(transport.create_subscription("", 1).is_err());
    }

    #[test]
    fn test_endpoint_in_use_fails() {
        let first = UdpReliableTransport::new(UdpConfig::point_to_point("127.0.0.1:0", "")).unwrap();
        let addr = first.local_addr().unwrap().unwrap();
        assert!(UdpReliableTransport::new(UdpConfig::point_to_point(&addr.to_string(), "")).is_err());
    }

    #[test]
    fn test_invalid_config_fails() {
        assert!(UdpReliableTransport::new(UdpConfig { mtu: 10, ..UdpConfig::default() }).is_err());
        assert!(UdpReliableTransport::new(UdpConfig::point_to_point("nowhere", "")).is_err());
        let transport = UdpReliableTransport::new(UdpConfig::default()).unwrap();
        assert!(transport.create_publication("nowhere", 1).is_err());
    }
}
