use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use crate::channel::{Publication, StreamId, Subscription, Transport};
use crate::config::{MulticastConfig, UdpConfig};
use crate::udp::socket::{multicast_receiver, multicast_sender, DatagramSocket};
use crate::udp::{ChannelKind, UdpPublication, UdpSubscription};

/// One-to-many transport over IP multicast.
///
/// Publications share a single send socket. Every subscription joins the group with a socket of
///  its own, so each of them receives every datagram, including subscriptions in the same
///  process.
pub struct MulticastFeedTransport {
    config: UdpConfig,
    multicast: MulticastConfig,
    send_socket: Arc<dyn DatagramSocket>,
}

impl MulticastFeedTransport {
    pub fn new(config: UdpConfig) -> anyhow::Result<MulticastFeedTransport> {
        config.validate()?;
        let multicast = config.multicast.clone()
            .context("multicast feed transport requires a multicast configuration")?;

        let send_socket = multicast_sender(&multicast)?;

        info!("multicast feed transport for group {:?}", multicast.group_addr());
        Ok(MulticastFeedTransport {
            config,
            multicast,
            send_socket: Arc::new(send_socket),
        })
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// An empty endpoint is the configured group; anything else replaces group and port
    fn group_for(&self, endpoint: &str) -> anyhow::Result<MulticastConfig> {
        if endpoint.is_empty() {
            Ok(self.multicast.clone())
        }
        else {
            self.multicast.with_endpoint(endpoint)
        }
    }
}

impl Transport for MulticastFeedTransport {
    fn create_publication(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Publication>> {
        let group = self.group_for(endpoint)?;
        Ok(Box::new(UdpPublication::new(ChannelKind::Multicast, self.send_socket.clone(), Some(group.group_addr()), stream, &self.config)))
    }

    fn create_subscription(&self, endpoint: &str, stream: StreamId) -> anyhow::Result<Box<dyn Subscription>> {
        let group = self.group_for(endpoint)?;
        let socket = multicast_receiver(&group)
            .with_context(|| format!("subscribing to multicast group {:?}", group.group_addr()))?;
        Ok(Box::new(UdpSubscription::new(ChannelKind::Multicast, Arc::new(socket), stream, &self.config)))
    }
}
