use std::net::Ipv4Addr;
use std::time::Duration;
use clap::Parser;
use seqcast::channel::{PublishResult, Transport};
use seqcast::config::{MulticastConfig, UdpConfig};
use seqcast::udp::{MulticastFeedTransport, UdpReliableTransport};
use tracing::{info, warn, Level};

/// Publishes a numbered 'tick' message at a fixed interval, either point-to-point or to a
///  multicast group
#[derive(Parser)]
struct Args {
    /// "ip:port" of the receiver, or of the multicast group with --multicast
    endpoint: String,

    #[clap(long, default_value_t = false)]
    multicast: bool,

    /// local interface for multicast
    #[clap(long, default_value = "0.0.0.0")]
    interface: Ipv4Addr,

    #[clap(long, default_value_t = 1)]
    stream: u32,

    #[clap(long, default_value_t = 100)]
    interval_ms: u64,

    /// number of messages to send, 0 for unlimited
    #[clap(long, default_value_t = 0)]
    count: u64,

    #[clap(long, default_value_t = false)]
    checksum: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let publication = if args.multicast {
        let multicast = MulticastConfig {
            interface: args.interface,
            ..MulticastConfig::default()
        }.with_endpoint(&args.endpoint)?;
        let config = UdpConfig {
            enable_checksum: args.checksum,
            ..UdpConfig::multicast(multicast)
        };
        MulticastFeedTransport::new(config)?
            .create_publication("", args.stream)?
    }
    else {
        let config = UdpConfig {
            enable_checksum: args.checksum,
            ..UdpConfig::point_to_point("", &args.endpoint)
        };
        UdpReliableTransport::new(config)?
            .create_publication("", args.stream)?
    };

    let mut tick: u64 = 0;
    while args.count == 0 || tick < args.count {
        let payload = format!("tick {}", tick);
        match publication.offer(payload.as_bytes(), args.stream, true) {
            PublishResult::Ok => {
                info!("sent '{}'", payload);
                tick += 1;
            }
            PublishResult::Backpressured => {
                warn!("backpressured - retrying");
            }
            other => {
                anyhow::bail!("publishing failed: {:?}", other);
            }
        }
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    publication.close();
    Ok(())
}
