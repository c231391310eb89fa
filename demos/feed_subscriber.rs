use std::net::Ipv4Addr;
use std::time::Duration;
use clap::Parser;
use seqcast::channel::{Subscription, ANY_STREAM};
use seqcast::config::{MulticastConfig, UdpConfig};
use seqcast::udp::UdpSubscription;
use tracing::{info, Level};

/// Prints messages received point-to-point or from a multicast group, in sequence order
#[derive(Parser)]
struct Args {
    /// local "ip:port" to receive on, or the multicast group with --multicast
    endpoint: String,

    #[clap(long, default_value_t = false)]
    multicast: bool,

    /// local interface for joining the multicast group
    #[clap(long, default_value = "0.0.0.0")]
    interface: Ipv4Addr,

    /// stream to receive, 0 for all streams
    #[clap(long, default_value_t = ANY_STREAM)]
    stream: u32,

    /// start at the first sequence number received instead of 0
    #[clap(long, default_value_t = false)]
    join_late: bool,

    /// give up on a missing message after this many idle polls
    #[clap(long, default_value_t = 100)]
    gap_timeout_polls: u32,

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

    let mut subscription = if args.multicast {
        let multicast = MulticastConfig {
            interface: args.interface,
            ..MulticastConfig::default()
        }.with_endpoint(&args.endpoint)?;
        UdpSubscription::multicast(&UdpConfig {
            stream_id: args.stream,
            join_at_first_sequence: args.join_late,
            ..UdpConfig::multicast(multicast)
        })?
    }
    else {
        UdpSubscription::point_to_point(&UdpConfig {
            stream_id: args.stream,
            join_at_first_sequence: args.join_late,
            ..UdpConfig::point_to_point(&args.endpoint, "")
        })?
    };

    let mut idle_polls = 0;
    loop {
        let delivered = subscription.poll(&mut |msg| {
            info!("{:?}: {}", msg, String::from_utf8_lossy(msg.data));
        }, 64);

        if delivered > 0 {
            idle_polls = 0;
            continue;
        }

        idle_polls += 1;
        if idle_polls >= args.gap_timeout_polls {
            idle_polls = 0;
            let skipped = subscription.skip_gap();
            if skipped > 0 {
                info!("gave up on {} missing messages - {:?}", skipped, subscription.stats());
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
