// src/main.rs

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};
use uuid::Uuid;

use rust_hbx::auction::{start_auction, AuctionConfig};
use rust_hbx::cache::gateway::HttpCacheGateway;
use rust_hbx::mock_bidders::{generate_fleet, start_mock_cache_server, MockBidder, MockDispatcher};
use rust_hbx::model::ad_unit::{AdUnit, MediaTypes, VideoContext};
use rust_hbx::model::request::{BidRequest, BidSpec};
use rust_hbx::pricing::granularity::Granularity;

#[derive(Parser, Debug)]
#[command(version = "1.0", about = "A header-bidding auction coordination demo")]
struct CliArgs {
    /// Port for the mock cache gateway server.
    #[arg(short, long, default_value_t = 9090)]
    cache_port: u16,
    /// Auction-wide timeout in milliseconds.
    #[arg(long, default_value_t = 300)]
    timeout_ms: u64,
    /// Number of simulated bidders.
    #[arg(long, default_value_t = 6)]
    bidders: usize,
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

fn demo_ad_units() -> Vec<AdUnit> {
    vec![
        AdUnit::new(
            "div-banner-top",
            &Uuid::new_v4().to_string(),
            MediaTypes::banner(vec![(300, 250), (728, 90)]),
        ),
        AdUnit::new(
            "div-video-rail",
            &Uuid::new_v4().to_string(),
            MediaTypes::video(Some(VideoContext::Outstream)),
        ),
    ]
}

fn build_bid_requests(
    auction_id: &str,
    ad_units: &[AdUnit],
    fleet: &[MockBidder],
) -> Vec<BidRequest> {
    fleet
        .iter()
        .map(|bidder| BidRequest {
            request_id: Uuid::new_v4().to_string(),
            bidder_code: bidder.code.clone(),
            auction_id: auction_id.to_string(),
            bids: ad_units
                .iter()
                .map(|unit| BidSpec {
                    bid_id: Uuid::new_v4().to_string(),
                    bidder_code: bidder.code.clone(),
                    ad_unit_code: unit.code.clone(),
                    transaction_id: unit.transaction_id.clone(),
                    sizes: unit
                        .media_types
                        .banner
                        .as_ref()
                        .map(|b| b.sizes.clone())
                        .unwrap_or_default(),
                    media_types: unit.media_types.clone(),
                })
                .collect(),
            timeout: None,
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let log_file = rolling::hourly(&args.log_dir, "hbx_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");
    info!("HBX auction demo starting");

    let cache_server = tokio::spawn(start_mock_cache_server(args.cache_port));
    // Give the mock gateway a beat to bind before bids start flowing.
    sleep(Duration::from_millis(50)).await;

    let fleet = generate_fleet(args.bidders);
    let ad_units = demo_ad_units();

    let (done_tx, done_rx) = oneshot::channel();
    let mut config = AuctionConfig::new(
        ad_units.clone(),
        Duration::from_millis(args.timeout_ms),
        move || {
            let _ = done_tx.send(());
        },
    );
    config.price_granularity = Granularity::Dense;
    config.media_type_price_granularity =
        HashMap::from([("video-outstream".to_string(), Granularity::High)]);
    config.cache = Some(Arc::new(HttpCacheGateway::new(&format!(
        "http://127.0.0.1:{}/cache",
        args.cache_port
    ))));

    let auction = start_auction(config);
    let bid_requests = build_bid_requests(auction.id(), &ad_units, &fleet);
    let dispatcher = MockDispatcher::new(fleet);
    auction.call_bids(bid_requests, &dispatcher);

    let _ = done_rx.await;

    println!("\nAuction {} completed", auction.id());
    for bid in auction.bids_received() {
        println!(
            "  {} on {}: cpm {:.2} bucket {} targeting {:?}",
            bid.bidder_code,
            bid.ad_unit_code,
            bid.cpm,
            bid.price_bucket,
            bid.targeting.iter().collect::<Vec<_>>()
        );
    }
    println!(
        "  no-bids: {}, timed out: {}",
        auction.no_bids().len(),
        auction.timed_out().len()
    );
    let snapshot =
        serde_json::to_string_pretty(&auction.snapshot()).expect("snapshot serializes");
    println!("{}", snapshot);

    cache_server.abort();
    info!("HBX auction demo finished");
}
