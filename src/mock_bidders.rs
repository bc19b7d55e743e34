//! Demo collaborators: a dispatcher that simulates bidder round trips with
//! random latencies and prices, and a mock cache-gateway HTTP server. Used by
//! the demo binary; handy for local experiments against the real engine.

use std::collections::HashMap;
use std::time::Duration;

use axum::{routing::post, serve, Json, Router};
use proptest::prelude::*;
use proptest::strategy::ValueTree;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::info;
use uuid::Uuid;

use crate::auction::{AuctionCallbacks, Dispatcher};
use crate::model::bid::{MediaType, RawBid};
use crate::model::request::{BidRequest, BidSpec};

/// One simulated bidder. `cpm` of `None` models a bidder that answers with
/// an empty seat; a latency above the auction timeout models one that never
/// answers in time.
#[derive(Debug, Clone)]
pub struct MockBidder {
    pub code: String,
    pub latency: Duration,
    pub cpm: Option<f64>,
}

fn generate_bidder() -> impl Strategy<Value = MockBidder> {
    (
        "[a-z]{5,12}".prop_map(|s| format!("{}_bid", s)),
        10..400u64,
        prop::option::of(0.5..12.0f64),
    )
        .prop_map(|(code, latency_ms, cpm)| MockBidder {
            code,
            latency: Duration::from_millis(latency_ms),
            cpm,
        })
}

/// Generates a random bidder fleet, guaranteeing at least one fast bidder
/// that actually prices, so every demo auction has a winner candidate.
pub fn generate_fleet(count: usize) -> Vec<MockBidder> {
    let mut runner = proptest::test_runner::TestRunner::default();
    let mut fleet = prop::collection::vec(generate_bidder(), count.max(1))
        .new_tree(&mut runner)
        .expect("bidder fleet strategy")
        .current();
    if !fleet
        .iter()
        .any(|b| b.cpm.is_some() && b.latency < Duration::from_millis(200))
    {
        if let Some(first) = fleet.first_mut() {
            first.cpm = Some(2.5);
            first.latency = Duration::from_millis(50);
        }
    }
    for bidder in &fleet {
        println!(
            "Bidder: {}, latency: {:?}, cpm: {:?}",
            bidder.code, bidder.latency, bidder.cpm
        );
    }
    fleet
}

/// Dispatcher simulating one HTTP round trip per bid request.
pub struct MockDispatcher {
    bidders: HashMap<String, MockBidder>,
}

impl MockDispatcher {
    pub fn new(fleet: Vec<MockBidder>) -> Self {
        Self {
            bidders: fleet.into_iter().map(|b| (b.code.clone(), b)).collect(),
        }
    }
}

impl Dispatcher for MockDispatcher {
    fn dispatch(&self, auction_id: &str, bid_requests: &[BidRequest], callbacks: AuctionCallbacks) {
        info!(auction = %auction_id, requests = bid_requests.len(), "mock dispatch");
        for request in bid_requests {
            let Some(bidder) = self.bidders.get(&request.bidder_code).cloned() else {
                callbacks.on_bidder_done(&request.request_id);
                continue;
            };
            let request = request.clone();
            let callbacks = callbacks.clone();
            tokio::spawn(async move {
                sleep(bidder.latency).await;
                if let Some(base_cpm) = bidder.cpm {
                    let raw_bids = request.bids.iter().map(|spec| mock_raw_bid(spec, base_cpm)).collect();
                    callbacks.on_bidder_response(&request.request_id, raw_bids);
                }
                callbacks.on_bidder_done(&request.request_id);
            });
        }
    }
}

fn mock_raw_bid(spec: &BidSpec, base_cpm: f64) -> RawBid {
    let media_type = if spec.media_types.video.is_some() {
        MediaType::Video
    } else if spec.media_types.banner.is_some() {
        MediaType::Banner
    } else {
        MediaType::Native
    };
    let mut raw = RawBid::new(&spec.bid_id, &spec.ad_unit_code, 0.0, media_type);
    raw.cpm = base_cpm * rand::thread_rng().gen_range(0.8..1.4);
    raw.creative_id = Some(format!("cr-{}", spec.bid_id));
    match media_type {
        MediaType::Banner => {
            let (w, h) = spec.sizes.first().copied().unwrap_or((300, 250));
            raw.width = Some(w);
            raw.height = Some(h);
            raw.ad = Some(format!(
                "<html><body>Mock banner for {}</body></html>",
                spec.ad_unit_code
            ));
        }
        MediaType::Video => {
            raw.ad = Some(format!(
                r#"<VAST version="3.0"><Ad id="{}"><InLine><AdSystem>Mock Bidder</AdSystem><AdTitle>Mock Video Ad</AdTitle></InLine></Ad></VAST>"#,
                spec.bid_id
            ));
        }
        MediaType::Native => {
            raw.ad = Some(
                r#"{"native":{"assets":[{"title":{"text":"Mock Native Ad"}}]}}"#.to_string(),
            );
        }
    }
    raw
}

#[derive(Deserialize)]
struct MockPuts {
    puts: Vec<Value>,
}

#[derive(Serialize)]
struct MockPutResponses {
    responses: Vec<MockPutEntry>,
}

#[derive(Serialize)]
struct MockPutEntry {
    uuid: String,
}

async fn handle_cache_put(Json(request): Json<MockPuts>) -> Json<MockPutResponses> {
    let responses = request
        .puts
        .iter()
        .map(|_| MockPutEntry {
            uuid: Uuid::new_v4().to_string(),
        })
        .collect();
    Json(MockPutResponses { responses })
}

/// Mock prebid-cache style endpoint at `POST /cache`, answering one uuid per
/// submitted creative.
pub async fn start_mock_cache_server(port: u16) {
    let app = Router::new().route("/cache", post(handle_cache_put));
    let addr = format!("0.0.0.0:{}", port);
    info!("Mock cache gateway running at http://{}", addr);
    let listener = TcpListener::bind(&addr).await.unwrap();
    serve(listener, app).await.unwrap();
}
