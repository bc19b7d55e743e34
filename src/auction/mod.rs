pub mod gate;
pub mod pipeline;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::gateway::CacheGateway;
use crate::events::{AuctionEvent, AuctionSnapshot, EventBus};
use crate::extensions::AdmissionExtension;
use crate::model::ad_unit::AdUnit;
use crate::model::bid::{Bid, NoBid, RawBid, TimedOutBid};
use crate::model::request::BidRequest;
use crate::pricing::granularity::Granularity;
use crate::targeting::resolver::BidderSettings;
use state::{AuctionState, AuctionStatus, PendingRequest, SpecSlot};

/// Invoked with no arguments exactly once; the caller inspects the auction
/// accessors afterwards.
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// External collaborator that performs the bidder round trips. For every
/// dispatched request it must eventually drive `on_bidder_response` and
/// `on_bidder_done` exactly once each, or `on_bidder_timeout`.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, auction_id: &str, bid_requests: &[BidRequest], callbacks: AuctionCallbacks);
}

pub struct AuctionConfig {
    pub ad_units: Vec<AdUnit>,
    pub timeout: Duration,
    pub bidder_settings: BidderSettings,
    /// Global default granularity, used when no media-type entry matches.
    pub price_granularity: Granularity,
    /// Keyed by `banner` / `video` / `video-outstream` / `video-instream` /
    /// `native`.
    pub media_type_price_granularity: HashMap<String, Granularity>,
    /// Bidders excluded from the completion gate's required set.
    pub secondary_bidders: HashSet<String>,
    pub cache: Option<Arc<dyn CacheGateway>>,
    pub extensions: Vec<Arc<dyn AdmissionExtension>>,
    pub on_done: DoneCallback,
}

impl AuctionConfig {
    pub fn new(
        ad_units: Vec<AdUnit>,
        timeout: Duration,
        on_done: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            ad_units,
            timeout,
            bidder_settings: BidderSettings::default(),
            price_granularity: Granularity::Medium,
            media_type_price_granularity: HashMap::new(),
            secondary_bidders: HashSet::new(),
            cache: None,
            extensions: Vec::new(),
            on_done: Box::new(on_done),
        }
    }
}

/// Creates a new auction in the `Started` state. Nothing runs until
/// `call_bids` dispatches the bid requests.
pub fn start_auction(config: AuctionConfig) -> Auction {
    let inner = Arc::new(AuctionInner {
        id: Uuid::new_v4().to_string(),
        ad_units: config.ad_units,
        timeout: config.timeout,
        settings: config.bidder_settings,
        granularity: config.price_granularity,
        media_type_granularity: config.media_type_price_granularity,
        secondary_bidders: config.secondary_bidders,
        cache: config.cache,
        extensions: config.extensions,
        state: Mutex::new(AuctionState::new()),
        on_done: Mutex::new(Some(config.on_done)),
        events: EventBus::new(64),
    });
    Auction { inner }
}

pub(crate) struct AuctionInner {
    pub(crate) id: String,
    pub(crate) ad_units: Vec<AdUnit>,
    pub(crate) timeout: Duration,
    pub(crate) settings: BidderSettings,
    pub(crate) granularity: Granularity,
    pub(crate) media_type_granularity: HashMap<String, Granularity>,
    pub(crate) secondary_bidders: HashSet<String>,
    pub(crate) cache: Option<Arc<dyn CacheGateway>>,
    pub(crate) extensions: Vec<Arc<dyn AdmissionExtension>>,
    pub(crate) state: Mutex<AuctionState>,
    pub(crate) on_done: Mutex<Option<DoneCallback>>,
    pub(crate) events: EventBus,
}

impl AuctionInner {
    pub(crate) fn snapshot_locked(&self, st: &AuctionState) -> AuctionSnapshot {
        AuctionSnapshot {
            auction_id: self.id.clone(),
            status: st.status,
            timeout_ms: self.timeout.as_millis() as u64,
            started_at: st.started_at,
            ad_unit_codes: self.ad_units.iter().map(|u| u.code.clone()).collect(),
            bids_received: st.bids_received.len(),
            no_bids: st.no_bids.len(),
            timed_out: st.timed_out.clone(),
        }
    }
}

/// Handle to one bidding round. Cheap to clone; all accessors read the
/// shared state under its mutex.
#[derive(Clone)]
pub struct Auction {
    inner: Arc<AuctionInner>,
}

impl Auction {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> AuctionStatus {
        self.inner.state.lock().unwrap().status
    }

    /// Committed bids, in commit order (arrival through the pipeline), not
    /// dispatch order.
    pub fn bids_received(&self) -> Vec<Bid> {
        self.inner.state.lock().unwrap().bids_received.clone()
    }

    pub fn no_bids(&self) -> Vec<NoBid> {
        self.inner.state.lock().unwrap().no_bids.clone()
    }

    pub fn timed_out(&self) -> Vec<TimedOutBid> {
        self.inner.state.lock().unwrap().timed_out.clone()
    }

    pub fn bid_requests(&self) -> Vec<BidRequest> {
        self.inner.state.lock().unwrap().bid_requests.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AuctionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> AuctionSnapshot {
        let st = self.inner.state.lock().unwrap();
        self.inner.snapshot_locked(&st)
    }

    /// Callback handle handed to the dispatcher; also useful for tests that
    /// drive bidder traffic by hand.
    pub fn callbacks(&self) -> AuctionCallbacks {
        AuctionCallbacks {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Anchors the auction clock, registers every request with the
    /// completion gate, starts the deadline races and hands the requests to
    /// the dispatcher. Must run inside a tokio runtime.
    pub fn call_bids(&self, bid_requests: Vec<BidRequest>, dispatcher: &dyn Dispatcher) {
        let inner = &self.inner;
        let now = Instant::now();
        let hard_deadline = now + inner.timeout;

        let request_deadlines: Vec<(String, Instant)> = {
            let mut st = inner.state.lock().unwrap();
            if st.status != AuctionStatus::Started {
                warn!(auction = %inner.id, status = ?st.status, "call_bids on an already-started auction");
                return;
            }
            st.status = AuctionStatus::InProgress;
            st.start = Some(now);
            st.started_at = Some(Utc::now());
            st.deadline = Some(hard_deadline);
            st.bid_requests = bid_requests.clone();

            let mut deadlines = Vec::new();
            for request in &bid_requests {
                // A request with no ad-unit slots is resolved from the start.
                if request.bids.is_empty() {
                    continue;
                }
                let timeout = request
                    .timeout
                    .map(|t| t.min(inner.timeout))
                    .unwrap_or(inner.timeout);
                let deadline = now + timeout;
                st.pending.insert(
                    request.request_id.clone(),
                    PendingRequest {
                        bidder_code: request.bidder_code.clone(),
                        deadline,
                        slots: request
                            .bids
                            .iter()
                            .map(|spec| {
                                (
                                    spec.bid_id.clone(),
                                    SpecSlot {
                                        spec: spec.clone(),
                                        responded: false,
                                    },
                                )
                            })
                            .collect(),
                    },
                );
                deadlines.push((request.request_id.clone(), deadline));
            }
            deadlines
        };

        for (request_id, deadline) in request_deadlines {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                sleep_until(deadline).await;
                inner.on_request_deadline(&request_id);
            });
        }
        {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                sleep_until(hard_deadline).await;
                inner.force_done();
            });
        }

        info!(
            auction = %inner.id,
            requests = bid_requests.len(),
            timeout_ms = inner.timeout.as_millis() as u64,
            "dispatching bid requests"
        );
        dispatcher.dispatch(
            &inner.id,
            &bid_requests,
            AuctionCallbacks {
                inner: Arc::clone(inner),
            },
        );
        // Covers the degenerate dispatch with nothing to wait on.
        inner.check_done();
    }
}

/// The surface a dispatcher (or a test) uses to feed bidder traffic back
/// into the coordination core.
#[derive(Clone)]
pub struct AuctionCallbacks {
    inner: Arc<AuctionInner>,
}

impl AuctionCallbacks {
    /// One batch of raw bids from a single bidder. Admission runs on a
    /// spawned task so a slow extension or cache write never blocks the
    /// caller or other bidders' admissions.
    pub fn on_bidder_response(&self, request_id: &str, raw_bids: Vec<RawBid>) {
        Arc::clone(&self.inner).on_bidder_response(request_id, raw_bids);
    }

    /// The bidder finished its round trip; unanswered slots become no-bids.
    pub fn on_bidder_done(&self, request_id: &str) {
        self.inner.on_bidder_done(request_id);
    }

    /// The dispatcher observed the round trip time out.
    pub fn on_bidder_timeout(&self, request_id: &str) {
        self.inner.on_bidder_timeout(request_id);
    }
}
