use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::auction::state::AuctionStatus;
use crate::model::bid::TimedOutBid;

/// Observability signals. Functional correctness never depends on a listener
/// being subscribed.
#[derive(Clone, Debug)]
pub enum AuctionEvent {
    /// Bid specs that crossed a deadline without resolving.
    BidTimeout(Vec<TimedOutBid>),
    /// Emitted once, right before the completion callback runs.
    AuctionEnd(AuctionSnapshot),
}

/// Point-in-time view of an auction, safe to serialize into logs.
#[derive(Clone, Debug, Serialize)]
pub struct AuctionSnapshot {
    pub auction_id: String,
    pub status: AuctionStatus,
    pub timeout_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ad_unit_codes: Vec<String>,
    pub bids_received: usize,
    pub no_bids: usize,
    pub timed_out: Vec<TimedOutBid>,
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<AuctionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; a send with no subscribers is not an error.
    pub fn emit(&self, event: AuctionEvent) {
        let _ = self.tx.send(event);
    }
}
