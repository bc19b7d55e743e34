use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::model::bid::{Bid, NoBid, NoBidReason, TimedOutBid};
use crate::model::request::{BidRequest, BidSpec};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Started,
    InProgress,
    Completed,
}

/// One solicited ad-unit slot of a pending request. `responded` flips as soon
/// as a raw bid for the slot enters the pipeline, so a bidder-done signal
/// only converts genuinely unanswered slots into no-bids.
pub(crate) struct SpecSlot {
    pub spec: BidSpec,
    pub responded: bool,
}

pub(crate) struct PendingRequest {
    pub bidder_code: String,
    pub deadline: Instant,
    pub slots: HashMap<String, SpecSlot>,
}

/// Everything an auction mutates after dispatch. Single-writer discipline:
/// only the admission commit and the gate's recorders touch this, always
/// under the owning mutex and never across an await point.
pub(crate) struct AuctionState {
    pub status: AuctionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub start: Option<Instant>,
    pub deadline: Option<Instant>,
    pub bid_requests: Vec<BidRequest>,
    pub bids_received: Vec<Bid>,
    pub no_bids: Vec<NoBid>,
    pub timed_out: Vec<TimedOutBid>,
    pub pending: HashMap<String, PendingRequest>,
    /// Admission batches (extension or cache futures included) still in
    /// flight. The gate waits on this reaching zero, except on the hard
    /// deadline.
    pub outstanding_admissions: usize,
}

impl AuctionState {
    pub fn new() -> Self {
        Self {
            status: AuctionStatus::Started,
            started_at: None,
            start: None,
            deadline: None,
            bid_requests: Vec::new(),
            bids_received: Vec::new(),
            no_bids: Vec::new(),
            timed_out: Vec::new(),
            pending: HashMap::new(),
            outstanding_admissions: 0,
        }
    }

    pub fn request(&self, request_id: &str) -> Option<&BidRequest> {
        self.bid_requests.iter().find(|r| r.request_id == request_id)
    }

    /// Removes a settled slot; drops the whole request from the pending set
    /// once every slot has an outcome. Idempotent for repeat bids on the
    /// same slot.
    pub fn settle_slot(&mut self, request_id: &str, bid_id: &str) {
        if let Some(pending) = self.pending.get_mut(request_id) {
            pending.slots.remove(bid_id);
            if pending.slots.is_empty() {
                self.pending.remove(request_id);
            }
        }
    }

    pub fn record_no_bid(&mut self, spec: &BidSpec, reason: NoBidReason) {
        self.no_bids.push(NoBid {
            bidder_code: spec.bidder_code.clone(),
            ad_unit_code: spec.ad_unit_code.clone(),
            request_id: spec.bid_id.clone(),
            reason,
        });
    }

    /// Drops a pending request past its deadline. Remaining slots are
    /// recorded both as timed out (the bid-timeout signal) and as no-bids.
    /// Returns the new timed-out entries.
    pub fn expire_request(&mut self, request_id: &str) -> Vec<TimedOutBid> {
        let Some(pending) = self.pending.remove(request_id) else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        for slot in pending.slots.values() {
            expired.push(TimedOutBid {
                bidder_code: slot.spec.bidder_code.clone(),
                ad_unit_code: slot.spec.ad_unit_code.clone(),
                request_id: slot.spec.bid_id.clone(),
            });
            self.no_bids.push(NoBid {
                bidder_code: slot.spec.bidder_code.clone(),
                ad_unit_code: slot.spec.ad_unit_code.clone(),
                request_id: slot.spec.bid_id.clone(),
                reason: NoBidReason::Timeout,
            });
        }
        self.timed_out.extend(expired.iter().cloned());
        expired
    }

    /// Whether a settling bid may still be committed. Secondary bidders keep
    /// a window between the gate firing and the hard deadline; everyone else
    /// is cut off at completion.
    pub fn admission_allowed(&self, request_id: &str, now: Instant) -> bool {
        match self.status {
            AuctionStatus::InProgress => true,
            AuctionStatus::Started => false,
            AuctionStatus::Completed => {
                self.pending.contains_key(request_id)
                    && self.deadline.map(|d| now < d).unwrap_or(false)
            }
        }
    }
}
