use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::ad_unit::MediaTypes;

/// One bidder's slice of an auction. Immutable once dispatched.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BidRequest {
    pub request_id: String,
    pub bidder_code: String,
    pub auction_id: String,
    pub bids: Vec<BidSpec>,
    /// Request-level timeout override; the effective deadline is
    /// `min(timeout, auction timeout)` from the auction start.
    pub timeout: Option<Duration>,
}

impl BidRequest {
    pub fn spec(&self, bid_id: &str) -> Option<&BidSpec> {
        self.bids.iter().find(|s| s.bid_id == bid_id)
    }
}

/// A single ad-unit slot solicited from one bidder.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BidSpec {
    pub bid_id: String,
    pub bidder_code: String,
    pub ad_unit_code: String,
    pub transaction_id: String,
    pub sizes: Vec<(u32, u32)>,
    pub media_types: MediaTypes,
}
