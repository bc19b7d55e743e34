use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AdmissionRejection;
use crate::model::ad_unit::Renderer;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
    Native,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Banner => write!(f, "banner"),
            MediaType::Video => write!(f, "video"),
            MediaType::Native => write!(f, "native"),
        }
    }
}

/// Advertiser metadata attached by the adapter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BidMeta {
    pub advertiser_domains: Vec<String>,
}

/// One candidate response exactly as the adapter produced it, before the
/// admission pipeline has validated or enriched anything.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RawBid {
    /// Correlates to the `BidSpec` that solicited this bid.
    pub request_id: String,
    pub ad_unit_code: String,
    pub cpm: f64,
    pub currency: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub media_type: MediaType,
    /// Creative markup (VAST document for video bids).
    pub ad: Option<String>,
    pub creative_id: Option<String>,
    pub deal_id: Option<String>,
    #[serde(default)]
    pub meta: BidMeta,
    pub renderer: Option<Renderer>,
    /// Extra targeting pairs supplied by the adapter, passed through to the
    /// final map for keys the resolver does not set itself.
    #[serde(default)]
    pub ad_server_targeting: Vec<(String, String)>,
}

impl RawBid {
    pub fn new(request_id: &str, ad_unit_code: &str, cpm: f64, media_type: MediaType) -> Self {
        Self {
            request_id: request_id.to_string(),
            ad_unit_code: ad_unit_code.to_string(),
            cpm,
            currency: "USD".to_string(),
            width: None,
            height: None,
            media_type,
            ad: None,
            creative_id: None,
            deal_id: None,
            meta: BidMeta::default(),
            renderer: None,
            ad_server_targeting: Vec::new(),
        }
    }
}

/// A bid that passed admission. Enriched in place by the pipeline; immutable
/// once committed into the auction state.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Bid {
    /// Unique ad-server id assigned at admission.
    pub ad_id: String,
    pub request_id: String,
    pub bidder_code: String,
    pub ad_unit_code: String,
    pub transaction_id: String,
    pub cpm: f64,
    pub currency: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub media_type: MediaType,
    pub source: String,
    pub ad: Option<String>,
    pub creative_id: Option<String>,
    pub deal_id: Option<String>,
    pub meta: BidMeta,
    pub renderer: Option<Renderer>,
    pub price_bucket: String,
    pub video_cache_key: Option<String>,
    pub targeting: TargetingMap,
    pub adapter_targeting: Vec<(String, String)>,
}

impl Bid {
    /// "300x250" style size string, when the adapter declared one.
    pub fn size(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

/// Insertion-ordered key/value map for ad-server targeting. Key order follows
/// the targeting configuration, which downstream ad servers care about.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TargetingMap {
    entries: Vec<(String, String)>,
}

impl TargetingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces, keeping the original position on replace.
    pub fn insert(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Why a solicited bid produced nothing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum NoBidReason {
    /// Malformed or unmatchable response.
    Rejected(AdmissionRejection),
    /// The bidder finished without answering this slot.
    NoResponse,
    /// The request crossed its deadline before answering.
    Timeout,
    /// The video cache gateway failed for this bid.
    CacheFailure(String),
    /// A pre-admission extension dropped the bid.
    ExtensionFailure(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoBid {
    pub bidder_code: String,
    pub ad_unit_code: String,
    pub request_id: String,
    pub reason: NoBidReason,
}

/// One bid spec that never resolved before a deadline, or a bid discarded
/// because it settled after the auction completed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimedOutBid {
    pub bidder_code: String,
    pub ad_unit_code: String,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targeting_map_keeps_insertion_order_and_replaces_in_place() {
        let mut map = TargetingMap::new();
        map.insert("hb_bidder", "appnexus".to_string());
        map.insert("hb_pb", "1.99".to_string());
        map.insert("hb_bidder", "rubicon".to_string());

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["hb_bidder", "hb_pb"]);
        assert_eq!(map.get("hb_bidder"), Some("rubicon"));
        assert_eq!(map.len(), 2);
    }
}
