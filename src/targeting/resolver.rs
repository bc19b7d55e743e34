use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::model::bid::{Bid, MediaType, TargetingMap};
use crate::targeting::keys;

/// Derives one targeting value from a committed bid.
pub type ValueFn = Arc<dyn Fn(&Bid) -> Option<String> + Send + Sync>;

/// Publisher-supplied cpm rewrite, given the adjusted price and the bid.
pub type CpmAdjustment = Arc<dyn Fn(f64, &Bid) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum TargetingValue {
    Fixed(String),
    Derived(ValueFn),
}

/// One `{key, value-derivation}` pair of a targeting configuration.
#[derive(Clone)]
pub struct TargetingEntry {
    pub key: String,
    pub value: TargetingValue,
}

impl TargetingEntry {
    pub fn fixed(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: TargetingValue::Fixed(value.to_string()),
        }
    }

    pub fn derived<F>(key: &str, f: F) -> Self
    where
        F: Fn(&Bid) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            key: key.to_string(),
            value: TargetingValue::Derived(Arc::new(f)),
        }
    }

    fn evaluate(&self, bid: &Bid) -> Option<String> {
        match &self.value {
            TargetingValue::Fixed(v) => Some(v.clone()),
            TargetingValue::Derived(f) => f(bid),
        }
    }
}

/// Targeting configuration for one scope (standard or a single bidder).
#[derive(Clone, Default)]
pub struct TargetingConfig {
    /// Ordered key list; `None` means "use the built-in derivations".
    pub ad_server_targeting: Option<Vec<TargetingEntry>>,
    pub cpm_adjustment: Option<CpmAdjustment>,
    pub suppress_empty_keys: bool,
    /// When false, a per-bidder override does not inherit standard entries.
    pub send_standard_targeting: Option<bool>,
}

impl TargetingConfig {
    fn inherits_standard(&self) -> bool {
        self.send_standard_targeting.unwrap_or(true)
    }
}

/// Standard configuration applying to all bidders plus per-bidder overrides.
/// Per-bidder entries win key-by-key; standard fills in the rest.
#[derive(Clone, Default)]
pub struct BidderSettings {
    pub standard: Option<TargetingConfig>,
    pub bidders: HashMap<String, TargetingConfig>,
}

impl BidderSettings {
    pub fn with_standard(standard: TargetingConfig) -> Self {
        Self {
            standard: Some(standard),
            bidders: HashMap::new(),
        }
    }

    pub fn set_bidder(&mut self, bidder_code: &str, config: TargetingConfig) {
        self.bidders.insert(bidder_code.to_string(), config);
    }

    /// Runs the bid's cpm through the bidder-specific adjustment, else the
    /// standard one. A non-finite or negative result is discarded so a
    /// misbehaving publisher closure cannot corrupt the auction.
    pub fn adjust_cpm(&self, bid: &Bid) -> f64 {
        let adjustment = self
            .bidders
            .get(&bid.bidder_code)
            .and_then(|c| c.cpm_adjustment.clone())
            .or_else(|| {
                self.standard
                    .as_ref()
                    .and_then(|c| c.cpm_adjustment.clone())
            });
        match adjustment {
            Some(f) => {
                let adjusted = f(bid.cpm, bid);
                if adjusted.is_finite() && adjusted >= 0.0 {
                    adjusted
                } else {
                    debug!(
                        bidder = %bid.bidder_code,
                        adjusted,
                        "discarding invalid cpm adjustment"
                    );
                    bid.cpm
                }
            }
            None => bid.cpm,
        }
    }

    /// Resolves the final ordered targeting map for one bid. Per-bidder
    /// entries come first, then standard entries for keys not redefined,
    /// then adapter-supplied extras for keys still absent.
    pub fn resolve_targeting(&self, bid: &Bid, cache_host: Option<&str>) -> TargetingMap {
        let bidder_cfg = self.bidders.get(&bid.bidder_code);
        let standard_pairs = self.standard_pairs(bid, cache_host);

        let mut pairs: Vec<(String, Option<String>)> = Vec::new();
        match bidder_cfg.and_then(|c| c.ad_server_targeting.as_ref()) {
            Some(entries) => {
                for entry in entries {
                    pairs.push((entry.key.clone(), entry.evaluate(bid)));
                }
                if bidder_cfg.is_some_and(|c| c.inherits_standard()) {
                    for (key, value) in standard_pairs {
                        if !pairs.iter().any(|(k, _)| *k == key) {
                            pairs.push((key, value));
                        }
                    }
                }
            }
            None => pairs.extend(standard_pairs),
        }
        for (key, value) in &bid.adapter_targeting {
            if !pairs.iter().any(|(k, _)| k == key) {
                pairs.push((key.clone(), Some(value.clone())));
            }
        }

        let suppress_empty = bidder_cfg.map(|c| c.suppress_empty_keys).unwrap_or(false)
            || self
                .standard
                .as_ref()
                .map(|c| c.suppress_empty_keys)
                .unwrap_or(false);

        let mut map = TargetingMap::new();
        for (key, value) in pairs {
            match value {
                Some(v) if !v.is_empty() => map.insert(&key, v),
                _ if suppress_empty => {}
                _ => map.insert(&key, String::new()),
            }
        }
        map
    }

    fn standard_pairs(
        &self,
        bid: &Bid,
        cache_host: Option<&str>,
    ) -> Vec<(String, Option<String>)> {
        if let Some(entries) = self
            .standard
            .as_ref()
            .and_then(|c| c.ad_server_targeting.as_ref())
        {
            return entries
                .iter()
                .map(|e| (e.key.clone(), e.evaluate(bid)))
                .collect();
        }
        default_pairs(bid, cache_host)
    }
}

/// Built-in derivations used when no standard configuration is supplied.
fn default_pairs(bid: &Bid, cache_host: Option<&str>) -> Vec<(String, Option<String>)> {
    let mut pairs = vec![
        (keys::BIDDER.to_string(), Some(bid.bidder_code.clone())),
        (keys::AD_ID.to_string(), Some(bid.ad_id.clone())),
        (keys::PRICE_BUCKET.to_string(), Some(bid.price_bucket.clone())),
        (keys::SIZE.to_string(), bid.size()),
        (keys::SOURCE.to_string(), Some(bid.source.clone())),
        (keys::FORMAT.to_string(), Some(bid.media_type.to_string())),
        (
            keys::ADOMAIN.to_string(),
            bid.meta.advertiser_domains.first().cloned(),
        ),
    ];
    if let Some(deal_id) = &bid.deal_id {
        pairs.push((keys::DEAL.to_string(), Some(deal_id.clone())));
    }
    if bid.media_type == MediaType::Video {
        pairs.push((keys::UUID.to_string(), bid.video_cache_key.clone()));
        pairs.push((keys::CACHE_ID.to_string(), bid.video_cache_key.clone()));
        if let Some(host) = cache_host {
            pairs.push((keys::CACHE_HOST.to_string(), Some(host.to_string())));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bid::BidMeta;

    fn sample_bid() -> Bid {
        Bid {
            ad_id: "1adId".to_string(),
            request_id: "req-1".to_string(),
            bidder_code: "appnexus".to_string(),
            ad_unit_code: "12345".to_string(),
            transaction_id: "txn-1".to_string(),
            cpm: 5.578,
            currency: "USD".to_string(),
            width: Some(300),
            height: Some(250),
            media_type: MediaType::Banner,
            source: keys::SOURCE_CLIENT.to_string(),
            ad: Some("creative".to_string()),
            creative_id: None,
            deal_id: None,
            meta: BidMeta {
                advertiser_domains: vec!["adomain".to_string()],
            },
            renderer: None,
            price_bucket: "5.50".to_string(),
            video_cache_key: None,
            targeting: TargetingMap::new(),
            adapter_targeting: Vec::new(),
        }
    }

    #[test]
    fn default_derivations_without_any_configuration() {
        let settings = BidderSettings::default();
        let map = settings.resolve_targeting(&sample_bid(), None);

        assert_eq!(map.get(keys::BIDDER), Some("appnexus"));
        assert_eq!(map.get(keys::AD_ID), Some("1adId"));
        assert_eq!(map.get(keys::PRICE_BUCKET), Some("5.50"));
        assert_eq!(map.get(keys::SIZE), Some("300x250"));
        assert_eq!(map.get(keys::SOURCE), Some("client"));
        assert_eq!(map.get(keys::FORMAT), Some("banner"));
        assert_eq!(map.get(keys::ADOMAIN), Some("adomain"));
        assert!(!map.contains_key(keys::CACHE_HOST));
        assert!(!map.contains_key(keys::DEAL));
    }

    #[test]
    fn video_defaults_include_cache_keys() {
        let mut bid = sample_bid();
        bid.media_type = MediaType::Video;
        bid.video_cache_key = Some("abc123def".to_string());

        let settings = BidderSettings::default();
        let map = settings.resolve_targeting(&bid, Some("cache.example.com"));

        assert_eq!(map.get(keys::UUID), Some("abc123def"));
        assert_eq!(map.get(keys::CACHE_ID), Some("abc123def"));
        assert_eq!(map.get(keys::CACHE_HOST), Some("cache.example.com"));
    }

    #[test]
    fn deal_id_lands_in_targeting() {
        let mut bid = sample_bid();
        bid.deal_id = Some("test deal".to_string());

        let map = BidderSettings::default().resolve_targeting(&bid, None);
        assert_eq!(map.get(keys::DEAL), Some("test deal"));
    }

    #[test]
    fn bidder_override_inherits_standard_keys_it_does_not_redefine() {
        let mut settings = BidderSettings::default();
        settings.set_bidder(
            "appnexus",
            TargetingConfig {
                ad_server_targeting: Some(vec![TargetingEntry::fixed(keys::PRICE_BUCKET, "15.00")]),
                ..Default::default()
            },
        );

        let map = settings.resolve_targeting(&sample_bid(), None);
        assert_eq!(map.get(keys::PRICE_BUCKET), Some("15.00"));
        // Not redefined by the override, so still derived from the standard set.
        assert_eq!(map.get(keys::BIDDER), Some("appnexus"));
        assert_eq!(map.get(keys::SIZE), Some("300x250"));
    }

    #[test]
    fn bidder_override_for_another_bidder_is_ignored() {
        let mut settings = BidderSettings::default();
        settings.set_bidder(
            "nonExistentBidder",
            TargetingConfig {
                ad_server_targeting: Some(vec![TargetingEntry::fixed(keys::PRICE_BUCKET, "99.00")]),
                ..Default::default()
            },
        );

        let map = settings.resolve_targeting(&sample_bid(), None);
        assert_eq!(map.get(keys::PRICE_BUCKET), Some("5.50"));
    }

    #[test]
    fn disabling_standard_inheritance_keeps_only_the_override() {
        let mut settings = BidderSettings::default();
        settings.set_bidder(
            "appnexus",
            TargetingConfig {
                ad_server_targeting: Some(vec![
                    TargetingEntry::derived(keys::BIDDER, |b| Some(b.bidder_code.clone())),
                    TargetingEntry::fixed(keys::PRICE_BUCKET, "15.00"),
                ]),
                send_standard_targeting: Some(false),
                ..Default::default()
            },
        );

        let map = settings.resolve_targeting(&sample_bid(), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(keys::BIDDER), Some("appnexus"));
        assert_eq!(map.get(keys::PRICE_BUCKET), Some("15.00"));
    }

    #[test]
    fn suppress_empty_keys_drops_empty_values_only() {
        let settings = BidderSettings::with_standard(TargetingConfig {
            ad_server_targeting: Some(vec![
                TargetingEntry::fixed("aKeyWithAValue", "42"),
                TargetingEntry::fixed("aKeyWithAnEmptyValue", ""),
                TargetingEntry::derived("aKeyWithNoValue", |_| None),
            ]),
            suppress_empty_keys: true,
            ..Default::default()
        });

        let map = settings.resolve_targeting(&sample_bid(), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("aKeyWithAValue"), Some("42"));
    }

    #[test]
    fn adapter_extras_pass_through_without_clobbering_resolved_keys() {
        let mut bid = sample_bid();
        bid.adapter_targeting = vec![
            ("extra".to_string(), "stuff".to_string()),
            (keys::BIDDER.to_string(), "spoofed".to_string()),
        ];

        let map = BidderSettings::default().resolve_targeting(&bid, None);
        assert_eq!(map.get("extra"), Some("stuff"));
        assert_eq!(map.get(keys::BIDDER), Some("appnexus"));
    }

    #[test]
    fn bidder_adjustment_wins_over_standard() {
        let mut settings = BidderSettings::with_standard(TargetingConfig {
            cpm_adjustment: Some(Arc::new(|_, _| 200.0)),
            ..Default::default()
        });
        settings.set_bidder(
            "appnexus",
            TargetingConfig {
                cpm_adjustment: Some(Arc::new(|cpm, _| cpm * 0.7)),
                ..Default::default()
            },
        );

        let bid = sample_bid();
        let adjusted = settings.adjust_cpm(&bid);
        assert!((adjusted - 5.578 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn invalid_adjustments_keep_the_original_price() {
        let negative = BidderSettings::with_standard(TargetingConfig {
            cpm_adjustment: Some(Arc::new(|cpm, _| cpm * -0.5)),
            ..Default::default()
        });
        assert_eq!(negative.adjust_cpm(&sample_bid()), 5.578);

        let nan = BidderSettings::with_standard(TargetingConfig {
            cpm_adjustment: Some(Arc::new(|_, _| f64::NAN)),
            ..Default::default()
        });
        assert_eq!(nan.adjust_cpm(&sample_bid()), 5.578);

        let zero = BidderSettings::with_standard(TargetingConfig {
            cpm_adjustment: Some(Arc::new(|_, _| 0.0)),
            ..Default::default()
        });
        assert_eq!(zero.adjust_cpm(&sample_bid()), 0.0);
    }
}
