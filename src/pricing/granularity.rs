use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::ad_unit::MediaTypes;
use crate::model::bid::MediaType;

/// One row of a quantization table: prices below `max` are truncated to the
/// nearest `increment` boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GranularityBucket {
    pub max: f64,
    pub increment: f64,
}

/// Quantization scheme for turning a continuous cpm into a discrete
/// targeting bucket string. The last bucket's `max` is the cap.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Low,
    Medium,
    High,
    Auto,
    Dense,
    Custom(Vec<GranularityBucket>),
}

const LOW: &[GranularityBucket] = &[GranularityBucket {
    max: 5.0,
    increment: 0.5,
}];
const MEDIUM: &[GranularityBucket] = &[GranularityBucket {
    max: 20.0,
    increment: 0.1,
}];
const HIGH: &[GranularityBucket] = &[GranularityBucket {
    max: 20.0,
    increment: 0.01,
}];
const AUTO: &[GranularityBucket] = &[
    GranularityBucket {
        max: 5.0,
        increment: 0.05,
    },
    GranularityBucket {
        max: 10.0,
        increment: 0.1,
    },
    GranularityBucket {
        max: 20.0,
        increment: 0.5,
    },
];
const DENSE: &[GranularityBucket] = &[
    GranularityBucket {
        max: 3.0,
        increment: 0.01,
    },
    GranularityBucket {
        max: 8.0,
        increment: 0.05,
    },
    GranularityBucket {
        max: 20.0,
        increment: 0.5,
    },
];

impl Granularity {
    fn buckets(&self) -> &[GranularityBucket] {
        match self {
            Granularity::Low => LOW,
            Granularity::Medium => MEDIUM,
            Granularity::High => HIGH,
            Granularity::Auto => AUTO,
            Granularity::Dense => DENSE,
            Granularity::Custom(table) => table,
        }
    }
}

/// Maps a cpm to its quantized bucket string. Truncates, never rounds up,
/// formatted with two decimals. Prices at or above the cap collapse to the
/// cap value; negative or non-finite prices yield the empty string.
pub fn price_bucket(cpm: f64, granularity: &Granularity) -> String {
    if !cpm.is_finite() || cpm < 0.0 {
        return String::new();
    }
    let buckets = granularity.buckets();
    let Some(cap) = buckets.last() else {
        return String::new();
    };
    if cpm >= cap.max {
        return format!("{:.2}", cap.max);
    }
    for bucket in buckets {
        if cpm < bucket.max {
            // Nudge past the representation error of cpm / increment so an
            // exact boundary (1.99 / 0.01) does not truncate a cent low.
            let steps = (cpm / bucket.increment + 1e-9).floor();
            return format!("{:.2}", steps * bucket.increment);
        }
    }
    String::new()
}

/// Selects the granularity for a bid's media type. Video refines by the ad
/// unit's declared context (`video-outstream` / `video-instream`) before
/// falling back to the bare media type, then to the global default. Absence
/// of any matching entry is never an error.
pub fn resolve_granularity<'a>(
    media_type: MediaType,
    ad_unit_media_types: Option<&MediaTypes>,
    configured: &'a HashMap<String, Granularity>,
    default: &'a Granularity,
) -> &'a Granularity {
    let mut keys: Vec<String> = Vec::with_capacity(2);
    match media_type {
        MediaType::Video => {
            let context = ad_unit_media_types
                .and_then(|mt| mt.video.as_ref())
                .and_then(|v| v.context);
            if let Some(context) = context {
                keys.push(format!("video-{}", context));
            }
            keys.push("video".to_string());
        }
        MediaType::Banner => keys.push("banner".to_string()),
        MediaType::Native => keys.push("native".to_string()),
    }
    keys.iter()
        .find_map(|key| configured.get(key))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ad_unit::VideoContext;
    use proptest::prelude::*;

    #[test]
    fn dense_uses_one_cent_increments_below_three() {
        assert_eq!(price_bucket(1.99, &Granularity::Dense), "1.99");
        assert_eq!(price_bucket(0.0, &Granularity::Dense), "0.00");
    }

    #[test]
    fn dense_uses_five_cent_increments_between_three_and_eight() {
        assert_eq!(price_bucket(4.39, &Granularity::Dense), "4.35");
    }

    #[test]
    fn dense_uses_fifty_cent_increments_between_eight_and_twenty() {
        assert_eq!(price_bucket(19.99, &Granularity::Dense), "19.50");
    }

    #[test]
    fn dense_caps_at_twenty() {
        assert_eq!(price_bucket(73.07, &Granularity::Dense), "20.00");
        assert_eq!(price_bucket(20.0, &Granularity::Dense), "20.00");
    }

    #[test]
    fn negative_or_non_finite_prices_yield_empty_bucket() {
        assert_eq!(price_bucket(-0.5, &Granularity::Dense), "");
        assert_eq!(price_bucket(f64::NAN, &Granularity::Dense), "");
        assert_eq!(price_bucket(f64::INFINITY, &Granularity::Low), "");
    }

    #[test]
    fn named_modes_use_their_own_tables() {
        assert_eq!(price_bucket(1.87, &Granularity::Low), "1.50");
        assert_eq!(price_bucket(5.32, &Granularity::Medium), "5.30");
        assert_eq!(price_bucket(5.32, &Granularity::High), "5.32");
        assert_eq!(price_bucket(7.35, &Granularity::Auto), "7.30");
        assert_eq!(price_bucket(3.01, &Granularity::Auto), "3.00");
    }

    #[test]
    fn custom_table_with_explicit_cap() {
        let custom = Granularity::Custom(vec![
            GranularityBucket {
                max: 4.0,
                increment: 0.25,
            },
            GranularityBucket {
                max: 10.0,
                increment: 1.0,
            },
        ]);
        assert_eq!(price_bucket(3.4, &custom), "3.25");
        assert_eq!(price_bucket(6.7, &custom), "6.00");
        assert_eq!(price_bucket(11.0, &custom), "10.00");

        let empty = Granularity::Custom(Vec::new());
        assert_eq!(price_bucket(2.0, &empty), "");
    }

    fn configured(entries: &[(&str, Granularity)]) -> HashMap<String, Granularity> {
        entries
            .iter()
            .map(|(k, g)| (k.to_string(), g.clone()))
            .collect()
    }

    #[test]
    fn video_granularity_refines_by_context() {
        let table = configured(&[
            ("banner", Granularity::Low),
            ("video", Granularity::Medium),
            ("video-outstream", Granularity::High),
        ]);
        let media_types = MediaTypes::video(Some(VideoContext::Outstream));
        let resolved = resolve_granularity(
            MediaType::Video,
            Some(&media_types),
            &table,
            &Granularity::Dense,
        );
        assert_eq!(resolved, &Granularity::High);
    }

    #[test]
    fn video_instream_falls_back_to_bare_video() {
        let table = configured(&[("banner", Granularity::Low), ("video", Granularity::Medium)]);
        let media_types = MediaTypes::video(Some(VideoContext::Instream));
        let resolved = resolve_granularity(
            MediaType::Video,
            Some(&media_types),
            &table,
            &Granularity::Dense,
        );
        assert_eq!(resolved, &Granularity::Medium);

        // No context declared at all still lands on the bare video entry.
        let resolved = resolve_granularity(
            MediaType::Video,
            Some(&MediaTypes::video(None)),
            &table,
            &Granularity::Dense,
        );
        assert_eq!(resolved, &Granularity::Medium);
    }

    #[test]
    fn missing_entries_fall_back_to_the_global_default() {
        let table = configured(&[("banner", Granularity::Low)]);
        let resolved =
            resolve_granularity(MediaType::Native, None, &table, &Granularity::Medium);
        assert_eq!(resolved, &Granularity::Medium);
    }

    proptest! {
        #[test]
        fn bucket_never_exceeds_the_price(cpm in 0.0f64..40.0) {
            let bucket = price_bucket(cpm, &Granularity::Dense);
            let parsed: f64 = bucket.parse().unwrap();
            prop_assert!(parsed <= cpm + 1e-6);
        }

        #[test]
        fn bucket_is_within_one_increment_below_the_price(cpm in 0.0f64..20.0) {
            let bucket = price_bucket(cpm, &Granularity::Auto);
            let parsed: f64 = bucket.parse().unwrap();
            // Auto's coarsest increment is 0.5.
            prop_assert!(cpm - parsed < 0.5 + 1e-6);
        }
    }
}
