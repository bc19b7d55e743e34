//! Ad-server targeting key names. These are wire-level constants shared with
//! the ad-server line-item setup and must not be renamed casually.

pub const BIDDER: &str = "hb_bidder";
pub const AD_ID: &str = "hb_adid";
pub const PRICE_BUCKET: &str = "hb_pb";
pub const SIZE: &str = "hb_size";
pub const DEAL: &str = "hb_deal";
pub const SOURCE: &str = "hb_source";
pub const FORMAT: &str = "hb_format";
pub const ADOMAIN: &str = "hb_adomain";
pub const UUID: &str = "hb_uuid";
pub const CACHE_ID: &str = "hb_cache_id";
pub const CACHE_HOST: &str = "hb_cache_host";

/// Source value for bids gathered client-side by this engine.
pub const SOURCE_CLIENT: &str = "client";
