use serde::{Deserialize, Serialize};
use std::fmt;

/// A placement slot on the page, identified by its code.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdUnit {
    pub code: String,
    pub transaction_id: String,
    pub media_types: MediaTypes,
    /// Publisher-declared renderer applying to every media type of this unit.
    pub renderer: Option<Renderer>,
}

impl AdUnit {
    pub fn new(code: &str, transaction_id: &str, media_types: MediaTypes) -> Self {
        Self {
            code: code.to_string(),
            transaction_id: transaction_id.to_string(),
            media_types,
            renderer: None,
        }
    }
}

/// Media types an ad unit (or one bidder's slice of it) declares.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MediaTypes {
    pub banner: Option<BannerType>,
    pub video: Option<VideoType>,
    pub native: Option<NativeType>,
}

impl MediaTypes {
    pub fn banner(sizes: Vec<(u32, u32)>) -> Self {
        Self {
            banner: Some(BannerType { sizes }),
            ..Default::default()
        }
    }

    pub fn video(context: Option<VideoContext>) -> Self {
        Self {
            video: Some(VideoType {
                context,
                player_size: None,
                renderer: None,
            }),
            ..Default::default()
        }
    }

    pub fn native() -> Self {
        Self {
            native: Some(NativeType::default()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BannerType {
    pub sizes: Vec<(u32, u32)>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VideoType {
    pub context: Option<VideoContext>,
    pub player_size: Option<(u32, u32)>,
    /// Renderer override scoped to video bids only.
    pub renderer: Option<Renderer>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NativeType {}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoContext {
    Instream,
    Outstream,
}

impl fmt::Display for VideoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoContext::Instream => write!(f, "instream"),
            VideoContext::Outstream => write!(f, "outstream"),
        }
    }
}

/// Reference to the script that renders an outstream creative.
/// A backup-only renderer is attached only when the bid carries none of its own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    pub url: String,
    pub backup_only: bool,
}

impl Renderer {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            backup_only: false,
        }
    }

    pub fn backup(url: &str) -> Self {
        Self {
            url: url.to_string(),
            backup_only: true,
        }
    }
}
