use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::model::bid::Bid;

/// External store for video creatives. Ad servers later look the creative up
/// by the returned id, so every video bid needs one before it can win.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    /// Submits one batch of video bids. The returned ids are index-aligned
    /// with the input slice.
    async fn cache_video_bids(&self, bids: &[Bid]) -> Result<Vec<String>, CacheError>;

    /// Host published to ad-server targeting as `hb_cache_host`, when known.
    fn cache_host(&self) -> Option<&str> {
        None
    }
}

#[derive(Serialize, Debug)]
struct CachePuts<'a> {
    puts: Vec<CachePut<'a>>,
}

#[derive(Serialize, Debug)]
struct CachePut<'a> {
    #[serde(rename = "type")]
    media: &'static str,
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttlseconds: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct CacheResponses {
    responses: Vec<CacheEntry>,
}

#[derive(Deserialize, Debug)]
struct CacheEntry {
    uuid: String,
}

/// HTTP client for a prebid-cache style endpoint. One POST per batch.
pub struct HttpCacheGateway {
    client: reqwest::Client,
    endpoint: String,
    host: Option<String>,
    ttl_seconds: Option<u64>,
}

impl HttpCacheGateway {
    pub fn new(endpoint: &str) -> Self {
        let host = endpoint
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .map(|h| h.to_string());
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            host,
            ttl_seconds: None,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

#[async_trait]
impl CacheGateway for HttpCacheGateway {
    async fn cache_video_bids(&self, bids: &[Bid]) -> Result<Vec<String>, CacheError> {
        let payload = CachePuts {
            puts: bids
                .iter()
                .map(|bid| CachePut {
                    media: "xml",
                    value: bid.ad.as_deref().unwrap_or(""),
                    ttlseconds: self.ttl_seconds,
                })
                .collect(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let parsed: CacheResponses = response
            .json()
            .await
            .map_err(|e| CacheError::Malformed(e.to_string()))?;
        if parsed.responses.len() != bids.len() {
            return Err(CacheError::EntryCountMismatch {
                expected: bids.len(),
                got: parsed.responses.len(),
            });
        }
        debug!(count = bids.len(), endpoint = %self.endpoint, "cached video bids");
        Ok(parsed.responses.into_iter().map(|e| e.uuid).collect())
    }

    fn cache_host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_derived_from_the_endpoint_url() {
        let gateway = HttpCacheGateway::new("https://prebid.adnxs.com/pbc/v1/cache");
        assert_eq!(gateway.cache_host(), Some("prebid.adnxs.com"));

        let bare = HttpCacheGateway::new("not a url");
        assert_eq!(bare.cache_host(), None);
    }
}
