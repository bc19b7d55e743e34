use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed or unmatchable bid. Recorded as a no-bid, never fatal to the
/// auction.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionRejection {
    #[error("bid price must be a positive number")]
    NonPositivePrice,
    #[error("banner bid carries neither width nor height")]
    MissingSize,
    #[error("no pending bid spec matches ad unit `{0}`")]
    UnmatchedAdUnit(String),
}

/// Failure talking to the external video cache store. Affected bids become
/// no-bids; the auction still completes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cache response malformed: {0}")]
    Malformed(String),
    #[error("cache returned {got} ids for {expected} bids")]
    EntryCountMismatch { expected: usize, got: usize },
}

/// A pre-admission extension dropped a bid. Only that bid is affected.
#[derive(Debug, Error, Clone)]
#[error("extension `{extension}` failed: {reason}")]
pub struct ExtensionError {
    pub extension: String,
    pub reason: String,
}

impl ExtensionError {
    pub fn new(extension: &str, reason: impl Into<String>) -> Self {
        Self {
            extension: extension.to_string(),
            reason: reason.into(),
        }
    }
}
