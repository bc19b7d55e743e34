use async_trait::async_trait;

use crate::error::ExtensionError;
use crate::model::bid::Bid;

/// A pre-admission hook. Extensions registered on an auction run in
/// registration order against every candidate bid before enrichment; an
/// implementation may suspend (await) without blocking other bids. Returning
/// an error drops only the bid at hand, recorded as a no-bid.
#[async_trait]
pub trait AdmissionExtension: Send + Sync {
    fn name(&self) -> &str;

    async fn on_bid(&self, bid: &mut Bid) -> Result<(), ExtensionError>;
}
