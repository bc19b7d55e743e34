//! Admission pipeline: validation, pre-admission extensions, price
//! enrichment, renderer attachment, video caching and the final commit into
//! auction state. Every step can fail for one bid without touching the rest
//! of the auction.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auction::state::AuctionStatus;
use crate::auction::AuctionInner;
use crate::error::{AdmissionRejection, CacheError};
use crate::model::ad_unit::VideoContext;
use crate::model::bid::{Bid, MediaType, NoBid, NoBidReason, RawBid, TargetingMap, TimedOutBid};
use crate::model::request::{BidRequest, BidSpec};
use crate::pricing::granularity::{price_bucket, resolve_granularity};
use crate::targeting::keys;

impl AuctionInner {
    /// Entry point for one bidder's response batch. Synchronously marks the
    /// answered slots (so a done signal cannot no-bid them) and spawns the
    /// batch admission; one batch's suspensions never block another's.
    pub(crate) fn on_bidder_response(self: Arc<Self>, request_id: &str, raw_bids: Vec<RawBid>) {
        let request = {
            let mut st = self.state.lock().unwrap();
            if !st.admission_allowed(request_id, Instant::now()) {
                let bidder_code = st
                    .request(request_id)
                    .map(|r| r.bidder_code.clone())
                    .unwrap_or_default();
                warn!(
                    auction = %self.id,
                    request = request_id,
                    bids = raw_bids.len(),
                    "discarding bids received after auction close"
                );
                for raw in &raw_bids {
                    st.timed_out.push(TimedOutBid {
                        bidder_code: bidder_code.clone(),
                        ad_unit_code: raw.ad_unit_code.clone(),
                        request_id: raw.request_id.clone(),
                    });
                }
                return;
            }
            let Some(request) = st.request(request_id).cloned() else {
                warn!(auction = %self.id, request = request_id, "response for unknown bid request");
                return;
            };
            if let Some(pending) = st.pending.get_mut(request_id) {
                for raw in &raw_bids {
                    if let Some(slot) = pending.slots.get_mut(&raw.request_id) {
                        if slot.spec.ad_unit_code == raw.ad_unit_code {
                            slot.responded = true;
                        }
                    }
                }
            }
            st.outstanding_admissions += 1;
            request
        };

        tokio::spawn(async move {
            self.admit_batch(&request, raw_bids).await;
            {
                let mut st = self.state.lock().unwrap();
                st.outstanding_admissions -= 1;
            }
            self.check_done();
        });
    }

    /// Runs every bid of the batch through validation and extensions
    /// concurrently, then pushes the surviving video bids through the cache
    /// gateway in one call before committing everything.
    async fn admit_batch(&self, request: &BidRequest, raw_bids: Vec<RawBid>) {
        let prepared = join_all(
            raw_bids
                .into_iter()
                .map(|raw| self.prepare_bid(request, raw)),
        )
        .await;

        let mut ready = Vec::new();
        let mut cacheable = Vec::new();
        for bid in prepared.into_iter().flatten() {
            let needs_cache = bid.media_type == MediaType::Video
                && bid.renderer.is_none()
                && self.cache.is_some();
            if needs_cache {
                cacheable.push(bid);
            } else {
                ready.push(bid);
            }
        }

        if let Some(gateway) = self.cache.clone() {
            if !cacheable.is_empty() {
                match gateway.cache_video_bids(&cacheable).await {
                    Ok(ids) if ids.len() == cacheable.len() => {
                        for (mut bid, cache_id) in cacheable.into_iter().zip(ids) {
                            bid.video_cache_key = Some(cache_id);
                            ready.push(bid);
                        }
                    }
                    outcome => {
                        let error = match outcome {
                            Err(error) => error,
                            Ok(ids) => CacheError::EntryCountMismatch {
                                expected: cacheable.len(),
                                got: ids.len(),
                            },
                        };
                        warn!(
                            auction = %self.id,
                            bidder = %request.bidder_code,
                            %error,
                            "cache gateway failed; converting video bids to no-bids"
                        );
                        let mut st = self.state.lock().unwrap();
                        for bid in &cacheable {
                            st.no_bids.push(NoBid {
                                bidder_code: bid.bidder_code.clone(),
                                ad_unit_code: bid.ad_unit_code.clone(),
                                request_id: bid.request_id.clone(),
                                reason: NoBidReason::CacheFailure(error.to_string()),
                            });
                            st.settle_slot(&request.request_id, &bid.request_id);
                        }
                    }
                }
            }
        }

        let cache_host = self.cache.as_ref().and_then(|g| g.cache_host());
        for mut bid in ready {
            bid.targeting = self.settings.resolve_targeting(&bid, cache_host);
            self.commit_bid(request, bid);
        }
    }

    /// Validation, extensions and enrichment for a single raw bid. Returns
    /// `None` when the bid was rejected; the rejection is already recorded.
    async fn prepare_bid(&self, request: &BidRequest, raw: RawBid) -> Option<Bid> {
        let spec = request
            .bids
            .iter()
            .find(|s| s.bid_id == raw.request_id && s.ad_unit_code == raw.ad_unit_code);
        let Some(spec) = spec else {
            warn!(
                auction = %self.id,
                bidder = %request.bidder_code,
                ad_unit = %raw.ad_unit_code,
                "bid does not match any pending request slot"
            );
            let mut st = self.state.lock().unwrap();
            st.no_bids.push(NoBid {
                bidder_code: request.bidder_code.clone(),
                ad_unit_code: raw.ad_unit_code.clone(),
                request_id: raw.request_id.clone(),
                reason: NoBidReason::Rejected(AdmissionRejection::UnmatchedAdUnit(
                    raw.ad_unit_code.clone(),
                )),
            });
            return None;
        };

        let rejection = if !raw.cpm.is_finite() || raw.cpm <= 0.0 {
            Some(AdmissionRejection::NonPositivePrice)
        } else if raw.media_type == MediaType::Banner
            && raw.width.is_none()
            && raw.height.is_none()
        {
            Some(AdmissionRejection::MissingSize)
        } else {
            None
        };
        if let Some(rejection) = rejection {
            debug!(
                auction = %self.id,
                bidder = %request.bidder_code,
                ad_unit = %spec.ad_unit_code,
                %rejection,
                "bid rejected"
            );
            let mut st = self.state.lock().unwrap();
            st.record_no_bid(spec, NoBidReason::Rejected(rejection));
            st.settle_slot(&request.request_id, &spec.bid_id);
            return None;
        }

        let mut bid = Bid {
            ad_id: Uuid::new_v4().to_string(),
            request_id: raw.request_id,
            bidder_code: request.bidder_code.clone(),
            ad_unit_code: spec.ad_unit_code.clone(),
            transaction_id: spec.transaction_id.clone(),
            cpm: raw.cpm,
            currency: raw.currency,
            width: raw.width,
            height: raw.height,
            media_type: raw.media_type,
            source: keys::SOURCE_CLIENT.to_string(),
            ad: raw.ad,
            creative_id: raw.creative_id,
            deal_id: raw.deal_id,
            meta: raw.meta,
            renderer: raw.renderer,
            price_bucket: String::new(),
            video_cache_key: None,
            targeting: TargetingMap::new(),
            adapter_targeting: raw.ad_server_targeting,
        };

        for extension in &self.extensions {
            if let Err(error) = extension.on_bid(&mut bid).await {
                warn!(auction = %self.id, bidder = %bid.bidder_code, %error, "extension dropped bid");
                let mut st = self.state.lock().unwrap();
                st.record_no_bid(spec, NoBidReason::ExtensionFailure(error.to_string()));
                st.settle_slot(&request.request_id, &spec.bid_id);
                return None;
            }
        }

        bid.cpm = self.settings.adjust_cpm(&bid);
        let granularity = resolve_granularity(
            bid.media_type,
            Some(&spec.media_types),
            &self.media_type_granularity,
            &self.granularity,
        );
        bid.price_bucket = price_bucket(bid.cpm, granularity);
        self.attach_renderer(&mut bid, spec);
        Some(bid)
    }

    /// Outstream video renderer precedence: the ad unit's own renderer, then
    /// its video media-type override, each skipped when marked backup-only
    /// while the bid supplies a renderer of its own; otherwise the bid's
    /// renderer stands.
    fn attach_renderer(&self, bid: &mut Bid, spec: &BidSpec) {
        if bid.media_type != MediaType::Video {
            return;
        }
        let context = spec.media_types.video.as_ref().and_then(|v| v.context);
        if context != Some(VideoContext::Outstream) {
            return;
        }
        let ad_unit = self.ad_units.iter().find(|u| u.code == spec.ad_unit_code);
        let unit_renderer = ad_unit.and_then(|u| u.renderer.as_ref());
        let media_renderer = spec
            .media_types
            .video
            .as_ref()
            .and_then(|v| v.renderer.as_ref())
            .or_else(|| {
                ad_unit
                    .and_then(|u| u.media_types.video.as_ref())
                    .and_then(|v| v.renderer.as_ref())
            });
        let chosen = [unit_renderer, media_renderer]
            .into_iter()
            .flatten()
            .find(|r| !(r.backup_only && bid.renderer.is_some()));
        if let Some(renderer) = chosen {
            bid.renderer = Some(renderer.clone());
        }
    }

    /// Final step: append to bids-received and mark the originating slot
    /// satisfied. Re-checks auction status so anything settling after the
    /// close is discarded, observable as a timeout.
    fn commit_bid(&self, request: &BidRequest, bid: Bid) {
        let mut st = self.state.lock().unwrap();
        if !st.admission_allowed(&request.request_id, Instant::now()) {
            debug_assert!(
                st.status == AuctionStatus::Completed,
                "commit on a never-dispatched auction"
            );
            warn!(
                auction = %self.id,
                bidder = %bid.bidder_code,
                ad_unit = %bid.ad_unit_code,
                "discarding bid settled after auction close"
            );
            st.timed_out.push(TimedOutBid {
                bidder_code: bid.bidder_code.clone(),
                ad_unit_code: bid.ad_unit_code.clone(),
                request_id: bid.request_id.clone(),
            });
            return;
        }
        debug!(
            auction = %self.id,
            bidder = %bid.bidder_code,
            ad_unit = %bid.ad_unit_code,
            cpm = bid.cpm,
            bucket = %bid.price_bucket,
            "bid committed"
        );
        st.settle_slot(&request.request_id, &bid.request_id);
        st.bids_received.push(bid);
    }
}
