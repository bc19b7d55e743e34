//! Completion gate: decides, exactly once, that an auction is done.
//!
//! A dispatched request stays pending until every one of its ad-unit slots
//! has an outcome, or a deadline cuts it off. The gate fires when no
//! *required* request is pending and no admission batch is outstanding; the
//! auction-wide deadline overrides both conditions.

use tokio::time::Instant;
use tracing::{info, warn};

use crate::auction::state::{AuctionState, AuctionStatus};
use crate::auction::AuctionInner;
use crate::events::{AuctionEvent, AuctionSnapshot};
use crate::model::bid::{NoBidReason, TimedOutBid};
use crate::model::request::BidSpec;

struct DoneOutcome {
    snapshot: AuctionSnapshot,
    timed_out: Vec<TimedOutBid>,
}

impl AuctionInner {
    fn is_required(&self, bidder_code: &str) -> bool {
        !self.secondary_bidders.contains(bidder_code)
    }

    /// Evaluates the completion predicate. Requests already past their
    /// deadline are expired here as well, so the gate never waits on a
    /// deadline the timer task has not delivered yet.
    pub(crate) fn check_done(&self) {
        let outcome = {
            let mut st = self.state.lock().unwrap();
            if st.status != AuctionStatus::InProgress || st.outstanding_admissions > 0 {
                None
            } else {
                let now = Instant::now();
                let overdue: Vec<String> = st
                    .pending
                    .iter()
                    .filter(|(_, p)| now >= p.deadline)
                    .map(|(id, _)| id.clone())
                    .collect();
                for request_id in &overdue {
                    st.expire_request(request_id);
                }
                // When every declared bidder is secondary nobody is
                // individually required, yet completion waits for all of
                // them.
                let any_required_declared = st
                    .bid_requests
                    .iter()
                    .any(|r| self.is_required(&r.bidder_code));
                let waiting_on_required = if any_required_declared {
                    st.pending
                        .values()
                        .any(|p| self.is_required(&p.bidder_code))
                } else {
                    !st.pending.is_empty()
                };
                if waiting_on_required {
                    None
                } else {
                    Some(self.finish_locked(&mut st))
                }
            }
        };
        if let Some(outcome) = outcome {
            self.fire(outcome);
        }
    }

    /// Hard auction deadline: everything still pending is timed out and done
    /// fires immediately, outstanding admissions or not. Late settlements are
    /// discarded at the commit boundary.
    pub(crate) fn force_done(&self) {
        let outcome = {
            let mut st = self.state.lock().unwrap();
            let pending_ids: Vec<String> = st.pending.keys().cloned().collect();
            for request_id in &pending_ids {
                st.expire_request(request_id);
            }
            if st.status == AuctionStatus::InProgress {
                Some(self.finish_locked(&mut st))
            } else {
                None
            }
        };
        if let Some(outcome) = outcome {
            self.fire(outcome);
        }
    }

    /// Per-request deadline race lost: the request is recorded as timed out
    /// and excluded from further waiting.
    pub(crate) fn on_request_deadline(&self, request_id: &str) {
        let expired = {
            let mut st = self.state.lock().unwrap();
            st.expire_request(request_id)
        };
        if expired.is_empty() {
            return;
        }
        warn!(
            auction = %self.id,
            request = request_id,
            slots = expired.len(),
            "bid request crossed its deadline"
        );
        self.check_done();
    }

    /// Dispatcher-observed round-trip timeout; same bookkeeping as the
    /// deadline race.
    pub(crate) fn on_bidder_timeout(&self, request_id: &str) {
        self.on_request_deadline(request_id);
    }

    /// The bidder completed its round trip. Slots that never saw a response
    /// become explicit no-bids; answered slots settle when their admissions
    /// land.
    pub(crate) fn on_bidder_done(&self, request_id: &str) {
        {
            let mut st = self.state.lock().unwrap();
            let unanswered: Vec<BidSpec> = match st.pending.get(request_id) {
                Some(pending) => pending
                    .slots
                    .values()
                    .filter(|slot| !slot.responded)
                    .map(|slot| slot.spec.clone())
                    .collect(),
                None => return,
            };
            for spec in &unanswered {
                st.record_no_bid(spec, NoBidReason::NoResponse);
                st.settle_slot(request_id, &spec.bid_id);
            }
        }
        self.check_done();
    }

    fn finish_locked(&self, st: &mut AuctionState) -> DoneOutcome {
        st.status = AuctionStatus::Completed;
        DoneOutcome {
            snapshot: self.snapshot_locked(st),
            timed_out: st.timed_out.clone(),
        }
    }

    fn fire(&self, outcome: DoneOutcome) {
        let callback = self.on_done.lock().unwrap().take();
        if !outcome.timed_out.is_empty() {
            self.events
                .emit(AuctionEvent::BidTimeout(outcome.timed_out.clone()));
        }
        info!(
            auction = %self.id,
            bids = outcome.snapshot.bids_received,
            no_bids = outcome.snapshot.no_bids,
            timed_out = outcome.timed_out.len(),
            "auction completed"
        );
        self.events.emit(AuctionEvent::AuctionEnd(outcome.snapshot));
        if let Some(callback) = callback {
            callback();
        }
    }
}
