//! Header-bidding auction coordination engine.
//!
//! One publisher page event fans out price requests to many independent
//! bidder adapters; this crate collects their asynchronous responses,
//! enriches every admitted bid with a price bucket and ad-server targeting,
//! and decides deterministically when the auction is done. Bidder HTTP round
//! trips stay outside the core behind the [`auction::Dispatcher`] trait;
//! video creative storage sits behind [`cache::gateway::CacheGateway`].

pub mod auction;
pub mod cache;
pub mod error;
pub mod events;
pub mod extensions;
pub mod mock_bidders;
pub mod model;
pub mod pricing;
pub mod targeting;

pub use auction::{start_auction, Auction, AuctionCallbacks, AuctionConfig, Dispatcher};
pub use auction::state::AuctionStatus;
pub use events::{AuctionEvent, AuctionSnapshot};
