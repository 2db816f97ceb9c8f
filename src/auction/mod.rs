// Auction domain: status reconciliation and countdown normalization.

pub mod countdown;
pub mod status;

pub use countdown::{normalize_end_time, remaining_seconds, CountdownParts, SourceTz};
pub use status::{AuctionEvent, BiddingStatus, SideEffect, VehicleAuctionView};
