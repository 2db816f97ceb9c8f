// Per-vehicle auction status reconciliation.
//
// Folds push-channel events into the currently displayed vehicle view.
// The transition itself is pure: side effects (like the bid-history refresh
// a terminal Won/Lost triggers) are returned as data for the caller to
// dispatch, never executed here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::countdown::{self, SourceTz};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Server-asserted bidding status. The client never derives this from bid
/// amounts; it renders whatever the server last asserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiddingStatus {
    #[default]
    None,
    Winning,
    Losing,
    Won,
    Lost,
}

// ---------------------------------------------------------------------------
// Push-channel payloads
// ---------------------------------------------------------------------------

/// `isWinning` / `isLosing` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub vehicle_id: u64,
}

/// `vehicle:winner:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerUpdatePayload {
    pub vehicle_id: u64,
    pub winner_buyer_id: u64,
    #[serde(default)]
    pub loser_buyer_id: Option<u64>,
    /// Optional end-time update piggybacked on the winner announcement.
    #[serde(default)]
    pub auction_end_dttm: Option<String>,
}

/// `vehicle:endtime:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndtimeUpdatePayload {
    pub vehicle_id: u64,
    pub auction_end_dttm: String,
}

/// A decoded push-channel event.
#[derive(Debug, Clone, PartialEq)]
pub enum AuctionEvent {
    IsWinning(StatusPayload),
    IsLosing(StatusPayload),
    WinnerUpdate(WinnerUpdatePayload),
    EndtimeUpdate(EndtimeUpdatePayload),
}

impl AuctionEvent {
    /// The vehicle this event is routed to.
    pub fn vehicle_id(&self) -> u64 {
        match self {
            AuctionEvent::IsWinning(p) | AuctionEvent::IsLosing(p) => p.vehicle_id,
            AuctionEvent::WinnerUpdate(p) => p.vehicle_id,
            AuctionEvent::EndtimeUpdate(p) => p.vehicle_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Effects a transition asks the caller to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Refetch the bid history for this vehicle (terminal Won/Lost).
    RefreshBidHistory,
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// Reconciled view state for one displayed vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleAuctionView {
    pub vehicle_id: u64,
    pub bidding_status: BiddingStatus,
    /// Normalized countdown target. `None` renders as an expired countdown.
    pub end_time: Option<DateTime<Utc>>,
    /// Sticky for the session: once true, stays true.
    pub has_bidded: bool,
    pub is_favorite: bool,
}

impl VehicleAuctionView {
    pub fn new(vehicle_id: u64) -> Self {
        VehicleAuctionView {
            vehicle_id,
            bidding_status: BiddingStatus::None,
            end_time: None,
            has_bidded: false,
            is_favorite: false,
        }
    }

    /// Fold one push event into this view.
    ///
    /// Events for other vehicles are discarded with no effect. No ordering
    /// beyond transport delivery is assumed: conflicting fields are
    /// last-write-wins, and a REST refetch on critical transitions is the
    /// correctness backstop.
    pub fn apply(&mut self, event: &AuctionEvent, current_buyer_id: u64) -> Vec<SideEffect> {
        if event.vehicle_id() != self.vehicle_id {
            return Vec::new();
        }

        match event {
            AuctionEvent::IsWinning(_) => {
                self.bidding_status = BiddingStatus::Winning;
                self.has_bidded = true;
                Vec::new()
            }
            AuctionEvent::IsLosing(_) => {
                self.bidding_status = BiddingStatus::Losing;
                self.has_bidded = true;
                Vec::new()
            }
            AuctionEvent::WinnerUpdate(p) => {
                self.bidding_status = if p.winner_buyer_id == current_buyer_id {
                    BiddingStatus::Won
                } else {
                    BiddingStatus::Lost
                };
                self.has_bidded = true;
                if let Some(raw) = &p.auction_end_dttm {
                    self.end_time = countdown::normalize_end_time(raw, SourceTz::Utc);
                }
                vec![SideEffect::RefreshBidHistory]
            }
            AuctionEvent::EndtimeUpdate(p) => {
                // Status untouched; whatever end time arrived last wins,
                // even if it moved backwards.
                self.end_time = countdown::normalize_end_time(&p.auction_end_dttm, SourceTz::Utc);
                Vec::new()
            }
        }
    }

    /// Whole seconds remaining on the countdown at `now`.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        countdown::remaining_seconds_opt(self.end_time, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ME: u64 = 7;
    const VEHICLE: u64 = 123;

    fn view() -> VehicleAuctionView {
        VehicleAuctionView::new(VEHICLE)
    }

    fn winning(vehicle_id: u64) -> AuctionEvent {
        AuctionEvent::IsWinning(StatusPayload { vehicle_id })
    }

    fn losing(vehicle_id: u64) -> AuctionEvent {
        AuctionEvent::IsLosing(StatusPayload { vehicle_id })
    }

    fn winner(vehicle_id: u64, winner_buyer_id: u64, end: Option<&str>) -> AuctionEvent {
        AuctionEvent::WinnerUpdate(WinnerUpdatePayload {
            vehicle_id,
            winner_buyer_id,
            loser_buyer_id: None,
            auction_end_dttm: end.map(|s| s.to_string()),
        })
    }

    fn endtime(vehicle_id: u64, end: &str) -> AuctionEvent {
        AuctionEvent::EndtimeUpdate(EndtimeUpdatePayload {
            vehicle_id,
            auction_end_dttm: end.to_string(),
        })
    }

    #[test]
    fn is_winning_sets_status_and_sticky_flag() {
        let mut v = view();
        let effects = v.apply(&winning(VEHICLE), ME);
        assert_eq!(v.bidding_status, BiddingStatus::Winning);
        assert!(v.has_bidded);
        assert!(effects.is_empty());
    }

    #[test]
    fn winning_then_losing_last_write_wins() {
        let mut v = view();
        v.apply(&winning(VEHICLE), ME);
        v.apply(&losing(VEHICLE), ME);
        assert_eq!(v.bidding_status, BiddingStatus::Losing);
        assert!(v.has_bidded);
    }

    #[test]
    fn winning_losing_may_alternate() {
        let mut v = view();
        for _ in 0..3 {
            v.apply(&losing(VEHICLE), ME);
            v.apply(&winning(VEHICLE), ME);
        }
        assert_eq!(v.bidding_status, BiddingStatus::Winning);
    }

    #[test]
    fn events_for_other_vehicles_are_discarded() {
        let mut v = view();
        v.apply(&winning(VEHICLE), ME);
        let before = v.clone();

        v.apply(&losing(999), ME);
        v.apply(&winner(999, ME, Some("2025-10-14 04:05:45")), ME);
        v.apply(&endtime(999, "2025-10-14 04:05:45"), ME);
        assert_eq!(v, before);
    }

    #[test]
    fn winner_update_for_me_yields_won() {
        let mut v = view();
        let effects = v.apply(&winner(VEHICLE, ME, None), ME);
        assert_eq!(v.bidding_status, BiddingStatus::Won);
        assert!(v.has_bidded);
        assert_eq!(effects, vec![SideEffect::RefreshBidHistory]);
    }

    #[test]
    fn winner_update_for_someone_else_yields_lost() {
        let mut v = view();
        let effects = v.apply(&winner(VEHICLE, 42, None), ME);
        assert_eq!(v.bidding_status, BiddingStatus::Lost);
        assert!(v.has_bidded);
        assert_eq!(effects, vec![SideEffect::RefreshBidHistory]);
    }

    #[test]
    fn repeated_winner_updates_are_idempotent() {
        let mut v = view();
        v.apply(&winner(VEHICLE, ME, None), ME);
        let after_first = v.clone();
        let effects = v.apply(&winner(VEHICLE, ME, None), ME);
        assert_eq!(v, after_first);
        // The effect is re-requested, the state does not change.
        assert_eq!(effects, vec![SideEffect::RefreshBidHistory]);
    }

    #[test]
    fn winner_update_carries_end_time_through_utc_normalizer() {
        let mut v = view();
        v.apply(&winner(VEHICLE, ME, Some("2025-10-14 04:05:45")), ME);
        assert_eq!(
            v.end_time,
            Some(Utc.with_ymd_and_hms(2025, 10, 14, 4, 5, 45).unwrap())
        );
    }

    #[test]
    fn endtime_update_does_not_touch_status() {
        let mut v = view();
        v.apply(&winning(VEHICLE), ME);
        v.apply(&endtime(VEHICLE, "2025-10-09 10:00:00"), ME);
        assert_eq!(v.bidding_status, BiddingStatus::Winning);
        assert_eq!(
            v.end_time,
            Some(Utc.with_ymd_and_hms(2025, 10, 9, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn backward_endtime_update_is_tolerated() {
        let mut v = view();
        v.apply(&endtime(VEHICLE, "2025-10-09 10:00:00"), ME);
        v.apply(&endtime(VEHICLE, "2025-10-08 10:00:00"), ME);
        assert_eq!(
            v.end_time,
            Some(Utc.with_ymd_and_hms(2025, 10, 8, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparsable_endtime_renders_expired_not_panic() {
        let mut v = view();
        v.apply(&endtime(VEHICLE, "not a timestamp"), ME);
        assert!(v.end_time.is_none());
        let now = Utc.with_ymd_and_hms(2025, 10, 8, 0, 0, 0).unwrap();
        assert_eq!(v.remaining_seconds(now), 0);
    }

    #[test]
    fn has_bidded_is_sticky_across_events() {
        let mut v = view();
        v.apply(&losing(VEHICLE), ME);
        assert!(v.has_bidded);
        v.apply(&endtime(VEHICLE, "2025-10-09 10:00:00"), ME);
        assert!(v.has_bidded);
    }

    #[test]
    fn payload_decoding_uses_backend_field_names() {
        let p: WinnerUpdatePayload = serde_json::from_str(
            r#"{"vehicleId":123,"winnerBuyerId":7,"loserBuyerId":null,"auctionEndDttm":"2025-10-14 04:05:45"}"#,
        )
        .unwrap();
        assert_eq!(p.vehicle_id, 123);
        assert_eq!(p.winner_buyer_id, 7);
        assert_eq!(p.loser_buyer_id, None);
        assert_eq!(p.auction_end_dttm.as_deref(), Some("2025-10-14 04:05:45"));

        let p: EndtimeUpdatePayload =
            serde_json::from_str(r#"{"vehicleId":5,"auctionEndDttm":"2025-10-14 04:05:45"}"#)
                .unwrap();
        assert_eq!(p.vehicle_id, 5);

        let p: StatusPayload = serde_json::from_str(r#"{"vehicleId":9}"#).unwrap();
        assert_eq!(p.vehicle_id, 9);
    }
}
