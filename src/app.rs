// Orchestration for one displayed vehicle.
//
// The watcher task owns the push-channel subscriptions and the one-second
// countdown tick for a vehicle view, folds events through the reconciler,
// dispatches the side effects the reconciler returns, and pushes UiUpdates
// to whoever is rendering. Dropping the handle (the "unmount") disposes the
// subscriptions and stops the tick; anything that arrives afterwards is
// silently dropped.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::bids::{AutoBidConfig, BidHistoryItem, BuyerLimits};
use crate::api::vehicles::Vehicle;
use crate::api::watchlist::ToggleOutcome;
use crate::api::{ApiClient, ApiError};
use crate::auction::countdown::{self, CountdownParts, SourceTz};
use crate::auction::status::{AuctionEvent, SideEffect, VehicleAuctionView};
use crate::socket::{EventKind, PushChannel, Subscription};

// ---------------------------------------------------------------------------
// UI updates
// ---------------------------------------------------------------------------

/// What the watcher pushes toward the renderer.
#[derive(Debug)]
pub enum UiUpdate {
    /// Status or end-time changed; carries the whole reconciled view.
    Status(VehicleAuctionView),
    /// Once-per-second countdown tick.
    CountdownTick {
        remaining: u64,
        parts: CountdownParts,
    },
    /// Refreshed bid history after a terminal transition.
    BidHistory(Vec<BidHistoryItem>),
    /// The refresh failed; message for a toast, view state untouched.
    BidHistoryError(String),
}

// ---------------------------------------------------------------------------
// View construction
// ---------------------------------------------------------------------------

/// Build the reconciled view for a freshly fetched vehicle. REST `end_time`
/// strings are naive IST.
pub fn view_from_vehicle(vehicle: &Vehicle) -> VehicleAuctionView {
    VehicleAuctionView {
        vehicle_id: vehicle.vehicle_id,
        bidding_status: vehicle.bidding_status.unwrap_or_default(),
        end_time: vehicle
            .end_time
            .as_deref()
            .and_then(|raw| countdown::normalize_end_time(raw, SourceTz::Ist)),
        has_bidded: vehicle.has_bidded,
        is_favorite: vehicle.is_favorite,
    }
}

// ---------------------------------------------------------------------------
// VehicleWatcher
// ---------------------------------------------------------------------------

/// Handle to a running watcher. Dropping it (or calling `stop`) tears the
/// task down and disposes its subscriptions.
pub struct VehicleWatcher {
    task: tokio::task::JoinHandle<()>,
}

impl VehicleWatcher {
    /// Start watching a vehicle: subscribe to all four push-event kinds,
    /// drive the countdown tick, and stream [`UiUpdate`]s to the returned
    /// receiver.
    pub fn start(
        api: Arc<ApiClient>,
        channel: &PushChannel,
        vehicle: &Vehicle,
        buyer_id: u64,
    ) -> (VehicleWatcher, mpsc::Receiver<UiUpdate>) {
        let view = view_from_vehicle(vehicle);
        let subs = EventKind::ALL.map(|kind| channel.subscribe(kind));
        let (ui_tx, ui_rx) = mpsc::channel(256);

        let task = tokio::spawn(run_watcher(api, view, buyer_id, subs, ui_tx));
        (VehicleWatcher { task }, ui_rx)
    }

    /// Stop the watcher (equivalent to dropping the handle).
    pub fn stop(self) {}
}

impl Drop for VehicleWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_watcher(
    api: Arc<ApiClient>,
    mut view: VehicleAuctionView,
    buyer_id: u64,
    subs: [Subscription; 4],
    ui_tx: mpsc::Sender<UiUpdate>,
) {
    let [mut winning, mut losing, mut winner, mut endtime] = subs;
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));

    loop {
        let event = tokio::select! {
            ev = winning.recv() => ev,
            ev = losing.recv() => ev,
            ev = winner.recv() => ev,
            ev = endtime.recv() => ev,
            _ = tick.tick() => {
                let remaining = view.remaining_seconds(Utc::now());
                let update = UiUpdate::CountdownTick {
                    remaining,
                    parts: CountdownParts::from_seconds(remaining),
                };
                if ui_tx.send(update).await.is_err() {
                    // Renderer unmounted.
                    return;
                }
                continue;
            }
        };

        let Some(event) = event else {
            // Channel torn down.
            return;
        };

        if apply_event(&api, &mut view, &event, buyer_id, &ui_tx)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Fold one event into the view, emit a Status update if anything changed,
/// and run the returned side effects. `Err(())` means the renderer is gone.
async fn apply_event(
    api: &ApiClient,
    view: &mut VehicleAuctionView,
    event: &AuctionEvent,
    buyer_id: u64,
    ui_tx: &mpsc::Sender<UiUpdate>,
) -> Result<(), ()> {
    let before = view.clone();
    let effects = view.apply(event, buyer_id);

    if *view != before {
        debug!(
            vehicle_id = view.vehicle_id,
            status = ?view.bidding_status,
            "auction view updated"
        );
        if ui_tx.send(UiUpdate::Status(view.clone())).await.is_err() {
            return Err(());
        }
    }

    for effect in effects {
        match effect {
            SideEffect::RefreshBidHistory => {
                let update = match api.bid_history_by_vehicle(buyer_id, view.vehicle_id).await {
                    Ok(items) => UiUpdate::BidHistory(items),
                    Err(e) => {
                        warn!("bid history refresh failed: {e}");
                        UiUpdate::BidHistoryError(e.to_string())
                    }
                };
                if ui_tx.send(update).await.is_err() {
                    return Err(());
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Bid placement
// ---------------------------------------------------------------------------

/// The refetched state after a successful bid. Either refetch may fail
/// independently without voiding the placement; failures are logged and
/// surface as `None`.
#[derive(Debug)]
pub struct BidPlacement {
    pub vehicle: Option<Vehicle>,
    pub history: Option<Vec<BidHistoryItem>>,
}

/// Place a manual bid, then refetch vehicle detail and bid history.
///
/// No optimistic update happens anywhere in this path: the view only changes
/// once the reconciler sees a push event or the caller applies the refetched
/// vehicle. A server rejection propagates with its message verbatim.
pub async fn place_bid_and_refresh(
    api: &ApiClient,
    buyer_id: u64,
    vehicle_id: u64,
    bid_amount: i64,
) -> Result<BidPlacement, ApiError> {
    api.place_manual_bid(buyer_id, vehicle_id, bid_amount).await?;

    let (vehicle, history) = tokio::join!(
        api.vehicle_by_id(vehicle_id),
        api.bid_history_by_vehicle(buyer_id, vehicle_id),
    );

    Ok(BidPlacement {
        vehicle: vehicle
            .map_err(|e| warn!("vehicle refetch after bid failed: {e}"))
            .ok(),
        history: history
            .map_err(|e| warn!("history refetch after bid failed: {e}"))
            .ok(),
    })
}

// ---------------------------------------------------------------------------
// Auto-bid dialog
// ---------------------------------------------------------------------------

/// State gathered when the auto-bid dialog opens. The two fetches run
/// concurrently and settle independently: a limits failure degrades to
/// "limits unavailable" (`None`), while an auto-bid lookup failure is a real
/// error the dialog surfaces.
#[derive(Debug)]
pub struct AutoBidDialog {
    pub existing: Result<Option<AutoBidConfig>, ApiError>,
    pub limits: Option<BuyerLimits>,
}

impl AutoBidDialog {
    /// Whether the dialog offers "Set" (no configuration) or
    /// "Update / Delete" (one exists).
    pub fn offers_update(&self) -> bool {
        matches!(self.existing, Ok(Some(_)))
    }
}

pub async fn open_auto_bid_dialog(
    api: &ApiClient,
    buyer_id: u64,
    vehicle_id: u64,
) -> AutoBidDialog {
    let (existing, limits) = tokio::join!(api.auto_bid(vehicle_id), api.buyer_limits(buyer_id));

    AutoBidDialog {
        existing,
        limits: limits
            .map_err(|e| warn!("buyer limits fetch failed: {e}"))
            .ok(),
    }
}

// ---------------------------------------------------------------------------
// Favorite toggle
// ---------------------------------------------------------------------------

/// Outcome of a favorite toggle as the UI sees it.
#[derive(Debug, PartialEq)]
pub enum FavoriteToggle {
    /// Applied; the view has been updated to the server-side state.
    Updated { is_favorite: bool, message: String },
    /// Refused by the bidding lock; the view was left untouched.
    Rejected { message: String },
}

/// Toggle the favorite flag, honoring the server's bidding lock: on
/// `locked: true` the local flag must not flip and the caller shows an
/// error.
pub async fn toggle_favorite(
    api: &ApiClient,
    view: &mut VehicleAuctionView,
) -> Result<FavoriteToggle, ApiError> {
    match api.toggle_watchlist(view.vehicle_id).await? {
        ToggleOutcome::Applied {
            is_favorite,
            message,
        } => {
            view.is_favorite = is_favorite;
            Ok(FavoriteToggle::Updated {
                is_favorite,
                message,
            })
        }
        ToggleOutcome::Locked { message } => Ok(FavoriteToggle::Rejected { message }),
    }
}
