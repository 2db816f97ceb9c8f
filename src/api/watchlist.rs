// Watchlist (starred vehicles) and wishlist (standing-filter matches).
//
// Watchlist removal is locked server-side while the buyer is actively
// bidding on a vehicle. The toggle endpoint signals that with
// `locked: true`; the typed outcome below makes it impossible for a caller
// to flip the local favorite flag on a locked response by accident.

use serde::Deserialize;
use serde_json::Value;

use super::vehicles::Vehicle;
use super::{ApiClient, ApiError};

#[derive(Debug, Clone, Deserialize)]
struct TogglePayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    is_favorite: Option<bool>,
    #[serde(default)]
    locked: Option<bool>,
}

/// Result of a watchlist toggle.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    /// The toggle went through; `is_favorite` is the new server-side state.
    Applied {
        is_favorite: bool,
        message: String,
    },
    /// Removal refused while actively bidding. Local state must not change.
    Locked { message: String },
}

impl ApiClient {
    pub async fn watchlist(&self) -> Result<Vec<Vehicle>, ApiError> {
        self.get_json("/watchlist", &[]).await
    }

    /// Vehicles matching the buyer's standing wishlist filters.
    pub async fn wishlist(&self) -> Result<Vec<Vehicle>, ApiError> {
        self.get_json("/wishlist", &[]).await
    }

    /// Toggle a vehicle's favorite flag, honoring the server-side bidding
    /// lock.
    pub async fn toggle_watchlist(&self, vehicle_id: u64) -> Result<ToggleOutcome, ApiError> {
        let data: Value = self
            .send_json(
                reqwest::Method::POST,
                "/watchlist/toggle",
                &serde_json::json!({ "vehicle_id": vehicle_id }),
            )
            .await?;

        let payload: TogglePayload =
            serde_json::from_value(data).map_err(|e| ApiError::Decode {
                context: format!("/watchlist/toggle: {e}"),
            })?;

        let message = payload
            .message
            .unwrap_or_else(|| "Favorite updated".to_string());

        if payload.locked.unwrap_or(false) {
            return Ok(ToggleOutcome::Locked { message });
        }

        Ok(ToggleOutcome::Applied {
            is_favorite: payload.is_favorite.unwrap_or(false),
            message,
        })
    }
}
