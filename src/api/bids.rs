// Bidding endpoints: manual bids, bid history, auto-bid configuration,
// buyer limits.
//
// The bid submission client is deliberately thin: a positive-amount check,
// the request, and nothing else. Status only ever changes through the
// reconciler or a refetch; there is no optimistic update here.

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiClient, ApiError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BidMode {
    #[serde(rename = "A")]
    Auto,
    #[serde(rename = "M")]
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BidHistoryItem {
    pub bid_id: u64,
    pub vehicle_id: u64,
    pub buyer_id: u64,
    pub bid_amt: i64,
    pub bid_mode: BidMode,
    #[serde(default)]
    pub top_bid_at_insert: i64,
    #[serde(default)]
    pub created_dttm: Option<String>,
}

/// A stored auto-bid configuration: the server bids on the buyer's behalf
/// from `bid_start_amt` in `step_amt` increments up to `max_price`.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoBidConfig {
    pub vehicle_id: u64,
    pub buyer_id: u64,
    pub bid_start_amt: i64,
    pub step_amt: i64,
    #[serde(default)]
    pub max_bid_amt: i64,
    #[serde(default)]
    pub max_steps: i64,
    #[serde(default)]
    pub pending_steps: i64,
    #[serde(default)]
    pub last_bid_amt: i64,
    #[serde(default)]
    pub base_price: i64,
    #[serde(default)]
    pub max_price: i64,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub variant: String,
}

/// Parameters for creating or updating an auto-bid.
#[derive(Debug, Clone, Copy)]
pub struct AutoBidParams {
    pub start_amount: i64,
    pub max_bid: i64,
    pub step_amount: i64,
}

impl AutoBidParams {
    fn validate(&self) -> Result<(), ApiError> {
        if self.start_amount <= 0 || self.max_bid <= 0 || self.step_amount <= 0 {
            return Err(ApiError::InvalidInput(
                "auto-bid amounts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveVehicleBid {
    pub vehicle_id: u64,
    pub max_bidded: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnpaidVehicle {
    pub vehicle_id: u64,
    pub unpaid_amt: i64,
}

/// Read-mostly snapshot fetched before a bid dialog opens; never cached
/// beyond the dialog's lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct BuyerLimits {
    pub security_deposit: i64,
    pub bid_limit: i64,
    pub limit_used: i64,
    pub pending_limit: i64,
    #[serde(default)]
    pub active_vehicle_bids: Vec<ActiveVehicleBid>,
    #[serde(default)]
    pub unpaid_vehicles: Vec<UnpaidVehicle>,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

impl ApiClient {
    /// Submit a one-shot manual bid. The server's acknowledgement payload is
    /// not interesting; a rejection message travels back verbatim inside
    /// [`ApiError::Status`].
    pub async fn place_manual_bid(
        &self,
        buyer_id: u64,
        vehicle_id: u64,
        bid_amount: i64,
    ) -> Result<(), ApiError> {
        if bid_amount <= 0 {
            return Err(ApiError::InvalidInput("enter a valid bid amount".into()));
        }
        let _: Value = self
            .send_json(
                Method::POST,
                "/buyer-bids/manual",
                &serde_json::json!({
                    "buyer_id": buyer_id,
                    "vehicle_id": vehicle_id,
                    "bid_amount": bid_amount,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn bid_history_by_vehicle(
        &self,
        buyer_id: u64,
        vehicle_id: u64,
    ) -> Result<Vec<BidHistoryItem>, ApiError> {
        self.get_json(
            &format!("/buyer-bids/history-by-vehicle/{buyer_id}/{vehicle_id}"),
            &[],
        )
        .await
    }

    pub async fn bid_history_by_buyer(
        &self,
        buyer_id: u64,
    ) -> Result<Vec<BidHistoryItem>, ApiError> {
        self.get_json(&format!("/buyer-bids/history/{buyer_id}"), &[])
            .await
    }

    /// Fetch the auto-bid configuration for a vehicle.
    ///
    /// `Ok(None)` means the structured "no configuration" answer: a 404, or a
    /// 2xx whose data is a bare message object without `vehicle_id`. Real
    /// transport/server failures propagate as errors instead of being
    /// conflated with "not configured".
    pub async fn auto_bid(&self, vehicle_id: u64) -> Result<Option<AutoBidConfig>, ApiError> {
        let result = self
            .request_value(Method::GET, &format!("/auto-bid/{vehicle_id}"), &[], None)
            .await;

        let data = match result {
            Ok(data) => data,
            Err(ApiError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if data.is_null() || data.get("vehicle_id").is_none() {
            return Ok(None);
        }

        serde_json::from_value(data)
            .map(Some)
            .map_err(|e| ApiError::Decode {
                context: format!("/auto-bid/{vehicle_id}: {e}"),
            })
    }

    pub async fn set_auto_bid(
        &self,
        buyer_id: u64,
        vehicle_id: u64,
        params: AutoBidParams,
    ) -> Result<(), ApiError> {
        params.validate()?;
        let _: Value = self
            .send_json(
                Method::POST,
                "/auto-bid/set",
                &serde_json::json!({
                    "buyer_id": buyer_id,
                    "vehicle_id": vehicle_id,
                    "start_amount": params.start_amount,
                    "max_bid": params.max_bid,
                    "step_amount": params.step_amount,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn update_auto_bid(
        &self,
        buyer_id: u64,
        vehicle_id: u64,
        params: AutoBidParams,
    ) -> Result<(), ApiError> {
        params.validate()?;
        let _: Value = self
            .send_json(
                Method::PUT,
                &format!("/auto-bid/{vehicle_id}"),
                &serde_json::json!({
                    "buyer_id": buyer_id,
                    "vehicle_id": vehicle_id,
                    "start_amount": params.start_amount,
                    "max_bid": params.max_bid,
                    "step_amount": params.step_amount,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_auto_bid(&self, vehicle_id: u64) -> Result<(), ApiError> {
        let _: Value = self
            .request_json(
                Method::DELETE,
                &format!("/auto-bid/{vehicle_id}"),
                &[],
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn buyer_limits(&self, buyer_id: u64) -> Result<BuyerLimits, ApiError> {
        self.get_json(&format!("/buyer-bids/limits/{buyer_id}"), &[])
            .await
    }
}
