// Vehicle browsing endpoints: groups, paginated lists, detail, search,
// faceted filter, lookup tables, and the won-vehicles page.

use serde::{Deserialize, Deserializer};

use super::{ApiClient, ApiError};
use crate::auction::status::BiddingStatus;
use crate::config::BusinessVertical;

// ---------------------------------------------------------------------------
// Deserialization helpers
// ---------------------------------------------------------------------------
// The backend is inconsistent about numeric fields: the same field arrives as
// a JSON string in one endpoint and as a number in another. Display-oriented
// fields are therefore kept as strings and coerced on ingestion.

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    S(String),
    N(serde_json::Number),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            StringOrNumber::S(s) => s,
            StringOrNumber::N(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(StringOrNumber::deserialize(d)?.into_string())
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v: Option<StringOrNumber> = Option::deserialize(d)?;
    Ok(v.map(StringOrNumber::into_string))
}

fn u64_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = StringOrNumber::deserialize(d)?;
    match v {
        StringOrNumber::N(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer")),
        StringOrNumber::S(s) => s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid numeric id: {s}"))),
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A browse bucket of auction inventory (by damage category, region, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleGroup {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub total_vehicles: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "type")]
    pub group_type: Option<String>,
}

/// One vehicle as the backend describes it. `end_time` stays raw here; it is
/// normalized (IST path) when the auction view is built.
#[derive(Debug, Clone, Deserialize)]
pub struct Vehicle {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub vehicle_id: u64,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub odometer: Option<String>,
    #[serde(default)]
    pub fuel: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub owner_serial: Option<String>,
    #[serde(default, rename = "transmissionType")]
    pub transmission_type: Option<String>,
    #[serde(default)]
    pub rc_availability: bool,
    #[serde(default)]
    pub repo_date: Option<String>,
    #[serde(default)]
    pub regs_no: Option<String>,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub manufacture_year: Option<String>,
    #[serde(default)]
    pub state_rto: Option<String>,
    #[serde(default)]
    pub img_extension: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub has_bidded: bool,
    #[serde(default)]
    pub bidding_status: Option<BiddingStatus>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub bid_amount: Option<String>,
    #[serde(default)]
    pub manager_name: Option<String>,
    #[serde(default)]
    pub manager_phone: Option<String>,
    #[serde(default)]
    pub yard_contact_person_name: Option<String>,
    #[serde(default)]
    pub yard_address: Option<String>,
    #[serde(default)]
    pub yard_city: Option<String>,
    #[serde(default)]
    pub yard_state: Option<String>,
    #[serde(default)]
    pub yard_address_zip: Option<String>,
}

impl Vehicle {
    /// Single-line display title, e.g. "Maruti Swift VXI (2019)".
    pub fn title(&self) -> String {
        let mut title = format!("{} {} {}", self.make, self.model, self.variant)
            .trim()
            .to_string();
        if let Some(year) = &self.manufacture_year {
            title.push_str(&format!(" ({year})"));
        }
        title
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default, rename = "pageSize")]
    pub page_size: u64,
    #[serde(default, rename = "totalPages")]
    pub total_pages: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuelType {
    pub id: u64,
    pub fuel_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateInfo {
    pub id: u64,
    pub state: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleTypeInfo {
    pub id: u64,
    pub vehicle_type: String,
}

/// Faceted filter selection; each facet is sent as a comma-joined id list.
#[derive(Debug, Clone, Default)]
pub struct FilterParams {
    pub vehicle_types: Vec<u64>,
    pub fuels: Vec<u64>,
    pub ownerships: Vec<u64>,
    pub rc_available: Option<bool>,
    pub states: Vec<u64>,
}

impl FilterParams {
    fn joined(ids: &[u64]) -> String {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Query pairs for non-empty facets only.
    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !self.vehicle_types.is_empty() {
            query.push(("vehicle_type", Self::joined(&self.vehicle_types)));
        }
        if !self.fuels.is_empty() {
            query.push(("fuel", Self::joined(&self.fuels)));
        }
        if !self.ownerships.is_empty() {
            query.push(("ownership", Self::joined(&self.ownerships)));
        }
        if let Some(rc) = self.rc_available {
            query.push(("rc_available", if rc { "1" } else { "0" }.to_string()));
        }
        if !self.states.is_empty() {
            query.push(("state", Self::joined(&self.states)));
        }
        query
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

impl ApiClient {
    pub async fn groups(
        &self,
        vertical: BusinessVertical,
    ) -> Result<Vec<VehicleGroup>, ApiError> {
        self.get_json(
            "/vehicles/groups",
            &[("businessVertical", vertical.as_code().to_string())],
        )
        .await
    }

    pub async fn vehicles_by_group(
        &self,
        group_type: &str,
        title: &str,
        vertical: BusinessVertical,
        page: u64,
    ) -> Result<Page<Vehicle>, ApiError> {
        self.get_json(
            "/vehicles/groups/list",
            &[
                ("type", group_type.to_string()),
                ("title", title.to_string()),
                ("businessVertical", vertical.as_code().to_string()),
                ("page", page.max(1).to_string()),
            ],
        )
        .await
    }

    pub async fn vehicle_by_id(&self, vehicle_id: u64) -> Result<Vehicle, ApiError> {
        self.get_json(&format!("/vehicles/{vehicle_id}"), &[]).await
    }

    pub async fn search_vehicles(
        &self,
        keyword: &str,
        page: u64,
    ) -> Result<Page<Vehicle>, ApiError> {
        self.get_json(
            "/vehicles/search",
            &[
                ("keyword", keyword.to_string()),
                ("page", page.max(1).to_string()),
            ],
        )
        .await
    }

    pub async fn filter_vehicles(&self, params: &FilterParams) -> Result<Page<Vehicle>, ApiError> {
        let query: Vec<(&str, String)> = params.to_query();
        self.get_json("/vehicles/filter", &query).await
    }

    pub async fn fuel_types(&self) -> Result<Vec<FuelType>, ApiError> {
        self.get_json("/vehicles/lookup/fuel", &[]).await
    }

    pub async fn states(&self) -> Result<Vec<StateInfo>, ApiError> {
        self.get_json("/states", &[]).await
    }

    pub async fn vehicle_types(&self) -> Result<Vec<VehicleTypeInfo>, ApiError> {
        self.get_json("/vehicles/lookup/vehicle-types", &[]).await
    }

    /// Vehicles this buyer has won, pending approval/payment.
    pub async fn won_vehicles(&self, page: u64) -> Result<Page<Vehicle>, ApiError> {
        self.get_json("/win", &[("page", page.max(1).to_string())])
            .await
    }
}
