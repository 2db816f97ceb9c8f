// Auth service endpoints: login, logout. Token refresh lives in the client
// core (it is part of the 401 retry path, not a user-facing operation).

use serde::Deserialize;
use tracing::warn;

use super::{extract_error_message, ApiClient, ApiError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub category: Option<i64>,
}

impl ApiClient {
    /// Log in with phone + password and persist the returned token pair.
    ///
    /// The auth service answers outside the `{message, code, data}` envelope.
    pub async fn login(&self, phone: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let url = format!("{}/buyer/login", self.auth_base);
        let response = self
            .auth_http
            .post(&url)
            .json(&serde_json::json!({ "phone": phone, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: extract_error_message(&text, status),
            });
        }

        let login: LoginResponse = response.json().await.map_err(|e| ApiError::Decode {
            context: format!("/buyer/login: {e}"),
        })?;

        self.session
            .set_tokens(&login.token, &login.refresh_token)
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        Ok(login)
    }

    /// Log out: best-effort server notification, then wipe the session.
    /// Server errors are swallowed; the local wipe always happens.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = format!("{}/logout", self.auth_base);
        if let Err(e) = self.auth_http.post(&url).json(&serde_json::json!({})).send().await {
            warn!("logout request failed (continuing with local logout): {e}");
        }
        self.session
            .clear()
            .map_err(|e| ApiError::Storage(e.to_string()))
    }
}
