// REST layer for the marketplace backend.
//
// Every backend response wraps its payload in a `{message, code, data}`
// envelope; this layer unwraps `data` and converts failures into the
// `ApiError` taxonomy. A 401 triggers exactly one refresh-and-retry using
// the stored refresh token; a failed refresh means the session is dead and
// the caller must force logout.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::session::SessionStore;

pub mod auth;
pub mod bids;
pub mod vehicles;
pub mod watchlist;

pub use auth::LoginResponse;
pub use bids::{AutoBidConfig, AutoBidParams, BidHistoryItem, BidMode, BuyerLimits};
pub use vehicles::{FilterParams, Page, Vehicle, VehicleGroup};
pub use watchlist::ToggleOutcome;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network/transport failure (timeout, connection refused, ...).
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response; `message` carries the server's text verbatim.
    #[error("server rejected request ({status}): {message}")]
    Status { status: u16, message: String },

    /// The refresh-token path failed; the caller must force logout.
    #[error("session expired; login required")]
    SessionExpired,

    /// Response body did not match the expected shape.
    #[error("failed to decode response: {context}")]
    Decode { context: String },

    /// Client-side validation failure, caught before submission.
    #[error("{0}")]
    InvalidInput(String),

    /// Session storage failure (rusqlite).
    #[error("session storage error: {0}")]
    Storage(String),
}

impl ApiError {
    fn storage(e: anyhow::Error) -> Self {
        ApiError::Storage(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    #[serde(default)]
    message: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    code: Option<i64>,
    data: T,
}

/// Pull a human-readable message out of an error body, falling back to the
/// HTTP status line.
pub(crate) fn extract_error_message(body: &str, status: StatusCode) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            if !msg.is_empty() {
                return msg.to_string();
            }
        }
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Typed client for the buyer-facing marketplace API and the auth service.
pub struct ApiClient {
    http: reqwest::Client,
    auth_http: reqwest::Client,
    buyer_base: String,
    auth_base: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(config: &Config, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        let auth_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.auth_timeout_secs))
            .build()?;

        Ok(ApiClient {
            http,
            auth_http,
            buyer_base: config.api.buyer_base_url.trim_end_matches('/').to_string(),
            auth_base: config.api.auth_base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// GET against the buyer API, unwrapping the envelope.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.request_json(Method::GET, path, query, None).await
    }

    /// Request with a JSON body against the buyer API, unwrapping the envelope.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<T, ApiError> {
        self.request_json(method, path, &[], Some(body)).await
    }

    /// One buyer-API round trip with bearer auth and the single
    /// 401-refresh-and-retry.
    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let raw = self.request_value(method, path, query, body).await?;
        serde_json::from_value(raw).map_err(|e| ApiError::Decode {
            context: format!("{path}: {e}"),
        })
    }

    /// Like [`request_json`] but returns the raw `data` value. Used where the
    /// payload shape must be inspected before typing (auto-bid existence).
    pub(crate) async fn request_value(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut refreshed = false;
        loop {
            let url = format!("{}{}", self.buyer_base, path);
            let mut builder = self.http.request(method.clone(), &url);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(b) = body {
                builder = builder.json(b);
            }
            if let Some(token) = self.session.access_token().map_err(ApiError::storage)? {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                refreshed = true;
                // No refresh token: surface the 401 as-is (unauthenticated
                // caller, nothing to retry with).
                let Some(refresh) = self.session.refresh_token().map_err(ApiError::storage)?
                else {
                    let text = response.text().await.unwrap_or_default();
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        message: extract_error_message(&text, status),
                    });
                };
                debug!("access token rejected, attempting refresh");
                self.refresh_access_token(&refresh).await?;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    message: extract_error_message(&text, status),
                });
            }

            let envelope: Envelope<Value> = response.json().await.map_err(|e| {
                ApiError::Decode {
                    context: format!("{path}: {e}"),
                }
            })?;
            return Ok(envelope.data);
        }
    }

    /// Exchange the refresh token for a new access token and store it.
    /// Any failure here is terminal for the session.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<(), ApiError> {
        let url = format!("{}/refresh", self.auth_base);
        let result = self
            .auth_http
            .post(&url)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("token refresh failed: {e}");
                return Err(ApiError::SessionExpired);
            }
        };
        if !response.status().is_success() {
            warn!("token refresh rejected with status {}", response.status());
            return Err(ApiError::SessionExpired);
        }

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RefreshResponse {
            access_token: String,
        }
        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|_| ApiError::SessionExpired)?;

        self.session
            .set_access_token(&parsed.access_token)
            .map_err(ApiError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A minimal scripted HTTP server for exercising the client against
    //! canned responses. Each accepted connection consumes the next response
    //! in the script; `Connection: close` forces the client to reconnect so
    //! the sequence is deterministic.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::config::{
        ApiConfig, BusinessVertical, Config, CredentialsConfig, SessionConfig, SocketConfig,
    };

    /// A config pointed at test servers; socket settings are inert.
    pub fn test_config(buyer_base: &str, auth_base: &str) -> Config {
        Config {
            api: ApiConfig {
                buyer_base_url: buyer_base.to_string(),
                auth_base_url: auth_base.to_string(),
                timeout_secs: 5,
                auth_timeout_secs: 5,
            },
            socket: SocketConfig {
                url: "ws://127.0.0.1:1".to_string(),
                reconnect_initial_ms: 10,
                reconnect_max_ms: 100,
            },
            session: SessionConfig::default(),
            business_vertical: BusinessVertical::Insurance,
            credentials: CredentialsConfig::default(),
        }
    }

    /// A single scripted response plus the request line + body the server saw.
    #[derive(Debug)]
    pub struct SeenRequest {
        pub head: String,
        pub body: String,
    }

    pub async fn spawn_scripted_server(
        responses: Vec<String>,
    ) -> (String, mpsc::UnboundedReceiver<SeenRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 16384];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let raw = String::from_utf8_lossy(&buf[..n]).to_string();
                let (head, body) = match raw.split_once("\r\n\r\n") {
                    Some((h, b)) => (h.to_string(), b.to_string()),
                    None => (raw, String::new()),
                };
                let _ = seen_tx.send(SeenRequest { head, body });

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
            }
        });

        (format!("http://{addr}"), seen_rx)
    }

    /// A server that routes by request-path prefix instead of arrival order,
    /// for exercising concurrent fetches deterministically. Accepts
    /// connections until the returned handle is dropped; unmatched paths get
    /// a 404.
    pub async fn spawn_routing_server(
        routes: Vec<(String, String)>,
    ) -> (String, mpsc::UnboundedReceiver<SeenRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 16384];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let raw = String::from_utf8_lossy(&buf[..n]).to_string();
                let (head, body) = match raw.split_once("\r\n\r\n") {
                    Some((h, b)) => (h.to_string(), b.to_string()),
                    None => (raw.clone(), String::new()),
                };

                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let response = routes
                    .iter()
                    .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                    .map(|(_, r)| r.clone())
                    .unwrap_or_else(|| {
                        json_response("404 Not Found", r#"{"message":"no route"}"#)
                    });

                let _ = seen_tx.send(SeenRequest { head, body });
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
            }
        });

        (format!("http://{addr}"), seen_rx)
    }

    /// Build an HTTP response with a JSON body and `Connection: close`.
    pub fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Wrap a payload in the backend's `{message, code, data}` envelope.
    pub fn envelope(data: &str) -> String {
        format!(r#"{{"message":"ok","code":200,"data":{data}}}"#)
    }
}
