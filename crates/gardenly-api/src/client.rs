// Cloud API HTTP client
//
// Wraps `reqwest::Client` with Gardena-specific URL construction, the
// `X-Session` header and status handling. Location and device documents
// are returned as raw JSON -- their shape is owned by the cloud and may
// change between polls.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{HttpMethod, SessionCredentials, SessionRequest, SessionResponse, SessionTokens};
use crate::transport::TransportConfig;

/// Production endpoint of the Gardena smart system service.
pub const DEFAULT_BASE_URL: &str = "https://sg-api.dss.husqvarnagroup.net";
pub const SESSIONS_PATH: &str = "/sg-1/sessions";
pub const LOCATIONS_PATH: &str = "/sg-1/locations";
pub const DEVICES_PATH: &str = "/sg-1/devices";

const SESSION_HEADER: &str = "X-Session";

/// Raw HTTP client for the Gardena cloud.
///
/// Stateless with respect to authentication: every data call takes the
/// session token explicitly, so the owner decides when to log in again.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    /// Request timeout of `http`, when known, for [`Error::Timeout`].
    timeout_secs: Option<u64>,
}

impl CloudClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout_secs: Some(transport.timeout_secs()),
        })
    }

    /// Create a client with a pre-built `reqwest::Client`. Its timeouts
    /// surface as [`Error::Transport`].
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout_secs: None,
        }
    }

    /// Convenience constructor from a base URL string (tests, mock servers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self::with_client(http, Url::parse(base_url)?))
    }

    /// The cloud base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Open a session with email/password.
    ///
    /// `POST /sg-1/sessions`. A 401 or a response without the full token
    /// triple is reported as [`Error::Authentication`].
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<SessionTokens, Error> {
        let url = self.base_url.join(SESSIONS_PATH)?;
        debug!("opening session at {}", url);

        let body = SessionRequest {
            sessions: SessionCredentials {
                email,
                password: password.expose_secret(),
            },
        };

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "connection works, but the credentials were rejected".into(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {text}"),
            });
        }

        let parsed: SessionResponse = self.decode_body(resp).await?;
        let Some(data) = parsed.sessions else {
            return Err(no_auth_data());
        };
        match (data.token, data.user_id, data.refresh_token) {
            (Some(token), Some(user_id), Some(refresh_token)) => {
                debug!(%user_id, "session established");
                Ok(SessionTokens {
                    token: SecretString::from(token),
                    user_id,
                    refresh_token: SecretString::from(refresh_token),
                })
            }
            _ => Err(no_auth_data()),
        }
    }

    /// List all locations of a user.
    ///
    /// `GET /sg-1/locations?user_id={user_id}`
    pub async fn list_locations(&self, token: &SecretString, user_id: &str) -> Result<Value, Error> {
        let mut url = self.base_url.join(LOCATIONS_PATH)?;
        url.query_pairs_mut().append_pair("user_id", user_id);
        debug!("listing locations");
        self.request(HttpMethod::Get, url, None, token).await
    }

    /// List all devices of a location, with their abilities and properties.
    ///
    /// `GET /sg-1/devices?locationId={location_id}`
    pub async fn list_devices(&self, token: &SecretString, location_id: &str) -> Result<Value, Error> {
        let mut url = self.base_url.join(DEVICES_PATH)?;
        url.query_pairs_mut().append_pair("locationId", location_id);
        debug!(%location_id, "listing devices");
        self.request(HttpMethod::Get, url, None, token).await
    }

    /// Send a write to an arbitrary resource below the base URL.
    ///
    /// `segments` are raw path segments (percent-encoded here), `query`
    /// is appended as-is.
    pub async fn send(
        &self,
        method: HttpMethod,
        segments: &[String],
        query: &[(String, String)],
        payload: &Value,
        token: &SecretString,
    ) -> Result<Value, Error> {
        let url = self.resource_url(segments, query)?;
        self.request(method, url, Some(payload), token).await
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/{segments...}?{query}` with each segment encoded.
    pub fn resource_url(&self, segments: &[String], query: &[(String, String)]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            path.extend(segments.iter().map(String::as_str));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn request(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<&Value>,
        token: &SecretString,
    ) -> Result<Value, Error> {
        debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method.into(), url)
            .header(SESSION_HEADER, token.expose_secret());
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await.map_err(|e| self.transport_error(e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text,
        })
    }

    async fn decode_body<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        match self.timeout_secs {
            Some(timeout_secs) if err.is_timeout() => Error::Timeout { timeout_secs },
            _ => Error::Transport(err),
        }
    }
}

fn no_auth_data() -> Error {
    Error::Authentication {
        message: "no auth data received".into(),
    }
}
