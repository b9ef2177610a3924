// Cloud API wire types
//
// Only the session envelope is modelled explicitly. Location and device
// documents are schema-less and travel as `serde_json::Value` -- the
// datapoint engine in gardenly-core walks them by `id`.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

// ── Sessions ─────────────────────────────────────────────────────────

/// Request body for `POST /sg-1/sessions`.
///
/// ```json
/// { "sessions": { "email": "...", "password": "..." } }
/// ```
#[derive(Debug, Serialize)]
pub(crate) struct SessionRequest<'a> {
    pub sessions: SessionCredentials<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionCredentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Response body of a successful login. Every field is optional on the
/// wire; a response missing any of them is treated as an auth failure.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionResponse {
    #[serde(default)]
    pub sessions: Option<SessionData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Tokens handed out by the session endpoint.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    /// Sent as `X-Session` on every subsequent request.
    pub token: SecretString,
    pub user_id: String,
    pub refresh_token: SecretString,
}

// ── Writes ───────────────────────────────────────────────────────────

/// HTTP verbs used for device writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}
