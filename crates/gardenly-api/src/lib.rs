// gardenly-api: Async Rust client for the Gardena smart system cloud API

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::{CloudClient, DEFAULT_BASE_URL, DEVICES_PATH, LOCATIONS_PATH, SESSIONS_PATH};
pub use error::Error;
pub use models::{HttpMethod, SessionTokens};
pub use transport::{TlsMode, TransportConfig};
