// ── Cloud API seam ──
//
// The narrow interface the poll loop and command dispatcher talk to.
// Production uses `gardenly_api::CloudClient`; tests substitute scripted
// fakes.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use gardenly_api::{CloudClient, SessionTokens};

use crate::command::OutboundRequest;
use crate::error::CoreError;

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn login(&self, username: &str, password: &SecretString) -> Result<SessionTokens, CoreError>;

    async fn list_locations(&self, token: &SecretString, user_id: &str) -> Result<Value, CoreError>;

    async fn list_devices(&self, token: &SecretString, location_id: &str) -> Result<Value, CoreError>;

    async fn send(&self, request: &OutboundRequest, token: &SecretString) -> Result<Value, CoreError>;
}

#[async_trait]
impl CloudApi for CloudClient {
    async fn login(&self, username: &str, password: &SecretString) -> Result<SessionTokens, CoreError> {
        Ok(CloudClient::login(self, username, password).await?)
    }

    async fn list_locations(&self, token: &SecretString, user_id: &str) -> Result<Value, CoreError> {
        Ok(CloudClient::list_locations(self, token, user_id).await?)
    }

    async fn list_devices(&self, token: &SecretString, location_id: &str) -> Result<Value, CoreError> {
        Ok(CloudClient::list_devices(self, token, location_id).await?)
    }

    async fn send(&self, request: &OutboundRequest, token: &SecretString) -> Result<Value, CoreError> {
        Ok(CloudClient::send(
            self,
            request.method,
            &request.segments,
            &request.query,
            &request.payload,
            token,
        )
        .await?)
    }
}
