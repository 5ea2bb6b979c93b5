//! NetworkClient trait for mocking
//!
//! The sync engine only depends on this trait. `NeutronClient` implements it
//! against a real endpoint and `MockNeutronClient` keeps ports in memory.

use crate::error::NeutronError;
use crate::models::{AllowedAddressPair, Port};

/// Port operations required by the sync engine.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NetworkClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the API token
    async fn validate_token(&self) -> Result<(), NeutronError>;

    /// List every port whose `device_id` equals `device_id`
    async fn list_ports(&self, device_id: &str) -> Result<Vec<Port>, NeutronError>;

    /// Replace the allowed address pairs of port `id`
    async fn update_port(
        &self,
        id: &str,
        allowed_address_pairs: Vec<AllowedAddressPair>,
    ) -> Result<Port, NeutronError>;
}
