//! Neutron API client
//!
//! Implements the port operations of the OpenStack Networking v2 API.
//! Based on the Neutron API structure: /v2.0/ports and /v2.0/ports/{id}

use crate::error::NeutronError;
use crate::models::*;
use crate::network_trait::NetworkClientTrait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

const AUTH_HEADER: &str = "X-Auth-Token";

/// Neutron API client
pub struct NeutronClient {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for NeutronClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeutronClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NeutronClient {
    /// Create a new Neutron client
    ///
    /// # Arguments
    /// * `base_url` - Networking endpoint (e.g., "https://neutron:9696")
    /// * `token` - Keystone token sent as `X-Auth-Token`
    pub fn new(base_url: String, token: String) -> Result<Self, NeutronError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(NeutronError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build a full URL from a path, leaving absolute links untouched
    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Map non-success statuses to errors, passing successful responses through
    async fn check_status(response: Response, context: &str) -> Result<Response, NeutronError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                NeutronError::Authentication(format!("{}: {} - {}", context, status, body))
            }
            StatusCode::NOT_FOUND => NeutronError::NotFound(format!("{}: {}", context, body)),
            StatusCode::BAD_REQUEST => {
                NeutronError::InvalidRequest(format!("{}: {}", context, body))
            }
            _ => NeutronError::Api(format!("{}: {} - {}", context, status, body)),
        })
    }

    /// Fetch all pages of a port listing
    async fn fetch_all_ports(&self, mut url: String) -> Result<Vec<Port>, NeutronError> {
        let mut all_ports = Vec::new();

        loop {
            debug!("Fetching page: {}", url);

            let response = self
                .client
                .get(&url)
                .header(AUTH_HEADER, &self.token)
                .header("Accept", "application/json")
                .send()
                .await?;
            let response = Self::check_status(response, "Failed to list ports").await?;

            // Capture the body for better error messages on decode failures
            let response_text = response.text().await?;
            let page: PortList = serde_json::from_str(&response_text).map_err(|e| {
                NeutronError::Api(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    response_text.chars().take(500).collect::<String>()
                ))
            })?;

            let next = page.next_page().map(|href| self.build_url(href));
            all_ports.extend(page.ports);

            match next {
                Some(next_url) if next_url != url => url = next_url,
                _ => break,
            }
        }

        Ok(all_ports)
    }
}

#[async_trait::async_trait]
impl NetworkClientTrait for NeutronClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate the API token by making a minimal authenticated request.
    ///
    /// # Returns
    /// * `Ok(())` - Token is valid and Neutron is reachable
    /// * `Err(NeutronError)` - Token is invalid or Neutron is unreachable
    async fn validate_token(&self) -> Result<(), NeutronError> {
        let url = format!("{}/v2.0/ports?limit=1", self.base_url);
        debug!("Validating Neutron token and connectivity");

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::check_status(response, "Failed to validate token").await?;

        debug!("Token validated successfully");
        Ok(())
    }

    async fn list_ports(&self, device_id: &str) -> Result<Vec<Port>, NeutronError> {
        if device_id.is_empty() {
            return Err(NeutronError::InvalidRequest(
                "device_id must not be empty".to_string(),
            ));
        }

        let url = format!(
            "{}/v2.0/ports?device_id={}",
            self.base_url,
            urlencoding::encode(device_id)
        );
        debug!("Listing ports for device {}", device_id);
        self.fetch_all_ports(url).await
    }

    async fn update_port(
        &self,
        id: &str,
        allowed_address_pairs: Vec<AllowedAddressPair>,
    ) -> Result<Port, NeutronError> {
        if id.is_empty() {
            return Err(NeutronError::InvalidRequest(
                "port id must not be empty".to_string(),
            ));
        }

        let url = format!("{}/v2.0/ports/{}", self.base_url, urlencoding::encode(id));
        let body = UpdatePortRequest::allowed_address_pairs(allowed_address_pairs);
        debug!("Updating allowed address pairs of port {}", id);

        let response = self
            .client
            .put(&url)
            .header(AUTH_HEADER, &self.token)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let response =
            Self::check_status(response, &format!("Failed to update port {}", id)).await?;

        let envelope: PortEnvelope = response.json().await?;
        Ok(envelope.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = NeutronClient::new("http://neutron:9696/".to_string(), "t".to_string()).unwrap();
        assert_eq!(client.base_url(), "http://neutron:9696");
    }

    #[test]
    fn test_build_url_keeps_absolute_links() {
        let client = NeutronClient::new("http://neutron:9696".to_string(), "t".to_string()).unwrap();
        assert_eq!(
            client.build_url("/v2.0/ports?marker=p1"),
            "http://neutron:9696/v2.0/ports?marker=p1"
        );
        assert_eq!(
            client.build_url("https://other:9696/v2.0/ports?marker=p1"),
            "https://other:9696/v2.0/ports?marker=p1"
        );
    }

    #[tokio::test]
    async fn test_empty_identifiers_rejected_without_request() {
        let client = NeutronClient::new("http://127.0.0.1:1".to_string(), "t".to_string()).unwrap();
        assert!(matches!(
            client.list_ports("").await,
            Err(NeutronError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.update_port("", vec![]).await,
            Err(NeutronError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_debug_hides_token() {
        let client =
            NeutronClient::new("http://neutron:9696".to_string(), "secret-token".to_string()).unwrap();
        let rendered = format!("{:?}", client);
        assert!(rendered.contains("neutron:9696"));
        assert!(!rendered.contains("secret-token"));
    }
}
