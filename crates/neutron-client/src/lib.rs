//! Neutron REST API Client
//!
//! A small client for the OpenStack Networking v2 API, covering the two port
//! operations the sync engine needs: listing the ports attached to a device
//! and rewriting a port's allowed address pairs.
//!
//! # Example
//!
//! ```no_run
//! use neutron_client::{AllowedAddressPair, NetworkClientTrait, NeutronClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NeutronClient::new(
//!     "https://neutron.example.com:9696".to_string(),
//!     "gAAAAAB...".to_string(),
//! )?;
//!
//! let ports = client.list_ports("0a1b2c3d-0000-4000-8000-000000000001").await?;
//! for port in ports {
//!     let mut pairs = port.allowed_address_pairs.clone();
//!     pairs.push(AllowedAddressPair::new("10.0.0.10"));
//!     client.update_port(&port.id, pairs).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod network_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::NeutronClient;
pub use error::NeutronError;
pub use models::*;
pub use network_trait::NetworkClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockNeutronClient, PortUpdate};
