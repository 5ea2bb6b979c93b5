//! neutron-k8s-sync CRD Definitions
//!
//! The enablement CRD owned by this project, plus read-only projections of
//! the MetalLB resources the engine observes.

pub mod enablement;
pub mod error;
pub mod metallb;

pub use enablement::*;
pub use error::CrdError;
pub use metallb::*;
