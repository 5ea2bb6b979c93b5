//! Errors raised while projecting MetalLB objects.

use thiserror::Error;

/// Errors that can occur when reading a MetalLB object.
#[derive(Debug, Error)]
pub enum CrdError {
    /// Kind is neither L2Advertisement nor BGPAdvertisement
    #[error("unsupported advertisement kind: {0:?}")]
    UnsupportedKind(String),

    /// `spec` did not match the expected shape
    #[error("malformed spec: {0}")]
    MalformedSpec(#[from] serde_json::Error),

    /// Object has no `metadata.name`
    #[error("object has no name")]
    MissingName,
}
