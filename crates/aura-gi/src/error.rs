//! Error type for orchestrator initialization failures.
//!
//! Everything here is fatal at init: the host aborts startup rather than
//! running with a partially constructed volume set.

use aura_grid::CascadeError;

/// Fatal configuration and device-capability errors.
#[derive(Debug, thiserror::Error)]
pub enum AuraError {
    /// A cascade descriptor failed validation.
    #[error(transparent)]
    InvalidCascade(#[from] CascadeError),

    /// At least one cascade is required.
    #[error("cascade count must be non-zero")]
    NoCascades,

    /// More cascades than the apply pass can bind.
    #[error("requested {requested} cascades, at most {max} supported")]
    TooManyCascades { requested: usize, max: usize },

    /// The grid buffers exceed what the device can bind as storage.
    #[error(
        "grid requires {required} bytes per storage binding, device supports {supported}"
    )]
    UnsupportedDevice { required: u64, supported: u64 },

    /// The CPU path must trail the GPU by at least two frames, so a capture
    /// is never mapped in the frame it was recorded.
    #[error("in-flight frame count {requested} is too small, CPU propagation needs at least 2")]
    InsufficientInFlightFrames { requested: u32 },
}
