//! Cascaded light-propagation-volume global illumination on wgpu.
//!
//! Reflective-shadow-map surfels are injected into cascaded voxel grids of
//! second-order spherical harmonics, radiance is spread over iterative
//! gather hops (on GPU compute or CPU workers), and the settled result is
//! applied to the lit scene as a full-screen additive pass. [`Aura`] is the
//! entry point.

pub mod apply;
pub mod aura;
pub mod config;
pub mod cpu;
pub mod error;
pub mod grids;
pub mod inject;
pub mod propagate;
pub mod shaders;
pub mod visualize;

pub use apply::{CascadeApplyData, LightApplyData};
pub use aura::{Aura, MAX_CASCADES, MAX_FRAMES};
pub use config::{ApplyInputs, LpvParams, RsmInputs, VisualizationInputs};
pub use cpu::CpuContextState;
pub use error::AuraError;

pub use aura_grid::{Box3, CASCADE_NOT_MOVING, Cascade, CascadeDesc, CascadeError};
