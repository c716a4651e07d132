//! CPU data model for cascaded light propagation volumes: spherical-harmonic
//! storage, cascade placement, and the software radiance-transfer kernel.

pub mod cascade;
pub mod propagate;
pub mod sh;
pub mod volume;

pub use cascade::{Box3, CASCADE_NOT_MOVING, Cascade, CascadeDesc, CascadeError, snap_to_cell};
pub use propagate::{
    default_thread_count, propagate, propagate_step, propagate_step_parallel,
};
pub use sh::{
    COSINE_LOBE_C0, COSINE_LOBE_C1, FACE_DIRS, HOP_ATTENUATION, SH_C0, SH_C1, sh_cosine_lobe,
    sh_dot, sh_eval,
};
pub use volume::{GridCell, LightVolume};
