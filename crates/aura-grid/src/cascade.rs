//! Cascade descriptors and per-cascade world placement.
//!
//! Each cascade owns one cubic grid region: a world-space span, an intensity
//! multiplier, and a center that follows the camera in whole-cell steps so
//! the grid-space origin never jitters. Span and resolution are immutable
//! after creation; only the center moves, and only for cascades without the
//! not-moving flag.

use glam::{Mat4, Vec3};

/// Flag bit: the cascade is static and is injected exactly once.
pub const CASCADE_NOT_MOVING: u32 = 0x01;

/// Construction-time description of one cascade.
#[derive(Clone, Copy, Debug)]
pub struct CascadeDesc {
    /// World-space edge length of the cubic grid region.
    pub grid_span: f32,
    /// Scalar multiplier applied to this cascade's contribution at apply time.
    pub grid_intensity: f32,
    /// Flag bits (`CASCADE_NOT_MOVING`).
    pub flags: u32,
}

/// Fatal configuration errors for cascade descriptors.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// Grid span must be positive and finite.
    #[error("cascade {index}: grid span {span} is not positive and finite")]
    InvalidSpan { index: usize, span: f32 },

    /// Intensity must be finite and non-negative.
    #[error("cascade {index}: grid intensity {intensity} is not finite and non-negative")]
    InvalidIntensity { index: usize, intensity: f32 },

    /// Grid resolution must be non-zero.
    #[error("grid resolution must be non-zero")]
    ZeroResolution,
}

/// Axis-aligned box, used for grid bounds queries in an arbitrary space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Box3 {
    pub min: Vec3,
    pub max: Vec3,
}

/// One voxel-grid cascade.
#[derive(Clone, Debug)]
pub struct Cascade {
    desc: CascadeDesc,
    resolution: u32,
    center: Vec3,
    injected: bool,
}

impl Cascade {
    /// Validates the descriptor and creates a cascade centered at the origin.
    pub fn new(index: usize, desc: CascadeDesc, resolution: u32) -> Result<Self, CascadeError> {
        if resolution == 0 {
            return Err(CascadeError::ZeroResolution);
        }
        if !(desc.grid_span.is_finite() && desc.grid_span > 0.0) {
            return Err(CascadeError::InvalidSpan {
                index,
                span: desc.grid_span,
            });
        }
        if !(desc.grid_intensity.is_finite() && desc.grid_intensity >= 0.0) {
            return Err(CascadeError::InvalidIntensity {
                index,
                intensity: desc.grid_intensity,
            });
        }
        Ok(Self {
            desc,
            resolution,
            center: Vec3::ZERO,
            injected: false,
        })
    }

    /// World-space edge length of the grid region.
    pub fn grid_span(&self) -> f32 {
        self.desc.grid_span
    }

    /// Intensity multiplier for the apply stage.
    pub fn grid_intensity(&self) -> f32 {
        self.desc.grid_intensity
    }

    /// Edge length of one voxel cell.
    pub fn cell_size(&self) -> f32 {
        self.desc.grid_span / self.resolution as f32
    }

    /// Current world-space center.
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// True if the cascade carries the not-moving flag.
    pub fn is_static(&self) -> bool {
        self.desc.flags & CASCADE_NOT_MOVING != 0
    }

    /// True once the cascade has received its first injection.
    pub fn is_injected(&self) -> bool {
        self.injected
    }

    /// Marks the cascade as injected. Static cascades are excluded from the
    /// update mask from this point on.
    pub fn mark_injected(&mut self) {
        self.injected = true;
    }

    /// Snaps the center to the given world position, quantized to whole cells.
    pub fn set_center(&mut self, position: Vec3) {
        self.center = snap_to_cell(position, self.cell_size());
    }

    /// Whether moving the grid to follow `target` would change its center.
    ///
    /// A static cascade stops reporting updates once it has been injected.
    pub fn needs_update(&self, target: Vec3) -> bool {
        if self.is_static() && self.injected {
            return false;
        }
        if !self.injected {
            return true;
        }
        snap_to_cell(target, self.cell_size()) != self.center
    }

    /// The axis-aligned box this cascade occupies after transforming its
    /// eight corners by `world_to_local` (e.g. an occluder query space).
    pub fn grid_bounds(&self, world_to_local: Mat4) -> Box3 {
        let half = self.desc.grid_span * 0.5;
        let mut min = Vec3::INFINITY;
        let mut max = Vec3::NEG_INFINITY;
        for i in 0..8 {
            let corner = self.center
                + Vec3::new(
                    if i & 1 != 0 { half } else { -half },
                    if i & 2 != 0 { half } else { -half },
                    if i & 4 != 0 { half } else { -half },
                );
            let p = world_to_local.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Box3 { min, max }
    }

    /// Minimum corner of the grid in world space.
    pub fn world_min(&self) -> Vec3 {
        self.center - Vec3::splat(self.desc.grid_span * 0.5)
    }
}

/// Quantizes `position` to the lattice of `cell_size`-sized cells.
pub fn snap_to_cell(position: Vec3, cell_size: f32) -> Vec3 {
    (position / cell_size).floor() * cell_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(span: f32) -> CascadeDesc {
        CascadeDesc {
            grid_span: span,
            grid_intensity: 1.0,
            flags: 0,
        }
    }

    #[test]
    fn test_zero_span_is_fatal() {
        assert!(matches!(
            Cascade::new(0, desc(0.0), 32),
            Err(CascadeError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_zero_resolution_is_fatal() {
        assert!(matches!(
            Cascade::new(0, desc(100.0), 0),
            Err(CascadeError::ZeroResolution)
        ));
    }

    #[test]
    fn test_negative_intensity_is_fatal() {
        let d = CascadeDesc {
            grid_span: 50.0,
            grid_intensity: -2.0,
            flags: 0,
        };
        assert!(matches!(
            Cascade::new(1, d, 32),
            Err(CascadeError::InvalidIntensity { index: 1, .. })
        ));
    }

    #[test]
    fn test_snap_is_idempotent() {
        let cell = 100.0 / 32.0;
        let p = Vec3::new(13.7, -4.2, 88.1);
        let snapped = snap_to_cell(p, cell);
        assert_eq!(snap_to_cell(snapped, cell), snapped);
    }

    #[test]
    fn test_set_center_quantizes_to_cells() {
        let mut c = Cascade::new(0, desc(32.0), 32).unwrap();
        c.set_center(Vec3::new(1.4, 2.6, -0.3));
        let cell = c.cell_size();
        for v in c.center().to_array() {
            let cells = v / cell;
            assert!((cells - cells.round()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_static_cascade_stops_updating_after_injection() {
        let d = CascadeDesc {
            grid_span: 100.0,
            grid_intensity: 1.0,
            flags: CASCADE_NOT_MOVING,
        };
        let mut c = Cascade::new(0, d, 32).unwrap();
        assert!(c.needs_update(Vec3::ZERO));
        c.set_center(Vec3::ZERO);
        c.mark_injected();
        assert!(!c.needs_update(Vec3::new(500.0, 0.0, 0.0)));
    }

    #[test]
    fn test_moving_cascade_updates_on_cell_crossing() {
        let mut c = Cascade::new(0, desc(32.0), 32).unwrap();
        c.set_center(Vec3::ZERO);
        c.mark_injected();
        // Within the same cell: no update.
        assert!(!c.needs_update(Vec3::splat(0.4)));
        // Across a cell boundary: update.
        assert!(c.needs_update(Vec3::splat(1.5)));
    }

    #[test]
    fn test_grid_bounds_identity_transform() {
        let mut c = Cascade::new(0, desc(10.0), 32).unwrap();
        c.set_center(Vec3::ZERO);
        let b = c.grid_bounds(Mat4::IDENTITY);
        assert_eq!(b.min, Vec3::splat(-5.0));
        assert_eq!(b.max, Vec3::splat(5.0));
    }

    #[test]
    fn test_grid_bounds_translated_space() {
        let mut c = Cascade::new(0, desc(10.0), 32).unwrap();
        c.set_center(Vec3::ZERO);
        let to_local = Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0));
        let b = c.grid_bounds(to_local);
        assert_eq!(b.min.x, 95.0);
        assert_eq!(b.max.x, 105.0);
    }
}
