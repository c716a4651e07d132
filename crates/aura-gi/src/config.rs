//! Construction-time parameters and per-call input bundles.

use glam::{Mat4, Vec3};

/// Global light-propagation-volume parameters, fixed at construction.
#[derive(Clone, Debug)]
pub struct LpvParams {
    /// Edge length of every cascade grid in cells.
    pub grid_resolution: u32,
    /// Number of propagation hops per frame (propagate-1 plus N-1 more).
    pub propagation_iterations: u32,
    /// Render-target width hint for the apply pass.
    pub rt_width: u32,
    /// Render-target height hint for the apply pass.
    pub rt_height: u32,
    /// Run propagation on the CPU instead of GPU compute.
    pub use_cpu_propagation: bool,
    /// How many frames the CPU path trails GPU injection so readbacks have
    /// resolved before they are consumed. Minimum 2.
    pub in_flight_frame_count: u32,
}

impl Default for LpvParams {
    fn default() -> Self {
        Self {
            grid_resolution: 32,
            propagation_iterations: 8,
            rt_width: 1920,
            rt_height: 1080,
            use_cpu_propagation: false,
            in_flight_frame_count: 3,
        }
    }
}

/// Inputs for injecting one reflective shadow map into a cascade.
pub struct RsmInputs<'a> {
    /// Inverse view-projection of the RSM camera.
    pub inv_view_proj: Mat4,
    /// RSM camera position.
    pub camera_pos: Vec3,
    /// RSM camera forward direction (normalized).
    pub camera_dir: Vec3,
    /// RSM width in texels.
    pub width: u32,
    /// RSM height in texels.
    pub height: u32,
    /// View area covered at unit depth; makes injected energy independent
    /// of the shadow-map resolution.
    pub view_area_for_unit_depth: f32,
    /// RSM base color (outgoing flux) target.
    pub base_color: &'a wgpu::TextureView,
    /// RSM world-normal target (unorm-encoded, `n * 0.5 + 0.5`).
    pub normal: &'a wgpu::TextureView,
    /// RSM depth target.
    pub depth: &'a wgpu::TextureView,
}

/// Inputs for the full-screen apply pass.
pub struct ApplyInputs<'a> {
    /// Inverse view-projection of the main camera.
    pub inv_view_proj: Mat4,
    /// Main camera position.
    pub camera_pos: Vec3,
    /// G-buffer world-normal target.
    pub normal: &'a wgpu::TextureView,
    /// Scene depth target.
    pub depth: &'a wgpu::TextureView,
    /// Ambient-occlusion target (r channel).
    pub ambient_occlusion: &'a wgpu::TextureView,
}

/// Inputs for the debug probe visualization.
pub struct VisualizationInputs<'a> {
    /// Combined view-projection of the main camera.
    pub view_proj: Mat4,
    /// Camera right vector (billboard basis).
    pub camera_right: Vec3,
    /// Camera up vector (billboard basis).
    pub camera_up: Vec3,
    /// Which cascade's settled grid to draw.
    pub cascade_index: usize,
    /// World-space size of one probe billboard.
    pub probe_size: f32,
    /// Color target to draw into.
    pub color: &'a wgpu::TextureView,
    /// Depth target to test against.
    pub depth: &'a wgpu::TextureView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let p = LpvParams::default();
        assert!(p.grid_resolution > 0);
        assert!(p.propagation_iterations > 0);
        assert!(p.in_flight_frame_count > 0);
    }
}
