//! Two-band spherical-harmonic basis shared by the CPU and GPU propagation
//! kernels.
//!
//! Each color channel stores four coefficients: the DC band plus the three
//! linear bands, packed as `[c0, c1y, c1z, c1x]` to match the WGSL `vec4`
//! layout. The same constants are spliced into the shader source so both
//! kernels evaluate identical math.

use glam::Vec3;

/// Zonal coefficient of the Y₀₀ band.
pub const SH_C0: f32 = 0.282_094_8;
/// Zonal coefficient magnitude of the three Y₁ bands.
pub const SH_C1: f32 = 0.488_602_5;

/// DC coefficient of a clamped-cosine lobe.
pub const COSINE_LOBE_C0: f32 = 0.886_226_9;
/// Linear coefficient magnitude of a clamped-cosine lobe.
pub const COSINE_LOBE_C1: f32 = 1.023_326_7;

/// Per-hop geometric attenuation applied by both propagation kernels.
pub const HOP_ATTENUATION: f32 = 0.99;

/// The six axis-aligned face directions, paired with their integer offsets.
pub const FACE_DIRS: [(i32, i32, i32); 6] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

/// Evaluates the SH basis in direction `dir` (must be normalized).
pub fn sh_eval(dir: Vec3) -> [f32; 4] {
    [SH_C0, -SH_C1 * dir.y, SH_C1 * dir.z, -SH_C1 * dir.x]
}

/// Projects a clamped-cosine lobe oriented along `dir` into SH coefficients.
pub fn sh_cosine_lobe(dir: Vec3) -> [f32; 4] {
    [
        COSINE_LOBE_C0,
        -COSINE_LOBE_C1 * dir.y,
        COSINE_LOBE_C1 * dir.z,
        -COSINE_LOBE_C1 * dir.x,
    ]
}

/// Dot product of two coefficient vectors (radiance toward a direction when
/// one side is `sh_eval`).
pub fn sh_dot(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_lobe_peaks_along_axis() {
        let lobe = sh_cosine_lobe(Vec3::Z);
        let forward = sh_dot(lobe, sh_eval(Vec3::Z));
        let backward = sh_dot(lobe, sh_eval(Vec3::NEG_Z));
        assert!(forward > 0.0);
        assert!(forward > backward);
    }

    #[test]
    fn test_cosine_lobe_sideways_is_dc_only() {
        // Perpendicular directions see only the DC term of the lobe.
        let lobe = sh_cosine_lobe(Vec3::X);
        let side = sh_dot(lobe, sh_eval(Vec3::Y));
        assert!((side - SH_C0 * COSINE_LOBE_C0).abs() < 1e-6);
    }

    #[test]
    fn test_opposite_directions_negate_linear_bands() {
        let a = sh_eval(Vec3::X);
        let b = sh_eval(Vec3::NEG_X);
        assert_eq!(a[0], b[0]);
        assert_eq!(a[3], -b[3]);
    }

    #[test]
    fn test_face_dirs_are_unit_offsets() {
        for (x, y, z) in FACE_DIRS {
            assert_eq!(x.abs() + y.abs() + z.abs(), 1);
        }
    }
}
