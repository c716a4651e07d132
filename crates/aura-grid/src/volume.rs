//! CPU-side voxel light volume holding per-cell spherical-harmonic radiance.
//!
//! The cell layout is byte-identical to the WGSL `Cell` struct used by the
//! GPU grids, so a mapped readback buffer casts straight into `&[GridCell]`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::sh::{sh_cosine_lobe, sh_dot, sh_eval};

/// One voxel's worth of grid data: 2-band SH per color channel plus an
/// occlusion term. 64 bytes, matching the GPU cell layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GridCell {
    /// SH coefficients for the red channel.
    pub red: [f32; 4],
    /// SH coefficients for the green channel.
    pub green: [f32; 4],
    /// SH coefficients for the blue channel.
    pub blue: [f32; 4],
    /// x = blocking factor in [0, 1]; yzw unused (padding for vec4 layout).
    pub occlusion: [f32; 4],
}

impl GridCell {
    /// Sum of the DC coefficients across all three color channels.
    pub fn energy(&self) -> f32 {
        self.red[0] + self.green[0] + self.blue[0]
    }

    /// Radiance arriving from direction `dir`, per channel, clamped to zero.
    pub fn flux_toward(&self, dir: Vec3) -> [f32; 3] {
        let basis = sh_eval(dir);
        [
            sh_dot(self.red, basis).max(0.0),
            sh_dot(self.green, basis).max(0.0),
            sh_dot(self.blue, basis).max(0.0),
        ]
    }
}

/// A cubic grid of [`GridCell`]s at a fixed resolution.
pub struct LightVolume {
    resolution: u32,
    cells: Vec<GridCell>,
}

impl LightVolume {
    /// Creates an all-dark volume. `resolution` must be non-zero.
    pub fn new(resolution: u32) -> Self {
        let count = (resolution as usize).pow(3);
        Self {
            resolution,
            cells: vec![GridCell::default(); count],
        }
    }

    /// Edge length in cells.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Total cell count (resolution³).
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Size of the cell payload in bytes (matches the GPU buffer size).
    pub fn byte_size(&self) -> u64 {
        (self.cells.len() * std::mem::size_of::<GridCell>()) as u64
    }

    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < self.resolution && y < self.resolution && z < self.resolution);
        ((y * self.resolution + z) * self.resolution + x) as usize
    }

    /// Returns the cell at `(x, y, z)`.
    pub fn get(&self, x: u32, y: u32, z: u32) -> GridCell {
        self.cells[self.index(x, y, z)]
    }

    /// Replaces the cell at `(x, y, z)`.
    pub fn set(&mut self, x: u32, y: u32, z: u32, cell: GridCell) {
        let i = self.index(x, y, z);
        self.cells[i] = cell;
    }

    /// Adds a radiant sample at `(x, y, z)`: a cosine lobe around `dir`
    /// carrying `color` energy per channel.
    pub fn add_sample(&mut self, x: u32, y: u32, z: u32, color: Vec3, dir: Vec3) {
        let lobe = sh_cosine_lobe(dir);
        let i = self.index(x, y, z);
        let cell = &mut self.cells[i];
        for k in 0..4 {
            cell.red[k] += lobe[k] * color.x;
            cell.green[k] += lobe[k] * color.y;
            cell.blue[k] += lobe[k] * color.z;
        }
    }

    /// Sets the occlusion (blocking factor) of a cell, clamped to [0, 1].
    pub fn set_occlusion(&mut self, x: u32, y: u32, z: u32, amount: f32) {
        let i = self.index(x, y, z);
        self.cells[i].occlusion[0] = amount.clamp(0.0, 1.0);
    }

    /// Total DC energy over the whole grid.
    pub fn total_energy(&self) -> f32 {
        self.cells.iter().map(GridCell::energy).sum()
    }

    /// Clears all radiance and occlusion.
    pub fn clear(&mut self) {
        self.cells.fill(GridCell::default());
    }

    /// Borrow of the raw cell slice.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Mutable borrow of the raw cell slice.
    pub fn cells_mut(&mut self) -> &mut [GridCell] {
        &mut self.cells
    }

    /// Raw bytes for uploading to a GPU buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }

    /// Overwrites the volume from a mapped GPU buffer.
    ///
    /// `bytes` must be exactly [`Self::byte_size`] long.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) {
        let src: &[GridCell] = bytemuck::cast_slice(bytes);
        self.cells.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_layout_matches_wgsl() {
        // Four vec4<f32> fields.
        assert_eq!(std::mem::size_of::<GridCell>(), 64);
        assert_eq!(std::mem::align_of::<GridCell>(), 4);
    }

    #[test]
    fn test_new_volume_is_dark() {
        let v = LightVolume::new(8);
        assert_eq!(v.cell_count(), 512);
        assert_eq!(v.total_energy(), 0.0);
    }

    #[test]
    fn test_add_sample_contributes_dc_energy() {
        let mut v = LightVolume::new(8);
        v.add_sample(4, 4, 4, Vec3::new(1.0, 0.5, 0.25), Vec3::Y);
        let cell = v.get(4, 4, 4);
        assert!(cell.red[0] > cell.green[0]);
        assert!(cell.green[0] > cell.blue[0]);
        assert!(v.total_energy() > 0.0);
    }

    #[test]
    fn test_flux_toward_clamps_negative_lobes() {
        let mut v = LightVolume::new(4);
        v.add_sample(1, 1, 1, Vec3::ONE, Vec3::X);
        let cell = v.get(1, 1, 1);
        let back = cell.flux_toward(Vec3::NEG_X);
        // A lobe pointing +X must not emit backwards.
        assert!(back[0] >= 0.0);
        let front = cell.flux_toward(Vec3::X);
        assert!(front[0] > back[0]);
    }

    #[test]
    fn test_byte_roundtrip_preserves_cells() {
        let mut a = LightVolume::new(4);
        a.add_sample(0, 1, 2, Vec3::new(0.3, 0.6, 0.9), Vec3::Z);
        a.set_occlusion(3, 3, 3, 0.5);

        let mut b = LightVolume::new(4);
        b.copy_from_bytes(a.as_bytes());

        assert_eq!(a.get(0, 1, 2), b.get(0, 1, 2));
        assert_eq!(b.get(3, 3, 3).occlusion[0], 0.5);
    }

    #[test]
    fn test_occlusion_is_clamped() {
        let mut v = LightVolume::new(2);
        v.set_occlusion(0, 0, 0, 7.0);
        assert_eq!(v.get(0, 0, 0).occlusion[0], 1.0);
        v.set_occlusion(0, 0, 0, -1.0);
        assert_eq!(v.get(0, 0, 0).occlusion[0], 0.0);
    }
}
