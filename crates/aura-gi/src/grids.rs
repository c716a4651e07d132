//! Per-cascade GPU working buffers.
//!
//! Each cascade owns a rotating set of grid buffers: the fixed-point
//! injection target, the propagation ping-pong pair, the per-frame
//! accumulator, and the settled grid — the only buffer the apply and
//! visualization passes are allowed to sample.

use std::mem::size_of;

use aura_grid::GridCell;

use crate::shaders::INJECT_SLOTS_PER_CELL;

/// Byte size of one cascade's cell payload.
pub fn grid_byte_size(resolution: u32) -> u64 {
    (resolution as u64).pow(3) * size_of::<GridCell>() as u64
}

/// Byte size of the fixed-point injection buffer (same footprint: 16 i32s).
pub fn inject_byte_size(resolution: u32) -> u64 {
    (resolution as u64).pow(3) * INJECT_SLOTS_PER_CELL as u64 * size_of::<i32>() as u64
}

/// The working grid buffers for one cascade.
pub struct CascadeGrids {
    /// Fixed-point atomic accumulation target for injection.
    pub inject: wgpu::Buffer,
    /// Resolved injection, retained across frames. Every frame's
    /// propagation re-seeds its working state from this buffer, so frames
    /// without a fresh injection replay the same hop series instead of
    /// compounding on the previous frame's output.
    pub injected: wgpu::Buffer,
    /// Propagation ping-pong pair; `ping[0]` is re-seeded from `injected`
    /// at the start of every propagation pass.
    pub ping: [wgpu::Buffer; 2],
    /// Sum of the injection plus every propagation hop this frame.
    pub accum: wgpu::Buffer,
    /// Stable read grid for apply/visualization; written only by the copy
    /// stage (or a CPU-context upload).
    pub settled: wgpu::Buffer,
}

impl CascadeGrids {
    /// Creates all buffers for cascade `index`. Buffers start zeroed.
    pub fn new(device: &wgpu::Device, resolution: u32, index: usize) -> Self {
        let cell_bytes = grid_byte_size(resolution);
        let grid = |name: &str, extra: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("lpv-{name}-{index}")),
                size: cell_bytes,
                usage: wgpu::BufferUsages::STORAGE | extra,
                mapped_at_creation: false,
            })
        };

        let inject = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("lpv-inject-{index}")),
            size: inject_byte_size(resolution),
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        Self {
            inject,
            injected: grid(
                "injected",
                wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            ),
            ping: [
                grid("ping0", wgpu::BufferUsages::COPY_DST),
                grid("ping1", wgpu::BufferUsages::COPY_DST),
            ],
            accum: grid(
                "accum",
                wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            ),
            settled: grid(
                "settled",
                wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_and_inject_footprints_match() {
        // 16 i32 slots mirror the 16 f32 components of a cell.
        assert_eq!(grid_byte_size(32), inject_byte_size(32));
        assert_eq!(grid_byte_size(32), 32 * 32 * 32 * 64);
    }

    #[test]
    fn test_byte_size_matches_cpu_volume() {
        let v = aura_grid::LightVolume::new(16);
        assert_eq!(v.byte_size(), grid_byte_size(16));
    }
}
