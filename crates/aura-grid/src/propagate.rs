//! CPU radiance-transfer kernel over a [`LightVolume`].
//!
//! Gather formulation: every destination cell pulls flux from its six face
//! neighbors. A neighbor's outgoing face fluxes are normalized against each
//! other, so one hop never emits more DC energy than the neighbor holds;
//! each hop is further scaled by [`HOP_ATTENUATION`] and blocked by the
//! destination cell's occlusion. The GPU kernel runs the same math with the
//! same constants.

use glam::Vec3;

use crate::sh::{FACE_DIRS, HOP_ATTENUATION, sh_cosine_lobe, sh_dot, sh_eval};
use crate::volume::{GridCell, LightVolume};

/// Computes one destination cell of a propagation step.
fn gather_cell(src: &LightVolume, x: u32, y: u32, z: u32) -> GridCell {
    let res = src.resolution() as i32;
    let here = src.get(x, y, z);
    let occlusion_factor = 1.0 - here.occlusion[0];

    let mut out = GridCell {
        // Occluders persist across hops so later iterations stay blocked.
        occlusion: here.occlusion,
        ..GridCell::default()
    };

    for (dx, dy, dz) in FACE_DIRS {
        let nx = x as i32 - dx;
        let ny = y as i32 - dy;
        let nz = z as i32 - dz;
        if nx < 0 || ny < 0 || nz < 0 || nx >= res || ny >= res || nz >= res {
            continue;
        }
        let neighbor = src.get(nx as u32, ny as u32, nz as u32);
        let travel = Vec3::new(dx as f32, dy as f32, dz as f32);

        // The neighbor's flux toward this cell, per channel, plus the total
        // over all six of its faces for normalization.
        let toward = sh_eval(travel);
        let mut flux = [
            sh_dot(neighbor.red, toward).max(0.0),
            sh_dot(neighbor.green, toward).max(0.0),
            sh_dot(neighbor.blue, toward).max(0.0),
        ];
        let mut totals = [0.0f32; 3];
        for (fx, fy, fz) in FACE_DIRS {
            let basis = sh_eval(Vec3::new(fx as f32, fy as f32, fz as f32));
            totals[0] += sh_dot(neighbor.red, basis).max(0.0);
            totals[1] += sh_dot(neighbor.green, basis).max(0.0);
            totals[2] += sh_dot(neighbor.blue, basis).max(0.0);
        }
        let energy = [
            neighbor.red[0].max(0.0),
            neighbor.green[0].max(0.0),
            neighbor.blue[0].max(0.0),
        ];
        for c in 0..3 {
            flux[c] = if totals[c] > 0.0 {
                flux[c] / totals[c] * energy[c]
            } else {
                0.0
            };
            flux[c] *= HOP_ATTENUATION * occlusion_factor;
        }

        // Re-project the transported flux as a cosine lobe continuing in the
        // travel direction, scaled so its DC gain equals the flux.
        let lobe = sh_cosine_lobe(travel);
        let dc = lobe[0];
        for k in 0..4 {
            out.red[k] += lobe[k] * flux[0] / dc;
            out.green[k] += lobe[k] * flux[1] / dc;
            out.blue[k] += lobe[k] * flux[2] / dc;
        }
    }
    out
}

/// Runs one propagation hop from `src` into `dst` on the calling thread.
///
/// `dst` is fully overwritten. Both volumes must share a resolution.
pub fn propagate_step(src: &LightVolume, dst: &mut LightVolume) {
    assert_eq!(src.resolution(), dst.resolution());
    let res = src.resolution();
    for y in 0..res {
        for z in 0..res {
            for x in 0..res {
                dst.set(x, y, z, gather_cell(src, x, y, z));
            }
        }
    }
}

/// Runs one propagation hop with destination y-slabs distributed across
/// worker threads.
///
/// Slabs partition `dst` exactly (cells are y-major), so workers write
/// disjoint regions and only share the immutable source; no locking.
pub fn propagate_step_parallel(src: &LightVolume, dst: &mut LightVolume, thread_count: usize) {
    assert_eq!(src.resolution(), dst.resolution());
    let res = src.resolution() as usize;
    let layer = res * res;
    let threads = thread_count.max(1);
    let layers_per_task = res.div_ceil(threads);

    std::thread::scope(|scope| {
        for (task, slab) in dst.cells_mut().chunks_mut(layers_per_task * layer).enumerate() {
            let y_base = (task * layers_per_task) as u32;
            scope.spawn(move || {
                for (i, cell) in slab.iter_mut().enumerate() {
                    let y = y_base + (i / layer) as u32;
                    let z = ((i % layer) / res) as u32;
                    let x = (i % res) as u32;
                    *cell = gather_cell(src, x, y, z);
                }
            });
        }
    });
}

/// Worker count for slab propagation: all cores minus headroom for the
/// render thread, never below one.
pub fn default_thread_count() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

/// Accumulates the injected volume plus `iterations` propagation hops,
/// matching the GPU propagate-1/propagate-N/copy sequence.
///
/// Returns the accumulated result; `scratch` is clobbered as ping-pong
/// state.
pub fn propagate(
    injected: &LightVolume,
    scratch: &mut [LightVolume; 2],
    iterations: u32,
    thread_count: usize,
) -> LightVolume {
    let res = injected.resolution();
    let mut accum = LightVolume::new(res);
    accum.copy_from_bytes(injected.as_bytes());

    let mut source_is_injected = true;
    let mut current = 0usize;
    for _ in 0..iterations {
        let (a, b) = scratch.split_at_mut(1);
        let (src, dst) = if current == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        };
        if source_is_injected {
            propagate_step_parallel(injected, dst, thread_count);
            source_is_injected = false;
        } else {
            propagate_step_parallel(src, dst, thread_count);
        }
        let dst = if current == 0 { &b[0] } else { &a[0] };
        for (acc, step) in accum.cells_mut().iter_mut().zip(dst.cells()) {
            for k in 0..4 {
                acc.red[k] += step.red[k];
                acc.green[k] += step.green[k];
                acc.blue[k] += step.blue[k];
            }
        }
        current ^= 1;
    }
    accum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_volume(res: u32) -> LightVolume {
        let mut v = LightVolume::new(res);
        let c = res / 2;
        v.add_sample(c, c, c, Vec3::ONE, Vec3::X);
        v
    }

    /// Runs `n` hops, returning the total DC energy of each hop's output.
    fn step_energies(injected: &LightVolume, n: usize) -> Vec<f32> {
        let res = injected.resolution();
        let mut volumes = [LightVolume::new(res), LightVolume::new(res)];
        volumes[0].copy_from_bytes(injected.as_bytes());
        let mut energies = Vec::new();
        for i in 0..n {
            let (a, b) = volumes.split_at_mut(1);
            let (src, dst) = if i % 2 == 0 {
                (&a[0], &mut b[0])
            } else {
                (&b[0], &mut a[0])
            };
            propagate_step(src, dst);
            energies.push(dst.total_energy());
        }
        energies
    }

    #[test]
    fn test_zero_iterations_is_injected_value() {
        // Round-trip: with no propagation the accumulated grid equals the
        // raw injected radiance.
        let injected = point_volume(8);
        let mut scratch = [LightVolume::new(8), LightVolume::new(8)];
        let out = propagate(&injected, &mut scratch, 0, 1);
        let c = 4;
        assert_eq!(out.get(c, c, c), injected.get(c, c, c));
    }

    #[test]
    fn test_dc_bands_never_go_negative() {
        let injected = point_volume(8);
        let energies = step_energies(&injected, 4);
        assert!(energies.iter().all(|&e| e >= 0.0));

        let mut scratch = [LightVolume::new(8), LightVolume::new(8)];
        let out = propagate(&injected, &mut scratch, 4, 2);
        for cell in out.cells() {
            assert!(cell.red[0] >= 0.0);
            assert!(cell.green[0] >= 0.0);
            assert!(cell.blue[0] >= 0.0);
        }
    }

    #[test]
    fn test_energy_scenario_span_100_res_32() {
        // Grid span 100, resolution 32, unit point sample at the center,
        // four iterations: per-iteration totals decrease monotonically from
        // iteration 2 onward and stay within 5% of the iteration-1 total.
        let injected = point_volume(32);
        let energies = step_energies(&injected, 4);
        for pair in energies.windows(2) {
            assert!(
                pair[1] <= pair[0] + 1e-4,
                "energy grew between hops: {} -> {}",
                pair[0],
                pair[1]
            );
        }
        assert!(
            energies[3] >= energies[0] * 0.95,
            "more than 5% energy lost over 4 hops: {} vs {}",
            energies[3],
            energies[0]
        );
    }

    #[test]
    fn test_peak_value_converges_without_reinjection() {
        // Repeated hops with no new injection must not diverge: the peak
        // cell value is non-increasing once light has spread (hop 2+).
        let injected = point_volume(16);
        let mut volumes = [LightVolume::new(16), LightVolume::new(16)];
        volumes[0].copy_from_bytes(injected.as_bytes());
        let mut peaks = Vec::new();
        for i in 0..6 {
            let (a, b) = volumes.split_at_mut(1);
            let (src, dst) = if i % 2 == 0 {
                (&a[0], &mut b[0])
            } else {
                (&b[0], &mut a[0])
            };
            propagate_step(src, dst);
            let peak = dst
                .cells()
                .iter()
                .map(|c| c.energy())
                .fold(0.0f32, f32::max);
            peaks.push(peak);
        }
        for pair in peaks[1..].windows(2) {
            assert!(
                pair[1] <= pair[0] * 1.0001,
                "peak diverged: {} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_occlusion_blocks_transfer() {
        let mut open = LightVolume::new(8);
        open.add_sample(3, 4, 4, Vec3::ONE, Vec3::X);
        let mut blocked = LightVolume::new(8);
        blocked.add_sample(3, 4, 4, Vec3::ONE, Vec3::X);
        blocked.set_occlusion(4, 4, 4, 1.0);

        let mut dst_open = LightVolume::new(8);
        let mut dst_blocked = LightVolume::new(8);
        propagate_step(&open, &mut dst_open);
        propagate_step(&blocked, &mut dst_blocked);

        let open_cell = dst_open.get(4, 4, 4).energy();
        let blocked_cell = dst_blocked.get(4, 4, 4).energy();
        assert!(open_cell > 0.0);
        assert_eq!(blocked_cell, 0.0);
    }

    #[test]
    fn test_light_flows_along_lobe_direction() {
        let injected = point_volume(8);
        let mut dst = LightVolume::new(8);
        propagate_step(&injected, &mut dst);
        let c = 4;
        let forward = dst.get(c + 1, c, c).energy();
        let backward = dst.get(c - 1, c, c).energy();
        assert!(
            forward > backward,
            "lobe points +X; forward {forward} should exceed backward {backward}"
        );
    }

    #[test]
    fn test_parallel_matches_serial() {
        let injected = point_volume(16);
        let mut serial = LightVolume::new(16);
        let mut parallel = LightVolume::new(16);
        propagate_step(&injected, &mut serial);
        propagate_step_parallel(&injected, &mut parallel, 4);
        for (a, b) in serial.cells().iter().zip(parallel.cells()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_accumulated_energy_is_bounded() {
        // Accumulation of k hops is bounded by (k + 1) times the injected
        // energy; with attenuation it must come in strictly below.
        let injected = point_volume(16);
        let mut scratch = [LightVolume::new(16), LightVolume::new(16)];
        let out = propagate(&injected, &mut scratch, 4, 2);
        let e0 = injected.total_energy();
        assert!(out.total_energy() < e0 * 5.0);
        assert!(out.total_energy() > e0);
    }
}
