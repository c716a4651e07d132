//! The cascade orchestrator: owns the cascades, their GPU grids, the
//! per-pass uniform buffers, and the shader/pipeline/bind-group lifecycle,
//! and sequences injection, propagation, apply, and visualization across
//! frames.

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use aura_grid::{Box3, Cascade, CascadeDesc};

use crate::apply::{ApplyStage, LightApplyData};
use crate::config::{ApplyInputs, LpvParams, RsmInputs, VisualizationInputs};
use crate::cpu::{CpuContextState, CpuPropagation};
use crate::error::AuraError;
use crate::grids::{CascadeGrids, grid_byte_size};
use crate::inject::InjectionStage;
use crate::propagate::{PropagateParamsUniform, PropagationStage};
use crate::shaders::ShaderSet;
use crate::visualize::{VisualizationStage, VisualizeParamsUniform};

/// Upper bound on cascades; the apply shader binds this many grids.
pub const MAX_CASCADES: usize = 4;

/// Frames of uniform double-buffering.
pub const MAX_FRAMES: usize = 2;

/// Fraction of a cascade's span the snap target sits ahead of the camera,
/// so most of the grid covers what the camera is looking at.
const CENTER_AHEAD_FACTOR: f32 = 0.25;

/// Cascaded light-propagation-volume orchestrator.
pub struct Aura {
    params: LpvParams,
    cascades: Vec<Cascade>,
    grids: Vec<CascadeGrids>,

    inject_uniforms: Vec<wgpu::Buffer>,
    propagate_uniform: wgpu::Buffer,
    apply_uniforms: Vec<wgpu::Buffer>,
    visualize_uniforms: Vec<wgpu::Buffer>,

    shaders: Option<ShaderSet>,
    injection: InjectionStage,
    propagation: PropagationStage,
    apply: ApplyStage,
    visualization: VisualizationStage,

    frame_idx: usize,
    cpu: Option<CpuPropagation>,
    use_cpu_propagation: bool,
    used_cpu_previous_frame: bool,
}

impl Aura {
    /// Creates the orchestrator, its cascades, and all grid buffers.
    ///
    /// Fails if the cascade list is empty or too long, any descriptor is
    /// invalid, or the device cannot bind a whole grid as one storage
    /// buffer.
    pub fn new(
        device: &wgpu::Device,
        params: LpvParams,
        descs: &[CascadeDesc],
    ) -> Result<Self, AuraError> {
        if descs.is_empty() {
            return Err(AuraError::NoCascades);
        }
        if descs.len() > MAX_CASCADES {
            return Err(AuraError::TooManyCascades {
                requested: descs.len(),
                max: MAX_CASCADES,
            });
        }
        let required = grid_byte_size(params.grid_resolution);
        let supported = device.limits().max_storage_buffer_binding_size as u64;
        if required > supported {
            return Err(AuraError::UnsupportedDevice {
                required,
                supported,
            });
        }

        let cascades = descs
            .iter()
            .enumerate()
            .map(|(i, d)| Cascade::new(i, *d, params.grid_resolution))
            .collect::<Result<Vec<_>, _>>()?;
        let grids = (0..cascades.len())
            .map(|i| CascadeGrids::new(device, params.grid_resolution, i))
            .collect();

        let uniform = |label: String, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let inject_uniforms = (0..cascades.len() * MAX_FRAMES)
            .map(|i| {
                uniform(
                    format!("lpv-inject-uniform-{i}"),
                    std::mem::size_of::<crate::inject::InjectParamsUniform>() as u64,
                )
            })
            .collect();
        let propagate_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lpv-propagate-uniform"),
            contents: bytemuck::bytes_of(&PropagateParamsUniform {
                dims: [params.grid_resolution, 0, 0, 0],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let apply_uniforms = (0..MAX_FRAMES)
            .map(|i| {
                uniform(
                    format!("lpv-apply-uniform-{i}"),
                    std::mem::size_of::<LightApplyData>() as u64,
                )
            })
            .collect();
        let visualize_uniforms = (0..MAX_FRAMES)
            .map(|i| {
                uniform(
                    format!("lpv-visualize-uniform-{i}"),
                    std::mem::size_of::<VisualizeParamsUniform>() as u64,
                )
            })
            .collect();

        log::info!(
            "lpv ready: {} cascades, resolution {}, {} iterations",
            cascades.len(),
            params.grid_resolution,
            params.propagation_iterations
        );

        let use_cpu_propagation = params.use_cpu_propagation;
        Ok(Self {
            params,
            cascades,
            grids,
            inject_uniforms,
            propagate_uniform,
            apply_uniforms,
            visualize_uniforms,
            shaders: None,
            injection: InjectionStage::default(),
            propagation: PropagationStage::default(),
            apply: ApplyStage::default(),
            visualization: VisualizationStage::default(),
            frame_idx: 0,
            cpu: None,
            use_cpu_propagation,
            used_cpu_previous_frame: use_cpu_propagation,
        })
    }

    pub fn cascade_count(&self) -> usize {
        self.cascades.len()
    }

    pub fn params(&self) -> &LpvParams {
        &self.params
    }

    /// The snap target a cascade should center on for this camera.
    fn center_target(&self, cascade: &Cascade, camera_pos: Vec3, camera_dir: Vec3) -> Vec3 {
        camera_pos + camera_dir * cascade.grid_span() * CENTER_AHEAD_FACTOR
    }

    /// Bitmask of cascades whose grids need re-injection for this camera.
    ///
    /// A cascade needs an update until its first injection, and after that
    /// whenever the snapped target cell differs from its current center.
    /// Static cascades stop updating once injected.
    pub fn cascades_to_update_mask(&self, camera_pos: Vec3, camera_dir: Vec3) -> u32 {
        let mut mask = 0;
        for (i, cascade) in self.cascades.iter().enumerate() {
            let target = self.center_target(cascade, camera_pos, camera_dir);
            if cascade.needs_update(target) {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Re-centers a cascade, snapped to whole cells.
    pub fn set_cascade_center(&mut self, cascade_index: usize, position: Vec3) {
        self.cascades[cascade_index].set_center(position);
    }

    /// Starts a frame: re-centers every cascade the update mask selects and
    /// returns the mask so the host knows which cascades to re-inject.
    pub fn begin_frame(&mut self, camera_pos: Vec3, camera_dir: Vec3) -> u32 {
        let mask = self.cascades_to_update_mask(camera_pos, camera_dir);
        for (i, cascade) in self.cascades.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                let target =
                    camera_pos + camera_dir * cascade.grid_span() * CENTER_AHEAD_FACTOR;
                cascade.set_center(target);
            }
        }
        mask
    }

    /// A cascade's bounds in the space of `world_to_local`.
    pub fn grid_bounds(&self, cascade_index: usize, world_to_local: Mat4) -> Box3 {
        self.cascades[cascade_index].grid_bounds(world_to_local)
    }

    /// Per-frame apply constants for the current cascade state.
    pub fn light_apply_data(&self, inv_view_proj: Mat4, camera_pos: Vec3) -> LightApplyData {
        LightApplyData::new(
            inv_view_proj,
            camera_pos,
            &self.cascades,
            self.params.grid_resolution,
            self.params.rt_width,
            self.params.rt_height,
        )
    }

    /// Records RSM injection into one cascade and marks it injected.
    ///
    /// The resolve leaves the injected radiance in the cascade's retained
    /// injection grid, which every later propagation pass re-seeds from.
    pub fn inject_rsm(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        cascade_index: usize,
        inputs: &RsmInputs,
    ) {
        let cascade = &mut self.cascades[cascade_index];
        let grid_min = cascade.world_min();
        let cell_size = cascade.cell_size();
        cascade.mark_injected();

        let uniform = &self.inject_uniforms[cascade_index * MAX_FRAMES + self.frame_idx];
        self.injection.record(
            device,
            queue,
            encoder,
            uniform,
            &self.grids[cascade_index],
            inputs,
            grid_min,
            cell_size,
            self.params.grid_resolution,
        );
    }

    /// Records the propagation hops for every cascade, or runs them on the
    /// CPU workers when the CPU path is active.
    pub fn propagate_light(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if self.use_cpu_propagation {
            let Some(cpu) = self.cpu.as_mut() else {
                log::warn!("cpu propagation enabled but resources were never loaded");
                return;
            };
            let threads = cpu.thread_count();
            cpu.oldest_mut()
                .propagate_all(self.params.propagation_iterations, threads);
            return;
        }

        for (i, grids) in self.grids.iter().enumerate() {
            self.propagation.record(
                encoder,
                i,
                grids,
                self.params.grid_resolution,
                self.params.propagation_iterations,
            );
        }
    }

    /// Records the staging capture of this frame's resolved injection for
    /// the CPU path. No-op in GPU mode.
    pub fn capture_light(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if !self.use_cpu_propagation {
            return;
        }
        let Some(cpu) = self.cpu.as_mut() else {
            log::warn!("cpu propagation enabled but resources were never loaded");
            return;
        };
        cpu.current_mut()
            .record_capture(encoder, &self.grids, self.params.grid_resolution);
    }

    /// Maps the oldest in-flight staging capture. Blocks on the device;
    /// call after the capture submission. No-op in GPU mode.
    pub fn map_async_resources(&mut self, device: &wgpu::Device) {
        if !self.use_cpu_propagation {
            return;
        }
        if let Some(cpu) = self.cpu.as_mut() {
            cpu.oldest_mut().map_resources(device);
        }
    }

    /// Records the full-screen indirect-light pass over `target`.
    ///
    /// In CPU mode this first uploads any finished CPU results into the
    /// settled grids. On a GPU/CPU mode switch, in-flight contexts are
    /// reset and the pass falls back to whatever the settled grids hold.
    pub fn apply_light(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &ApplyInputs,
        target: &wgpu::TextureView,
    ) {
        if self.use_cpu_propagation != self.used_cpu_previous_frame {
            log::info!(
                "propagation path switched to {}",
                if self.use_cpu_propagation { "cpu" } else { "gpu" }
            );
            if let Some(cpu) = self.cpu.as_mut() {
                cpu.reset_all();
            }
        } else if self.use_cpu_propagation {
            if let Some(cpu) = self.cpu.as_mut() {
                let ctx = cpu.oldest_mut();
                if ctx.state() == CpuContextState::Propagated {
                    ctx.upload(queue, &self.grids);
                }
            }
        }

        let data = self.light_apply_data(inputs.inv_view_proj, inputs.camera_pos);
        self.apply.record(
            device,
            queue,
            encoder,
            &self.apply_uniforms[self.frame_idx],
            &self.grids,
            &data,
            inputs,
            target,
        );
    }

    /// Records the debug probe visualization for one cascade.
    pub fn draw_visualization(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &VisualizationInputs,
    ) {
        let cascade = &self.cascades[inputs.cascade_index];
        let params = VisualizeParamsUniform::new(
            inputs,
            cascade.world_min(),
            cascade.cell_size(),
            self.params.grid_resolution,
            cascade.grid_intensity(),
        );
        self.visualization.record(
            device,
            queue,
            encoder,
            &self.visualize_uniforms[self.frame_idx],
            &self.grids[inputs.cascade_index],
            &params,
            inputs,
            self.params.grid_resolution,
        );
    }

    /// Advances all per-frame state. The only place the frame index, the
    /// CPU context ring, and the mode latch move.
    pub fn end_frame(&mut self) {
        self.frame_idx = (self.frame_idx + 1) % MAX_FRAMES;
        if let Some(cpu) = self.cpu.as_mut() {
            cpu.advance();
        }
        self.used_cpu_previous_frame = self.use_cpu_propagation;
    }

    /// Allocates the CPU propagation contexts. Idempotent.
    pub fn load_cpu_propagation_resources(
        &mut self,
        device: &wgpu::Device,
    ) -> Result<(), AuraError> {
        if self.cpu.is_none() {
            self.cpu = Some(CpuPropagation::new(
                device,
                self.params.grid_resolution,
                self.cascades.len(),
                self.params.in_flight_frame_count,
            )?);
        }
        Ok(())
    }

    /// Switches the propagation path. Takes effect through the mode latch
    /// in `apply_light`/`end_frame`, never mid-frame.
    pub fn set_use_cpu_propagation(&mut self, enabled: bool) {
        self.use_cpu_propagation = enabled;
    }

    pub fn use_cpu_propagation(&self) -> bool {
        self.use_cpu_propagation
    }

    pub fn add_shaders(&mut self, device: &wgpu::Device) {
        if self.shaders.is_some() {
            log::warn!("shaders added twice without removal");
            return;
        }
        self.shaders = Some(ShaderSet::new(device));
    }

    pub fn remove_shaders(&mut self) {
        if self.shaders.take().is_none() {
            log::warn!("shaders removed twice");
        }
    }

    /// Creates every pass pipeline against the given target formats.
    pub fn add_pipelines(
        &mut self,
        device: &wgpu::Device,
        apply_format: wgpu::TextureFormat,
        visualize_color_format: wgpu::TextureFormat,
        visualize_depth_format: wgpu::TextureFormat,
    ) {
        let Some(shaders) = self.shaders.as_ref() else {
            log::warn!("add_pipelines called before add_shaders");
            return;
        };
        self.injection.add_pipelines(device, shaders);
        self.propagation.add_pipelines(device, shaders);
        self.apply.add_pipelines(device, shaders, apply_format);
        self.visualization.add_pipelines(
            device,
            shaders,
            visualize_color_format,
            visualize_depth_format,
        );
    }

    pub fn remove_pipelines(&mut self) {
        self.injection.remove_pipelines();
        self.propagation.remove_pipelines();
        self.apply.remove_pipelines();
        self.visualization.remove_pipelines();
    }

    /// Creates the persistent propagation bind groups.
    pub fn add_bind_groups(&mut self, device: &wgpu::Device) {
        self.propagation
            .add_bind_groups(device, &self.propagate_uniform, &self.grids);
    }

    pub fn remove_bind_groups(&mut self) {
        self.propagation.remove_bind_groups();
    }
}
