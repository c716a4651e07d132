//! RSM injection stage: scatters reflective-shadow-map texels into a
//! cascade's grid as fixed-point atomics, then resolves them to float cells.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::RsmInputs;
use crate::grids::CascadeGrids;
use crate::shaders::ShaderSet;

/// GPU-side injection parameters. Layout mirrors the WGSL `InjectParams`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct InjectParamsUniform {
    pub inv_view_proj: [f32; 16],
    pub camera_pos: [f32; 4],
    /// xyz = camera direction, w = view area at unit depth.
    pub camera_dir_area: [f32; 4],
    /// xyz = grid minimum corner, w = cell size.
    pub grid_origin_cell: [f32; 4],
    /// x = RSM width, y = RSM height, z = grid resolution.
    pub dims: [u32; 4],
}

impl InjectParamsUniform {
    pub fn new(inputs: &RsmInputs, grid_min: Vec3, cell_size: f32, resolution: u32) -> Self {
        Self {
            inv_view_proj: inputs.inv_view_proj.to_cols_array(),
            camera_pos: inputs.camera_pos.extend(1.0).to_array(),
            camera_dir_area: inputs
                .camera_dir
                .extend(inputs.view_area_for_unit_depth)
                .to_array(),
            grid_origin_cell: grid_min.extend(cell_size).to_array(),
            dims: [inputs.width, inputs.height, resolution, 0],
        }
    }
}

struct InjectionPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    inject: wgpu::ComputePipeline,
    resolve: wgpu::ComputePipeline,
}

/// Injection pipelines and their add/remove lifecycle.
#[derive(Default)]
pub struct InjectionStage {
    pipelines: Option<InjectionPipelines>,
}

impl InjectionStage {
    pub fn add_pipelines(&mut self, device: &wgpu::Device, shaders: &ShaderSet) {
        if self.pipelines.is_some() {
            log::warn!("injection pipelines added twice without removal");
            return;
        }

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture = |binding, sample_type| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lpv-inject-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, false),
                texture(2, wgpu::TextureSampleType::Float { filterable: true }),
                texture(3, wgpu::TextureSampleType::Float { filterable: true }),
                texture(4, wgpu::TextureSampleType::Depth),
                storage(5, false),
                storage(6, false),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lpv-inject-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = |label: &str, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module: &shaders.inject,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        self.pipelines = Some(InjectionPipelines {
            bind_group_layout,
            inject: pipeline("lpv-inject-rsm", "inject_rsm"),
            resolve: pipeline("lpv-resolve-injection", "resolve_injection"),
        });
    }

    pub fn remove_pipelines(&mut self) {
        if self.pipelines.take().is_none() {
            log::warn!("injection pipelines removed twice");
        }
    }

    /// Records the scatter and resolve dispatches for one cascade.
    ///
    /// No-op (with a debug log) if pipelines have not been added.
    pub fn record(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        uniform: &wgpu::Buffer,
        grids: &CascadeGrids,
        inputs: &RsmInputs,
        grid_min: Vec3,
        cell_size: f32,
        resolution: u32,
    ) {
        let Some(p) = self.pipelines.as_ref() else {
            log::debug!("inject_rsm called before add_pipelines");
            return;
        };

        let params = InjectParamsUniform::new(inputs, grid_min, cell_size, resolution);
        queue.write_buffer(uniform, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lpv-inject-bind-group"),
            layout: &p.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: grids.inject.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(inputs.base_color),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(inputs.normal),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(inputs.depth),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: grids.ping[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: grids.injected.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("lpv-inject"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&p.inject);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(inputs.width.div_ceil(8), inputs.height.div_ceil(8), 1);

        pass.set_pipeline(&p.resolve);
        pass.dispatch_workgroups(resolution.pow(3).div_ceil(64), 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        // mat4 + four vec4s.
        assert_eq!(std::mem::size_of::<InjectParamsUniform>(), 64 + 4 * 16);
    }

    #[test]
    fn test_uniform_packs_inputs() {
        let params = InjectParamsUniform {
            inv_view_proj: Mat4::IDENTITY.to_cols_array(),
            camera_pos: [1.0, 2.0, 3.0, 1.0],
            camera_dir_area: [0.0, 0.0, 1.0, 0.5],
            grid_origin_cell: [-50.0, -50.0, -50.0, 3.125],
            dims: [1024, 1024, 32, 0],
        };
        assert_eq!(params.dims[2], 32);
        assert_eq!(params.grid_origin_cell[3], 3.125);
    }
}
