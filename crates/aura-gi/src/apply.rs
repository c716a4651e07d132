//! Full-screen apply pass: reconstructs world positions from depth, picks
//! the finest cascade containing each pixel, and adds the trilinearly
//! sampled indirect radiance to the lighting target.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use aura_grid::Cascade;

use crate::config::ApplyInputs;
use crate::grids::CascadeGrids;
use crate::shaders::ShaderSet;

/// Per-cascade apply constants. Layout mirrors the WGSL `CascadeApply`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CascadeApplyData {
    /// xyz = world-space center, w = span.
    pub center_span: [f32; 4],
    /// x = intensity, y = cell size, z = resolution.
    pub factors: [f32; 4],
}

/// Everything the apply shader needs for one frame. Layout mirrors the
/// WGSL `ApplyParams`; exposed so callers can inspect or log the values
/// driving the pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightApplyData {
    pub inv_view_proj: [f32; 16],
    pub camera_pos: [f32; 4],
    /// x = cascade count, y = render-target width, z = height.
    pub counts: [u32; 4],
    pub cascades: [CascadeApplyData; 4],
}

impl LightApplyData {
    pub fn new(
        inv_view_proj: Mat4,
        camera_pos: Vec3,
        cascades: &[Cascade],
        resolution: u32,
        rt_width: u32,
        rt_height: u32,
    ) -> Self {
        let mut out = Self {
            inv_view_proj: inv_view_proj.to_cols_array(),
            camera_pos: camera_pos.extend(1.0).to_array(),
            counts: [cascades.len() as u32, rt_width, rt_height, 0],
            cascades: [CascadeApplyData::default(); 4],
        };
        for (slot, c) in out.cascades.iter_mut().zip(cascades) {
            let center: Vec3 = c.center();
            slot.center_span = center.extend(c.grid_span()).to_array();
            slot.factors = [c.grid_intensity(), c.cell_size(), resolution as f32, 0.0];
        }
        out
    }
}

struct ApplyPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

/// Apply render pipeline and its add/remove lifecycle.
#[derive(Default)]
pub struct ApplyStage {
    pipelines: Option<ApplyPipelines>,
}

impl ApplyStage {
    pub fn add_pipelines(
        &mut self,
        device: &wgpu::Device,
        shaders: &ShaderSet,
        target_format: wgpu::TextureFormat,
    ) {
        if self.pipelines.is_some() {
            log::warn!("apply pipelines added twice without removal");
            return;
        }

        let grid = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture = |binding, sample_type| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lpv-apply-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture(1, wgpu::TextureSampleType::Float { filterable: true }),
                texture(2, wgpu::TextureSampleType::Depth),
                texture(3, wgpu::TextureSampleType::Float { filterable: true }),
                grid(4),
                grid(5),
                grid(6),
                grid(7),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lpv-apply-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lpv-apply"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shaders.apply,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.apply,
                entry_point: Some("fs_apply"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    // Indirect light adds on top of the direct lighting
                    // already in the target.
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent::OVER,
                    }),
                    write_mask: wgpu::ColorWrites::COLOR,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.pipelines = Some(ApplyPipelines {
            bind_group_layout,
            pipeline,
        });
    }

    pub fn remove_pipelines(&mut self) {
        if self.pipelines.take().is_none() {
            log::warn!("apply pipelines removed twice");
        }
    }

    /// Records the full-screen apply pass over `target`.
    ///
    /// Unused cascade slots are bound to the first cascade's settled grid;
    /// the shader never samples past `counts.x` so the aliasing is inert.
    pub fn record(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        uniform: &wgpu::Buffer,
        grids: &[CascadeGrids],
        data: &LightApplyData,
        inputs: &ApplyInputs,
        target: &wgpu::TextureView,
    ) {
        let Some(p) = self.pipelines.as_ref() else {
            log::debug!("apply_light called before add_pipelines");
            return;
        };

        queue.write_buffer(uniform, 0, bytemuck::bytes_of(data));

        let settled = |i: usize| grids.get(i).unwrap_or(&grids[0]).settled.as_entire_binding();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lpv-apply-bind-group"),
            layout: &p.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(inputs.normal),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(inputs.depth),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(inputs.ambient_occlusion),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: settled(0),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: settled(1),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: settled(2),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: settled(3),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lpv-apply"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_pipeline(&p.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_grid::CascadeDesc;
    use glam::Mat4;

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<CascadeApplyData>(), 32);
        assert_eq!(std::mem::size_of::<LightApplyData>(), 64 + 32 + 4 * 32);
    }

    fn test_cascade(index: usize, span: f32) -> Cascade {
        Cascade::new(
            index,
            CascadeDesc {
                grid_span: span,
                grid_intensity: 1.0,
                flags: 0,
            },
            32,
        )
        .unwrap()
    }

    #[test]
    fn test_apply_data_packs_cascades() {
        let mut c0 = test_cascade(0, 100.0);
        c0.set_center(Vec3::new(10.0, 0.0, 0.0));
        let cascades = [c0, test_cascade(1, 400.0)];
        let data = LightApplyData::new(Mat4::IDENTITY, Vec3::ZERO, &cascades, 32, 1920, 1080);
        assert_eq!(data.counts[0], 2);
        assert_eq!(data.counts[1], 1920);
        assert_eq!(data.cascades[0].center_span[3], 100.0);
        let snapped = aura_grid::snap_to_cell(Vec3::new(10.0, 0.0, 0.0), 100.0 / 32.0);
        assert_eq!(data.cascades[0].center_span[0], snapped.x);
        assert_eq!(data.cascades[1].factors[1], 400.0 / 32.0);
        // Unused slots stay zeroed.
        assert_eq!(data.cascades[2].center_span, [0.0; 4]);
    }
}
