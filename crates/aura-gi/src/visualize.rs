//! Debug probe visualization: one camera-facing billboard per grid cell,
//! colored by the cell's stored radiance, depth-tested against the scene.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::VisualizationInputs;
use crate::grids::CascadeGrids;
use crate::shaders::ShaderSet;

/// GPU-side visualization parameters. Layout mirrors the WGSL
/// `VisualizeParams`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VisualizeParamsUniform {
    pub view_proj: [f32; 16],
    pub camera_right: [f32; 4],
    pub camera_up: [f32; 4],
    /// xyz = grid minimum corner, w = cell size.
    pub grid_origin_cell: [f32; 4],
    /// x = resolution, y = probe size, z = intensity.
    pub dims: [f32; 4],
}

impl VisualizeParamsUniform {
    pub fn new(
        inputs: &VisualizationInputs,
        grid_min: Vec3,
        cell_size: f32,
        resolution: u32,
        intensity: f32,
    ) -> Self {
        Self {
            view_proj: inputs.view_proj.to_cols_array(),
            camera_right: inputs.camera_right.extend(0.0).to_array(),
            camera_up: inputs.camera_up.extend(0.0).to_array(),
            grid_origin_cell: grid_min.extend(cell_size).to_array(),
            dims: [resolution as f32, inputs.probe_size, intensity, 0.0],
        }
    }
}

struct VisualizationPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

/// Visualization render pipeline and its add/remove lifecycle.
#[derive(Default)]
pub struct VisualizationStage {
    pipelines: Option<VisualizationPipelines>,
}

impl VisualizationStage {
    pub fn add_pipelines(
        &mut self,
        device: &wgpu::Device,
        shaders: &ShaderSet,
        color_format: wgpu::TextureFormat,
        depth_format: wgpu::TextureFormat,
    ) {
        if self.pipelines.is_some() {
            log::warn!("visualization pipelines added twice without removal");
            return;
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lpv-visualize-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lpv-visualize-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lpv-visualize"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shaders.visualize,
                entry_point: Some("vs_probe"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shaders.visualize,
                entry_point: Some("fs_probe"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::COLOR,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.pipelines = Some(VisualizationPipelines {
            bind_group_layout,
            pipeline,
        });
    }

    pub fn remove_pipelines(&mut self) {
        if self.pipelines.take().is_none() {
            log::warn!("visualization pipelines removed twice");
        }
    }

    /// Records one instanced draw over every cell of the cascade's settled
    /// grid. Dark probes collapse to zero-size quads in the vertex shader.
    pub fn record(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        uniform: &wgpu::Buffer,
        grids: &CascadeGrids,
        params: &VisualizeParamsUniform,
        inputs: &VisualizationInputs,
        resolution: u32,
    ) {
        let Some(p) = self.pipelines.as_ref() else {
            log::debug!("draw_visualization called before add_pipelines");
            return;
        };

        queue.write_buffer(uniform, 0, bytemuck::bytes_of(params));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lpv-visualize-bind-group"),
            layout: &p.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: grids.settled.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lpv-visualize"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: inputs.color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: inputs.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });
        pass.set_pipeline(&p.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..6, 0..resolution.pow(3));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<VisualizeParamsUniform>(), 64 + 4 * 16);
    }
}
