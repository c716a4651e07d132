//! GPU propagation stage: iterative radiance-transfer dispatches over a
//! cascade's ping-pong grid pair, accumulating each hop, then a copy stage
//! that resolves the accumulator into the settled grid.

use bytemuck::{Pod, Zeroable};

use crate::grids::{CascadeGrids, grid_byte_size};
use crate::shaders::ShaderSet;

/// GPU-side propagation parameters. Layout mirrors the WGSL
/// `PropagateParams`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PropagateParamsUniform {
    /// x = grid resolution.
    pub dims: [u32; 4],
}

struct PropagationPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    propagate: wgpu::ComputePipeline,
}

/// Propagation pipelines plus the per-cascade ping-pong bind-group pairs.
///
/// The pair replaces the original's indexed shader variants: variant 0 reads
/// `ping[0]` and writes `ping[1]`, variant 1 the reverse. Each recorded pass
/// re-seeds `ping[0]` from the cascade's retained injection, so the cursor
/// starts at variant 0 and flips after every hop within the pass.
#[derive(Default)]
pub struct PropagationStage {
    pipelines: Option<PropagationPipelines>,
    bind_groups: Option<Vec<[wgpu::BindGroup; 2]>>,
}

impl PropagationStage {
    pub fn add_pipelines(&mut self, device: &wgpu::Device, shaders: &ShaderSet) {
        if self.pipelines.is_some() {
            log::warn!("propagation pipelines added twice without removal");
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

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lpv-propagate-bgl"),
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
                storage(1, true),
                storage(2, false),
                storage(3, false),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lpv-propagate-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let propagate = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("lpv-propagate"),
            layout: Some(&layout),
            module: &shaders.propagate,
            entry_point: Some("propagate"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        self.pipelines = Some(PropagationPipelines {
            bind_group_layout,
            propagate,
        });
    }

    pub fn remove_pipelines(&mut self) {
        if self.pipelines.take().is_none() {
            log::warn!("propagation pipelines removed twice");
        }
    }

    /// Builds the two ping-pong bind groups for every cascade.
    pub fn add_bind_groups(
        &mut self,
        device: &wgpu::Device,
        uniform: &wgpu::Buffer,
        grids: &[CascadeGrids],
    ) {
        let Some(p) = self.pipelines.as_ref() else {
            log::warn!("add_bind_groups called before add_pipelines");
            return;
        };
        if self.bind_groups.is_some() {
            log::warn!("propagation bind groups added twice without removal");
            return;
        }

        let groups = grids
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let variant = |src: &wgpu::Buffer, dst: &wgpu::Buffer| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(&format!("lpv-propagate-bind-group-{i}")),
                        layout: &p.bind_group_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: uniform.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: src.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 2,
                                resource: dst.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 3,
                                resource: g.accum.as_entire_binding(),
                            },
                        ],
                    })
                };
                [
                    variant(&g.ping[0], &g.ping[1]),
                    variant(&g.ping[1], &g.ping[0]),
                ]
            })
            .collect();
        self.bind_groups = Some(groups);
    }

    pub fn remove_bind_groups(&mut self) {
        if self.bind_groups.take().is_none() {
            log::warn!("propagation bind groups removed twice");
        }
    }

    /// Records one frame's propagation for a cascade: re-seeds the working
    /// grids from the retained injection, runs `iterations` hops flipping
    /// the ping-pong cursor per hop, then copies the accumulator into the
    /// settled grid so apply never observes a buffer mid-write.
    ///
    /// Because every pass starts from `injected`, the settled result is
    /// injection plus exactly one hop series; frames without a fresh
    /// injection replay the same pass instead of compounding.
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        cascade_index: usize,
        grids: &CascadeGrids,
        resolution: u32,
        iterations: u32,
    ) {
        let (Some(p), Some(bind_groups)) = (self.pipelines.as_ref(), self.bind_groups.as_ref())
        else {
            log::debug!("propagate_light called before pipelines/bind groups were added");
            return;
        };
        let pair = &bind_groups[cascade_index];
        let groups = resolution.div_ceil(4);
        let bytes = grid_byte_size(resolution);

        encoder.copy_buffer_to_buffer(&grids.injected, 0, &grids.ping[0], 0, bytes);
        encoder.copy_buffer_to_buffer(&grids.injected, 0, &grids.accum, 0, bytes);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("lpv-propagate"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&p.propagate);
            let mut current = 0;
            for _ in 0..iterations {
                pass.set_bind_group(0, &pair[current], &[]);
                pass.dispatch_workgroups(groups, groups, groups);
                current ^= 1;
            }
        }

        encoder.copy_buffer_to_buffer(&grids.accum, 0, &grids.settled, 0, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_grid::LightVolume;
    use glam::Vec3;
    use wgpu::util::DeviceExt;

    fn create_test_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()
    }

    fn read_settled(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        grids: &CascadeGrids,
        resolution: u32,
    ) -> LightVolume {
        let size = grid_byte_size(resolution);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(&grids.settled, 0, &readback, 0, size);
        queue.submit([encoder.finish()]);

        let (tx, rx) = crossbeam_channel::bounded(1);
        readback.slice(..).map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .unwrap();
        rx.recv().unwrap().unwrap();

        let mut v = LightVolume::new(resolution);
        {
            let range = readback.slice(..).get_mapped_range();
            v.copy_from_bytes(&range);
        }
        readback.unmap();
        v
    }

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<PropagateParamsUniform>(), 16);
    }

    #[test]
    fn test_repeated_frames_without_injection_hold_energy_steady() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let resolution = 8u32;
        let grids = [CascadeGrids::new(&device, resolution, 0)];

        let mut injected = LightVolume::new(resolution);
        injected.add_sample(4, 4, 4, Vec3::ONE, Vec3::X);
        queue.write_buffer(&grids[0].injected, 0, injected.as_bytes());

        let shaders = ShaderSet::new(&device);
        let mut stage = PropagationStage::default();
        stage.add_pipelines(&device, &shaders);
        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: None,
            contents: bytemuck::bytes_of(&PropagateParamsUniform {
                dims: [resolution, 0, 0, 0],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        stage.add_bind_groups(&device, &uniform, &grids);

        // Odd hop count, so a ping-pong cursor carried across frames would
        // start the second frame from the wrong buffer.
        let iterations = 3;
        let mut energies = Vec::new();
        for _ in 0..3 {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            stage.record(&mut encoder, 0, &grids[0], resolution, iterations);
            queue.submit([encoder.finish()]);
            energies.push(read_settled(&device, &queue, &grids[0], resolution).total_energy());
        }

        // Without new injection every frame settles to the same energy.
        assert!(energies[0] > injected.total_energy());
        assert!((energies[1] - energies[0]).abs() <= energies[0] * 1e-4);
        assert!((energies[2] - energies[0]).abs() <= energies[0] * 1e-4);

        // And that energy matches the CPU kernel for the same hop count.
        let mut scratch = [LightVolume::new(resolution), LightVolume::new(resolution)];
        let expected = aura_grid::propagate(&injected, &mut scratch, iterations, 1).total_energy();
        assert!(
            (energies[0] - expected).abs() <= expected * 1e-3,
            "gpu {} vs cpu {}",
            energies[0],
            expected
        );
    }
}
