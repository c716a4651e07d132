//! CPU propagation path.
//!
//! Each context captures the resolved injection grids into mappable staging
//! buffers, maps them once the copy has completed, runs the worker-parallel
//! kernel from `aura-grid`, and uploads the result into the settled grids.
//! A ring of `in_flight_frame_count + 1` contexts guarantees the capture of
//! frame N is not consumed before frame N + in_flight_frame_count, so the
//! map never touches a copy recorded in the same frame.

use aura_grid::{LightVolume, default_thread_count, propagate};

use crate::error::AuraError;
use crate::grids::{CascadeGrids, grid_byte_size};

/// Lifecycle of one context across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuContextState {
    /// No capture recorded; safe to reuse.
    Idle,
    /// Capture copy recorded, staging not yet mapped.
    CaptureInFlight,
    /// Staging mapped and consumed into CPU volumes.
    Mapped,
    /// Propagation finished; results waiting for upload.
    Propagated,
}

/// One frame's worth of CPU propagation state.
pub struct CpuPropagationContext {
    staging: Vec<wgpu::Buffer>,
    injected: LightVolume,
    scratch: [LightVolume; 2],
    results: Vec<LightVolume>,
    state: CpuContextState,
}

impl CpuPropagationContext {
    fn new(device: &wgpu::Device, resolution: u32, cascade_count: usize, slot: usize) -> Self {
        let staging = (0..cascade_count)
            .map(|c| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("lpv-cpu-staging-{slot}-{c}")),
                    size: grid_byte_size(resolution),
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        Self {
            staging,
            injected: LightVolume::new(resolution),
            scratch: [LightVolume::new(resolution), LightVolume::new(resolution)],
            results: (0..cascade_count).map(|_| LightVolume::new(resolution)).collect(),
            state: CpuContextState::Idle,
        }
    }

    pub fn state(&self) -> CpuContextState {
        self.state
    }

    /// Records the copy of every cascade's resolved injection into staging.
    pub fn record_capture(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        grids: &[CascadeGrids],
        resolution: u32,
    ) {
        if self.state != CpuContextState::Idle {
            log::warn!("capture requested on a context in state {:?}", self.state);
            return;
        }
        for (staging, g) in self.staging.iter().zip(grids) {
            encoder.copy_buffer_to_buffer(&g.injected, 0, staging, 0, grid_byte_size(resolution));
        }
        self.state = CpuContextState::CaptureInFlight;
    }

    /// Maps the staging buffers and consumes them into the CPU volumes.
    ///
    /// Blocks until the device signals the map; call only after the capture
    /// command buffer has been submitted.
    pub fn map_resources(&mut self, device: &wgpu::Device) {
        if self.state != CpuContextState::CaptureInFlight {
            log::debug!("map requested on a context in state {:?}", self.state);
            return;
        }

        let receivers: Vec<_> = self
            .staging
            .iter()
            .map(|buffer| {
                let (tx, rx) = crossbeam_channel::bounded(1);
                buffer
                    .slice(..)
                    .map_async(wgpu::MapMode::Read, move |result| {
                        let _ = tx.send(result);
                    });
                rx
            })
            .collect();

        let mut failed = false;
        if let Err(e) = device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::error!("device poll failed while mapping staging buffers: {e}");
            failed = true;
        } else {
            for rx in &receivers {
                match rx.recv() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log::error!("staging buffer map failed: {e}");
                        failed = true;
                    }
                    Err(e) => {
                        log::error!("map completion channel closed: {e}");
                        failed = true;
                    }
                }
            }
        }
        if failed {
            // Every buffer has a map pending or completed at this point;
            // unmapping aborts either, leaving the context reusable.
            for staging in &self.staging {
                staging.unmap();
            }
            self.state = CpuContextState::Idle;
            return;
        }

        self.state = CpuContextState::Mapped;
    }

    /// Runs the propagation kernel for every captured cascade.
    pub fn propagate_all(&mut self, iterations: u32, thread_count: usize) {
        if self.state != CpuContextState::Mapped {
            log::debug!("propagate requested on a context in state {:?}", self.state);
            return;
        }
        for (staging, result) in self.staging.iter().zip(self.results.iter_mut()) {
            {
                let range = staging.slice(..).get_mapped_range();
                self.injected.copy_from_bytes(&range);
            }
            staging.unmap();
            *result = propagate(&self.injected, &mut self.scratch, iterations, thread_count);
        }
        self.state = CpuContextState::Propagated;
    }

    /// Uploads the propagated volumes into the cascades' settled grids.
    pub fn upload(&mut self, queue: &wgpu::Queue, grids: &[CascadeGrids]) {
        if self.state != CpuContextState::Propagated {
            log::debug!("upload requested on a context in state {:?}", self.state);
            return;
        }
        for (result, g) in self.results.iter().zip(grids) {
            queue.write_buffer(&g.settled, 0, result.as_bytes());
        }
        self.state = CpuContextState::Idle;
    }

    /// Drops any in-flight work so the context can be reused after a
    /// GPU/CPU mode switch.
    pub fn reset(&mut self) {
        if self.state == CpuContextState::Mapped {
            for staging in &self.staging {
                staging.unmap();
            }
        }
        self.state = CpuContextState::Idle;
    }
}

/// The context ring. `current` is the context capturing this frame. The
/// ring holds `in_flight_frame_count + 1` contexts so the oldest slot comes
/// back around exactly `in_flight_frame_count` frames after its capture,
/// and is never consumed earlier.
pub struct CpuPropagation {
    contexts: Vec<CpuPropagationContext>,
    current: usize,
    thread_count: usize,
}

impl CpuPropagation {
    pub fn new(
        device: &wgpu::Device,
        resolution: u32,
        cascade_count: usize,
        in_flight_frame_count: u32,
    ) -> Result<Self, AuraError> {
        // One frame of lag would map the capture recorded this frame before
        // its copy was submitted.
        if in_flight_frame_count < 2 {
            return Err(AuraError::InsufficientInFlightFrames {
                requested: in_flight_frame_count,
            });
        }
        let contexts = (0..in_flight_frame_count as usize + 1)
            .map(|slot| CpuPropagationContext::new(device, resolution, cascade_count, slot))
            .collect();
        let thread_count = default_thread_count();
        log::info!(
            "cpu propagation ready: {in_flight_frame_count} frames in flight, {thread_count} workers"
        );
        Ok(Self {
            contexts,
            current: 0,
            thread_count,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// The context capturing this frame.
    pub fn current_mut(&mut self) -> &mut CpuPropagationContext {
        &mut self.contexts[self.current]
    }

    /// The context whose capture is oldest, next in line to be consumed.
    /// Its capture (if any) is `in_flight_frame_count` frames old; during
    /// the first frames of a session it is still idle and the state machine
    /// makes consumption a no-op.
    pub fn oldest_mut(&mut self) -> &mut CpuPropagationContext {
        let oldest = (self.current + 1) % self.contexts.len();
        &mut self.contexts[oldest]
    }

    /// Advances the ring at end of frame.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.contexts.len();
    }

    /// Resets every context after a GPU/CPU mode switch.
    pub fn reset_all(&mut self) {
        for ctx in &mut self.contexts {
            ctx.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()
    }

    #[test]
    fn test_ring_rejects_insufficient_in_flight_frames() {
        let Some((device, _queue)) = create_test_device_queue() else {
            return;
        };
        for requested in [0, 1] {
            assert!(matches!(
                CpuPropagation::new(&device, 8, 1, requested),
                Err(AuraError::InsufficientInFlightFrames { .. })
            ));
        }
    }

    #[test]
    fn test_ring_advance_wraps() {
        let Some((device, _queue)) = create_test_device_queue() else {
            return;
        };
        // Three frames in flight means a ring of four contexts.
        let mut ring = CpuPropagation::new(&device, 8, 1, 3).unwrap();
        assert_eq!(ring.contexts.len(), 4);
        assert_eq!(ring.current, 0);
        for _ in 0..4 {
            ring.advance();
        }
        assert_eq!(ring.current, 0);
    }

    #[test]
    fn test_oldest_context_trails_capture_by_in_flight_frames() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let grids = [CascadeGrids::new(&device, 8, 0)];
        let mut ring = CpuPropagation::new(&device, 8, 1, 2).unwrap();

        // Frame 0: capture into the current context.
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        ring.current_mut().record_capture(&mut encoder, &grids, 8);
        queue.submit([encoder.finish()]);
        ring.advance();

        // Frame 1: the frame-0 capture must not come up yet.
        assert_eq!(ring.oldest_mut().state(), CpuContextState::Idle);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        ring.current_mut().record_capture(&mut encoder, &grids, 8);
        queue.submit([encoder.finish()]);
        ring.advance();

        // Frame 2: exactly two frames after its capture, the frame-0
        // context is the one up for consumption.
        assert_eq!(ring.oldest_mut().state(), CpuContextState::CaptureInFlight);
        ring.oldest_mut().map_resources(&device);
        assert_eq!(ring.oldest_mut().state(), CpuContextState::Mapped);
        ring.oldest_mut().propagate_all(2, 1);
        ring.oldest_mut().upload(&queue, &grids);
        assert_eq!(ring.oldest_mut().state(), CpuContextState::Idle);
    }

    #[test]
    fn test_reset_after_map_leaves_context_reusable() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let grids = [CascadeGrids::new(&device, 8, 0)];
        let mut ring = CpuPropagation::new(&device, 8, 1, 2).unwrap();
        let ctx = ring.current_mut();

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        ctx.record_capture(&mut encoder, &grids, 8);
        queue.submit([encoder.finish()]);
        ctx.map_resources(&device);
        assert_eq!(ctx.state(), CpuContextState::Mapped);

        // Reset must unmap so the staging buffers are valid copy targets
        // for the next capture.
        ctx.reset();
        assert_eq!(ctx.state(), CpuContextState::Idle);

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        ctx.record_capture(&mut encoder, &grids, 8);
        queue.submit([encoder.finish()]);
        ctx.map_resources(&device);
        ctx.propagate_all(1, 1);
        ctx.upload(&queue, &grids);
        assert_eq!(ctx.state(), CpuContextState::Idle);
    }

    #[test]
    fn test_capture_map_propagate_upload_cycle() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let grids = [CascadeGrids::new(&device, 8, 0)];
        let mut ring = CpuPropagation::new(&device, 8, 1, 2).unwrap();

        let ctx = ring.current_mut();
        assert_eq!(ctx.state(), CpuContextState::Idle);

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        ctx.record_capture(&mut encoder, &grids, 8);
        assert_eq!(ctx.state(), CpuContextState::CaptureInFlight);
        queue.submit([encoder.finish()]);

        ctx.map_resources(&device);
        assert_eq!(ctx.state(), CpuContextState::Mapped);

        ctx.propagate_all(2, 1);
        assert_eq!(ctx.state(), CpuContextState::Propagated);

        ctx.upload(&queue, &grids);
        assert_eq!(ctx.state(), CpuContextState::Idle);
    }

    #[test]
    fn test_out_of_order_calls_do_not_advance_state() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let grids = [CascadeGrids::new(&device, 8, 0)];
        let mut ring = CpuPropagation::new(&device, 8, 1, 2).unwrap();
        let ctx = ring.current_mut();

        // Map and propagate before any capture are inert.
        ctx.map_resources(&device);
        assert_eq!(ctx.state(), CpuContextState::Idle);
        ctx.propagate_all(1, 1);
        assert_eq!(ctx.state(), CpuContextState::Idle);
        ctx.upload(&queue, &grids);
        assert_eq!(ctx.state(), CpuContextState::Idle);
    }
}
