// SPDX-License-Identifier: CEPL-1.0
//! Frame loop controller: acquire, wait, update, record, submit, present.

use tessera_core::RenderError;
use tessera_math::{Mat4, ObjectTransform, Projection, SPIN_PER_TICK};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{DrawItem, FrameBackend, FrameCommands};
use crate::descriptors::DescriptorLayout;
use crate::frame_resources::FrameResourcePool;
use crate::pipeline::ObjectConstants;
use crate::sync::{FrameSync, RetiredSlot};
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
}

/// Everything a backend hands over to drive frames.
pub struct FrameParts<B: FrameBackend> {
    pub backend: B,
    pub fences: Vec<B::Fence>,
    pub uploads: FrameResourcePool<B::Upload>,
    pub layout: DescriptorLayout,
}

pub struct FrameLoop<B: FrameBackend> {
    // Field order is drop order: slot memory and fences go before the backend
    // that owns the device.
    objects: Vec<ObjectTransform>,
    resources: FrameResourcePool<B::Upload>,
    sync: FrameSync<B::Fence>,
    backend: B,
    layout: DescriptorLayout,
    draws: Vec<DrawItem>,
    projection: Projection,
    clear_color: [f32; 4],
    state: LoopState,
    stop_requested: bool,
    paused: bool,
    drained: bool,
    ticks: u64,
}

fn write_constants<M: crate::UploadMemory>(
    resources: &mut FrameResourcePool<M>,
    slot: &RetiredSlot<'_>,
    objects: &mut [ObjectTransform],
    view: Mat4,
    projection: Mat4,
) {
    for (i, obj) in objects.iter_mut().enumerate() {
        obj.spin(SPIN_PER_TICK);
        let wvp = obj.world_view_projection(view, projection);
        resources.write(slot, i, ObjectConstants::from_wvp(wvp).as_bytes());
    }
}

impl<B: FrameBackend> FrameLoop<B> {
    pub fn new(
        parts: FrameParts<B>,
        objects: Vec<ObjectTransform>,
        clear_color: [f32; 4],
    ) -> Result<Self, RenderError> {
        let FrameParts {
            backend,
            fences,
            uploads,
            layout,
        } = parts;
        if fences.len() != layout.buffer_count || uploads.slot_count() != layout.buffer_count {
            return Err(RenderError::creation(
                tessera_core::Stage::Fence,
                format!(
                    "slot count mismatch: {} fences, {} upload buffers, {} buffers",
                    fences.len(),
                    uploads.slot_count(),
                    layout.buffer_count
                ),
            ));
        }
        if objects.is_empty() || layout.object_count == 0 {
            return Err(RenderError::creation(
                tessera_core::Stage::DescriptorHeap,
                "scene has no objects",
            ));
        }
        if objects.len() != layout.object_count || uploads.object_count() != layout.object_count {
            return Err(RenderError::creation(
                tessera_core::Stage::DescriptorHeap,
                format!(
                    "object count mismatch: {} objects, {} described",
                    objects.len(),
                    layout.object_count
                ),
            ));
        }
        let size = backend.surface_size();
        info!(
            slots = layout.buffer_count,
            objects = objects.len(),
            "frame loop ready"
        );
        Ok(Self {
            objects,
            resources: uploads,
            sync: FrameSync::new(fences),
            backend,
            layout,
            draws: Vec::with_capacity(layout.object_count),
            projection: Projection::new(size.width.max(1), size.height.max(1)),
            clear_color,
            state: LoopState::Running,
            stop_requested: false,
            paused: size.is_empty(),
            drained: true,
            ticks: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resources(&self) -> &FrameResourcePool<B::Upload> {
        &self.resources
    }

    pub fn sync(&self) -> &FrameSync<B::Fence> {
        &self.sync
    }

    pub fn objects(&self) -> &[ObjectTransform] {
        &self.objects
    }

    pub fn projection(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// True while the surface is zero-sized; `tick` does no GPU work.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Asks the loop to stop at the start of the next tick.
    pub fn request_shutdown(&mut self) {
        self.stop_requested = true;
    }

    /// Runs one frame. Returns the state after the tick; errors are fatal
    /// and leave the loop in `ShuttingDown`.
    pub fn tick(&mut self, view: Mat4) -> Result<LoopState, RenderError> {
        if self.state == LoopState::ShuttingDown {
            return Ok(LoopState::ShuttingDown);
        }
        if self.stop_requested {
            debug!("stop requested; leaving frame loop");
            self.state = LoopState::ShuttingDown;
            return Ok(self.state);
        }
        if self.paused {
            return Ok(self.state);
        }

        let slot = match self.backend.acquire() {
            Ok(slot) => slot,
            Err(e) if !e.is_fatal() => {
                warn!("acquire: {e}; rebuilding swapchain");
                let size = self.backend.surface_size();
                self.resize(size)?;
                return Ok(self.state);
            }
            Err(e) => return Err(self.fail(e)),
        };
        if slot >= self.layout.buffer_count {
            let e = RenderError::creation(
                tessera_core::Stage::Swapchain,
                format!("acquired image {slot} outside {} slots", self.layout.buffer_count),
            );
            return Err(self.fail(e));
        }

        let projection = self.projection.matrix();
        match self.sync.wait_retired(slot) {
            Ok(retired) => {
                write_constants(&mut self.resources, &retired, &mut self.objects, view, projection)
            }
            Err(e) => return Err(self.fail(e)),
        }

        self.draws.clear();
        for object in 0..self.objects.len() {
            self.draws.push(DrawItem {
                object,
                cbv_index: self.layout.cbv_index(slot, object),
            });
        }
        let commands = FrameCommands {
            clear_color: self.clear_color,
            draws: &self.draws,
        };
        if let Err(e) = self.backend.record(slot, &commands) {
            error!(stage = %e.stage(), "{e}; stopping after this frame");
            self.stop_requested = true;
            return Ok(self.state);
        }

        let target = self.sync.next_target(slot);
        if let Err(e) = self.backend.submit(slot, self.sync.fence(slot), target) {
            return Err(self.fail(e));
        }
        self.drained = false;
        if let Err(e) = self.sync.mark_submitted(slot) {
            return Err(self.fail(e));
        }
        trace!(slot, target, "frame submitted");

        match self.backend.present(slot) {
            Ok(()) => {}
            Err(RenderError::DeviceLost) => {
                error!(stage = "present", "device lost");
                self.state = LoopState::ShuttingDown;
                // Nothing will signal again; shutdown must not wait.
                self.drained = true;
                return Err(RenderError::DeviceLost);
            }
            Err(e) if !e.is_fatal() => {
                warn!("present: {e}; rebuilding swapchain");
                let size = self.backend.surface_size();
                self.resize(size)?;
            }
            Err(e) => return Err(self.fail(e)),
        }
        self.ticks += 1;
        Ok(self.state)
    }

    fn fail(&mut self, e: RenderError) -> RenderError {
        error!(stage = %e.stage(), "{e}");
        self.state = LoopState::ShuttingDown;
        e
    }

    /// Drains every slot and rebuilds surface resources at `size`. A zero
    /// size pauses rendering until the next non-empty resize.
    pub fn resize(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if self.state == LoopState::ShuttingDown {
            return Ok(());
        }
        if size.is_empty() {
            debug!("surface minimized; pausing");
            self.paused = true;
            return Ok(());
        }
        self.drain()?;
        if let Err(e) = self.backend.rebuild_surface(size) {
            return Err(self.fail(e));
        }
        // The surface may clamp the requested extent.
        let actual = self.backend.surface_size();
        self.projection.set_size(actual.width, actual.height);
        self.paused = false;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), RenderError> {
        if self.drained {
            return Ok(());
        }
        match self.sync.drain() {
            Ok(()) => {
                self.drained = true;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Moves to `ShuttingDown` and waits for every slot. Safe to call more
    /// than once.
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        self.state = LoopState::ShuttingDown;
        if self.drained {
            return Ok(());
        }
        self.sync.drain()?;
        self.drained = true;
        info!(ticks = self.ticks, "frame loop drained");
        Ok(())
    }
}

impl<B: FrameBackend> Drop for FrameLoop<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("drain on drop failed: {e}");
        }
    }
}
