// SPDX-License-Identifier: CEPL-1.0
//! Drives `FrameLoop` against a scripted GPU that records every call and
//! flags any CPU write into memory the GPU may still be reading.

use std::cell::RefCell;
use std::rc::Rc;

use tessera_math::{Camera, Mat4, ObjectTransform, Vec3, Vec4};
use tessera_render::{
    DescriptorLayout, DrawItem, FrameBackend, FrameCommands, FrameLoop, FrameParts,
    FrameResourcePool, LoopState, ObjectConstants, RenderError, RenderSize, Stage,
    TimelineFence, UploadMemory,
};

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Acquire(usize),
    Record { slot: usize, draws: Vec<DrawItem> },
    Submit { slot: usize, signal: u64 },
    Present(usize),
    Wait { slot: usize, value: u64 },
    Rebuild(RenderSize),
}

#[derive(Default)]
struct GpuState {
    completed: Vec<u64>,
    signaled: Vec<u64>,
    calls: Vec<Call>,
    violations: Vec<String>,
    acquire_fault: Option<Fault>,
    present_fault: Option<Fault>,
}

type Gpu = Rc<RefCell<GpuState>>;

struct FakeFence {
    slot: usize,
    gpu: Gpu,
}

impl TimelineFence for FakeFence {
    fn completed_value(&self) -> Result<u64, RenderError> {
        Ok(self.gpu.borrow().completed[self.slot])
    }

    fn wait_for(&self, value: u64) -> Result<(), RenderError> {
        let mut g = self.gpu.borrow_mut();
        g.calls.push(Call::Wait {
            slot: self.slot,
            value,
        });
        if g.signaled[self.slot] < value {
            let msg = format!("slot {} waits for {value} that was never submitted", self.slot);
            g.violations.push(msg);
        }
        // The GPU finishes the work as soon as someone waits on it.
        g.completed[self.slot] = g.completed[self.slot].max(value);
        Ok(())
    }
}

struct FakeMemory {
    slot: usize,
    gpu: Gpu,
    bytes: Vec<u8>,
}

impl UploadMemory for FakeMemory {
    fn bytes_mut(&mut self) -> &mut [u8] {
        let mut g = self.gpu.borrow_mut();
        if g.completed[self.slot] < g.signaled[self.slot] {
            let msg = format!("cpu write into slot {} while in flight", self.slot);
            g.violations.push(msg);
        }
        &mut self.bytes
    }
}

/// A one-shot failure injected into acquire or present.
#[derive(Clone, Copy, Debug)]
enum Fault {
    OutOfDate,
    Rejected,
    Lost,
}

impl Fault {
    fn error(self) -> RenderError {
        match self {
            Fault::OutOfDate => RenderError::PresentFailed {
                reason: "ERROR_OUT_OF_DATE_KHR".into(),
                recoverable: true,
            },
            Fault::Rejected => RenderError::PresentFailed {
                reason: "ERROR_SURFACE_LOST_KHR".into(),
                recoverable: false,
            },
            Fault::Lost => RenderError::DeviceLost,
        }
    }
}

struct FakeBackend {
    gpu: Gpu,
    slots: usize,
    next: usize,
    size: RenderSize,
    fail_record: bool,
}

impl FrameBackend for FakeBackend {
    type Fence = FakeFence;
    type Upload = FakeMemory;

    fn acquire(&mut self) -> Result<usize, RenderError> {
        let slot = self.next;
        self.next = (self.next + 1) % self.slots;
        let mut g = self.gpu.borrow_mut();
        g.calls.push(Call::Acquire(slot));
        if let Some(fault) = g.acquire_fault.take() {
            return Err(fault.error());
        }
        Ok(slot)
    }

    fn record(&mut self, slot: usize, commands: &FrameCommands<'_>) -> Result<(), RenderError> {
        self.gpu.borrow_mut().calls.push(Call::Record {
            slot,
            draws: commands.draws.to_vec(),
        });
        if self.fail_record {
            return Err(RenderError::CommandRecording {
                reason: "ERROR_OUT_OF_DEVICE_MEMORY".into(),
            });
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, fence: &FakeFence, signal: u64) -> Result<(), RenderError> {
        let mut g = self.gpu.borrow_mut();
        if fence.slot != slot {
            g.violations.push(format!("slot {slot} submitted with fence {}", fence.slot));
        }
        if signal <= g.signaled[slot] {
            let msg = format!("slot {slot} target {signal} not above {}", g.signaled[slot]);
            g.violations.push(msg);
        }
        g.signaled[slot] = signal;
        g.calls.push(Call::Submit { slot, signal });
        Ok(())
    }

    fn present(&mut self, slot: usize) -> Result<(), RenderError> {
        let mut g = self.gpu.borrow_mut();
        g.calls.push(Call::Present(slot));
        if let Some(fault) = g.present_fault.take() {
            return Err(fault.error());
        }
        Ok(())
    }

    fn rebuild_surface(&mut self, size: RenderSize) -> Result<(), RenderError> {
        self.size = size;
        self.gpu.borrow_mut().calls.push(Call::Rebuild(size));
        Ok(())
    }

    fn surface_size(&self) -> RenderSize {
        self.size
    }
}

const SIZE: RenderSize = RenderSize {
    width: 800,
    height: 600,
};
const CLEAR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

fn parts(gpu: &Gpu, slots: usize, objects: usize) -> FrameParts<FakeBackend> {
    {
        let mut g = gpu.borrow_mut();
        g.completed = vec![0; slots];
        g.signaled = vec![0; slots];
    }
    let fences = (0..slots)
        .map(|slot| FakeFence {
            slot,
            gpu: gpu.clone(),
        })
        .collect();
    let payload = std::mem::size_of::<ObjectConstants>();
    let uploads = FrameResourcePool::create(slots, objects, payload, |slot, bytes| {
        Ok(FakeMemory {
            slot,
            gpu: gpu.clone(),
            bytes: vec![0; bytes],
        })
    })
    .unwrap();
    FrameParts {
        backend: FakeBackend {
            gpu: gpu.clone(),
            slots,
            next: 0,
            size: SIZE,
            fail_record: false,
        },
        fences,
        uploads,
        layout: DescriptorLayout::new(slots, objects, 2),
    }
}

fn frame_loop(slots: usize, objects: usize) -> (Gpu, FrameLoop<FakeBackend>) {
    let gpu = Gpu::default();
    let transforms = (0..objects)
        .map(|i| ObjectTransform::new(Vec3::new(i as f32, 0.0, 0.0)))
        .collect();
    let fl = FrameLoop::new(parts(&gpu, slots, objects), transforms, CLEAR).unwrap();
    (gpu, fl)
}

fn default_view() -> Mat4 {
    Camera::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z, Vec3::Y).view()
}

fn waits(gpu: &Gpu) -> usize {
    gpu.borrow()
        .calls
        .iter()
        .filter(|c| matches!(c, Call::Wait { .. }))
        .count()
}

#[test]
fn targets_strictly_increase_per_slot() {
    let (gpu, mut fl) = frame_loop(3, 1);
    for _ in 0..30 {
        assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    }
    let g = gpu.borrow();
    assert!(g.violations.is_empty(), "{:?}", g.violations);
    for slot in 0..3 {
        let targets: Vec<u64> = g
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit { slot: s, signal } if *s == slot => Some(*signal),
                _ => None,
            })
            .collect();
        assert_eq!(targets, (1..=10).collect::<Vec<_>>());
    }
    assert_eq!(fl.ticks(), 30);
}

#[test]
fn constants_are_never_written_while_submitted() {
    let (gpu, mut fl) = frame_loop(2, 3);
    for _ in 0..12 {
        fl.tick(default_view()).unwrap();
    }
    let g = gpu.borrow();
    assert!(g.violations.is_empty(), "{:?}", g.violations);
    // Every reuse of a slot had to wait for its previous frame.
    let wait_count = g.calls.iter().filter(|c| matches!(c, Call::Wait { .. })).count();
    assert_eq!(wait_count, 10);
}

#[test]
fn wait_precedes_write_and_submit_precedes_present() {
    let (gpu, mut fl) = frame_loop(2, 1);
    for _ in 0..3 {
        fl.tick(default_view()).unwrap();
    }
    let g = gpu.borrow();
    let third = &g.calls[g.calls.len() - 5..];
    assert_eq!(third[0], Call::Acquire(0));
    assert_eq!(third[1], Call::Wait { slot: 0, value: 1 });
    assert!(matches!(third[2], Call::Record { slot: 0, .. }));
    assert_eq!(third[3], Call::Submit { slot: 0, signal: 2 });
    assert_eq!(third[4], Call::Present(0));
}

#[test]
fn uploaded_matrix_reads_back_as_wvp() {
    let (_gpu, mut fl) = frame_loop(3, 2);
    let view = default_view();
    fl.tick(view).unwrap();

    let stride = fl.resources().stride();
    for (i, obj) in fl.objects().iter().enumerate() {
        let raw = &fl.resources().buffer(0).bytes[i * stride..i * stride + 64];
        let stored: ObjectConstants = bytemuck::pod_read_unaligned(raw);
        let read = Mat4::from_cols_array_2d(&stored.wvp).transpose();
        let expected = obj.world_view_projection(view, fl.projection());
        assert!(read.abs_diff_eq(expected, 1e-6), "object {i}");
    }
}

#[test]
fn default_camera_sees_origin_cube_at_screen_centre() {
    let (_gpu, mut fl) = frame_loop(2, 1);
    fl.tick(default_view()).unwrap();
    let raw = &fl.resources().buffer(0).bytes[..64];
    let stored: ObjectConstants = bytemuck::pod_read_unaligned(raw);
    let wvp = Mat4::from_cols_array_2d(&stored.wvp).transpose();
    let clip = wvp * Vec4::new(0.0, 0.0, 0.0, 1.0);
    let ndc = clip.truncate() / clip.w;
    assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    assert!(ndc.z > 0.0 && ndc.z < 1.0);
}

#[test]
fn draws_use_per_frame_constant_views() {
    let (gpu, mut fl) = frame_loop(3, 2);
    for _ in 0..3 {
        fl.tick(default_view()).unwrap();
    }
    let g = gpu.borrow();
    let indices: Vec<Vec<usize>> = g
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Record { draws, .. } => Some(draws.iter().map(|d| d.cbv_index).collect()),
            _ => None,
        })
        .collect();
    assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
}

#[test]
fn shutdown_drains_once() {
    let (gpu, mut fl) = frame_loop(3, 1);
    for _ in 0..5 {
        fl.tick(default_view()).unwrap();
    }
    let before = waits(&gpu);
    fl.shutdown().unwrap();
    assert!(fl.sync().all_idle());
    let drained = waits(&gpu);
    assert_eq!(drained - before, 3);

    fl.shutdown().unwrap();
    assert_eq!(waits(&gpu), drained);
    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::ShuttingDown);
    drop(fl);
    assert_eq!(waits(&gpu), drained);
}

#[test]
fn device_lost_on_present_stops_gpu_calls() {
    let (gpu, mut fl) = frame_loop(3, 1);
    gpu.borrow_mut().present_fault = Some(Fault::Lost);

    let err = fl.tick(default_view()).unwrap_err();
    assert!(matches!(err, RenderError::DeviceLost));
    assert_eq!(fl.state(), LoopState::ShuttingDown);
    let calls = gpu.borrow().calls.clone();
    assert_eq!(calls.last(), Some(&Call::Present(0)));

    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::ShuttingDown);
    fl.shutdown().unwrap();
    drop(fl);
    assert_eq!(gpu.borrow().calls, calls);
}

#[test]
fn recording_failure_skips_submit_and_stops_next_tick() {
    let gpu = Gpu::default();
    let mut p = parts(&gpu, 2, 1);
    p.backend.fail_record = true;
    let mut fl = FrameLoop::new(p, vec![ObjectTransform::new(Vec3::ZERO)], CLEAR).unwrap();

    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    let calls = gpu.borrow().calls.clone();
    assert!(!calls.iter().any(|c| matches!(c, Call::Submit { .. })));
    assert!(!calls.iter().any(|c| matches!(c, Call::Present(_))));

    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::ShuttingDown);
    assert_eq!(gpu.borrow().calls.len(), calls.len());
}

#[test]
fn zero_size_pauses_and_resize_rebuilds() {
    let (gpu, mut fl) = frame_loop(2, 1);
    fl.tick(default_view()).unwrap();
    assert!(!fl.is_paused());
    fl.resize(RenderSize {
        width: 0,
        height: 600,
    })
    .unwrap();
    assert!(fl.is_paused());
    let calls = gpu.borrow().calls.len();
    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    assert_eq!(gpu.borrow().calls.len(), calls);
    assert_eq!(fl.ticks(), 1);

    let size = RenderSize {
        width: 1024,
        height: 768,
    };
    fl.resize(size).unwrap();
    assert!(!fl.is_paused());
    {
        let g = gpu.borrow();
        assert_eq!(g.calls[calls], Call::Wait { slot: 0, value: 1 });
        assert_eq!(g.calls.last(), Some(&Call::Rebuild(size)));
    }
    fl.tick(default_view()).unwrap();
    assert!(matches!(gpu.borrow().calls.last(), Some(Call::Present(_))));
}

#[test]
fn mismatched_parts_are_rejected() {
    let gpu = Gpu::default();
    let p = parts(&gpu, 3, 2);
    let objects = vec![ObjectTransform::new(Vec3::ZERO)];
    assert!(FrameLoop::new(p, objects, CLEAR).is_err());
}

fn rebuild_tail(slots: usize) -> Vec<Call> {
    let mut tail: Vec<Call> = (0..slots).map(|slot| Call::Wait { slot, value: 1 }).collect();
    tail.push(Call::Rebuild(SIZE));
    tail
}

#[test]
fn out_of_date_acquire_drains_and_rebuilds() {
    let (gpu, mut fl) = frame_loop(3, 1);
    for _ in 0..3 {
        fl.tick(default_view()).unwrap();
    }
    gpu.borrow_mut().acquire_fault = Some(Fault::OutOfDate);
    let start = gpu.borrow().calls.len();
    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    {
        let g = gpu.borrow();
        assert_eq!(g.calls[start], Call::Acquire(0));
        assert_eq!(g.calls[start + 1..], rebuild_tail(3)[..]);
        assert!(g.violations.is_empty(), "{:?}", g.violations);
    }
    assert!(fl.sync().all_idle());
    assert_eq!(fl.ticks(), 3);

    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    assert!(matches!(gpu.borrow().calls.last(), Some(Call::Present(1))));
}

#[test]
fn out_of_date_present_drains_and_rebuilds() {
    let (gpu, mut fl) = frame_loop(2, 1);
    gpu.borrow_mut().present_fault = Some(Fault::OutOfDate);

    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    {
        let g = gpu.borrow();
        let n = g.calls.len();
        let tail = [
            Call::Present(0),
            Call::Wait { slot: 0, value: 1 },
            Call::Rebuild(SIZE),
        ];
        assert_eq!(g.calls[n - 3..], tail);
        assert!(g.violations.is_empty(), "{:?}", g.violations);
    }
    assert!(fl.sync().all_idle());
    assert_eq!(fl.state(), LoopState::Running);

    for _ in 0..4 {
        assert_eq!(fl.tick(default_view()).unwrap(), LoopState::Running);
    }
    assert!(gpu.borrow().violations.is_empty());
}

#[test]
fn rejected_present_stops_the_loop() {
    let (gpu, mut fl) = frame_loop(2, 1);
    gpu.borrow_mut().present_fault = Some(Fault::Rejected);

    let err = fl.tick(default_view()).unwrap_err();
    assert!(matches!(err, RenderError::PresentFailed { recoverable: false, .. }));
    assert_eq!(fl.state(), LoopState::ShuttingDown);
    assert!(!gpu.borrow().calls.iter().any(|c| matches!(c, Call::Rebuild(_))));

    let calls = gpu.borrow().calls.len();
    assert_eq!(fl.tick(default_view()).unwrap(), LoopState::ShuttingDown);
    assert_eq!(gpu.borrow().calls.len(), calls);
    // The submitted frame is still waited for on shutdown.
    fl.shutdown().unwrap();
    assert!(fl.sync().all_idle());
}

#[test]
fn rejected_acquire_stops_the_loop() {
    let (gpu, mut fl) = frame_loop(2, 1);
    gpu.borrow_mut().acquire_fault = Some(Fault::Rejected);

    assert!(fl.tick(default_view()).is_err());
    assert_eq!(fl.state(), LoopState::ShuttingDown);
    assert_eq!(gpu.borrow().calls, vec![Call::Acquire(0)]);
}

#[test]
fn empty_scene_is_rejected() {
    let gpu = Gpu::default();
    let err = FrameLoop::new(parts(&gpu, 2, 0), Vec::new(), CLEAR).err().unwrap();
    assert_eq!(err.stage(), Stage::DescriptorHeap);
    assert!(gpu.borrow().calls.is_empty());
}
