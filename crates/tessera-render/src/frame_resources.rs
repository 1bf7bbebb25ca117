// SPDX-License-Identifier: CEPL-1.0
//! Per-slot constant upload buffers.

use tessera_core::RenderError;

use crate::sync::RetiredSlot;

/// Constant views must start on this boundary.
pub const CONSTANT_ALIGNMENT: usize = 256;

pub const fn aligned_size(payload: usize) -> usize {
    (payload + CONSTANT_ALIGNMENT - 1) & !(CONSTANT_ALIGNMENT - 1)
}

/// CPU-writable view of a persistently mapped upload buffer.
pub trait UploadMemory {
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl UploadMemory for Vec<u8> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

/// One upload buffer per frame slot, each holding `object_count` aligned
/// constant entries.
pub struct FrameResourcePool<M> {
    buffers: Vec<M>,
    object_count: usize,
    stride: usize,
}

impl<M: UploadMemory> FrameResourcePool<M> {
    /// `alloc(slot, bytes)` creates the mapped buffer for one slot.
    pub fn create<A>(
        slot_count: usize,
        object_count: usize,
        payload_size: usize,
        mut alloc: A,
    ) -> Result<Self, RenderError>
    where
        A: FnMut(usize, usize) -> Result<M, RenderError>,
    {
        let stride = aligned_size(payload_size);
        let bytes = stride * object_count;
        let buffers = (0..slot_count)
            .map(|slot| alloc(slot, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            buffers,
            object_count,
            stride,
        })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn slot_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn buffer(&self, slot: usize) -> &M {
        &self.buffers[slot]
    }

    /// Copies `payload` into `object`'s entry of a retired slot.
    pub fn write(&mut self, slot: &RetiredSlot<'_>, object: usize, payload: &[u8]) {
        assert!(
            object < self.object_count,
            "object {object} out of range (object count {})",
            self.object_count
        );
        assert!(
            payload.len() <= self.stride,
            "payload of {} bytes exceeds entry size {}",
            payload.len(),
            self.stride
        );
        let offset = object * self.stride;
        let bytes = self.buffers[slot.index()].bytes_mut();
        bytes[offset..offset + payload.len()].copy_from_slice(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{FrameSync, TimelineFence};

    struct Done;

    impl TimelineFence for Done {
        fn completed_value(&self) -> Result<u64, RenderError> {
            Ok(u64::MAX)
        }
        fn wait_for(&self, _: u64) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn pool(objects: usize, payload: usize) -> FrameResourcePool<Vec<u8>> {
        FrameResourcePool::create(2, objects, payload, |_, bytes| Ok(vec![0u8; bytes])).unwrap()
    }

    #[test]
    fn alignment_rounds_up_to_256() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 256);
        assert_eq!(aligned_size(64), 256);
        assert_eq!(aligned_size(256), 256);
        assert_eq!(aligned_size(257), 512);
    }

    #[test]
    fn buffers_are_sized_per_object() {
        let p = pool(3, 64);
        assert_eq!(p.stride(), 256);
        assert_eq!(p.slot_count(), 2);
        assert_eq!(p.buffer(1).len(), 768);
    }

    #[test]
    fn write_lands_at_object_offset() {
        let mut sync = FrameSync::new(vec![Done, Done]);
        let mut p = pool(3, 4);
        let slot = sync.wait_retired(1).unwrap();
        p.write(&slot, 2, &[1, 2, 3, 4]);
        assert_eq!(&p.buffer(1)[512..516], &[1, 2, 3, 4]);
        assert!(p.buffer(0).iter().all(|b| *b == 0));
    }

    #[test]
    #[should_panic(expected = "exceeds entry size")]
    fn oversized_payload_panics() {
        let mut sync = FrameSync::new(vec![Done]);
        let mut p = pool(1, 4);
        let slot = sync.wait_retired(0).unwrap();
        p.write(&slot, 0, &[0u8; 300]);
    }

    #[test]
    fn allocation_failure_propagates() {
        let r = FrameResourcePool::<Vec<u8>>::create(3, 1, 64, |slot, _| {
            if slot == 2 {
                Err(RenderError::creation(tessera_core::Stage::Memory, "out of host memory"))
            } else {
                Ok(Vec::new())
            }
        });
        assert!(r.is_err());
    }
}
