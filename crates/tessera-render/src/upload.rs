// SPDX-License-Identifier: CEPL-1.0
//! One-time upload of static assets through staging memory.

use tessera_core::RenderError;
use tracing::{debug, trace, warn};

use crate::sync::TimelineFence;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadTarget {
    VertexBuffer,
    IndexBuffer,
    /// Shader-readable image.
    Texture,
}

struct Staged<S> {
    label: String,
    target: UploadTarget,
    bytes: usize,
    // Held only to keep the allocation alive.
    _staging: S,
}

/// Staging allocations for one initial upload submission. They stay alive
/// until the submission's fence value is observed; dropping them earlier
/// would free memory the copy engine is still reading.
pub struct UploadBatch<S> {
    staged: Vec<Staged<S>>,
    signal: Option<u64>,
}

impl<S> Default for UploadBatch<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> UploadBatch<S> {
    pub fn new() -> Self {
        Self {
            staged: Vec::new(),
            signal: None,
        }
    }

    pub fn stage(&mut self, label: impl Into<String>, target: UploadTarget, bytes: usize, staging: S) {
        assert!(self.signal.is_none(), "upload batch already submitted");
        let label = label.into();
        debug!(%label, ?target, bytes, "staged upload");
        self.staged.push(Staged {
            label,
            target,
            bytes,
            _staging: staging,
        });
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.staged.iter().map(|s| s.bytes).sum()
    }

    /// The copy commands were submitted with a fence signal of `value`.
    pub fn mark_submitted(&mut self, value: u64) {
        self.signal = Some(value);
    }

    pub fn is_submitted(&self) -> bool {
        self.signal.is_some()
    }

    /// Frees staging memory if the upload fence has passed. Returns whether
    /// the batch is now empty.
    pub fn release_if_retired<F: TimelineFence>(&mut self, fence: &F) -> Result<bool, RenderError> {
        let Some(value) = self.signal else {
            return Ok(self.staged.is_empty());
        };
        if fence.completed_value()? >= value {
            self.release();
        }
        Ok(self.staged.is_empty())
    }

    /// Blocks on the upload fence, then frees staging memory.
    pub fn wait_and_release<F: TimelineFence>(&mut self, fence: &F) -> Result<(), RenderError> {
        if let Some(value) = self.signal {
            if fence.completed_value()? < value {
                fence.wait_for(value)?;
            }
            self.release();
        }
        Ok(())
    }

    fn release(&mut self) {
        let bytes = self.total_bytes();
        let count = self.staged.len();
        for s in &self.staged {
            trace!(label = %s.label, target = ?s.target, bytes = s.bytes, "staging freed");
        }
        self.staged.clear();
        self.signal = None;
        debug!(count, bytes, "released staging memory");
    }
}

impl<S> Drop for UploadBatch<S> {
    fn drop(&mut self) {
        if self.signal.is_some() && !self.staged.is_empty() {
            warn!(
                count = self.staged.len(),
                "upload batch dropped before its fence retired; leaking staging memory"
            );
            std::mem::forget(std::mem::take(&mut self.staged));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct ManualFence {
        completed: Cell<u64>,
        waited: Cell<bool>,
    }

    impl TimelineFence for ManualFence {
        fn completed_value(&self) -> Result<u64, RenderError> {
            Ok(self.completed.get())
        }
        fn wait_for(&self, value: u64) -> Result<(), RenderError> {
            self.waited.set(true);
            self.completed.set(value);
            Ok(())
        }
    }

    /// Staging stand-in that counts live allocations.
    struct Tracked(Rc<Cell<usize>>);

    impl Tracked {
        fn new(live: &Rc<Cell<usize>>) -> Self {
            live.set(live.get() + 1);
            Self(live.clone())
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    #[test]
    fn staging_survives_until_fence_retires() {
        let live = Rc::new(Cell::new(0));
        let fence = ManualFence::default();
        let mut batch = UploadBatch::new();
        batch.stage("cube vertices", UploadTarget::VertexBuffer, 768, Tracked::new(&live));
        batch.stage("cube indices", UploadTarget::IndexBuffer, 144, Tracked::new(&live));
        batch.stage("bricks", UploadTarget::Texture, 4096, Tracked::new(&live));
        assert_eq!(batch.total_bytes(), 768 + 144 + 4096);
        batch.mark_submitted(1);

        assert!(!batch.release_if_retired(&fence).unwrap());
        assert_eq!(live.get(), 3);

        fence.completed.set(1);
        assert!(batch.release_if_retired(&fence).unwrap());
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn wait_and_release_blocks_only_when_needed() {
        let live = Rc::new(Cell::new(0));
        let fence = ManualFence::default();
        let mut batch = UploadBatch::new();
        batch.stage("normal", UploadTarget::Texture, 16, Tracked::new(&live));
        batch.mark_submitted(1);
        batch.wait_and_release(&fence).unwrap();
        assert!(fence.waited.get());
        assert_eq!(live.get(), 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn unsubmitted_batch_frees_on_drop() {
        let live = Rc::new(Cell::new(0));
        {
            let mut batch = UploadBatch::new();
            batch.stage("v", UploadTarget::VertexBuffer, 4, Tracked::new(&live));
        }
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn in_flight_batch_leaks_on_drop() {
        let live = Rc::new(Cell::new(0));
        {
            let mut batch = UploadBatch::new();
            batch.stage("v", UploadTarget::VertexBuffer, 4, Tracked::new(&live));
            batch.mark_submitted(7);
        }
        assert_eq!(live.get(), 1);
    }
}
