// SPDX-License-Identifier: CEPL-1.0
//! Per-slot fence bookkeeping.
//!
//! Every buffered frame slot owns one timeline fence. A slot is `Idle` until
//! its first submission, `Submitted` while the GPU may still be using its
//! resources, and `Retired` once the fence has reached the slot's last target.
//! Targets only grow.

use std::marker::PhantomData;

use tessera_core::RenderError;
use tracing::{debug, trace};

/// A GPU fence exposing a monotonically increasing completion counter.
pub trait TimelineFence {
    fn completed_value(&self) -> Result<u64, RenderError>;

    /// Blocks until the counter reaches `value`. No timeout.
    fn wait_for(&self, value: u64) -> Result<(), RenderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Submitted { target: u64 },
    Retired { value: u64 },
}

struct FenceSlot<F> {
    fence: F,
    last_target: u64,
    state: SlotState,
}

/// Proof that a slot was retired. Constant writes take one of these, and the
/// borrow it holds keeps the slot from being resubmitted while it lives.
#[derive(Debug)]
pub struct RetiredSlot<'a> {
    index: usize,
    _sync: PhantomData<&'a ()>,
}

impl RetiredSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

pub struct FrameSync<F> {
    slots: Vec<FenceSlot<F>>,
}

impl<F: TimelineFence> FrameSync<F> {
    pub fn new(fences: Vec<F>) -> Self {
        let slots = fences
            .into_iter()
            .map(|fence| FenceSlot {
                fence,
                last_target: 0,
                state: SlotState::Idle,
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.slots[slot].state
    }

    pub fn fence(&self, slot: usize) -> &F {
        &self.slots[slot].fence
    }

    /// Value the next submission for `slot` must signal.
    pub fn next_target(&self, slot: usize) -> u64 {
        self.slots[slot].last_target + 1
    }

    /// Non-blocking refresh of a submitted slot.
    pub fn poll(&mut self, slot: usize) -> Result<SlotState, RenderError> {
        let s = &mut self.slots[slot];
        if let SlotState::Submitted { target } = s.state {
            let completed = s.fence.completed_value()?;
            if completed >= target {
                s.state = SlotState::Retired { value: completed };
            }
        }
        Ok(s.state)
    }

    /// Blocks until `slot` has no outstanding GPU work.
    pub fn wait_retired(&mut self, slot: usize) -> Result<RetiredSlot<'_>, RenderError> {
        let s = &mut self.slots[slot];
        if let SlotState::Submitted { target } = s.state {
            let completed = s.fence.completed_value()?;
            if completed < target {
                trace!(slot, completed, target, "waiting for frame slot");
                s.fence.wait_for(target)?;
            }
            s.state = SlotState::Retired {
                value: completed.max(target),
            };
        }
        Ok(RetiredSlot {
            index: slot,
            _sync: PhantomData,
        })
    }

    /// Records that a submission signalling [`next_target`](Self::next_target)
    /// was queued for `slot`, and returns that target.
    pub fn mark_submitted(&mut self, slot: usize) -> Result<u64, RenderError> {
        let s = &mut self.slots[slot];
        if let SlotState::Submitted { target } = s.state {
            return Err(RenderError::SlotInFlight { slot, target });
        }
        s.last_target += 1;
        s.state = SlotState::Submitted {
            target: s.last_target,
        };
        Ok(s.last_target)
    }

    /// Waits for every slot. Calling it again once drained does no waiting.
    pub fn drain(&mut self) -> Result<(), RenderError> {
        for slot in 0..self.slots.len() {
            if matches!(self.slots[slot].state, SlotState::Submitted { .. }) {
                debug!(slot, "draining frame slot");
                self.wait_retired(slot)?;
            }
        }
        Ok(())
    }

    pub fn all_idle(&self) -> bool {
        self.slots
            .iter()
            .all(|s| !matches!(s.state, SlotState::Submitted { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct CountingFence {
        completed: Cell<u64>,
        waits: RefCell<Vec<u64>>,
    }

    impl TimelineFence for CountingFence {
        fn completed_value(&self) -> Result<u64, RenderError> {
            Ok(self.completed.get())
        }

        fn wait_for(&self, value: u64) -> Result<(), RenderError> {
            self.waits.borrow_mut().push(value);
            self.completed.set(self.completed.get().max(value));
            Ok(())
        }
    }

    fn sync(n: usize) -> FrameSync<CountingFence> {
        FrameSync::new((0..n).map(|_| CountingFence::default()).collect())
    }

    #[test]
    fn slot_walks_idle_submitted_retired() {
        let mut s = sync(2);
        assert_eq!(s.state(0), SlotState::Idle);
        assert_eq!(s.next_target(0), 1);
        assert_eq!(s.mark_submitted(0).unwrap(), 1);
        assert_eq!(s.state(0), SlotState::Submitted { target: 1 });

        assert_eq!(s.poll(0).unwrap(), SlotState::Submitted { target: 1 });
        s.fence(0).completed.set(1);
        assert_eq!(s.poll(0).unwrap(), SlotState::Retired { value: 1 });
        assert_eq!(s.state(1), SlotState::Idle);
    }

    #[test]
    fn resubmitting_in_flight_slot_is_rejected() {
        let mut s = sync(1);
        s.mark_submitted(0).unwrap();
        let err = s.mark_submitted(0).unwrap_err();
        assert!(matches!(err, RenderError::SlotInFlight { slot: 0, target: 1 }));
    }

    #[test]
    fn wait_skips_blocking_when_already_complete() {
        let mut s = sync(1);
        s.mark_submitted(0).unwrap();
        s.fence(0).completed.set(5);
        let token = s.wait_retired(0).unwrap();
        assert_eq!(token.index(), 0);
        assert!(s.fence(0).waits.borrow().is_empty());
        assert_eq!(s.state(0), SlotState::Retired { value: 5 });
    }

    #[test]
    fn targets_strictly_increase() {
        let mut s = sync(3);
        let mut seen = vec![Vec::new(); 3];
        for frame in 0..30 {
            let slot = frame % 3;
            s.wait_retired(slot).unwrap();
            seen[slot].push(s.mark_submitted(slot).unwrap());
        }
        for targets in seen {
            assert!(targets.windows(2).all(|w| w[0] < w[1]), "{targets:?}");
        }
    }

    #[test]
    fn drain_is_idempotent() {
        let mut s = sync(3);
        for slot in 0..3 {
            s.mark_submitted(slot).unwrap();
        }
        s.drain().unwrap();
        assert!(s.all_idle());
        let waits: usize = (0..3).map(|i| s.fence(i).waits.borrow().len()).sum();
        assert_eq!(waits, 3);

        s.drain().unwrap();
        let again: usize = (0..3).map(|i| s.fence(i).waits.borrow().len()).sum();
        assert_eq!(again, 3);
    }
}
