//! Lifecycle-tracked storage for one stage state.

use cf_core::{Lifecycle, StageKind};
use tracing::debug;

use crate::error::{StageError, StageResult};

/// Holds one stage's state and where it sits in its lifecycle.
///
/// A slot only hands out its value while `Ready`. Freeing is a no-op on a
/// slot that never reached `Ready`, and freeing twice is harmless.
#[derive(Debug)]
pub struct StageSlot<T> {
    kind: StageKind,
    state: Lifecycle,
    value: Option<T>,
}

impl<T> StageSlot<T> {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            state: Lifecycle::Uninitialized,
            value: None,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state
    }

    pub fn begin(&mut self) {
        debug_assert_eq!(self.state, Lifecycle::Uninitialized);
        self.state = Lifecycle::Initializing;
    }

    /// Record the outcome of `init`; errors pass through unchanged.
    pub fn complete(&mut self, result: StageResult<T>) -> StageResult<()> {
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.state = Lifecycle::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = Lifecycle::Failed;
                Err(e)
            }
        }
    }

    pub fn get(&self) -> Option<&T> {
        if self.state.is_ready() {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// The ready state, or a dependency failure attributed to `by`.
    pub fn require(&self, by: StageKind) -> StageResult<&T> {
        self.get().ok_or(StageError::Dependency {
            stage: by,
            needs: self.kind,
        })
    }

    /// Release the state. Returns whether anything was released.
    pub fn free(&mut self) -> bool {
        if !self.state.is_ready() {
            return false;
        }
        self.value = None;
        self.state = Lifecycle::Freed;
        debug!(stage = %self.kind, "freed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_then_freed_once() {
        let mut slot = StageSlot::new(StageKind::Background);
        assert!(slot.require(StageKind::Thermodynamics).is_err());
        slot.begin();
        slot.complete(Ok(3_u32)).unwrap();
        assert_eq!(slot.get(), Some(&3));
        assert!(slot.free());
        assert!(!slot.free());
        assert_eq!(slot.lifecycle(), Lifecycle::Freed);
        assert!(slot.get().is_none());
    }

    #[test]
    fn failed_slot_is_not_freed() {
        let mut slot: StageSlot<u32> = StageSlot::new(StageKind::Thermodynamics);
        slot.begin();
        let err = StageError::numerical(StageKind::Thermodynamics, "boom");
        assert_eq!(slot.complete(Err(err.clone())), Err(err));
        assert_eq!(slot.lifecycle(), Lifecycle::Failed);
        assert!(!slot.free());
        assert_eq!(slot.lifecycle(), Lifecycle::Failed);
    }

    #[test]
    fn dependency_error_names_both_stages() {
        let slot: StageSlot<u32> = StageSlot::new(StageKind::Transfer);
        let e = slot.require(StageKind::Spectra).unwrap_err();
        assert_eq!(
            e,
            StageError::Dependency {
                stage: StageKind::Spectra,
                needs: StageKind::Transfer
            }
        );
    }
}
