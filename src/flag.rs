use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::{Error, Result};
use crate::hold::{Hold, HoldLock};
use crate::trace::SharedTracer;

/// Number of booleans in a [`Flag`].
pub const FLAG_BITS: usize = 64;

struct FlagState {
    value: u64,
    /// Bits referenced so far; only ever grows.
    mask: u64,
    tracer: Option<SharedTracer>,
}

impl FlagState {
    fn sample(&self) {
        if let Some(tracer) = &self.tracer {
            tracer.sample(self.mask, self.value);
        }
    }

    fn write(&mut self, bit: u64, on: bool) {
        let (old_mask, old_value) = (self.mask, self.value);
        self.mask |= bit;
        if on {
            self.value |= bit;
        } else {
            self.value &= !bit;
        }
        if old_mask != self.mask || old_value != self.value {
            self.sample();
        }
    }
}

struct Inner {
    lock: HoldLock<FlagState>,
    alias: RwLock<String>,
}

/// 64 software booleans, all initially false, with the same write
/// protocol as a [`Bank`](crate::Bank).
///
/// The traced mask starts empty and grows as bits are referenced, so a
/// trace only carries the bits a program actually touches.
///
/// Clones share the same flags.
#[derive(Clone)]
pub struct Flag {
    inner: Arc<Inner>,
}

impl Flag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                lock: HoldLock::new(FlagState {
                    value: 0,
                    mask: 0,
                    tracer: None,
                }),
                alias: RwLock::new("FLAG".to_owned()),
            }),
        }
    }

    pub const fn lines(&self) -> usize {
        FLAG_BITS
    }

    fn bit(index: usize) -> Result<u64> {
        if index >= FLAG_BITS {
            return Err(Error::InvalidIndex {
                index,
                limit: FLAG_BITS,
            });
        }
        Ok(1 << index)
    }

    /// Read flag `index`. The first reference to a bit adds it to the
    /// traced mask, which produces a sample even though the value did
    /// not change.
    pub fn get(&self, index: usize) -> Result<bool> {
        let bit = Self::bit(index)?;
        let mut state = self.inner.lock.lock();
        if state.mask & bit == 0 {
            state.mask |= bit;
            state.sample();
        }
        Ok(state.value & bit != 0)
    }

    /// Lock the whole flag set for a write to `index`.
    ///
    /// Blocks while another hold on this flag set is outstanding.
    pub fn set_hold(&self, index: usize) -> Result<Hold<bool>> {
        let bit = Self::bit(index)?;
        let ticket = self.inner.lock.lock().hold();
        let inner = self.inner.clone();
        Ok(Hold::new(move |on| {
            inner.lock.commit(ticket, |state| {
                if let Some(on) = on {
                    state.write(bit, on);
                }
            });
            Ok(())
        }))
    }

    pub fn set(&self, index: usize, on: bool) -> Result<()> {
        let mut hold = self.set_hold(index)?;
        hold.write(on);
        hold.release()
    }

    /// The bits referenced so far.
    pub fn mask(&self) -> u64 {
        self.inner.lock.lock().mask
    }

    /// Install (or with `None`, remove) the tracer. Installing one
    /// samples the current state straight away.
    pub fn set_tracer(&self, tracer: Option<SharedTracer>) {
        let mut state = self.inner.lock.lock();
        state.tracer = tracer;
        state.sample();
    }

    pub fn set_alias(&self, alias: impl Into<String>) {
        *self
            .inner
            .alias
            .write()
            .unwrap_or_else(PoisonError::into_inner) = alias.into();
    }

    /// A display name for flag `index`, e.g. `<FLAG[3]>`.
    pub fn label(&self, index: usize) -> String {
        let alias = self.inner.alias.read().unwrap_or_else(PoisonError::into_inner);
        format!("<{alias}[{index}]>")
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flag")
            .field("held", &self.inner.lock.is_held())
            .finish_non_exhaustive()
    }
}
