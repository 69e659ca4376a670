use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::{Error, Result};
use crate::hold::{Hold, HoldLock};
use crate::trace::SharedTracer;

struct VectorState {
    values: Vec<i64>,
    tracer: Option<SharedTracer>,
}

impl VectorState {
    /// Components past bit 63 have no place in a sample mask and are
    /// not traced.
    fn sample(&self, index: usize) {
        let bit = u32::try_from(index)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift));
        if let (Some(tracer), Some(bit)) = (&self.tracer, bit) {
            tracer.sample(bit, self.values[index] as u64);
        }
    }
}

struct Inner {
    lock: HoldLock<VectorState>,
    alias: RwLock<String>,
}

/// A fixed length array of `i64`, all initially zero, with the same
/// write protocol as a [`Bank`](crate::Bank).
///
/// Clones share the same values.
#[derive(Clone)]
pub struct Vector {
    inner: Arc<Inner>,
}

impl Vector {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock: HoldLock::new(VectorState {
                    values: vec![0; count],
                    tracer: None,
                }),
                alias: RwLock::new("VECTOR".to_owned()),
            }),
        }
    }

    pub fn lines(&self) -> usize {
        self.inner.lock.lock().values.len()
    }

    fn valid(state: &VectorState, index: usize) -> Result<()> {
        if index >= state.values.len() {
            return Err(Error::InvalidIndex {
                index,
                limit: state.values.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<i64> {
        let state = self.inner.lock.lock();
        Self::valid(&state, index)?;
        Ok(state.values[index])
    }

    /// Lock the whole vector for a write to component `index`.
    ///
    /// Blocks while another hold on this vector is outstanding.
    pub fn set_hold(&self, index: usize) -> Result<Hold<i64>> {
        let state = self.inner.lock.lock();
        Self::valid(&state, index)?;
        let ticket = state.hold();
        let inner = self.inner.clone();
        Ok(Hold::new(move |value| {
            inner.lock.commit(ticket, |state| {
                if let Some(value) = value {
                    if state.values[index] != value {
                        state.values[index] = value;
                        state.sample(index);
                    }
                }
            });
            Ok(())
        }))
    }

    pub fn set(&self, index: usize, value: i64) -> Result<()> {
        let mut hold = self.set_hold(index)?;
        hold.write(value);
        hold.release()
    }

    /// Install (or with `None`, remove) the tracer. Each traced sample
    /// is `(1 << index, value)` for one component; installing a tracer
    /// samples every traceable component once.
    pub fn set_tracer(&self, tracer: Option<SharedTracer>) {
        let mut state = self.inner.lock.lock();
        state.tracer = tracer;
        (0..state.values.len().min(64)).for_each(|index| state.sample(index));
    }

    pub fn set_alias(&self, alias: impl Into<String>) {
        *self
            .inner
            .alias
            .write()
            .unwrap_or_else(PoisonError::into_inner) = alias.into();
    }

    /// A display name for component `index`, e.g. `<VECTOR[3]>`.
    pub fn label(&self, index: usize) -> String {
        let alias = self.inner.alias.read().unwrap_or_else(PoisonError::into_inner);
        format!("<{alias}[{index}]>")
    }
}

impl std::fmt::Debug for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vector")
            .field("held", &self.inner.lock.is_held())
            .finish_non_exhaustive()
    }
}
