//! The write protocol shared by [`Bank`](crate::Bank),
//! [`Flag`](crate::Flag) and [`Vector`](crate::Vector).
//!
//! A container's state sits behind a [`HoldLock`]. Every operation
//! enters an exclusive section through [`HoldLock::lock`]. A writer may
//! additionally turn its section into a hold: the section is released
//! but the lock stays marked `Held` until the transaction commits, and
//! until then every other entry (including other holds and the bank's
//! poller) blocks on a condition variable. Commit applies at most one
//! value and returns the lock to `Free`.
//!
//! ```text
//!            hold()                 commit(ticket)
//!   Free ------------> Held(ticket) --------------> Free
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::errors::Result;

/// Identifies one hold transaction on one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

struct Slot<S> {
    held: Option<Ticket>,
    issued: u64,
    state: S,
}

pub(crate) struct HoldLock<S> {
    slot: Mutex<Slot<S>>,
    released: Condvar,
}

impl<S> HoldLock<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            slot: Mutex::new(Slot {
                held: None,
                issued: 0,
                state,
            }),
            released: Condvar::new(),
        }
    }

    // A panic inside a section leaves the state as it was written so
    // far; that is no worse than the kernel's view, so poisoning is
    // ignored.
    fn raw(&self) -> MutexGuard<'_, Slot<S>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter the exclusive section, waiting out any outstanding hold.
    pub(crate) fn lock(&self) -> Exclusive<'_, S> {
        let guard = self
            .released
            .wait_while(self.raw(), |slot| slot.held.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        Exclusive { guard }
    }

    /// Finish the transaction `ticket`, running `apply` on the state
    /// before anyone else can observe it.
    pub(crate) fn commit<R>(&self, ticket: Ticket, apply: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.raw();
        debug_assert_eq!(guard.held, Some(ticket), "commit of a stale hold");
        guard.held = None;
        let out = apply(&mut guard.state);
        drop(guard);
        self.released.notify_all();
        out
    }

    /// Direct access for the sole owner, e.g. while dropping.
    pub(crate) fn get_mut(&mut self) -> &mut S {
        &mut self
            .slot
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// True while a hold transaction is outstanding.
    pub(crate) fn is_held(&self) -> bool {
        self.raw().held.is_some()
    }
}

/// The exclusive section of a [`HoldLock`].
pub(crate) struct Exclusive<'a, S> {
    guard: MutexGuard<'a, Slot<S>>,
}

impl<S> Exclusive<'_, S> {
    /// Convert the section into an outstanding hold.
    pub(crate) fn hold(mut self) -> Ticket {
        self.guard.issued += 1;
        let ticket = Ticket(self.guard.issued);
        self.guard.held = Some(ticket);
        ticket
    }
}

impl<S> Deref for Exclusive<'_, S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        &self.guard.state
    }
}

impl<S> DerefMut for Exclusive<'_, S> {
    #[inline]
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard.state
    }
}

type CommitFn<V> = Box<dyn FnOnce(Option<V>) -> Result<()> + Send>;

/// A one-shot write handle returned by the containers' `set_hold`.
///
/// While a `Hold` exists its container is exclusively held: every
/// other access, on any index, waits. Write at most one value with
/// [`write`](Hold::write) and then [`release`](Hold::release) the
/// handle; the value is applied on release. Releasing without a value
/// commits nothing. Dropping the handle releases it too, but any
/// error from applying the value is then only logged.
///
/// There is no timeout. A handle that is kept forever keeps the
/// container locked forever.
#[must_use = "the container stays locked until the hold is released"]
pub struct Hold<V> {
    value: Option<V>,
    commit: Option<CommitFn<V>>,
}

impl<V> Hold<V> {
    pub(crate) fn new(commit: impl FnOnce(Option<V>) -> Result<()> + Send + 'static) -> Self {
        Self {
            value: None,
            commit: Some(Box::new(commit)),
        }
    }

    /// Stage the value to commit. Only the first write counts; later
    /// ones are discarded and `false` is returned.
    pub fn write(&mut self, value: V) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(value);
        true
    }

    /// Commit the staged value, if any, and unlock the container.
    pub fn release(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        match self.commit.take() {
            Some(commit) => commit(self.value.take()),
            None => Ok(()),
        }
    }
}

impl<V> Drop for Hold<V> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(%err, "commit of a dropped hold failed");
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Hold<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hold")
            .field("value", &self.value)
            .field("committed", &self.commit.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn hold_blocks_other_sections_until_commit() {
        let lock = Arc::new(HoldLock::new(0u32));
        let ticket = lock.lock().hold();
        assert!(lock.is_held());

        let entered = Arc::new(AtomicBool::new(false));
        let reader = {
            let lock = lock.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                let value = *lock.lock();
                entered.store(true, Ordering::SeqCst);
                value
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        lock.commit(ticket, |v| *v = 7);
        assert_eq!(reader.join().unwrap(), 7);
        assert!(!lock.is_held());
    }

    #[test]
    fn tickets_are_distinct() {
        let lock = HoldLock::new(());
        let a = lock.lock().hold();
        lock.commit(a, |_| ());
        let b = lock.lock().hold();
        assert_ne!(a, b);
        lock.commit(b, |_| ());
    }

    #[test]
    fn handle_commits_first_value_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hold = {
            let seen = seen.clone();
            Hold::new(move |v: Option<i64>| {
                seen.lock().unwrap().push(v);
                Ok(())
            })
        };
        assert!(hold.write(1));
        assert!(!hold.write(2));
        hold.release().unwrap();

        let empty = {
            let seen = seen.clone();
            Hold::new(move |v: Option<i64>| {
                seen.lock().unwrap().push(v);
                Ok(())
            })
        };
        drop(empty);

        assert_eq!(*seen.lock().unwrap(), vec![Some(1), None]);
    }
}
