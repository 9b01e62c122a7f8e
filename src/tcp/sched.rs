//! Per-PCB wait context: a condition variable coupled to the single stack-wide mutex.
//!
//! The `Condvar` itself lives behind an `Arc` so a caller can clone it out of the locked PCB
//! table before blocking on it — `Condvar::wait` takes the table's `MutexGuard` by value, which
//! would otherwise conflict with the borrow needed to reach the PCB's own wait context through
//! that same guard. `waiters`/`interrupted` stay plain fields: they are only ever touched while
//! the guard is held, never across the blocking call itself.

use std::sync::{Arc, Condvar, MutexGuard};

use crate::error::Error;

#[derive(Debug)]
pub struct WaitCtx {
    cond: Arc<Condvar>,
    waiters: usize,
    interrupted: bool,
}

impl WaitCtx {
    pub fn new() -> Self {
        WaitCtx {
            cond: Arc::new(Condvar::new()),
            waiters: 0,
            interrupted: false,
        }
    }

    pub fn has_waiters(&self) -> bool {
        self.waiters > 0
    }

    pub fn condvar(&self) -> Arc<Condvar> {
        Arc::clone(&self.cond)
    }

    /// Call before blocking, while still holding the stack mutex.
    pub fn enter(&mut self) {
        self.waiters += 1;
    }

    /// Call after waking and reacquiring the stack mutex. Returns `Err(Interrupted)` if this
    /// context was interrupted while the caller was asleep (or already interrupted when it went
    /// to sleep).
    pub fn exit(&mut self) -> Result<(), Error> {
        self.waiters -= 1;
        if self.interrupted {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// True if a sleep should be skipped entirely because this context is already interrupted —
    /// "the current or next sleep" must observe an interrupt, including one delivered in the
    /// window between a wakeup check and the next `sleep` call.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn wake(&self) {
        self.cond.notify_all();
    }

    /// Marks this context interrupted and wakes any current waiter. Sticky until the PCB is
    /// released — a freshly allocated PCB always gets a fresh `WaitCtx`.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
        self.cond.notify_all();
    }
}

impl Default for WaitCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomically releases `guard`, waits for a `wake`/`interrupt` notification on `cond`, and
/// reacquires `guard`. Callers are responsible for calling [`WaitCtx::enter`] before and
/// [`WaitCtx::exit`] after, since the PCB has to be looked back up by id through the reacquired
/// guard (the table, not this function, owns the PCB).
pub fn sleep<'a, T>(cond: Arc<Condvar>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).expect("stack mutex poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn interrupt_before_sleep_is_observed_without_blocking() {
        let mut ctx = WaitCtx::new();
        ctx.interrupt();
        assert!(ctx.interrupted());
    }

    #[test]
    fn wake_releases_a_parked_waiter() {
        let mutex = Arc::new(Mutex::new(0u32));
        let ctx = Arc::new(Mutex::new(WaitCtx::new()));

        let waiter_mutex = Arc::clone(&mutex);
        let waiter_ctx = Arc::clone(&ctx);
        let handle = thread::spawn(move || {
            let mut guard = waiter_mutex.lock().unwrap();
            let cond = {
                let mut ctx = waiter_ctx.lock().unwrap();
                ctx.enter();
                ctx.condvar()
            };
            guard = sleep(cond, guard);
            waiter_ctx.lock().unwrap().exit().unwrap();
            *guard += 1;
        });

        thread::sleep(Duration::from_millis(20));
        ctx.lock().unwrap().wake();
        handle.join().unwrap();

        assert_eq!(*mutex.lock().unwrap(), 1);
    }
}
