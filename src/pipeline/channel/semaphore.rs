//! Counting semaphore with cancellation.

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

pub(crate) struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            available: Condvar::new(),
        }
    }

    /// Take one permit, waiting while none is available.
    ///
    /// Returns false once `token` is cancelled.
    pub(crate) fn acquire(&self, token: &CancellationToken) -> bool {
        let mut count = self.count.lock();
        loop {
            if token.is_cancelled() {
                return false;
            }
            if *count > 0 {
                *count -= 1;
                return true;
            }
            self.available.wait(&mut count);
        }
    }

    pub(crate) fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    pub(crate) fn reset(&self, count: usize) {
        *self.count.lock() = count;
        self.available.notify_all();
    }

    /// Wake every waiter so it re-checks its token.
    pub(crate) fn wake_all(&self) {
        let _count = self.count.lock();
        self.available.notify_all();
    }

    pub(crate) fn permits(&self) -> usize {
        *self.count.lock()
    }
}
