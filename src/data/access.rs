//! Scoped access guards.
//!
//! Each device representation of a data object carries one [`AccessState`]
//! token. Views that alias the same memory (a buffer and an image view of it
//! on the same device) share the token through an `Arc`, so at most one write
//! guard or any number of read guards exist per representation.
//!
//! Acquisition never blocks: an incompatible outstanding guard is reported as
//! [`PipelineError::AccessConflict`].

use crate::device::DeviceId;
use crate::pipeline::error::{PipelineError, PipelineResult};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    pub fn is_write(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

const FREE: usize = 0;
const WRITE_BORROWED: usize = usize::MAX;

/// In-use token of one representation.
///
/// `0` is free, `usize::MAX` is write-borrowed, anything else is the number of
/// outstanding read guards.
#[derive(Default)]
pub struct AccessState {
    token: AtomicUsize,
}

impl AccessState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(&self, mode: AccessMode, device: DeviceId) -> PipelineResult<()> {
        match mode {
            AccessMode::ReadWrite => self
                .token
                .compare_exchange(FREE, WRITE_BORROWED, Ordering::AcqRel, Ordering::Acquire)
                .map(|_| ())
                .map_err(|current| conflict(device, current, mode)),
            AccessMode::Read => {
                let mut current = self.token.load(Ordering::Acquire);
                loop {
                    if current == WRITE_BORROWED || current == WRITE_BORROWED - 1 {
                        return Err(conflict(device, current, mode));
                    }
                    match self.token.compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Ok(()),
                        Err(actual) => current = actual,
                    }
                }
            }
        }
    }

    pub fn release(&self, mode: AccessMode) {
        match mode {
            AccessMode::ReadWrite => self.token.store(FREE, Ordering::Release),
            AccessMode::Read => {
                self.token.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    pub fn readers(&self) -> usize {
        match self.token.load(Ordering::Acquire) {
            WRITE_BORROWED => 0,
            n => n,
        }
    }

    pub fn is_write_borrowed(&self) -> bool {
        self.token.load(Ordering::Acquire) == WRITE_BORROWED
    }

    pub fn is_free(&self) -> bool {
        self.token.load(Ordering::Acquire) == FREE
    }
}

impl fmt::Debug for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token.load(Ordering::Acquire) {
            FREE => write!(f, "AccessState(Free)"),
            WRITE_BORROWED => write!(f, "AccessState(WriteBorrowed)"),
            n => write!(f, "AccessState(ReadBorrowed({}))", n),
        }
    }
}

fn conflict(device: DeviceId, current: usize, requested: AccessMode) -> PipelineError {
    let held = if current == WRITE_BORROWED {
        "a write guard is outstanding".to_string()
    } else {
        format!("{} read guard(s) outstanding", current)
    };
    PipelineError::AccessConflict {
        device,
        message: format!("cannot acquire {:?} access, {}", requested, held),
    }
}

type ReleaseCallback = Box<dyn FnOnce() + Send>;

/// Scope-bound access to one representation of a data object.
///
/// The handle is only meant to be used while the guard is held. Dropping the
/// guard, or calling [`AccessGuard::release`], frees the token.
pub struct AccessGuard<H: Clone> {
    handle: H,
    mode: AccessMode,
    device: DeviceId,
    state: Arc<AccessState>,
    released: bool,
    on_release: Option<ReleaseCallback>,
}

impl<H: Clone> AccessGuard<H> {
    /// Acquire `mode` on `state` and wrap `handle`.
    pub fn acquire(
        handle: H,
        mode: AccessMode,
        device: DeviceId,
        state: Arc<AccessState>,
    ) -> PipelineResult<Self> {
        state.try_acquire(mode, device)?;
        Ok(Self {
            handle,
            mode,
            device,
            state,
            released: false,
            on_release: None,
        })
    }

    /// Run `callback` once when the guard is released.
    pub fn on_release(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(callback));
        self
    }

    /// A lightweight clone of the wrapped handle.
    pub fn get(&self) -> PipelineResult<H> {
        if self.released {
            return Err(PipelineError::ResourceState(format!(
                "access guard on {} has already been released",
                self.device
            )));
        }
        Ok(self.handle.clone())
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Give up access early. Calling it more than once has no effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state.release(self.mode);
        if let Some(callback) = self.on_release.take() {
            callback();
        }
    }
}

impl<H: Clone> Drop for AccessGuard<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: Clone> fmt::Debug for AccessGuard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("mode", &self.mode)
            .field("device", &self.device)
            .field("released", &self.released)
            .finish()
    }
}
