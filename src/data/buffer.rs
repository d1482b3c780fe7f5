//! Multi-device array data kind.
//!
//! A [`Buffer`] keeps one representation per retained device. Each
//! representation is either up to date or stale; access on a device first
//! copies the contents over from an up-to-date representation, and write
//! access marks every other representation stale.

use super::access::{AccessGuard, AccessMode, AccessState};
use super::object::{DataCore, DataObject, DataRef};
use crate::device::{ComputeDevice, DeviceId, HostDevice};
use crate::pipeline::error::{PipelineError, PipelineResult};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Element types a [`Buffer`] can hold.
pub trait Element: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Element for T {}

struct Representation<T> {
    data: Arc<RwLock<Vec<T>>>,
    up_to_date: bool,
    state: Arc<AccessState>,
}

/// Handle into one device representation.
#[derive(Clone)]
pub struct BufferView<T> {
    data: Arc<RwLock<Vec<T>>>,
    device: DeviceId,
    writable: bool,
}

impl<T> BufferView<T> {
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.data.read()
    }

    pub fn write(&self) -> PipelineResult<RwLockWriteGuard<'_, Vec<T>>> {
        if !self.writable {
            return Err(PipelineError::AccessConflict {
                device: self.device,
                message: "view was acquired read-only".into(),
            });
        }
        Ok(self.data.write())
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-major 2-D view aliasing a device representation.
#[derive(Clone)]
pub struct ImageView<T> {
    view: BufferView<T>,
    width: usize,
    height: usize,
}

impl<T: Clone> ImageView<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.view.read().get(y * self.width + x).cloned()
    }

    pub fn set_pixel(&self, x: usize, y: usize, value: T) -> PipelineResult<()> {
        if x >= self.width || y >= self.height {
            return Err(PipelineError::Configuration(format!(
                "pixel ({}, {}) outside {}x{} image",
                x, y, self.width, self.height
            )));
        }
        let mut data = self.view.write()?;
        data[y * self.width + x] = value;
        Ok(())
    }

    pub fn buffer(&self) -> &BufferView<T> {
        &self.view
    }
}

pub struct Buffer<T: Element> {
    core: DataCore,
    len: usize,
    representations: Mutex<HashMap<DeviceId, Representation<T>>>,
}

impl<T: Element> Buffer<T> {
    /// Create a buffer of `len` elements on the host.
    ///
    /// `data` must be empty (zero-filled) or exactly `len` long. The host is
    /// retained on behalf of the creator.
    pub fn create(len: usize, data: &[T]) -> PipelineResult<Arc<Self>> {
        let contents = if data.is_empty() {
            vec![T::default(); len]
        } else if data.len() == len {
            data.to_vec()
        } else {
            return Err(PipelineError::Configuration(format!(
                "buffer of {} elements created from {} values",
                len,
                data.len()
            )));
        };

        let buffer = Self {
            core: DataCore::new(),
            len,
            representations: Mutex::new(HashMap::new()),
        };
        buffer.core.retain(DeviceId::HOST);
        buffer.representations.lock().insert(
            DeviceId::HOST,
            Representation {
                data: Arc::new(RwLock::new(contents)),
                up_to_date: true,
                state: AccessState::new(),
            },
        );
        Ok(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn host_access(&self, mode: AccessMode) -> PipelineResult<AccessGuard<BufferView<T>>> {
        self.prepare(mode, &HostDevice, |view| view)
    }

    pub fn device_access(
        &self,
        mode: AccessMode,
        device: &dyn ComputeDevice,
    ) -> PipelineResult<AccessGuard<BufferView<T>>> {
        self.prepare(mode, device, |view| view)
    }

    /// Access the representation on `device` as a `width` x `height` image.
    ///
    /// Shares its in-use token with [`Buffer::device_access`] on the same device.
    pub fn image_access(
        &self,
        mode: AccessMode,
        device: &dyn ComputeDevice,
        width: usize,
        height: usize,
    ) -> PipelineResult<AccessGuard<ImageView<T>>> {
        let pixels = width.checked_mul(height).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "{}x{} image size overflows",
                width, height
            ))
        })?;
        if pixels != self.len {
            return Err(PipelineError::Configuration(format!(
                "{}x{} image does not match buffer of {} elements",
                width, height, self.len
            )));
        }
        self.prepare(mode, device, |view| ImageView {
            view,
            width,
            height,
        })
    }

    /// Whether `device` currently holds an up-to-date copy.
    pub fn is_up_to_date(&self, device: DeviceId) -> bool {
        self.representations
            .lock()
            .get(&device)
            .map(|r| r.up_to_date)
            .unwrap_or(false)
    }

    pub fn has_representation(&self, device: DeviceId) -> bool {
        self.representations.lock().contains_key(&device)
    }

    /// Acquire `mode` on `device`, then synchronize its representation.
    ///
    /// Nothing changes unless the token is acquired: a refused access leaves
    /// staleness, representations and the modified timestamp untouched.
    fn prepare<H: Clone>(
        &self,
        mode: AccessMode,
        device: &dyn ComputeDevice,
        wrap: impl FnOnce(BufferView<T>) -> H,
    ) -> PipelineResult<AccessGuard<H>> {
        let id = device.id();
        if self.core.retain_count(id) == 0 {
            return Err(PipelineError::ResourceState(format!(
                "buffer accessed on {} which is not retained",
                id
            )));
        }

        let mut reps = self.representations.lock();

        if mode.is_write() {
            if let Some((other, _)) = reps
                .iter()
                .find(|(d, r)| **d != id && !r.state.is_free())
            {
                return Err(PipelineError::AccessConflict {
                    device: id,
                    message: format!("representation on {} is in use", other),
                });
            }
        }

        let existing = reps.get(&id).map(|r| (r.data.clone(), r.state.clone(), r.up_to_date));
        let needs_sync = existing.as_ref().map(|(_, _, fresh)| !fresh).unwrap_or(true);
        let source = if needs_sync {
            reps.iter()
                .find(|(d, r)| **d != id && r.up_to_date)
                .map(|(d, r)| (*d, r.data.clone(), r.state.clone()))
        } else {
            None
        };
        if let Some((from, _, src_state)) = &source {
            if src_state.is_write_borrowed() {
                return Err(PipelineError::AccessConflict {
                    device: *from,
                    message: "source representation is being written".into(),
                });
            }
        }

        let (data, state) = match &existing {
            Some((data, state, _)) => (data.clone(), state.clone()),
            None => (Arc::new(RwLock::new(Vec::new())), AccessState::new()),
        };
        let view = BufferView {
            data: data.clone(),
            device: id,
            writable: mode.is_write(),
        };
        let guard = AccessGuard::acquire(wrap(view), mode, id, state.clone())?;

        if needs_sync {
            match source {
                Some((from, src, _)) => {
                    tracing::trace!("Transferring buffer from {} to {}", from, id);
                    let dst = data.clone();
                    device.submit(Box::new(move || {
                        let contents = src.read().clone();
                        *dst.write() = contents;
                    }))?;
                    device.finish()?;
                }
                None => {
                    tracing::warn!("No up-to-date representation, zero-filling on {}", id);
                    *data.write() = vec![T::default(); self.len];
                }
            }
            let rep = reps.entry(id).or_insert_with(|| Representation {
                data,
                up_to_date: false,
                state,
            });
            rep.up_to_date = true;
        }

        if mode.is_write() {
            for (d, r) in reps.iter_mut() {
                r.up_to_date = *d == id;
            }
            self.core.update_modified_timestamp();
        }
        Ok(guard)
    }
}

impl<T: Element> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut devices: Vec<DeviceId> = self.representations.lock().keys().copied().collect();
        devices.sort();
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("representations", &devices)
            .finish()
    }
}

impl<T: Element> DataObject for Buffer<T> {
    fn core(&self) -> &DataCore {
        &self.core
    }

    fn free(&self, device: DeviceId) {
        let mut reps = self.representations.lock();
        if let Some(rep) = reps.remove(&device) {
            if rep.up_to_date && !reps.values().any(|r| r.up_to_date) && !reps.is_empty() {
                tracing::warn!("Freed the only up-to-date buffer representation on {}", device);
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        "Buffer"
    }

    fn duplicate(&self) -> PipelineResult<DataRef> {
        let guard = self.host_access(AccessMode::Read)?;
        let contents = guard.get()?.read().clone();
        Ok(Buffer::create(self.len, &contents)? as DataRef)
    }
}
