//! Host-only scalar data object.

use super::access::{AccessGuard, AccessMode, AccessState};
use super::object::{DataCore, DataObject, DataRef};
use crate::device::DeviceId;
use crate::pipeline::error::{PipelineError, PipelineResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Handle returned by [`Value::access`].
#[derive(Clone)]
pub struct ValueHandle<T> {
    slot: Arc<RwLock<Option<T>>>,
    writable: bool,
}

impl<T: Clone> ValueHandle<T> {
    pub fn get(&self) -> PipelineResult<T> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| PipelineError::ResourceState("value has been freed".into()))
    }

    pub fn set(&self, value: T) -> PipelineResult<()> {
        if !self.writable {
            return Err(PipelineError::AccessConflict {
                device: DeviceId::HOST,
                message: "value was acquired read-only".into(),
            });
        }
        *self.slot.write() = Some(value);
        Ok(())
    }
}

/// A single value living in host memory.
pub struct Value<T> {
    core: DataCore,
    slot: Arc<RwLock<Option<T>>>,
    state: Arc<AccessState>,
}

impl<T: Clone + Send + Sync + 'static> Value<T> {
    pub fn create(value: T) -> Arc<Self> {
        let core = DataCore::new();
        core.retain(DeviceId::HOST);
        Arc::new(Self {
            core,
            slot: Arc::new(RwLock::new(Some(value))),
            state: AccessState::new(),
        })
    }

    pub fn access(&self, mode: AccessMode) -> PipelineResult<AccessGuard<ValueHandle<T>>> {
        if self.core.retain_count(DeviceId::HOST) == 0 {
            return Err(PipelineError::ResourceState(
                "value accessed while not retained on host".into(),
            ));
        }
        let handle = ValueHandle {
            slot: self.slot.clone(),
            writable: mode.is_write(),
        };
        let guard = AccessGuard::acquire(handle, mode, DeviceId::HOST, self.state.clone())?;
        if mode.is_write() {
            self.core.update_modified_timestamp();
        }
        Ok(guard)
    }

    /// Shorthand for a read access that copies the value out.
    pub fn get(&self) -> PipelineResult<T> {
        self.access(AccessMode::Read)?.get()?.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("value", &*self.slot.read())
            .field("modified", &self.core.modified_timestamp())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> DataObject for Value<T> {
    fn core(&self) -> &DataCore {
        &self.core
    }

    fn free(&self, device: DeviceId) {
        if device.is_host() {
            self.slot.write().take();
        }
    }

    fn duplicate(&self) -> PipelineResult<DataRef> {
        Ok(Value::create(self.get()?) as DataRef)
    }
}
