//! Data object lifecycle.
//!
//! Every value that flows through the pipeline implements [`DataObject`].
//! The shared bookkeeping (retain counts, modification timestamp, last-frame
//! flag, streamer back-reference) lives in [`DataCore`], which concrete kinds
//! embed and expose through [`DataObject::core`].
//!
//! # Retain protocol
//!
//! A representation for device `D` may only exist while `retain_count(D) > 0`.
//! `retain` reports whether it was the first retain so the caller knows the
//! representation has to be materialized. When the count drops back to zero
//! the kind-specific [`DataObject::free`] drops the representation.

use crate::device::DeviceId;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::Node;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared handle to any data object.
pub type DataRef = Arc<dyn DataObject>;

/// Downcasting support for trait objects.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Bookkeeping shared by every data kind.
pub struct DataCore {
    retains: Mutex<HashMap<DeviceId, usize>>,
    modified: AtomicU64,
    last_frame: AtomicBool,
    created_at_ms: AtomicI64,
    streamer: Mutex<Weak<Node>>,
}

impl DataCore {
    pub fn new() -> Self {
        Self {
            retains: Mutex::new(HashMap::new()),
            modified: AtomicU64::new(0),
            last_frame: AtomicBool::new(false),
            created_at_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            streamer: Mutex::new(Weak::new()),
        }
    }

    /// Increment the retain count; true if this was the first retain.
    pub fn retain(&self, device: DeviceId) -> bool {
        let mut retains = self.retains.lock();
        let count = retains.entry(device).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrement the retain count; true if it dropped to zero.
    pub fn release(&self, device: DeviceId) -> PipelineResult<bool> {
        let mut retains = self.retains.lock();
        match retains.get_mut(&device) {
            None => Err(PipelineError::ResourceState(format!(
                "release on {} which holds no retain",
                device
            ))),
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    retains.remove(&device);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub fn retain_count(&self, device: DeviceId) -> usize {
        self.retains.lock().get(&device).copied().unwrap_or(0)
    }

    pub fn retained_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.retains.lock().keys().copied().collect();
        devices.sort();
        devices
    }

    /// Bump the modification timestamp, returning the new value.
    pub fn update_modified_timestamp(&self) -> u64 {
        self.modified.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn modified_timestamp(&self) -> u64 {
        self.modified.load(Ordering::Acquire)
    }

    pub fn is_last_frame(&self) -> bool {
        self.last_frame.load(Ordering::Acquire)
    }

    pub fn set_last_frame(&self, last: bool) {
        self.last_frame.store(last, Ordering::Release);
    }

    /// Milliseconds since the Unix epoch.
    pub fn creation_timestamp(&self) -> i64 {
        self.created_at_ms.load(Ordering::Relaxed)
    }

    pub fn set_creation_timestamp(&self, ms: i64) {
        self.created_at_ms.store(ms, Ordering::Relaxed);
    }

    pub fn set_streamer(&self, streamer: Weak<Node>) {
        *self.streamer.lock() = streamer;
    }

    pub fn streamer(&self) -> Option<Arc<Node>> {
        self.streamer.lock().upgrade()
    }
}

impl Default for DataCore {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that can flow through the pipeline.
pub trait DataObject: AsAny {
    fn core(&self) -> &DataCore;

    /// Drop the representation on `device`. Called once its retain count reaches zero.
    fn free(&self, device: DeviceId);

    fn kind_name(&self) -> &'static str {
        self.type_name()
    }

    /// A new object with the same contents and fresh frame metadata.
    ///
    /// Used by sources that replay stored frames, so a frame still in flight
    /// is never marked again.
    fn duplicate(&self) -> PipelineResult<DataRef> {
        Err(PipelineError::Configuration(format!(
            "{} frames cannot be duplicated",
            self.kind_name()
        )))
    }

    fn retain(&self, device: DeviceId) -> bool {
        self.core().retain(device)
    }

    fn release(&self, device: DeviceId) -> PipelineResult<()> {
        if self.core().release(device)? {
            tracing::trace!("Freeing {} representation on {}", self.kind_name(), device);
            self.free(device);
        }
        Ok(())
    }

    fn retain_count(&self, device: DeviceId) -> usize {
        self.core().retain_count(device)
    }

    fn update_modified_timestamp(&self) -> u64 {
        self.core().update_modified_timestamp()
    }

    fn modified_timestamp(&self) -> u64 {
        self.core().modified_timestamp()
    }

    fn is_last_frame(&self) -> bool {
        self.core().is_last_frame()
    }

    fn set_last_frame(&self, last: bool) {
        self.core().set_last_frame(last)
    }

    fn creation_timestamp(&self) -> i64 {
        self.core().creation_timestamp()
    }

    /// The streamer node that produced this frame, if it is still alive.
    fn streamer(&self) -> Option<Arc<Node>> {
        self.core().streamer()
    }
}

impl fmt::Debug for dyn DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataObject")
            .field("kind", &self.kind_name())
            .field("modified", &self.modified_timestamp())
            .field("last_frame", &self.is_last_frame())
            .finish()
    }
}

/// Convert a shared data object into its concrete kind.
pub fn downcast_data<T: DataObject>(data: DataRef) -> PipelineResult<Arc<T>> {
    let actual = data.kind_name();
    data.into_any()
        .downcast::<T>()
        .map_err(|_| PipelineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual,
        })
}

/// Borrowing variant of [`downcast_data`].
pub fn downcast_data_ref<T: DataObject>(data: &dyn DataObject) -> PipelineResult<&T> {
    data.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: data.kind_name(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Tracked {
        core: DataCore,
        freed: AtomicUsize,
    }

    impl DataObject for Tracked {
        fn core(&self) -> &DataCore {
            &self.core
        }

        fn free(&self, _device: DeviceId) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Other {
        core: DataCore,
    }

    impl DataObject for Other {
        fn core(&self) -> &DataCore {
            &self.core
        }

        fn free(&self, _device: DeviceId) {}
    }

    #[test]
    fn test_release_without_retain_fails() {
        let data = Tracked::default();
        let err = data.release(DeviceId::HOST).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceState(_)));
        assert_eq!(data.freed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retain_release_counts() {
        let data = Tracked::default();
        assert!(data.retain(DeviceId::HOST));
        assert!(!data.retain(DeviceId::HOST));
        data.release(DeviceId::HOST).unwrap();
        assert_eq!(data.retain_count(DeviceId::HOST), 1);
        assert_eq!(data.freed.load(Ordering::SeqCst), 0);

        data.release(DeviceId::HOST).unwrap();
        assert_eq!(data.retain_count(DeviceId::HOST), 0);
        assert_eq!(data.freed.load(Ordering::SeqCst), 1);

        assert!(data.release(DeviceId::HOST).is_err());
    }

    #[test]
    fn test_devices_are_counted_independently() {
        let data = Tracked::default();
        data.retain(DeviceId::HOST);
        assert!(data.retain(DeviceId(1)));
        data.release(DeviceId(1)).unwrap();
        assert_eq!(data.retain_count(DeviceId::HOST), 1);
        assert_eq!(data.core().retained_devices(), vec![DeviceId::HOST]);
    }

    #[test]
    fn test_modified_timestamp_increases() {
        let data = Tracked::default();
        let before = data.modified_timestamp();
        let after = data.update_modified_timestamp();
        assert!(after > before);
        assert_eq!(data.modified_timestamp(), after);
    }

    #[test]
    fn test_last_frame_flag() {
        let data = Tracked::default();
        assert!(!data.is_last_frame());
        data.set_last_frame(true);
        assert!(data.is_last_frame());
        assert!(data.streamer().is_none());
    }

    #[test]
    fn test_downcast_mismatch() {
        let data: DataRef = Arc::new(Tracked::default());
        assert!(downcast_data_ref::<Tracked>(data.as_ref()).is_ok());
        assert!(matches!(
            downcast_data::<Other>(data),
            Err(PipelineError::TypeMismatch { .. })
        ));
    }
}
