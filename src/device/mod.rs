//! Execution devices.
//!
//! A device is an execution unit with its own memory space. The host CPU is
//! always present as [`DeviceId::HOST`]; accelerators are registered with the
//! [`DeviceManager`]. Device identity is what data objects key their
//! retain counts and representations on.
//!
//! The command interface is deliberately opaque: a device accepts boxed
//! closures and `finish()` blocks until everything submitted so far has run.

pub mod accelerator;

pub use accelerator::SoftwareAccelerator;

use crate::pipeline::error::{PipelineError, PipelineResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Identity of an execution device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const HOST: DeviceId = DeviceId(0);

    #[inline]
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "DeviceId(HOST)")
        } else {
            write!(f, "DeviceId({})", self.0)
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            write!(f, "device#{}", self.0)
        }
    }
}

/// What kind of memory space a device owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Host,
    Accelerator,
}

/// A unit of work submitted to a device.
pub type DeviceCommand = Box<dyn FnOnce() + Send + 'static>;

/// Contract every compute device implements.
pub trait ComputeDevice: Send + Sync {
    fn id(&self) -> DeviceId;

    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Queue a command for execution on this device.
    fn submit(&self, command: DeviceCommand) -> PipelineResult<()>;

    /// Block until every previously submitted command has completed.
    fn finish(&self) -> PipelineResult<()>;

    fn is_host(&self) -> bool {
        self.kind() == DeviceKind::Host
    }
}

impl fmt::Debug for dyn ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// The host CPU. Commands run inline on the submitting thread.
#[derive(Debug, Default)]
pub struct HostDevice;

impl ComputeDevice for HostDevice {
    fn id(&self) -> DeviceId {
        DeviceId::HOST
    }

    fn name(&self) -> &str {
        "host"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Host
    }

    fn submit(&self, command: DeviceCommand) -> PipelineResult<()> {
        command();
        Ok(())
    }

    fn finish(&self) -> PipelineResult<()> {
        Ok(())
    }
}

// ==================== Device Manager ====================

/// Registry of available devices and the default computation device.
pub struct DeviceManager {
    devices: RwLock<Vec<Arc<dyn ComputeDevice>>>,
    preferred: RwLock<Option<DeviceId>>,
    next_id: AtomicU32,
}

static GLOBAL_DEVICE_MANAGER: OnceLock<DeviceManager> = OnceLock::new();

impl DeviceManager {
    /// Create a manager with only the host device registered.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(vec![Arc::new(HostDevice) as Arc<dyn ComputeDevice>]),
            preferred: RwLock::new(None),
            next_id: AtomicU32::new(1),
        }
    }

    /// The process-wide manager used by nodes that were not given a device.
    pub fn global() -> &'static DeviceManager {
        GLOBAL_DEVICE_MANAGER.get_or_init(DeviceManager::new)
    }

    /// Reserve an unused device id.
    pub fn allocate_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an externally constructed device.
    pub fn register(&self, device: Arc<dyn ComputeDevice>) -> PipelineResult<()> {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.id() == device.id()) {
            return Err(PipelineError::Device(format!(
                "a device with id {} is already registered",
                device.id()
            )));
        }
        tracing::info!("Registered device {} ({})", device.id(), device.name());
        devices.push(device);
        Ok(())
    }

    /// Create, register and return a new software accelerator.
    pub fn add_accelerator(&self, name: &str) -> PipelineResult<Arc<dyn ComputeDevice>> {
        let device: Arc<dyn ComputeDevice> =
            Arc::new(SoftwareAccelerator::new(self.allocate_id(), name)?);
        self.register(device.clone())?;
        Ok(device)
    }

    pub fn host(&self) -> Arc<dyn ComputeDevice> {
        self.devices
            .read()
            .iter()
            .find(|d| d.id().is_host())
            .cloned()
            .unwrap_or_else(|| Arc::new(HostDevice))
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<dyn ComputeDevice>> {
        self.devices.read().iter().find(|d| d.id() == id).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<dyn ComputeDevice>> {
        self.devices.read().clone()
    }

    /// Choose which device `default_device` returns. `None` resets to the host.
    pub fn set_preferred(&self, id: Option<DeviceId>) -> PipelineResult<()> {
        if let Some(id) = id {
            if self.device(id).is_none() {
                return Err(PipelineError::Device(format!("unknown device {}", id)));
            }
        }
        *self.preferred.write() = id;
        Ok(())
    }

    /// The default computation device for new process objects.
    pub fn default_device(&self) -> Arc<dyn ComputeDevice> {
        let preferred = *self.preferred.read();
        preferred
            .and_then(|id| self.device(id))
            .unwrap_or_else(|| self.host())
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
