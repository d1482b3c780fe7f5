//! Software accelerator device.
//!
//! Stands in for a GPU-like device: it has its own memory space (data kinds
//! keep a separate representation for it) and executes submitted commands
//! in order on a dedicated worker thread.

use super::{ComputeDevice, DeviceCommand, DeviceId, DeviceKind};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;

enum DeviceMessage {
    Run(DeviceCommand),
    /// Acknowledged once every command queued before it has run.
    Fence(Sender<()>),
}

pub struct SoftwareAccelerator {
    id: DeviceId,
    name: String,
    queue: Mutex<Option<Sender<DeviceMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftwareAccelerator {
    pub fn new(id: DeviceId, name: &str) -> PipelineResult<Self> {
        let (tx, rx) = unbounded::<DeviceMessage>();
        let worker = std::thread::Builder::new()
            .name(format!("device-{}", name))
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        DeviceMessage::Run(command) => command(),
                        DeviceMessage::Fence(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                tracing::trace!("Device worker exiting");
            })
            .map_err(|e| PipelineError::Device(format!("failed to spawn device worker: {}", e)))?;

        Ok(Self {
            id,
            name: name.to_string(),
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, msg: DeviceMessage) -> PipelineResult<()> {
        let queue = self.queue.lock();
        let tx = queue
            .as_ref()
            .ok_or_else(|| PipelineError::Device(format!("{} is shut down", self.name)))?;
        tx.send(msg)
            .map_err(|_| PipelineError::Device(format!("{} worker has terminated", self.name)))
    }

    /// Close the command queue and join the worker. Idempotent.
    pub fn shutdown(&self) {
        self.queue.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Device {} worker panicked", self.name);
            }
        }
    }
}

impl ComputeDevice for SoftwareAccelerator {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Accelerator
    }

    fn submit(&self, command: DeviceCommand) -> PipelineResult<()> {
        self.send(DeviceMessage::Run(command))
    }

    fn finish(&self) -> PipelineResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.send(DeviceMessage::Fence(ack_tx))?;
        ack_rx
            .recv()
            .map_err(|_| PipelineError::Device(format!("{} worker has terminated", self.name)))
    }
}

impl Drop for SoftwareAccelerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
