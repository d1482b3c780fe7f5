//! FramerateSynchronizer: aligns streams running at different rates.
//!
//! On its first execution the synchronizer takes over its input channels and
//! starts one worker per input. Each worker keeps pulling its upstream
//! producer and stores the newest frame of its port. `execute` then waits
//! for an aligned tuple:
//!
//! - with a priority port: every port populated and a new frame on the
//!   priority port (the priority entry is cleared after emitting, so the
//!   output rate follows the priority stream);
//! - without one: every port populated and any port updated since the last
//!   emission.
//!
//! Outputs mirror the inputs and use latest-only channels.

use crate::config::SynchronizerConfig;
use crate::data::{DataObject, DataRef};
use crate::pipeline::channel::{ChannelKind, DataChannel};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{ExecuteContext, ProcessObject};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use crate::pipeline::task::TaskGroup;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause between polls of a static input whose frame has not changed.
const STATIC_POLL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct SyncState {
    latest: BTreeMap<u32, DataRef>,
    fresh: bool,
    active_workers: usize,
    failure: Option<PipelineError>,
    stopped: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SyncState>,
    data_ready: Condvar,
}

pub struct FramerateSynchronizer {
    input_count: u32,
    priority_port: Option<u32>,
    always_rerun: bool,
    ports: Vec<PortDescriptor>,
    shared: Arc<Shared>,
    started: AtomicBool,
    upstream: Mutex<Vec<Arc<dyn DataChannel>>>,
    tasks: Mutex<TaskGroup>,
}

impl FramerateSynchronizer {
    pub fn new(input_count: u32, priority_port: Option<u32>) -> PipelineResult<Self> {
        if input_count == 0 {
            return Err(PipelineError::Configuration(
                "FramerateSynchronizer needs at least one input".into(),
            ));
        }
        if let Some(port) = priority_port {
            if port >= input_count {
                return Err(PipelineError::Configuration(format!(
                    "priority port {} out of range for {} inputs",
                    port, input_count
                )));
            }
        }

        let ports = (0..input_count)
            .map(|i| PortDescriptor::input(i, "in", ANY_DATA))
            .chain((0..input_count).map(|i| PortDescriptor::output(i, "out", ANY_DATA)))
            .collect();

        Ok(Self {
            input_count,
            priority_port,
            always_rerun: true,
            ports,
            shared: Arc::new(Shared::default()),
            started: AtomicBool::new(false),
            upstream: Mutex::new(Vec::new()),
            tasks: Mutex::new(TaskGroup::new("framerate-sync")),
        })
    }

    pub fn from_config(input_count: u32, config: &SynchronizerConfig) -> PipelineResult<Self> {
        Ok(Self::new(input_count, config.priority_port)?.with_always_rerun(config.always_rerun))
    }

    /// With `false` the node only emits again after being marked modified.
    pub fn with_always_rerun(mut self, always_rerun: bool) -> Self {
        self.always_rerun = always_rerun;
        self
    }

    pub fn input_count(&self) -> u32 {
        self.input_count
    }

    pub fn priority_port(&self) -> Option<u32> {
        self.priority_port
    }

    /// Number of input workers still running.
    pub fn active_workers(&self) -> usize {
        self.shared.state.lock().active_workers
    }

    fn start_workers(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let inputs = ctx.detach_inputs();
        tracing::info!("Starting {} synchronizer workers", inputs.len());

        self.shared.state.lock().active_workers = inputs.len();
        *self.upstream.lock() = inputs.iter().map(|(_, c)| c.clone()).collect();

        let mut tasks = self.tasks.lock();
        for (port, channel) in inputs {
            let shared = self.shared.clone();
            tasks.spawn(&format!("input{}", port), move |token| {
                worker(port, channel, shared, token)
            })?;
        }
        Ok(())
    }

    fn wait_for_tuple(&self) -> PipelineResult<BTreeMap<u32, DataRef>> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(reason) = &state.stopped {
                return Err(PipelineError::cancelled(reason.clone()));
            }
            if let Some(failure) = state.failure.take() {
                return Err(failure);
            }

            let complete = state.latest.len() == self.input_count as usize;
            let ready = match self.priority_port {
                Some(port) => complete && state.latest.contains_key(&port),
                None => complete && state.fresh,
            };
            if ready {
                let tuple = state.latest.clone();
                if let Some(port) = self.priority_port {
                    state.latest.remove(&port);
                }
                state.fresh = false;
                return Ok(tuple);
            }

            if state.active_workers == 0 {
                return Err(PipelineError::cancelled(
                    "every synchronizer input has ended",
                ));
            }
            self.shared.data_ready.wait(&mut state);
        }
    }
}

impl ProcessObject for FramerateSynchronizer {
    fn name(&self) -> &str {
        "FramerateSynchronizer"
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        self.start_workers(ctx)?;
        let tuple = self.wait_for_tuple()?;
        for (port, frame) in tuple {
            ctx.add_output(port, frame)?;
        }
        Ok(())
    }

    fn always_rerun(&self) -> bool {
        self.always_rerun
    }

    fn output_channel_kind(&self, _port: u32) -> ChannelKind {
        ChannelKind::NewestOnly
    }

    /// Stops every upstream channel and producer, then joins the workers.
    fn stop(&self, reason: &str) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped.is_none() {
                state.stopped = Some(reason.to_string());
            }
        }
        self.shared.data_ready.notify_all();

        let upstream: Vec<Arc<dyn DataChannel>> = self.upstream.lock().clone();
        for channel in &upstream {
            channel.stop(reason);
            if let Some(producer) = channel.producer() {
                producer.stop(reason);
            }
        }

        let mut tasks = self.tasks.lock();
        tasks.cancel();
        tasks.join();
    }
}

impl Drop for FramerateSynchronizer {
    fn drop(&mut self) {
        self.stop("synchronizer dropped");
    }
}

fn worker(port: u32, channel: Arc<dyn DataChannel>, shared: Arc<Shared>, token: CancellationToken) {
    match pull_frames(port, &channel, &shared, &token) {
        Ok(()) => tracing::debug!("Synchronizer input {} reached its last frame", port),
        Err(e) if e.is_cancelled() => tracing::debug!("Synchronizer input {} stopped: {}", port, e),
        Err(e) => {
            tracing::warn!("Synchronizer input {} failed: {}", port, e);
            shared.state.lock().failure = Some(e);
        }
    }
    shared.state.lock().active_workers -= 1;
    shared.data_ready.notify_all();
}

fn pull_frames(
    port: u32,
    channel: &Arc<dyn DataChannel>,
    shared: &Shared,
    token: &CancellationToken,
) -> PipelineResult<()> {
    let mut seen_version = 0;
    loop {
        if token.is_cancelled() {
            return Err(PipelineError::cancelled("synchronizer stopped"));
        }
        if let Some(producer) = channel.producer() {
            producer.update()?;
        }
        let frame = channel.next_frame()?;

        if channel.kind() == ChannelKind::Static {
            let version = channel.version();
            if version == seen_version {
                std::thread::sleep(STATIC_POLL);
                continue;
            }
            seen_version = version;
        }

        let last = frame.is_last_frame();
        {
            let mut state = shared.state.lock();
            state.latest.insert(port, frame);
            state.fresh = true;
        }
        shared.data_ready.notify_all();
        tracing::trace!("Synchronizer input {} updated", port);

        if last {
            return Ok(());
        }
    }
}
