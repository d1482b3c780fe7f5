//! Streamer node: pushes frames from a [`FrameSource`] on a background thread.
//!
//! The first `execute` starts a producer thread. The thread fetches frames
//! one ahead of the one it is sending, so it knows which frame is the last
//! one and can flag it before sending. Frames go out through a
//! [`StreamSender`] to every consumer channel:
//!
//! - [`StreamingMode::ProcessAllFrames`] creates bounded-queue channels; the
//!   producer blocks when a consumer falls behind.
//! - [`StreamingMode::NewestFrameOnly`] creates latest-only channels; slow
//!   consumers skip frames.
//!
//! Stopping the node cancels the thread and stops its channels. A source
//! error stops the channels with the error message, so blocked consumers
//! wake with a cancellation carrying it.

use crate::config::StreamingConfig;
use crate::data::{DataObject, DataRef};
use crate::pipeline::channel::ChannelKind;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{ExecuteContext, ProcessObject, StreamSender};
use crate::pipeline::port::{PortDescriptor, ANY_DATA};
use crate::pipeline::task::TaskGroup;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

static PORTS: &[PortDescriptor] = &[PortDescriptor::output(0, "frames", ANY_DATA)];

/// Longest uninterrupted sleep between cancellation checks.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// Source of stream frames, addressed by index.
///
/// The streamer stamps every frame it sends (last-frame flag, creation time,
/// streamer reference), so each call must return an object that has not been
/// handed out before. Sources that replay stored frames return
/// [`DataObject::duplicate`] copies.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send + 'static {
    /// Frame at `index`, or `None` past the end of the stream.
    fn data_frame(&mut self, index: u64) -> PipelineResult<Option<DataRef>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    #[default]
    ProcessAllFrames,
    NewestFrameOnly,
}

#[derive(Debug, Clone, Default)]
pub struct StreamerOptions {
    pub mode: StreamingMode,
    /// Minimum time between two frames. Zero streams as fast as consumers allow.
    pub frame_interval: Duration,
    /// Restart from the first frame forever.
    pub loop_frames: bool,
    /// Additional passes over the source before the stream ends.
    pub replays: u32,
}

impl StreamerOptions {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            mode: config.mode,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            loop_frames: config.loop_frames,
            replays: config.replays,
        }
    }
}

#[derive(Default)]
struct StreamProgress {
    frames_sent: AtomicU64,
    finished: AtomicBool,
    error: Mutex<Option<PipelineError>>,
}

pub struct Streamer<S: FrameSource> {
    name: String,
    options: StreamerOptions,
    source: Mutex<Option<S>>,
    sender: Mutex<Option<StreamSender>>,
    tasks: Mutex<TaskGroup>,
    progress: Arc<StreamProgress>,
}

impl<S: FrameSource> Streamer<S> {
    pub fn new(name: impl Into<String>, source: S, options: StreamerOptions) -> Self {
        let name = name.into();
        Self {
            tasks: Mutex::new(TaskGroup::new(name.clone())),
            name,
            options,
            source: Mutex::new(Some(source)),
            sender: Mutex::new(None),
            progress: Arc::new(StreamProgress::default()),
        }
    }

    pub fn options(&self) -> &StreamerOptions {
        &self.options
    }

    pub fn frames_sent(&self) -> u64 {
        self.progress.frames_sent.load(Ordering::Acquire)
    }

    /// Whether the producer thread has started.
    pub fn is_started(&self) -> bool {
        self.source.lock().is_none()
    }

    /// Whether the producer thread has ended, for any reason.
    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::Acquire)
    }

    /// The error that ended the stream, if any.
    pub fn error(&self) -> Option<PipelineError> {
        self.progress.error.lock().clone()
    }
}

impl<S: FrameSource> ProcessObject for Streamer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> PipelineResult<()> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        let Some(source) = self.source.lock().take() else {
            return Ok(());
        };

        let sender = ctx.stream_sender();
        *self.sender.lock() = Some(sender.clone());
        let options = self.options.clone();
        let progress = self.progress.clone();
        tracing::info!("Starting streamer {} ({:?})", self.name, options.mode);
        self.tasks.lock().spawn("producer", move |token| {
            produce(source, sender, options, token, progress)
        })
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn output_channel_kind(&self, _port: u32) -> ChannelKind {
        match self.options.mode {
            StreamingMode::ProcessAllFrames => ChannelKind::Queued,
            StreamingMode::NewestFrameOnly => ChannelKind::NewestOnly,
        }
    }

    fn stop(&self, reason: &str) {
        let mut tasks = self.tasks.lock();
        tasks.cancel();
        if let Some(sender) = self.sender.lock().as_ref() {
            sender.stop(reason);
        }
        tasks.join();
    }
}

impl<S: FrameSource> Drop for Streamer<S> {
    fn drop(&mut self) {
        self.stop("streamer dropped");
    }
}

// ── Producer thread ──

fn produce<S: FrameSource>(
    mut source: S,
    sender: StreamSender,
    options: StreamerOptions,
    token: CancellationToken,
    progress: Arc<StreamProgress>,
) {
    match stream_frames(&mut source, &sender, &options, &token, &progress) {
        Ok(()) => tracing::info!(
            "Streamer finished after {} frames",
            progress.frames_sent.load(Ordering::Acquire)
        ),
        Err(e) if e.is_cancelled() => tracing::debug!("Streamer stopped: {}", e),
        Err(e) => {
            tracing::error!("Streamer failed: {}", e);
            let reason = e.to_string();
            *progress.error.lock() = Some(e);
            sender.stop(&reason);
        }
    }
    progress.finished.store(true, Ordering::Release);
}

fn stream_frames<S: FrameSource>(
    source: &mut S,
    sender: &StreamSender,
    options: &StreamerOptions,
    token: &CancellationToken,
    progress: &StreamProgress,
) -> PipelineResult<()> {
    let mut pass: u32 = 0;
    loop {
        let final_pass = !options.loop_frames && pass >= options.replays;
        let Some(mut current) = source.data_frame(0)? else {
            return Err(PipelineError::Configuration(
                "frame source produced no frames".into(),
            ));
        };

        let mut index: u64 = 0;
        let mut last_sent: Option<Instant> = None;
        loop {
            if token.is_cancelled() {
                return Err(PipelineError::cancelled("streamer stopped"));
            }
            let next = source.data_frame(index + 1)?;
            if next.is_none() && final_pass {
                current.set_last_frame(true);
            }

            if let Some(sent) = last_sent {
                wait_until(sent + options.frame_interval, token)?;
            }
            current
                .core()
                .set_creation_timestamp(chrono::Utc::now().timestamp_millis());
            tracing::trace!("Streaming frame {} (pass {})", index, pass);
            progress.frames_sent.fetch_add(1, Ordering::AcqRel);
            sender.send(0, current)?;
            last_sent = Some(Instant::now());

            index += 1;
            match next {
                Some(frame) => current = frame,
                None => break,
            }
        }

        if final_pass {
            return Ok(());
        }
        pass = pass.saturating_add(1);
    }
}

/// Sleep until `deadline`, waking early with cancellation.
fn wait_until(deadline: Instant, token: &CancellationToken) -> PipelineResult<()> {
    loop {
        if token.is_cancelled() {
            return Err(PipelineError::cancelled("streamer stopped"));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

// ==================== Convenience sources ====================

/// Streams a fixed list of frames.
///
/// Each stored frame is handed out as is the first time; later passes get
/// duplicates.
pub struct VecSource {
    frames: Vec<DataRef>,
    handed_out: Vec<bool>,
}

impl VecSource {
    pub fn new(frames: Vec<DataRef>) -> Self {
        let handed_out = vec![false; frames.len()];
        Self { frames, handed_out }
    }
}

impl FrameSource for VecSource {
    fn data_frame(&mut self, index: u64) -> PipelineResult<Option<DataRef>> {
        let Some(i) = usize::try_from(index).ok().filter(|&i| i < self.frames.len()) else {
            return Ok(None);
        };
        if std::mem::replace(&mut self.handed_out[i], true) {
            self.frames[i].duplicate().map(Some)
        } else {
            Ok(Some(self.frames[i].clone()))
        }
    }
}

/// Streams frames produced by a closure.
pub struct FnSource<F> {
    func: F,
}

impl<F> FnSource<F>
where
    F: FnMut(u64) -> PipelineResult<Option<DataRef>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> FrameSource for FnSource<F>
where
    F: FnMut(u64) -> PipelineResult<Option<DataRef>> + Send + 'static,
{
    fn data_frame(&mut self, index: u64) -> PipelineResult<Option<DataRef>> {
        (self.func)(index)
    }
}
