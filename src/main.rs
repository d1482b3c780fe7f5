//! medflow demo - Main Entry Point
//!
//! Streams a short synthetic image sequence through a processing chain, then
//! aligns two streams running at different rates.
//!
//! Usage: `medflow [config.toml]`

use anyhow::Context;
use medflow::{
    config::{EngineConfig, CONFIG_FILE_NAME},
    data::{downcast_data, AccessMode, Buffer, DataRef, Value},
    device::DeviceManager,
    pipeline::{
        nodes::{FnSource, FrameRecorder, Streamer, StreamerOptions, Transform},
        FramerateSynchronizer, Pipeline, PipelineResult,
    },
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const WIDTH: usize = 8;
const HEIGHT: usize = 8;
const FRAME_COUNT: u64 = 10;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = if config_path.exists() {
        EngineConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        EngineConfig::default()
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting medflow demo");

    run_processing_chain(&config)?;
    run_synchronized_streams(&config)?;

    tracing::info!("Shutting down...");
    Ok(())
}

/// Streamer → Invert → FrameRecorder over a synthetic image sequence.
fn run_processing_chain(config: &EngineConfig) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::new(config.clone());

    let source = FnSource::new(|index| {
        if index >= FRAME_COUNT {
            return Ok(None);
        }
        let pixels: Vec<f32> = (0..WIDTH * HEIGHT)
            .map(|i| ((i as u64 + index) % 255) as f32)
            .collect();
        Ok(Some(Buffer::create(WIDTH * HEIGHT, &pixels)? as DataRef))
    });
    let streamer = pipeline.add_node(Streamer::new(
        "SyntheticImages",
        source,
        StreamerOptions::from_config(&config.streaming),
    ));
    let invert = pipeline.add_node(Transform::new("Invert", |frame, _device| invert(frame)));
    let recorder = pipeline.add_node(FrameRecorder::new());

    pipeline.connect(streamer, 0, invert, 0)?;
    pipeline.connect(invert, 0, recorder, 0)?;

    let frames = pipeline.run_until_last_frame(recorder, 0, FRAME_COUNT as usize * 4)?;
    tracing::info!("Processed {} frames", frames.len());

    if let Some(last) = frames.last() {
        let image = downcast_data::<Buffer<f32>>(last.clone())?;
        let host = DeviceManager::global().host();
        let guard = image.image_access(AccessMode::Read, host.as_ref(), WIDTH, HEIGHT)?;
        tracing::info!("Last frame top-left pixel: {:?}", guard.get()?.pixel(0, 0));
    }

    tracing::info!("Topology:\n{}", pipeline.topology().to_json()?);
    pipeline.stop("demo finished");
    Ok(())
}

fn invert(frame: &DataRef) -> PipelineResult<DataRef> {
    let input = downcast_data::<Buffer<f32>>(frame.clone())?;
    let guard = input.host_access(AccessMode::Read)?;
    let pixels: Vec<f32> = guard.get()?.read().iter().map(|v| 255.0 - v).collect();
    Ok(Buffer::create(pixels.len(), &pixels)? as DataRef)
}

/// Two streams at different rates aligned by a FramerateSynchronizer.
fn run_synchronized_streams(config: &EngineConfig) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::new(config.clone());

    let fast = pipeline.add_node(Streamer::new(
        "Fast",
        counter(FRAME_COUNT * 3),
        StreamerOptions {
            frame_interval: Duration::from_millis(5),
            ..Default::default()
        },
    ));
    let slow = pipeline.add_node(Streamer::new(
        "Slow",
        counter(FRAME_COUNT),
        StreamerOptions {
            frame_interval: Duration::from_millis(15),
            ..Default::default()
        },
    ));
    let sync = pipeline.add_node(FramerateSynchronizer::from_config(2, &config.synchronizer)?);

    pipeline.connect(fast, 0, sync, 0)?;
    pipeline.connect(slow, 0, sync, 1)?;

    let node = pipeline.node(sync)?.clone();
    for _ in 0..FRAME_COUNT {
        match node.update() {
            Ok(()) => {
                let a = node.output_data::<Value<u64>>(0)?.get()?;
                let b = node.output_data::<Value<u64>>(1)?.get()?;
                tracing::info!("Aligned frames: fast={} slow={}", a, b);
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("Synchronizer inputs ended");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    pipeline.stop("demo finished");
    Ok(())
}

fn counter(
    frames: u64,
) -> FnSource<impl FnMut(u64) -> PipelineResult<Option<DataRef>> + Send + 'static> {
    FnSource::new(move |index| Ok((index < frames).then(|| Value::create(index) as DataRef)))
}
