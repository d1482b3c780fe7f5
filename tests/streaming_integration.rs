//! End-to-end streaming: streamer → processing → sink, and stream alignment

mod common;

use common::builders::{FrameSequenceBuilder, StreamerBuilder};
use medflow::config::EngineConfig;
use medflow::data::{downcast_data, DataObject, DataRef, Value};
use medflow::pipeline::nodes::{FrameRecorder, StreamingMode, Transform};
use medflow::pipeline::{FramerateSynchronizer, Node, Pipeline, PipelineError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn plus_one(executions: Arc<AtomicUsize>) -> Transform {
    Transform::new("PlusOne", move |frame, _| {
        executions.fetch_add(1, Ordering::SeqCst);
        let value = downcast_data::<Value<u64>>(frame.clone())?.get()?;
        Ok(Value::create(value + 1) as DataRef)
    })
}

#[test]
fn test_stream_processes_every_frame_once_in_order() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut pipeline = Pipeline::new(EngineConfig::default());
    let source = pipeline.add_node(StreamerBuilder::new("Frames").build());
    let transform = pipeline.add_node(plus_one(executions.clone()));
    let sink = pipeline.add_node(FrameRecorder::new());
    pipeline.connect(source, 0, transform, 0).unwrap();
    pipeline.connect(transform, 0, sink, 0).unwrap();

    let frames = pipeline.run_until_last_frame(sink, 0, 100).unwrap();

    let values: Vec<u64> = frames.iter().map(common::value_of).collect();
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
    assert_eq!(executions.load(Ordering::SeqCst), 10);
    assert!(frames.last().unwrap().is_last_frame());
    assert_eq!(frames.iter().filter(|f| f.is_last_frame()).count(), 1);

    let recorder = pipeline.node(sink).unwrap().clone();
    let recorder = recorder.process_object::<FrameRecorder>().unwrap();
    assert_eq!(recorder.frame_count(), 10);
    assert!(recorder.is_finished());
}

#[test]
fn test_newest_only_stream_skips_but_ends_on_last_frame() {
    let mut pipeline = Pipeline::new(EngineConfig::default());
    let source = pipeline.add_node(
        StreamerBuilder::new("Latest")
            .frames(FrameSequenceBuilder::new(20).build())
            .mode(StreamingMode::NewestFrameOnly)
            .interval_ms(1)
            .build(),
    );
    let sink = pipeline.add_node(FrameRecorder::new());
    pipeline.connect(source, 0, sink, 0).unwrap();

    let frames = pipeline.run_until_last_frame(sink, 0, 100).unwrap();
    let values: Vec<u64> = frames.iter().map(common::value_of).collect();

    assert!(!values.is_empty() && values.len() <= 20);
    common::assert_strictly_increasing(&values);
    assert_eq!(*values.last().unwrap(), 19);
}

#[test]
fn test_failure_propagates_verbatim_and_is_retryable() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = Transform::new("Flaky", move |frame, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(PipelineError::Device("transient".into()));
        }
        Ok(frame.clone())
    });

    let source = Node::new(medflow::pipeline::nodes::InputData::new(Value::create(5u64)));
    let node = Node::new(flaky);
    node.connect(0, &source, 0).unwrap();
    let sink = Node::new(FrameRecorder::new());
    sink.connect(0, &node, 0).unwrap();

    assert_eq!(
        sink.update().unwrap_err(),
        PipelineError::Device("transient".into())
    );
    assert!(matches!(node.output_frame(0), Err(PipelineError::NoFrame)));

    let frame = sink.run().unwrap();
    assert_eq!(common::value_of(&frame), 5);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// Pull tuples from a synchronizer until its inputs are exhausted.
fn collect_tuples(sync: &Arc<Node>, max: usize) -> Vec<(u64, u64)> {
    let mut tuples = Vec::new();
    for _ in 0..max {
        match sync.update() {
            Ok(()) => tuples.push((
                common::value_of(&sync.output_frame(0).unwrap()),
                common::value_of(&sync.output_frame(1).unwrap()),
            )),
            Err(e) if e.is_cancelled() => break,
            Err(e) => panic!("unexpected synchronizer error: {}", e),
        }
    }
    tuples
}

#[test]
fn test_framerate_sync_without_priority() {
    let mut pipeline = Pipeline::new(EngineConfig::default());
    let fast = pipeline.add_node(
        StreamerBuilder::new("Fast")
            .frames(FrameSequenceBuilder::new(30).build())
            .interval_ms(2)
            .build(),
    );
    let slow = pipeline.add_node(
        StreamerBuilder::new("Slow")
            .frames(FrameSequenceBuilder::new(5).build())
            .interval_ms(20)
            .build(),
    );
    let sync = pipeline.add_node(FramerateSynchronizer::new(2, None).unwrap());
    pipeline.connect(fast, 0, sync, 0).unwrap();
    pipeline.connect(slow, 0, sync, 1).unwrap();

    let node = pipeline.node(sync).unwrap().clone();
    let tuples = collect_tuples(&node, 500);

    assert!(!tuples.is_empty());
    assert!(tuples.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
    assert!(tuples.windows(2).all(|w| w[0] != w[1]));
    assert!(tuples.iter().all(|&(f, s)| f < 30 && s < 5));
    assert_eq!(*tuples.last().unwrap(), (29, 4));
}

#[test]
fn test_framerate_sync_follows_priority_port() {
    let mut pipeline = Pipeline::new(EngineConfig::default());
    let fast = pipeline.add_node(
        StreamerBuilder::new("Fast")
            .frames(FrameSequenceBuilder::new(40).build())
            .interval_ms(2)
            .build(),
    );
    let slow = pipeline.add_node(
        StreamerBuilder::new("Slow")
            .frames(FrameSequenceBuilder::new(5).build())
            .interval_ms(15)
            .build(),
    );
    let sync = pipeline.add_node(FramerateSynchronizer::new(2, Some(1)).unwrap());
    pipeline.connect(fast, 0, sync, 0).unwrap();
    pipeline.connect(slow, 0, sync, 1).unwrap();

    let node = pipeline.node(sync).unwrap().clone();
    let tuples = collect_tuples(&node, 500);

    let slow_values: Vec<u64> = tuples.iter().map(|&(_, s)| s).collect();
    assert_eq!(slow_values, vec![0, 1, 2, 3, 4]);
    assert!(tuples.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[test]
fn test_stopping_pipeline_unblocks_synchronizer() {
    let mut pipeline = Pipeline::new(EngineConfig::default());
    let a = pipeline.add_node(
        StreamerBuilder::new("A")
            .frames(FrameSequenceBuilder::new(1000).build())
            .interval_ms(50)
            .build(),
    );
    let b = pipeline.add_node(
        StreamerBuilder::new("B")
            .frames(FrameSequenceBuilder::new(1000).build())
            .interval_ms(50)
            .build(),
    );
    let sync = pipeline.add_node(FramerateSynchronizer::new(2, Some(0)).unwrap());
    pipeline.connect(a, 0, sync, 0).unwrap();
    pipeline.connect(b, 0, sync, 1).unwrap();
    let node = pipeline.node(sync).unwrap().clone();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(100));
        pipeline.stop("test finished");
        pipeline
    });

    let result = common::finishes_within(common::test_timeout(), move || {
        let mut last = Ok(());
        for _ in 0..1000 {
            last = node.update();
            if last.is_err() {
                break;
            }
        }
        last
    });
    assert!(result.unwrap_err().is_cancelled());
    drop(stopper.join().unwrap());
}
