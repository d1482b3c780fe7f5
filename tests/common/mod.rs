//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use medflow::data::{downcast_data, DataRef, Value};
use std::time::Duration;

/// Upper bound for anything that is expected to wake up promptly
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Integer carried by a `Value<u64>` frame
pub fn value_of(frame: &DataRef) -> u64 {
    downcast_data::<Value<u64>>(frame.clone())
        .expect("frame is a Value<u64>")
        .get()
        .expect("value is readable")
}

/// Run `f` on another thread and fail the test if it does not return in time
pub fn finishes_within<T, F>(timeout: Duration, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| panic!("operation did not finish within {:?}", timeout))
}

/// Assert a sequence is strictly increasing
pub fn assert_strictly_increasing(values: &[u64]) {
    assert!(
        values.windows(2).all(|w| w[0] < w[1]),
        "Expected strictly increasing values, got {:?}",
        values
    );
}
