//! Managed worker threads.
//!
//! Every background thread in the pipeline (streamer producers, synchronizer
//! workers) belongs to a [`TaskGroup`]. The group hands each thread a clone of
//! its cancellation token and joins all of them when it is dropped, so no
//! thread outlives the object that started it.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TaskGroup {
    name: String,
    token: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a named worker. The closure receives the group's token.
    pub fn spawn<F>(&mut self, name: &str, f: F) -> PipelineResult<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let thread_name = format!("{}-{}", self.name, name);
        let token = self.token.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || f(token))
            .map_err(|e| {
                PipelineError::Configuration(format!("failed to spawn {}: {}", thread_name, e))
            })?;
        tracing::debug!("Spawned task {}", thread_name);
        self.handles.push((thread_name, handle));
        Ok(())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of workers that have not yet returned.
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Wait for every worker. Panics inside workers are logged, not propagated.
    pub fn join(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            if handle.thread().id() == std::thread::current().id() {
                tracing::warn!("Task {} attempted to join itself", name);
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Task {} panicked", name);
            } else {
                tracing::trace!("Task {} joined", name);
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_drop_cancels_and_joins() {
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let mut group = TaskGroup::new("test");
            for i in 0..3 {
                let finished = finished.clone();
                group
                    .spawn(&format!("worker{}", i), move |token| {
                        while !token.is_cancelled() {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        finished.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
            assert_eq!(group.len(), 3);
        }
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_worker_is_contained() {
        let mut group = TaskGroup::new("panic");
        group.spawn("boom", |_| panic!("worker failure")).unwrap();
        group.join();
        assert!(group.is_empty());
    }

    #[test]
    fn test_running_count() {
        let mut group = TaskGroup::new("count");
        group.spawn("quick", |_| {}).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(group.running(), 0);
        assert!(!group.is_cancelled());
        group.cancel();
        assert!(group.is_cancelled());
    }
}
