//! Stress runners for obj-sync.
//!
//! These run many writers against one object at once and report what the
//! store committed.

use objsync_protocol::{ObjectHints, SyncObject};
use objsync_server::{CommandProcessor, Invocation, ObjectStateStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations per thread.
    pub operations_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            operations_per_thread: 50,
        }
    }
}

/// Result of [`stress_concurrent_appends`].
#[derive(Debug, Clone)]
pub struct AppendStressResult {
    /// Throughput and failure counts.
    pub result: StressTestResult,
    /// Change index returned by every successful append, per thread in
    /// call order.
    pub indices: Vec<Vec<u64>>,
}

impl AppendStressResult {
    /// Returns every committed index, sorted.
    pub fn sorted_indices(&self) -> Vec<u64> {
        let mut all: Vec<u64> = self.indices.iter().flatten().copied().collect();
        all.sort_unstable();
        all
    }
}

/// Appends single events to `obj_id` from `config.threads` threads at once.
///
/// The object must already exist.
pub fn stress_concurrent_appends(
    objects: Arc<ObjectStateStore>,
    obj_id: &str,
    config: &StressConfig,
) -> AppendStressResult {
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let objects = Arc::clone(&objects);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);
            let obj_id = obj_id.to_string();
            let ops = config.operations_per_thread;

            thread::spawn(move || {
                barrier.wait();
                let mut indices = Vec::with_capacity(ops);
                for i in 0..ops {
                    let event = json!({"type": "set", "prop": format!("t{t}"), "value": i});
                    match objects.append(&obj_id, &[event.into()]) {
                        Ok(outcome) => indices.push(outcome.change_index),
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                indices
            })
        })
        .collect();

    let indices: Vec<Vec<u64>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .collect();

    let successful = indices.iter().map(Vec::len).sum();
    AppendStressResult {
        result: StressTestResult::new(successful, failed.load(Ordering::Relaxed), start.elapsed()),
        indices,
    }
}

/// Calls `get_or_create` for `obj_id` from `threads` threads at once.
///
/// Returns the object each thread observed; failed calls are dropped.
pub fn stress_concurrent_bootstrap(
    objects: Arc<ObjectStateStore>,
    obj_id: &str,
    threads: usize,
    hints: ObjectHints,
) -> Vec<SyncObject> {
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let objects = Arc::clone(&objects);
            let barrier = Arc::clone(&barrier);
            let obj_id = obj_id.to_string();
            let hints = hints.clone();

            thread::spawn(move || {
                barrier.wait();
                objects.get_or_create(&obj_id, &format!("c{t}"), &hints).ok()
            })
        })
        .collect();

    handles
        .into_iter()
        .filter_map(|handle| handle.join().expect("Thread panicked"))
        .collect()
}

/// Registers one client per thread on `obj_id` and has every client send
/// `config.operations_per_thread` `evt` commands concurrently.
///
/// Client `t` uses socket `stress-s{t}` and client id `stress-c{t}`.
pub fn stress_concurrent_commands(
    processor: Arc<CommandProcessor>,
    obj_id: &str,
    config: &StressConfig,
) -> StressTestResult {
    for t in 0..config.threads {
        let join = json!([
            {"type": "createClient", "objId": obj_id, "clientId": format!("stress-c{t}")},
            {"type": "get", "objId": obj_id, "clientId": format!("stress-c{t}")},
        ]);
        processor
            .handle(&Invocation::message(format!("stress-s{t}"), join.to_string()))
            .expect("Failed to register stress client");
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let processor = Arc::clone(&processor);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);
            let obj_id = obj_id.to_string();
            let ops = config.operations_per_thread;

            thread::spawn(move || {
                barrier.wait();
                for i in 0..ops {
                    let evt = json!({
                        "type": "evt",
                        "objId": obj_id,
                        "clientId": format!("stress-c{t}"),
                        "evts": [{"type": "set", "prop": format!("t{t}"), "value": i}],
                    });
                    let invocation = Invocation::message(format!("stress-s{t}"), evt.to_string());
                    match processor.handle(&invocation) {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_server::{HintedDefaultState, RetryConfig};
    use objsync_store::InMemoryStore;

    fn objects() -> Arc<ObjectStateStore> {
        Arc::new(ObjectStateStore::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HintedDefaultState),
            RetryConfig::no_retry(),
        ))
    }

    #[test]
    fn appends_commit_distinct_indices() {
        let objects = objects();
        objects
            .get_or_create("o1", "c0", &ObjectHints::default())
            .unwrap();

        let config = StressConfig {
            threads: 4,
            operations_per_thread: 25,
        };
        let run = stress_concurrent_appends(objects, "o1", &config);
        assert_eq!(run.result.failed_ops, 0);
        assert_eq!(run.sorted_indices(), (1..=100).collect::<Vec<u64>>());
    }

    #[test]
    fn bootstrap_observes_one_row() {
        let observed = stress_concurrent_bootstrap(objects(), "o1", 8, ObjectHints::default());
        assert_eq!(observed.len(), 8);
        assert!(observed.windows(2).all(|w| w[0] == w[1]));
    }
}
