mod common;

use common::init_logging;
use s1ard::core::dispatch::{DispatchOptions, Dispatcher, ExecutionStrategy, WorkUnit};
use s1ard::core::retry::{Backoff, RetryPolicy};
use s1ard::types::ArdError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Job(usize);

impl WorkUnit for Job {
    fn key(&self) -> String {
        format!("job-{}", self.0)
    }

    fn group(&self) -> String {
        (self.0 % 2).to_string()
    }

    fn is_complete(&self) -> bool {
        false
    }
}

#[test]
fn test_io_pool_respects_requested_size() {
    init_logging();
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let options = DispatchOptions::new(ExecutionStrategy::IoBound, 3, RetryPolicy::once());
    let results = Dispatcher::dispatch(
        |job: &Job| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(job.0)
        },
        (0..12).map(Job).collect(),
        &options,
    )
    .expect("Dispatch failed");

    println!("Peak concurrency: {}", peak.load(Ordering::SeqCst));
    assert_eq!(results.len(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);

    let mut values: Vec<usize> = results.into_iter().map(|r| r.outcome.unwrap()).collect();
    values.sort();
    assert_eq!(values, (0..12).collect::<Vec<_>>());
}

#[test]
fn test_failure_does_not_cancel_siblings() {
    init_logging();
    let options = DispatchOptions::new(ExecutionStrategy::CpuBound, 4, RetryPolicy::once());
    let results = Dispatcher::dispatch(
        |job: &Job| {
            if job.0 == 3 {
                return Err(ArdError::Processing("broken input".to_string()));
            }
            Ok(())
        },
        (0..8).map(Job).collect(),
        &options,
    )
    .unwrap();

    let failed: Vec<String> = results
        .iter()
        .filter(|r| r.outcome.is_err())
        .map(|r| r.unit.key())
        .collect();
    assert_eq!(results.len(), 8);
    assert_eq!(failed, vec!["job-3"]);
}

#[test]
fn test_in_worker_retry_counts_attempts() {
    init_logging();
    let seen = Mutex::new(Vec::new());
    let options = DispatchOptions::new(
        ExecutionStrategy::IoBound,
        2,
        RetryPolicy::new(3, Backoff::Fixed { millis: 1 }),
    );
    let results = Dispatcher::dispatch(
        |job: &Job| {
            let mut seen = seen.lock().unwrap();
            let tries = seen.iter().filter(|k| **k == job.0).count();
            seen.push(job.0);
            match job.0 {
                // Succeeds on the second attempt
                0 if tries == 0 => Err(ArdError::Transport("timeout".to_string())),
                // Never worth retrying
                1 => Err(ArdError::MissingFromArchive("gone".to_string())),
                _ => Ok(()),
            }
        },
        vec![Job(0), Job(1)],
        &options,
    )
    .unwrap();

    for result in &results {
        match result.unit.0 {
            0 => {
                assert!(result.outcome.is_ok());
                assert_eq!(result.attempts, 2);
            }
            _ => {
                assert!(matches!(result.outcome, Err(ArdError::MissingFromArchive(_))));
                assert_eq!(result.attempts, 1);
            }
        }
    }
}
