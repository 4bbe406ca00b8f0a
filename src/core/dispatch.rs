//! Bounded worker pools over a list of units.
//!
//! A unit's failure, including a panic inside the work function, is captured
//! as that unit's result and never cancels its siblings. Results arrive in
//! completion order; callers reconcile against the marker files.

use crate::core::retry::{panic_message, RetryPolicy};
use crate::types::{ArdError, ArdResult};
use rayon::ThreadPoolBuilder;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

/// How the pool is sized for the kind of work it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Downloads: workers mostly block on sockets, the pool gets exactly
    /// the requested number of threads
    IoBound,
    /// Transforms: each worker blocks on one engine subprocess, the pool is
    /// capped at the number of cores
    CpuBound,
}

impl ExecutionStrategy {
    pub fn pool_size(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match self {
            ExecutionStrategy::IoBound => requested,
            ExecutionStrategy::CpuBound => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                requested.min(cores)
            }
        }
    }

    fn thread_prefix(&self) -> &'static str {
        match self {
            ExecutionStrategy::IoBound => "s1ard-io",
            ExecutionStrategy::CpuBound => "s1ard-cpu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub strategy: ExecutionStrategy,
    pub concurrency: usize,
    /// In-worker retry of each unit
    pub retry: RetryPolicy,
}

impl DispatchOptions {
    pub fn new(strategy: ExecutionStrategy, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            strategy,
            concurrency,
            retry,
        }
    }
}

/// Anything the dispatcher and batch driver can schedule
pub trait WorkUnit: Clone + Send + Sync {
    /// Unique key of the unit within its stage
    fn key(&self) -> String;
    /// Group the unit belongs to (track or burst id)
    fn group(&self) -> String;
    /// Completion predicate, read from the filesystem every time
    fn is_complete(&self) -> bool;
}

/// One unit's outcome
#[derive(Debug)]
pub struct UnitResult<U, T> {
    pub unit: U,
    pub attempts: u32,
    pub outcome: ArdResult<T>,
}

pub struct Dispatcher;

impl Dispatcher {
    /// Run `work` over `units` on a pool chosen by `options`
    pub fn dispatch<U, T, F>(work: F, units: Vec<U>, options: &DispatchOptions) -> ArdResult<Vec<UnitResult<U, T>>>
    where
        U: WorkUnit,
        T: Send,
        F: Fn(&U) -> ArdResult<T> + Sync,
    {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let pool_size = options.strategy.pool_size(options.concurrency).min(units.len());
        let prefix = options.strategy.thread_prefix();
        let pool = ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| ArdError::Processing(format!("Failed to build worker pool: {}", e)))?;

        log::debug!(
            "Dispatching {} unit(s) on {} {:?} worker(s)",
            units.len(),
            pool_size,
            options.strategy
        );

        let total = units.len();
        let (tx, rx) = mpsc::channel();
        let work = &work;
        let retry = options.retry;

        pool.scope(|scope| {
            for unit in units {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let key = unit.key();
                    let mut attempts = 0;
                    let outcome = retry.run(&key, |attempt| {
                        attempts = attempt;
                        catch_unwind(AssertUnwindSafe(|| work(&unit)))
                            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
                    });
                    if let Err(e) = &outcome {
                        log::warn!("Unit {} failed: {}", key, e);
                    }
                    // Receiver outlives the scope
                    let _ = tx.send(UnitResult { unit, attempts, outcome });
                });
            }
        });
        drop(tx);

        let results: Vec<UnitResult<U, T>> = rx.into_iter().collect();
        if results.len() != total {
            return Err(ArdError::Processing(format!(
                "Worker pool returned {} of {} results",
                results.len(),
                total
            )));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Numbered(u32);

    impl WorkUnit for Numbered {
        fn key(&self) -> String {
            self.0.to_string()
        }
        fn group(&self) -> String {
            "g".to_string()
        }
        fn is_complete(&self) -> bool {
            false
        }
    }

    #[test]
    fn cpu_bound_pool_is_capped() {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(ExecutionStrategy::CpuBound.pool_size(cores * 4), cores);
        assert_eq!(ExecutionStrategy::IoBound.pool_size(16), 16);
        assert_eq!(ExecutionStrategy::IoBound.pool_size(0), 1);
    }

    #[test]
    fn panic_is_contained_to_its_unit() {
        let options = DispatchOptions::new(ExecutionStrategy::CpuBound, 2, RetryPolicy::once());
        let results = Dispatcher::dispatch(
            |u: &Numbered| {
                if u.0 == 2 {
                    panic!("engine wrapper crashed");
                }
                Ok(u.0 * 10)
            },
            (1..=4).map(Numbered).collect(),
            &options,
        )
        .unwrap();
        assert_eq!(results.len(), 4);
        let failed: Vec<u32> = results.iter().filter(|r| r.outcome.is_err()).map(|r| r.unit.0).collect();
        assert_eq!(failed, vec![2]);
    }
}
