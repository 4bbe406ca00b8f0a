//! Retry-bounded batch driver.
//!
//! Each stage walks `PENDING -> DISPATCHED -> RECONCILED` and then either
//! loops back to `DISPATCHED`, finishes in `DONE` or gives up in `ABORTED`
//! once the pass cap is reached. Completion is always re-read from the
//! marker files after a pass; in-memory success flags are only used to
//! report the last error of a unit.

use crate::core::dispatch::{DispatchOptions, Dispatcher, WorkUnit};
use crate::types::{ArdError, ArdResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Pipeline stages driven independently and strictly in sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Ard,
    Timeseries,
    Timescan,
    MosaicTimeseries,
    MosaicTimescan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Ard => "ard",
            Stage::Timeseries => "timeseries",
            Stage::Timescan => "timescan",
            Stage::MosaicTimeseries => "mosaic-timeseries",
            Stage::MosaicTimescan => "mosaic-timescan",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Dispatched,
    Reconciled,
    Done,
    Aborted,
}

/// A unit that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedUnit {
    pub key: String,
    pub group: String,
    pub last_error: Option<String>,
    /// Failed with a permanent error and was excluded from later passes
    pub permanent: bool,
}

/// Final account of one stage run
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub state: StageState,
    pub passes: u32,
    pub total_units: usize,
    /// Work function invocations across all passes
    pub invocations: usize,
    pub completed: Vec<String>,
    /// Units still incomplete when the pass cap was hit
    pub unresolved: Vec<UnresolvedUnit>,
    /// Units excluded after a permanent failure
    pub excluded: Vec<UnresolvedUnit>,
}

impl StageReport {
    fn empty(stage: Stage) -> Self {
        Self {
            stage,
            state: StageState::Done,
            passes: 0,
            total_units: 0,
            invocations: 0,
            completed: Vec::new(),
            unresolved: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == StageState::Done
    }

    /// Aborted, or done with permanently failed units
    pub fn is_partial(&self) -> bool {
        self.state == StageState::Aborted || !self.excluded.is_empty()
    }

    /// Groups with at least one unit that did not complete, for any reason
    pub fn incomplete_groups(&self) -> BTreeSet<String> {
        self.unresolved
            .iter()
            .chain(self.excluded.iter())
            .map(|u| u.group.clone())
            .collect()
    }

    /// Groups still waiting on retryable units. Downstream stages must not
    /// start these groups.
    pub fn blocked_groups(&self) -> BTreeSet<String> {
        self.unresolved.iter().map(|u| u.group.clone()).collect()
    }

    /// Converts an aborted stage into [`ArdError::BatchPartiallyIncomplete`]
    pub fn into_result(self) -> ArdResult<Self> {
        if self.state == StageState::Aborted {
            return Err(ArdError::BatchPartiallyIncomplete {
                stage: self.stage.to_string(),
                unresolved: self.unresolved.iter().map(|u| u.key.clone()).collect(),
            });
        }
        Ok(self)
    }
}

/// Schedules the not-yet-complete units of a stage, pass after pass
#[derive(Debug, Clone, Copy)]
pub struct BatchDriver {
    pub max_passes: u32,
    pub options: DispatchOptions,
}

impl BatchDriver {
    pub fn new(max_passes: u32, options: DispatchOptions) -> Self {
        Self { max_passes, options }
    }

    pub fn run_stage<U, T, F>(&self, stage: Stage, units: Vec<U>, work: F) -> ArdResult<StageReport>
    where
        U: WorkUnit,
        T: Send,
        F: Fn(&U) -> ArdResult<T> + Sync,
    {
        if units.is_empty() {
            log::debug!("Stage {}: no units", stage);
            return Ok(StageReport::empty(stage));
        }

        let max_passes = self.max_passes.max(1);
        let mut state = StageState::Pending;
        let mut passes = 0;
        let mut invocations = 0;
        let mut incomplete: Vec<U> = Vec::new();
        let mut last_errors: BTreeMap<String, String> = BTreeMap::new();
        let mut excluded: BTreeMap<String, UnresolvedUnit> = BTreeMap::new();

        loop {
            state = match state {
                StageState::Pending => {
                    incomplete = Self::outstanding(&units, &excluded);
                    if incomplete.is_empty() {
                        log::info!("Stage {}: all {} unit(s) already complete", stage, units.len());
                        StageState::Done
                    } else {
                        StageState::Dispatched
                    }
                }
                StageState::Dispatched => {
                    passes += 1;
                    log::info!(
                        "Stage {} pass {}/{}: {} of {} unit(s) outstanding",
                        stage,
                        passes,
                        max_passes,
                        incomplete.len(),
                        units.len()
                    );
                    invocations += incomplete.len();
                    let results = Dispatcher::dispatch(&work, std::mem::take(&mut incomplete), &self.options)?;
                    for result in results {
                        if let Err(e) = result.outcome {
                            let key = result.unit.key();
                            if e.is_permanent() {
                                log::error!("Stage {}: excluding unit {}: {}", stage, key, e);
                                excluded.insert(
                                    key.clone(),
                                    UnresolvedUnit {
                                        key: key.clone(),
                                        group: result.unit.group(),
                                        last_error: Some(e.to_string()),
                                        permanent: true,
                                    },
                                );
                            }
                            last_errors.insert(key, e.to_string());
                        }
                    }
                    StageState::Reconciled
                }
                StageState::Reconciled => {
                    incomplete = Self::outstanding(&units, &excluded);
                    if incomplete.is_empty() {
                        StageState::Done
                    } else if passes >= max_passes {
                        StageState::Aborted
                    } else {
                        StageState::Dispatched
                    }
                }
                StageState::Done | StageState::Aborted => break,
            };
        }

        let unresolved: Vec<UnresolvedUnit> = incomplete
            .iter()
            .map(|u| {
                let key = u.key();
                UnresolvedUnit {
                    last_error: last_errors.get(&key).cloned(),
                    group: u.group(),
                    key,
                    permanent: false,
                }
            })
            .collect();

        let completed: Vec<String> = units.iter().filter(|u| u.is_complete()).map(|u| u.key()).collect();

        if state == StageState::Aborted {
            log::warn!(
                "Stage {} aborted after {} pass(es), {} unit(s) unresolved: {}",
                stage,
                passes,
                unresolved.len(),
                unresolved.iter().map(|u| u.key.as_str()).collect::<Vec<_>>().join(", ")
            );
        } else {
            log::info!("Stage {} done after {} pass(es)", stage, passes);
        }

        Ok(StageReport {
            stage,
            state,
            passes,
            total_units: units.len(),
            invocations,
            completed,
            unresolved,
            excluded: excluded.into_values().collect(),
        })
    }

    fn outstanding<U: WorkUnit>(units: &[U], excluded: &BTreeMap<String, UnresolvedUnit>) -> Vec<U> {
        units
            .iter()
            .filter(|u| !u.is_complete() && !excluded.contains_key(&u.key()))
            .cloned()
            .collect()
    }
}
