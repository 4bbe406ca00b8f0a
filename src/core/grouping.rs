//! Partitioning of inventories into processing units.

use crate::core::dispatch::WorkUnit;
use crate::io::marker::MarkerStore;
use crate::types::{ArdError, ArdResult, Burst, OrbitDirection, Scene, Subswath};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Anchors closer than this (seconds) belong to the same burst strip
pub const ANCHOR_TOLERANCE: i64 = 1;

/// All scene parts of one track acquired on one date
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub date: NaiveDate,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitInputs {
    /// Same-pass GRD slices, ordered by start time
    Scenes(Vec<Scene>),
    Burst(Burst),
}

/// One scene-date or burst-date, with its own output directory
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingUnit {
    pub group_key: String,
    pub date: NaiveDate,
    /// `processing_dir/<group_key>/<date>`
    pub out_dir: PathBuf,
    pub inputs: UnitInputs,
}

impl ProcessingUnit {
    pub fn date_label(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// File prefix of the unit's ARD products
    pub fn prefix(&self) -> String {
        match &self.inputs {
            UnitInputs::Scenes(_) => self.date_label(),
            UnitInputs::Burst(burst) => burst.ard_prefix(),
        }
    }
}

impl WorkUnit for ProcessingUnit {
    fn key(&self) -> String {
        format!("{}/{}", self.group_key, self.date_label())
    }

    fn group(&self) -> String {
        self.group_key.clone()
    }

    fn is_complete(&self) -> bool {
        MarkerStore::is_complete(&self.out_dir, None)
    }
}

pub struct Grouper;

impl Grouper {
    /// GRD: track -> chronologically ordered acquisitions
    pub fn group_scenes(scenes: &[Scene]) -> ArdResult<BTreeMap<u32, Vec<Acquisition>>> {
        if scenes.is_empty() {
            return Err(ArdError::EmptyInventory("no scenes to group".to_string()));
        }

        let mut by_track: BTreeMap<u32, BTreeMap<NaiveDate, Vec<Scene>>> = BTreeMap::new();
        for scene in scenes {
            by_track
                .entry(scene.relative_orbit())
                .or_default()
                .entry(scene.acquisition_date())
                .or_default()
                .push(scene.clone());
        }

        let groups = by_track
            .into_iter()
            .map(|(track, dates)| {
                let acquisitions = dates
                    .into_iter()
                    .map(|(date, mut parts)| {
                        parts.sort_by(|a, b| a.start_time.cmp(&b.start_time));
                        Acquisition { date, scenes: parts }
                    })
                    .collect();
                (track, acquisitions)
            })
            .collect::<BTreeMap<_, _>>();

        log::debug!("Grouped {} scene(s) into {} track(s)", scenes.len(), groups.len());
        Ok(groups)
    }

    /// Rewrite jittered anchors to a canonical value.
    ///
    /// Within each (direction, track, subswath) the distinct anchors are
    /// visited in ascending order; a run of anchors each within `tolerance`
    /// of its predecessor collapses onto the run's first (minimum) value.
    pub fn coalesce_anchors(bursts: &mut [Burst], tolerance: i64) {
        let mut strips: BTreeMap<(OrbitDirection, u32, Subswath), Vec<i64>> = BTreeMap::new();
        for burst in bursts.iter() {
            strips
                .entry((burst.direction, burst.track, burst.subswath))
                .or_default()
                .push(burst.anchor);
        }

        let mut canonical: BTreeMap<(OrbitDirection, u32, Subswath, i64), i64> = BTreeMap::new();
        for (strip, mut anchors) in strips {
            anchors.sort_unstable();
            anchors.dedup();
            let mut run_start: Option<(i64, i64)> = None; // (canonical, previous)
            for anchor in anchors {
                let target = match run_start {
                    Some((first, previous)) if anchor - previous <= tolerance => first,
                    _ => anchor,
                };
                run_start = Some((target, anchor));
                canonical.insert((strip.0, strip.1, strip.2, anchor), target);
            }
        }

        for burst in bursts.iter_mut() {
            if let Some(target) = canonical.get(&(burst.direction, burst.track, burst.subswath, burst.anchor)) {
                if *target != burst.anchor {
                    log::debug!("Coalescing anchor {} -> {} for {}", burst.anchor, target, burst.scene_id);
                    burst.anchor = *target;
                }
            }
        }
    }

    /// Coalesce anchors, then derive every burst's id
    pub fn assign_burst_ids(bursts: &mut [Burst], tolerance: i64) {
        Self::coalesce_anchors(bursts, tolerance);
        for burst in bursts.iter_mut() {
            burst.bid = Burst::burst_id(burst.direction, burst.track, burst.subswath, burst.anchor);
        }
    }

    /// SLC: burst id -> chronologically ordered (date, burst) pairs.
    /// A burst id seen twice on one date keeps the first scene's burst.
    pub fn group_bursts(bursts: &[Burst]) -> ArdResult<BTreeMap<String, Vec<(NaiveDate, Burst)>>> {
        if bursts.is_empty() {
            return Err(ArdError::EmptyInventory("no bursts to group".to_string()));
        }

        let mut groups: BTreeMap<String, BTreeMap<NaiveDate, Burst>> = BTreeMap::new();
        for burst in bursts {
            if burst.bid.is_empty() {
                return Err(ArdError::Inventory(format!(
                    "burst {} of {} has no burst id",
                    burst.burst_nr, burst.scene_id
                )));
            }
            let dates = groups.entry(burst.bid.clone()).or_default();
            if dates.contains_key(&burst.date) {
                log::debug!("Duplicate burst {} on {} from {}", burst.bid, burst.date, burst.scene_id);
                continue;
            }
            dates.insert(burst.date, burst.clone());
        }

        Ok(groups
            .into_iter()
            .map(|(bid, dates)| (bid, dates.into_iter().collect()))
            .collect())
    }

    pub fn scene_units<P: AsRef<Path>>(
        groups: &BTreeMap<u32, Vec<Acquisition>>,
        processing_dir: P,
    ) -> Vec<ProcessingUnit> {
        let mut units = Vec::new();
        for (track, acquisitions) in groups {
            let group_key = track.to_string();
            for acquisition in acquisitions {
                let date_label = acquisition.date.format("%Y%m%d").to_string();
                units.push(ProcessingUnit {
                    group_key: group_key.clone(),
                    date: acquisition.date,
                    out_dir: processing_dir.as_ref().join(&group_key).join(date_label),
                    inputs: UnitInputs::Scenes(acquisition.scenes.clone()),
                });
            }
        }
        units
    }

    pub fn burst_units<P: AsRef<Path>>(
        groups: &BTreeMap<String, Vec<(NaiveDate, Burst)>>,
        processing_dir: P,
    ) -> Vec<ProcessingUnit> {
        let mut units = Vec::new();
        for (bid, dated) in groups {
            for (date, burst) in dated {
                units.push(ProcessingUnit {
                    group_key: bid.clone(),
                    date: *date,
                    out_dir: processing_dir.as_ref().join(bid).join(burst.date_label()),
                    inputs: UnitInputs::Burst(burst.clone()),
                });
            }
        }
        units
    }
}
