//! Pipeline orchestration: scene or burst ARD, then timeseries, timescans
//! and mosaics.
//!
//! Every stage goes through the retry-bounded [`BatchDriver`]. A later stage
//! never starts a group whose earlier stage is still waiting on retryable
//! units. Groups that only lost permanently failed units go on with what
//! completed.

use crate::config::{expand_metrics, ArdParameters, ProjectConfig};
use crate::core::aggregate::TemporalAggregator;
use crate::core::dispatch::{DispatchOptions, ExecutionStrategy, WorkUnit};
use crate::core::driver::{BatchDriver, Stage, StageReport};
use crate::core::engine::{
    dimap_paths, metric_output, GdalBuildVrt, GdalConverter, LayerIndexBuilder, LayeredIndex,
    ProcessingEngine, RasterConverter, SnapOtbEngine, TimescanRequest,
};
use crate::core::grouping::{Grouper, ProcessingUnit, UnitInputs};
use crate::core::jobs::{invoke, invoke_unit, log_path_for, JobRunner, SubprocessRunner};
use crate::core::mosaic::{MosaicPlanner, MosaicUnit, MOSAIC_DIR, TIMESCAN_DIR, TIMESERIES_DIR};
use crate::core::scaling::{ProductFamily, ScalingRule};
use crate::io::inventory::{locate_scene, BurstInventory, Inventory};
use crate::io::marker::MarkerStore;
use crate::types::{ArdError, ArdResult, Burst, ProductKind, Scene};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const BACKSCATTER: &str = "BS";
pub const COHERENCE: &str = "coh";
pub const POLARIMETRIC: &str = "ha_alpha";
pub const POLARIMETRIC_BANDS: [&str; 3] = ["Alpha", "Entropy", "Anisotropy"];
pub const TIMESCAN_INDEX: &str = "Timescan.vrt";

/// Products in the order they appear in combined indices
pub const PRODUCTS: [&str; 3] = [BACKSCATTER, COHERENCE, POLARIMETRIC];

/// Which stages a run should go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineRequest {
    pub timeseries: bool,
    pub timescan: bool,
    pub mosaic: bool,
    /// Clear the processing directory before anything runs
    pub overwrite: bool,
}

impl PipelineRequest {
    pub fn all() -> Self {
        Self {
            timeseries: true,
            timescan: true,
            mosaic: true,
            overwrite: false,
        }
    }
}

/// What a batch is made of
#[derive(Debug, Clone, Copy)]
pub enum BatchInput<'a> {
    Scenes(&'a Inventory),
    Bursts(&'a BurstInventory),
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// True when every stage that ran finished without leftovers
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|r| r.is_done() && !r.is_partial())
    }
}

/// Timeseries of one group, product and band
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesUnit {
    pub group: String,
    pub product: String,
    pub band: String,
    /// ARD products (`.dim`) in date order
    pub inputs: Vec<PathBuf>,
    pub dates: Vec<NaiveDate>,
    /// `<group>/Timeseries`
    pub ts_dir: PathBuf,
}

impl TimeseriesUnit {
    pub fn paired(&self) -> bool {
        self.product == COHERENCE
    }

    /// Number of layers this timeseries is expected to hold
    pub fn expected_layers(&self) -> usize {
        if self.paired() {
            self.dates.len().saturating_sub(1)
        } else {
            self.dates.len()
        }
    }
}

impl WorkUnit for TimeseriesUnit {
    fn key(&self) -> String {
        format!("{}/{}.{}", self.group, self.product, self.band)
    }

    fn group(&self) -> String {
        self.group.clone()
    }

    fn is_complete(&self) -> bool {
        MarkerStore::is_complete(&self.ts_dir, Some(&TemporalAggregator::qualifier(&self.product, &self.band)))
    }
}

/// Timescan metrics of one group, product and band
#[derive(Debug, Clone, PartialEq)]
pub struct TimescanUnit {
    pub group: String,
    pub product: String,
    pub band: String,
    pub ts_dir: PathBuf,
    /// `<group>/Timescan`
    pub out_dir: PathBuf,
}

impl TimescanUnit {
    pub fn index(&self) -> PathBuf {
        self.ts_dir.join(TemporalAggregator::index_file_name(&self.product, &self.band))
    }

    pub fn prefix(&self) -> PathBuf {
        self.out_dir.join(format!("{}.{}", self.product, self.band))
    }
}

impl WorkUnit for TimescanUnit {
    fn key(&self) -> String {
        format!("{}/{}.{}", self.group, self.product, self.band)
    }

    fn group(&self) -> String {
        self.group.clone()
    }

    fn is_complete(&self) -> bool {
        MarkerStore::is_complete(&self.out_dir, Some(&TemporalAggregator::qualifier(&self.product, &self.band)))
    }
}

/// Everything a batch run needs, passed explicitly
pub struct BatchContext {
    pub config: ProjectConfig,
    pub params: ArdParameters,
    pub kind: ProductKind,
    pub engine: Arc<dyn ProcessingEngine>,
    pub runner: Arc<dyn JobRunner>,
    pub converter: Arc<dyn RasterConverter>,
    pub index_builder: Arc<dyn LayerIndexBuilder>,
    /// Clip polygon applied to timeseries layers
    pub extent: Option<PathBuf>,
}

impl BatchContext {
    pub fn new(
        config: ProjectConfig,
        mut params: ArdParameters,
        kind: ProductKind,
        engine: Arc<dyn ProcessingEngine>,
        runner: Arc<dyn JobRunner>,
        converter: Arc<dyn RasterConverter>,
        index_builder: Arc<dyn LayerIndexBuilder>,
    ) -> ArdResult<Self> {
        config.validate()?;
        if let Some(lat) = config.aoi_center_lat {
            params.adjust_dem_for_latitude(lat);
        }
        Ok(Self {
            config,
            params,
            kind,
            engine,
            runner,
            converter,
            index_builder,
            extent: None,
        })
    }

    /// SNAP/OTB engine and GDAL tools run as subprocesses
    pub fn with_defaults<P: AsRef<Path>>(
        config: ProjectConfig,
        params: ArdParameters,
        kind: ProductKind,
        graph_dir: P,
    ) -> ArdResult<Self> {
        let runner: Arc<dyn JobRunner> = Arc::new(SubprocessRunner);
        let engine = Arc::new(SnapOtbEngine::new(graph_dir, config.transform_concurrency));
        let converter = Arc::new(GdalConverter::new(runner.clone()));
        let index_builder = Arc::new(GdalBuildVrt::new(runner.clone()));
        Self::new(config, params, kind, engine, runner, converter, index_builder)
    }

    pub fn with_extent<P: AsRef<Path>>(mut self, extent: P) -> Self {
        self.extent = Some(extent.as_ref().to_path_buf());
        self
    }

    fn driver(&self) -> BatchDriver {
        BatchDriver::new(
            self.config.max_passes,
            DispatchOptions::new(
                ExecutionStrategy::CpuBound,
                self.config.transform_concurrency,
                self.config.unit_retry,
            ),
        )
    }

    fn scratch_dir(&self, prefix: &str) -> ArdResult<tempfile::TempDir> {
        std::fs::create_dir_all(&self.config.temp_dir)?;
        Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(&self.config.temp_dir)?)
    }

    /// Local archive of a scene: the inventory path, the download layout
    /// or the data mount
    pub fn resolve_scene(&self, scene: &Scene) -> ArdResult<PathBuf> {
        if let Some(path) = scene.local_path.as_ref().filter(|p| p.exists()) {
            return Ok(path.clone());
        }
        locate_scene(scene, &self.config.download_dir, self.config.data_mount.as_deref())
            .ok_or_else(|| ArdError::SceneNotDownloaded(scene.identifier.clone()))
    }

    fn run_ard_unit(&self, unit: &ProcessingUnit, inputs: &[PathBuf]) -> ArdResult<()> {
        let scratch = self.scratch_dir(&format!(".{}_", unit.prefix()))?;
        let job = self.engine.ard(unit, inputs, &self.params, scratch.path())?;
        let log_path = log_path_for(&unit.out_dir, &unit.prefix(), "ard", None);
        invoke_unit(
            self.runner.as_ref(),
            &unit.out_dir,
            None,
            &job.command,
            &log_path,
            &job.expected_outputs,
        )?;
        Ok(())
    }

    /// GRD scenes to ARD, one unit per track and date
    pub fn scenes_to_ard(&self, inventory: &Inventory) -> ArdResult<(Vec<ProcessingUnit>, StageReport)> {
        let groups = Grouper::group_scenes(inventory.scenes())?;
        let units = Grouper::scene_units(&groups, &self.config.processing_dir);
        log::info!("{} acquisition(s) over {} track(s) to ARD", units.len(), groups.len());

        let report = self.driver().run_stage(Stage::Ard, units.clone(), |unit: &ProcessingUnit| {
            let scenes = match &unit.inputs {
                UnitInputs::Scenes(scenes) => scenes,
                UnitInputs::Burst(_) => {
                    return Err(ArdError::InvalidConfiguration(format!("{} is a burst unit", unit.key())))
                }
            };
            let paths = scenes
                .iter()
                .map(|s| self.resolve_scene(s))
                .collect::<ArdResult<Vec<_>>>()?;
            self.run_ard_unit(unit, &paths)
        })?;
        Ok((units, report))
    }

    /// SLC bursts to ARD, one unit per burst id and date. With coherence on,
    /// the scene of the next date is passed along as the slave.
    pub fn bursts_to_ard(&self, bursts: &BurstInventory) -> ArdResult<(Vec<ProcessingUnit>, StageReport)> {
        if self.kind != ProductKind::Slc {
            return Err(ArdError::InvalidConfiguration(
                "Burst processing needs an SLC batch".to_string(),
            ));
        }
        let groups = Grouper::group_bursts(bursts.bursts())?;
        let units = Grouper::burst_units(&groups, &self.config.processing_dir);
        log::info!("{} burst acquisition(s) over {} burst id(s) to ARD", units.len(), groups.len());

        let successors: BTreeMap<String, Burst> = groups
            .values()
            .flat_map(|dated| {
                dated
                    .windows(2)
                    .map(|pair| (format!("{}/{}", pair[0].1.bid, pair[0].1.date_label()), pair[1].1.clone()))
            })
            .collect();

        let report = self.driver().run_stage(Stage::Ard, units.clone(), |unit: &ProcessingUnit| {
            let burst = match &unit.inputs {
                UnitInputs::Burst(burst) => burst,
                UnitInputs::Scenes(_) => {
                    return Err(ArdError::InvalidConfiguration(format!("{} is a scene unit", unit.key())))
                }
            };
            let mut paths = vec![self.resolve_scene(&self.burst_scene(burst)?)?];
            if self.params.coherence {
                if let Some(slave) = successors.get(&unit.key()) {
                    paths.push(self.resolve_scene(&self.burst_scene(slave)?)?);
                }
            }
            self.run_ard_unit(unit, &paths)
        })?;
        Ok((units, report))
    }

    fn burst_scene(&self, burst: &Burst) -> ArdResult<Scene> {
        Scene::parse(&burst.scene_id)
    }

    /// Products and bands found in the completed ARD directories of a group
    fn plan_group_timeseries(&self, group: &str, units: &[&ProcessingUnit]) -> Vec<TimeseriesUnit> {
        let mut done: Vec<&ProcessingUnit> = units.iter().copied().filter(|u| u.is_complete()).collect();
        done.sort_by_key(|u| u.date);

        let ts_dir = self.config.processing_dir.join(group).join(TIMESERIES_DIR);
        let mut planned = Vec::new();
        for product in PRODUCTS {
            let dated: Vec<(NaiveDate, PathBuf)> = done
                .iter()
                .map(|u| (u.date, u.out_dir.join(format!("{}.{}", u.prefix(), product))))
                .filter(|(_, stem)| dimap_paths(stem).0.is_file())
                .collect();
            if dated.is_empty() {
                continue;
            }
            for band in self.bands_of(product, &dated) {
                let present: Vec<&(NaiveDate, PathBuf)> = dated
                    .iter()
                    .filter(|(_, stem)| data_has_band(&dimap_paths(stem).1, &band))
                    .collect();
                if present.len() < 2 {
                    log::info!(
                        "Group {}: {} {} has {} date(s), no timeseries",
                        group,
                        product,
                        band,
                        present.len()
                    );
                    continue;
                }
                planned.push(TimeseriesUnit {
                    group: group.to_string(),
                    product: product.to_string(),
                    band,
                    inputs: present.iter().map(|(_, stem)| dimap_paths(stem).0).collect(),
                    dates: present.iter().map(|(date, _)| *date).collect(),
                    ts_dir: ts_dir.clone(),
                });
            }
        }
        planned
    }

    fn bands_of(&self, product: &str, dated: &[(NaiveDate, PathBuf)]) -> Vec<String> {
        if product == POLARIMETRIC {
            return POLARIMETRIC_BANDS.iter().map(|b| b.to_string()).collect();
        }
        self.params
            .polarisations
            .iter()
            .map(|p| p.as_str().to_string())
            .filter(|band| dated.iter().any(|(_, stem)| data_has_band(&dimap_paths(stem).1, band)))
            .collect()
    }

    fn run_timeseries_unit(&self, unit: &TimeseriesUnit) -> ArdResult<()> {
        std::fs::create_dir_all(&unit.ts_dir)?;
        let scratch = self.scratch_dir(&format!(".{}_{}_{}_", unit.group, unit.product, unit.band))?;
        let log_unit = format!("{}_{}_{}", unit.group, unit.product, unit.band);

        let stack = scratch.path().join(format!("{}.{}.stack", unit.product, unit.band));
        let job = self.engine.stack(&unit.inputs, &unit.band, &stack)?;
        invoke(self.runner.as_ref(), &job.command, &log_path_for(&unit.ts_dir, &log_unit, "stack", None))?;
        for output in &job.expected_outputs {
            MarkerStore::validate_artifact(output)?;
        }

        let mut layers_dir = dimap_paths(&stack).1;
        if self.params.mt_speckle_filter && unit.product == BACKSCATTER {
            let filtered = scratch.path().join(format!("{}.{}.mt", unit.product, unit.band));
            let job = self.engine.mt_speckle(&stack, &filtered, &self.params.speckle)?;
            invoke(
                self.runner.as_ref(),
                &job.command,
                &log_path_for(&unit.ts_dir, &log_unit, "mt_speckle", None),
            )?;
            for output in &job.expected_outputs {
                MarkerStore::validate_artifact(output)?;
            }
            layers_dir = dimap_paths(&filtered).1;
        }

        let layers = TemporalAggregator::collect_layers(&layers_dir, &unit.band, unit.paired())?;
        let rule = ScalingRule::for_family(
            ProductFamily::for_band(&unit.product, &unit.band),
            self.params.effective_to_db_mt(),
        );
        TemporalAggregator::aggregate(
            layers,
            &unit.ts_dir,
            &unit.product,
            &unit.band,
            rule,
            self.params.data_type,
            self.extent.as_deref(),
            self.converter.as_ref(),
            self.index_builder.as_ref(),
        )?;
        Ok(())
    }

    /// Timeseries for every group not blocked by the ARD stage
    pub fn ards_to_timeseries(
        &self,
        ard_units: &[ProcessingUnit],
        blocked: &BTreeSet<String>,
    ) -> ArdResult<(Vec<TimeseriesUnit>, StageReport)> {
        let mut by_group: BTreeMap<&str, Vec<&ProcessingUnit>> = BTreeMap::new();
        for unit in ard_units {
            by_group.entry(unit.group_key.as_str()).or_default().push(unit);
        }

        let mut units = Vec::new();
        for (group, members) in by_group {
            if blocked.contains(group) {
                log::warn!("Group {} still has unfinished ARD, skipping timeseries", group);
                continue;
            }
            units.extend(self.plan_group_timeseries(group, &members));
        }

        let report = self
            .driver()
            .run_stage(Stage::Timeseries, units.clone(), |unit: &TimeseriesUnit| {
                self.run_timeseries_unit(unit)
            })?;
        Ok((units, report))
    }

    fn run_timescan_unit(&self, unit: &TimescanUnit) -> ArdResult<()> {
        std::fs::create_dir_all(&unit.out_dir)?;
        let dates: Vec<NaiveDate> = TemporalAggregator::existing_timeseries(&unit.ts_dir, &unit.product, &unit.band)
            .into_iter()
            .map(|(_, file)| file.dates.first())
            .collect();
        if dates.is_empty() {
            return Err(ArdError::Processing(format!("No timeseries files for {}", unit.key())));
        }

        let metrics = expand_metrics(&self.params.metrics);
        let index = unit.index();
        let prefix = unit.prefix();
        let request = TimescanRequest {
            index: &index,
            prefix: &prefix,
            metrics: &metrics,
            dates: &dates,
            rescale: self.params.data_type.is_integer(),
            to_power: unit.product == BACKSCATTER && self.params.timeseries_in_db(),
            outlier_removal: self.params.outlier_removal,
        };
        let job = self.engine.timescan(&request)?;
        let log_unit = format!("{}_{}_{}", unit.group, unit.product, unit.band);
        invoke_unit(
            self.runner.as_ref(),
            &unit.out_dir,
            Some(&TemporalAggregator::qualifier(&unit.product, &unit.band)),
            &job.command,
            &log_path_for(&unit.out_dir, &log_unit, "timescan", None),
            &job.expected_outputs,
        )?;
        Ok(())
    }

    /// Timescans of every completed timeseries, then one `Timescan.vrt`
    /// per group
    pub fn timeseries_to_timescan(
        &self,
        ts_units: &[TimeseriesUnit],
        blocked: &BTreeSet<String>,
    ) -> ArdResult<(Vec<TimescanUnit>, StageReport)> {
        let units: Vec<TimescanUnit> = ts_units
            .iter()
            .filter(|u| !blocked.contains(&u.group) && u.is_complete())
            .map(|u| TimescanUnit {
                group: u.group.clone(),
                product: u.product.clone(),
                band: u.band.clone(),
                ts_dir: u.ts_dir.clone(),
                out_dir: self.config.processing_dir.join(&u.group).join(TIMESCAN_DIR),
            })
            .collect();

        let report = self
            .driver()
            .run_stage(Stage::Timescan, units.clone(), |unit: &TimescanUnit| self.run_timescan_unit(unit))?;

        let metrics = expand_metrics(&self.params.metrics);
        let mut by_group: BTreeMap<&str, Vec<&TimescanUnit>> = BTreeMap::new();
        for unit in units.iter().filter(|u| u.is_complete()) {
            by_group.entry(unit.group.as_str()).or_default().push(unit);
        }
        for (group, mut members) in by_group {
            members.sort_by_key(|u| (product_rank(&u.product), u.band.clone()));
            let layers: Vec<PathBuf> = members
                .iter()
                .flat_map(|u| metrics.iter().map(move |m| metric_output(&u.prefix(), *m)))
                .filter(|p| p.is_file())
                .collect();
            if layers.is_empty() {
                continue;
            }
            let out_dir = self.config.processing_dir.join(group).join(TIMESCAN_DIR);
            self.index_builder.build(&LayeredIndex {
                path: out_dir.join(TIMESCAN_INDEX),
                layers,
            })?;
        }
        Ok((units, report))
    }

    fn run_mosaic_unit(&self, unit: &MosaicUnit) -> ArdResult<()> {
        let marker_dir = unit.marker_dir();
        std::fs::create_dir_all(&marker_dir)?;
        let scratch = self.scratch_dir(&format!(".mosaic_{}_", unit.qualifier()))?;
        let job = self.engine.mosaic(&unit.inputs, &unit.output, scratch.path())?;
        invoke_unit(
            self.runner.as_ref(),
            &marker_dir,
            Some(&unit.qualifier()),
            &job.command,
            &log_path_for(&marker_dir, &unit.qualifier(), "mosaic", None),
            &job.expected_outputs,
        )?;
        Ok(())
    }

    /// Mosaic every timeseries position across groups, with one index per
    /// product and band
    pub fn mosaic_timeseries(&self, ts_units: &[TimeseriesUnit], blocked: &BTreeSet<String>) -> ArdResult<StageReport> {
        let mut plans: BTreeMap<(usize, String, String), BTreeMap<String, usize>> = BTreeMap::new();
        for unit in ts_units.iter().filter(|u| !blocked.contains(&u.group) && u.is_complete()) {
            let groups = plans
                .entry((product_rank(&unit.product), unit.product.clone(), unit.band.clone()))
                .or_default();
            let expected = groups.entry(unit.group.clone()).or_insert(0);
            *expected = (*expected).max(unit.expected_layers());
        }

        let mut units = Vec::new();
        let mut per_layer = Vec::new();
        for ((_, product, band), groups) in &plans {
            let planned = MosaicPlanner::timeseries_units(&self.config.processing_dir, groups, product, band);
            per_layer.push((product.clone(), band.clone(), planned.clone()));
            units.extend(planned);
        }

        let report = self
            .driver()
            .run_stage(Stage::MosaicTimeseries, units, |unit: &MosaicUnit| self.run_mosaic_unit(unit))?;

        let out_dir = self.config.processing_dir.join(MOSAIC_DIR).join(TIMESERIES_DIR);
        for (product, band, planned) in per_layer {
            let layers = MosaicPlanner::completed_outputs(&planned);
            if layers.is_empty() {
                continue;
            }
            self.index_builder.build(&LayeredIndex {
                path: out_dir.join(TemporalAggregator::index_file_name(&product, &band)),
                layers,
            })?;
        }
        Ok(report)
    }

    /// Mosaic every timescan metric across groups, then one `Timescan.vrt`
    pub fn mosaic_timescan(&self, ts_units: &[TimescanUnit], blocked: &BTreeSet<String>) -> ArdResult<StageReport> {
        let mut plans: BTreeMap<(usize, String, String), BTreeSet<String>> = BTreeMap::new();
        for unit in ts_units.iter().filter(|u| !blocked.contains(&u.group) && u.is_complete()) {
            plans
                .entry((product_rank(&unit.product), unit.product.clone(), unit.band.clone()))
                .or_default()
                .insert(unit.group.clone());
        }

        let metrics = expand_metrics(&self.params.metrics);
        let mut units = Vec::new();
        for ((_, product, band), groups) in &plans {
            let groups: Vec<String> = groups.iter().cloned().collect();
            units.extend(MosaicPlanner::timescan_units(
                &self.config.processing_dir,
                &groups,
                product,
                band,
                &metrics,
            ));
        }

        let report = self
            .driver()
            .run_stage(Stage::MosaicTimescan, units.clone(), |unit: &MosaicUnit| self.run_mosaic_unit(unit))?;

        // Product x metric order
        let layers: Vec<PathBuf> = units
            .iter()
            .filter(|u| u.is_complete())
            .map(|u| u.output.clone())
            .collect();
        if !layers.is_empty() {
            let out_dir = self.config.processing_dir.join(MOSAIC_DIR).join(TIMESCAN_DIR);
            self.index_builder.build(&LayeredIndex {
                path: out_dir.join(TIMESCAN_INDEX),
                layers,
            })?;
        }
        Ok(report)
    }

    /// Run the requested stages in order
    pub fn run(&self, input: BatchInput<'_>, request: &PipelineRequest) -> ArdResult<PipelineReport> {
        if request.overwrite && self.config.processing_dir.exists() {
            log::info!("Clearing processing directory {}", self.config.processing_dir.display());
            std::fs::remove_dir_all(&self.config.processing_dir)?;
        }
        self.config.create_dirs()?;

        let mut report = PipelineReport::default();
        let (ard_units, ard_report) = match input {
            BatchInput::Scenes(inventory) => {
                if self.kind != ProductKind::Grd {
                    return Err(ArdError::InvalidConfiguration(
                        "Scene batches need a GRD context, use bursts for SLC".to_string(),
                    ));
                }
                self.scenes_to_ard(inventory)?
            }
            BatchInput::Bursts(bursts) => self.bursts_to_ard(bursts)?,
        };
        let mut blocked = ard_report.blocked_groups();
        report.stages.push(ard_report);

        if !(request.timeseries || request.timescan) {
            return Ok(report);
        }

        // Timeseries are planned even when only timescans are asked for, so
        // already finished ones can be picked up
        let ts_units = if request.timeseries {
            let (units, ts_report) = self.ards_to_timeseries(&ard_units, &blocked)?;
            blocked.extend(ts_report.blocked_groups());
            report.stages.push(ts_report);
            units
        } else {
            let mut by_group: BTreeMap<&str, Vec<&ProcessingUnit>> = BTreeMap::new();
            for unit in &ard_units {
                by_group.entry(unit.group_key.as_str()).or_default().push(unit);
            }
            by_group
                .into_iter()
                .filter(|(group, _)| !blocked.contains(*group))
                .flat_map(|(group, members)| self.plan_group_timeseries(group, &members))
                .collect()
        };

        let mut ts_blocked = blocked.clone();
        let timescan_units = if request.timescan {
            let (units, tsc_report) = self.timeseries_to_timescan(&ts_units, &blocked)?;
            ts_blocked.extend(tsc_report.blocked_groups());
            report.stages.push(tsc_report);
            units
        } else {
            Vec::new()
        };

        if request.mosaic {
            if request.timeseries {
                report.stages.push(self.mosaic_timeseries(&ts_units, &blocked)?);
            }
            if request.timescan {
                report.stages.push(self.mosaic_timescan(&timescan_units, &ts_blocked)?);
            }
        }

        for stage in &report.stages {
            if stage.is_partial() {
                log::warn!(
                    "Stage {} is partial: {} unresolved, {} excluded",
                    stage.stage,
                    stage.unresolved.len(),
                    stage.excluded.len()
                );
            }
        }
        Ok(report)
    }
}

fn product_rank(product: &str) -> usize {
    PRODUCTS.iter().position(|p| *p == product).unwrap_or(PRODUCTS.len())
}

/// Whether a DIMAP data directory holds an `.img` layer for `band`
fn data_has_band(data_dir: &Path, band: &str) -> bool {
    std::fs::read_dir(data_dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.ends_with(".img") && name.contains(band)
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_keep_index_order() {
        assert!(product_rank(BACKSCATTER) < product_rank(COHERENCE));
        assert!(product_rank(COHERENCE) < product_rank(POLARIMETRIC));
        assert_eq!(product_rank("other"), PRODUCTS.len());
    }

    #[test]
    fn coherence_timeseries_has_one_layer_less() {
        let date = |d: &str| NaiveDate::parse_from_str(d, "%Y%m%d").unwrap();
        let mut unit = TimeseriesUnit {
            group: "A117_IW1_764".into(),
            product: COHERENCE.into(),
            band: "VV".into(),
            inputs: vec![],
            dates: vec![date("20200103"), date("20200115"), date("20200127")],
            ts_dir: PathBuf::from("/tmp/ts"),
        };
        assert_eq!(unit.expected_layers(), 2);
        unit.product = BACKSCATTER.into();
        assert_eq!(unit.expected_layers(), 3);
        assert_eq!(unit.key(), "A117_IW1_764/BS.VV");
    }
}
