//! Spatial mosaics across groups.
//!
//! For each sequence position (or timescan metric) one file per group is
//! collected and handed to the mosaic engine. A position no group reached
//! is skipped with a log record.

use crate::config::Metric;
use crate::core::aggregate::{LayerDates, TemporalAggregator};
use crate::core::dispatch::WorkUnit;
use crate::io::marker::MarkerStore;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MOSAIC_DIR: &str = "Mosaic";
pub const TIMESERIES_DIR: &str = "Timeseries";
pub const TIMESCAN_DIR: &str = "Timescan";

/// One mosaic output and its contributing files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicUnit {
    pub product: String,
    pub band: String,
    /// Sequence position, `None` for timescan mosaics
    pub seq: Option<usize>,
    pub metric: Option<Metric>,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl MosaicUnit {
    pub fn marker_dir(&self) -> PathBuf {
        self.output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Output file stem, used as marker qualifier
    pub fn qualifier(&self) -> String {
        self.output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl WorkUnit for MosaicUnit {
    fn key(&self) -> String {
        self.output
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn group(&self) -> String {
        format!("{}.{}", self.product, self.band)
    }

    fn is_complete(&self) -> bool {
        MarkerStore::is_complete(self.marker_dir(), Some(&self.qualifier()))
    }
}

pub struct MosaicPlanner;

impl MosaicPlanner {
    /// `<seq>.<start>.<product>.<band>.tif`, or `<seq>.<start>-<end>...`
    /// when the contributors span several dates
    pub fn timeseries_file_name(seq: usize, start: NaiveDate, end: NaiveDate, product: &str, band: &str) -> String {
        let start_label = start.format("%Y%m%d").to_string();
        if start == end {
            format!("{}.{}.{}.{}.tif", seq, start_label, product, band)
        } else {
            format!("{}.{}-{}.{}.{}.tif", seq, start_label, end.format("%Y%m%d"), product, band)
        }
    }

    /// Plan timeseries mosaics for `groups`, each mapped to the number of
    /// dates it was expected to produce
    pub fn timeseries_units<P: AsRef<Path>>(
        processing_dir: P,
        groups: &BTreeMap<String, usize>,
        product: &str,
        band: &str,
    ) -> Vec<MosaicUnit> {
        let processing_dir = processing_dir.as_ref();
        let out_dir = processing_dir.join(MOSAIC_DIR).join(TIMESERIES_DIR);

        let mut by_seq: BTreeMap<usize, Vec<(PathBuf, LayerDates)>> = BTreeMap::new();
        for group in groups.keys() {
            let ts_dir = processing_dir.join(group).join(TIMESERIES_DIR);
            for (path, file) in TemporalAggregator::existing_timeseries(&ts_dir, product, band) {
                by_seq.entry(file.seq).or_default().push((path, file.dates));
            }
        }

        let expected = groups.values().copied().max().unwrap_or(0);
        let found = by_seq.keys().next_back().copied().unwrap_or(0);
        let positions = expected.max(found);

        let mut units = Vec::new();
        for seq in 1..=positions {
            let contributors = match by_seq.remove(&seq) {
                Some(c) if !c.is_empty() => c,
                _ => {
                    log::info!(
                        "No group has a {} {} layer at position {}, skipping mosaic",
                        product,
                        band,
                        seq
                    );
                    continue;
                }
            };
            // Pairs span from the earliest master to the latest slave
            let (start, end) = contributors.iter().fold(
                (NaiveDate::MAX, NaiveDate::MIN),
                |(start, end), (_, dates)| (start.min(dates.first()), end.max(dates.last())),
            );
            let output = out_dir.join(Self::timeseries_file_name(seq, start, end, product, band));
            units.push(MosaicUnit {
                product: product.to_string(),
                band: band.to_string(),
                seq: Some(seq),
                metric: None,
                inputs: contributors.into_iter().map(|(p, _)| p).collect(),
                output,
            });
        }
        units
    }

    /// Plan timescan mosaics, one per metric with at least one contributor
    pub fn timescan_units<P: AsRef<Path>>(
        processing_dir: P,
        groups: &[String],
        product: &str,
        band: &str,
        metrics: &[Metric],
    ) -> Vec<MosaicUnit> {
        let processing_dir = processing_dir.as_ref();
        let out_dir = processing_dir.join(MOSAIC_DIR).join(TIMESCAN_DIR);

        let mut units = Vec::new();
        for metric in metrics {
            let name = format!("{}.{}.{}.tif", product, band, metric.as_str());
            let inputs: Vec<PathBuf> = groups
                .iter()
                .map(|g| processing_dir.join(g).join(TIMESCAN_DIR).join(&name))
                .filter(|p| p.is_file())
                .collect();
            if inputs.is_empty() {
                log::debug!("No group has a {} timescan, skipping mosaic", name);
                continue;
            }
            units.push(MosaicUnit {
                product: product.to_string(),
                band: band.to_string(),
                seq: None,
                metric: Some(*metric),
                inputs,
                output: out_dir.join(name),
            });
        }
        units
    }

    /// Outputs of completed units, ordered by position
    pub fn completed_outputs(units: &[MosaicUnit]) -> Vec<PathBuf> {
        let mut done: Vec<&MosaicUnit> = units.iter().filter(|u| u.is_complete()).collect();
        done.sort_by_key(|u| (u.seq, u.metric));
        done.into_iter().map(|u| u.output.clone()).collect()
    }
}
