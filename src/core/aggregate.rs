//! Temporal aggregation of per-date layers into timeseries.
//!
//! Layers of one group, product and band are ordered by acquisition date
//! (coherence by its master/slave pair), numbered `1..N` in that order and
//! written as `<seq>.<date>.<product>.<band>.tif`. A layered index
//! `Timeseries.<product>.<band>.vrt` references them in sequence order.

use crate::config::OutputDataType;
use crate::core::engine::{ConversionRequest, LayerIndexBuilder, LayeredIndex, RasterConverter};
use crate::core::scaling::ScalingRule;
use crate::io::marker::MarkerStore;
use crate::types::{ArdError, ArdResult};
use chrono::NaiveDate;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const TIMESERIES_EXT: &str = "tif";
pub const INDEX_EXT: &str = "vrt";

/// Date or date pair of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerDates {
    Single(NaiveDate),
    Pair { master: NaiveDate, slave: NaiveDate },
}

impl LayerDates {
    pub fn first(&self) -> NaiveDate {
        match self {
            LayerDates::Single(date) => *date,
            LayerDates::Pair { master, .. } => *master,
        }
    }

    pub fn last(&self) -> NaiveDate {
        match self {
            LayerDates::Single(date) => *date,
            LayerDates::Pair { slave, .. } => *slave,
        }
    }
}

impl fmt::Display for LayerDates {
    /// `YYYYMMDD` or `YYYYMMDD.YYYYMMDD`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerDates::Single(date) => write!(f, "{}", date.format("%Y%m%d")),
            LayerDates::Pair { master, slave } => {
                write!(f, "{}.{}", master.format("%Y%m%d"), slave.format("%Y%m%d"))
            }
        }
    }
}

/// A raster layer with the date(s) parsed from its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedLayer {
    pub source: PathBuf,
    pub dates: LayerDates,
}

/// A layer with its position in the timeseries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedLayer {
    pub seq: usize,
    pub source: PathBuf,
    pub dates: LayerDates,
    pub output: PathBuf,
}

/// Name fields of a timeseries file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeseriesFile {
    pub seq: usize,
    pub dates: LayerDates,
    pub product: String,
    pub band: String,
}

pub struct TemporalAggregator;

impl TemporalAggregator {
    /// Dates in an engine layer name. SNAP writes `03Jan2020`; compact
    /// `20200103` is accepted as well. Single-date layers use the last date
    /// in the name, paired layers the last two.
    pub fn parse_layer_dates(file_name: &str, paired: bool) -> ArdResult<LayerDates> {
        static SNAP: OnceLock<Regex> = OnceLock::new();
        static COMPACT: OnceLock<Regex> = OnceLock::new();
        let snap = SNAP.get_or_init(|| Regex::new(r"(\d{2}[A-Z][a-z]{2}\d{4})").expect("date pattern is valid"));
        let compact =
            COMPACT.get_or_init(|| Regex::new(r"(?:^|\D)(\d{8})(?:\D|$)").expect("date pattern is valid"));

        let mut dates: Vec<NaiveDate> = snap
            .captures_iter(file_name)
            .filter_map(|c| NaiveDate::parse_from_str(&c[1], "%d%b%Y").ok())
            .collect();
        if dates.is_empty() {
            dates = compact
                .captures_iter(file_name)
                .filter_map(|c| NaiveDate::parse_from_str(&c[1], "%Y%m%d").ok())
                .collect();
        }

        let no_dates = || ArdError::Processing(format!("No acquisition date in layer name {}", file_name));
        if paired {
            if dates.len() < 2 {
                return Err(no_dates());
            }
            let slave = dates[dates.len() - 1];
            let master = dates[dates.len() - 2];
            Ok(LayerDates::Pair { master, slave })
        } else {
            dates.last().map(|d| LayerDates::Single(*d)).ok_or_else(no_dates)
        }
    }

    /// `*.img` layers of a DIMAP data directory whose name holds `band`
    pub fn collect_layers<P: AsRef<Path>>(data_dir: P, band: &str, paired: bool) -> ArdResult<Vec<DatedLayer>> {
        let mut layers = Vec::new();
        for entry in std::fs::read_dir(data_dir.as_ref())? {
            let path = entry?.path();
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if !name.ends_with(".img") || !name.contains(band) {
                continue;
            }
            let dates = Self::parse_layer_dates(&name, paired)?;
            layers.push(DatedLayer { source: path, dates });
        }
        Ok(layers)
    }

    pub fn timeseries_file_name(seq: usize, dates: &LayerDates, product: &str, band: &str) -> String {
        format!("{}.{}.{}.{}.{}", seq, dates, product, band, TIMESERIES_EXT)
    }

    pub fn index_file_name(product: &str, band: &str) -> String {
        format!("Timeseries.{}.{}.{}", product, band, INDEX_EXT)
    }

    /// Marker qualifier of a timeseries, `<product>.<band>`
    pub fn qualifier(product: &str, band: &str) -> String {
        format!("{}.{}", product, band)
    }

    /// Parse `<seq>.<date>[.<date>].<product>.<band>.tif`
    pub fn parse_timeseries_file(file_name: &str) -> Option<TimeseriesFile> {
        let stem = file_name.strip_suffix(&format!(".{}", TIMESERIES_EXT))?;
        let parts: Vec<&str> = stem.split('.').collect();
        let date = |s: &str| NaiveDate::parse_from_str(s, "%Y%m%d").ok();
        let seq = parts.first()?.parse::<usize>().ok()?;
        let (dates, product, band) = match parts.as_slice() {
            [_, d, product, band] => (LayerDates::Single(date(*d)?), product, band),
            [_, m, s, product, band] => (
                LayerDates::Pair {
                    master: date(*m)?,
                    slave: date(*s)?,
                },
                product,
                band,
            ),
            _ => return None,
        };
        Some(TimeseriesFile {
            seq,
            dates,
            product: product.to_string(),
            band: band.to_string(),
        })
    }

    /// Sort by date (pairs by master, then slave) and number `1..N`
    pub fn sequence<P: AsRef<Path>>(
        mut layers: Vec<DatedLayer>,
        out_dir: P,
        product: &str,
        band: &str,
    ) -> Vec<SequencedLayer> {
        layers.sort_by(|a, b| a.dates.cmp(&b.dates).then_with(|| a.source.cmp(&b.source)));
        layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| {
                let seq = i + 1;
                let output = out_dir
                    .as_ref()
                    .join(Self::timeseries_file_name(seq, &layer.dates, product, band));
                SequencedLayer {
                    seq,
                    source: layer.source,
                    dates: layer.dates,
                    output,
                }
            })
            .collect()
    }

    /// Timeseries files of one product/band already in `ts_dir`, in
    /// sequence order
    pub fn existing_timeseries<P: AsRef<Path>>(ts_dir: P, product: &str, band: &str) -> Vec<(PathBuf, TimeseriesFile)> {
        let entries = match std::fs::read_dir(ts_dir.as_ref()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut files: Vec<(PathBuf, TimeseriesFile)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                Self::parse_timeseries_file(&name)
                    .filter(|f| f.product == product && f.band == band)
                    .map(|f| (entry.path(), f))
            })
            .collect();
        files.sort_by_key(|(_, f)| f.seq);
        files
    }

    /// Convert every layer into `ts_dir`, build the layered index and write
    /// the `.<product>.<band>.processed` marker last
    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(
        layers: Vec<DatedLayer>,
        ts_dir: &Path,
        product: &str,
        band: &str,
        rule: ScalingRule,
        data_type: OutputDataType,
        extent: Option<&Path>,
        converter: &dyn RasterConverter,
        index_builder: &dyn LayerIndexBuilder,
    ) -> ArdResult<LayeredIndex> {
        if layers.is_empty() {
            return Err(ArdError::Processing(format!(
                "No {} {} layers to aggregate in {}",
                product,
                band,
                ts_dir.display()
            )));
        }
        std::fs::create_dir_all(ts_dir)?;

        let sequenced = Self::sequence(layers, ts_dir, product, band);
        for layer in &sequenced {
            log::debug!("Writing {} to {}", layer.dates, layer.output.display());
            converter.convert(&ConversionRequest {
                input: layer.source.clone(),
                output: layer.output.clone(),
                rule,
                data_type,
                extent: extent.map(Path::to_path_buf),
                log_dir: ts_dir.to_path_buf(),
            })?;
            MarkerStore::validate_artifact(&layer.output)?;
        }

        let index = LayeredIndex {
            path: ts_dir.join(Self::index_file_name(product, band)),
            layers: sequenced.iter().map(|l| l.output.clone()).collect(),
        };
        index_builder.build(&index)?;

        let mut artifacts = index.layers.clone();
        artifacts.push(index.path.clone());
        MarkerStore::mark_complete(ts_dir, Some(&Self::qualifier(product, band)), &artifacts)?;
        log::info!(
            "Timeseries {} with {} layer(s) written to {}",
            Self::qualifier(product, band),
            index.layers.len(),
            ts_dir.display()
        );
        Ok(index)
    }
}
