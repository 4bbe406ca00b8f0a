//! Project layout and ARD parameter configuration.
//!
//! `ProjectConfig` describes where a batch keeps its downloads, inventories
//! and products, together with the concurrency and retry budget of every
//! stage. `ArdParameters` is the one parameter record every stage reads;
//! it is built from a named preset with [`preset_to_parameters`] or parsed
//! from one of the two historical key/value schemas via [`LegacySchema`].

use crate::core::retry::RetryPolicy;
use crate::types::{ArdError, ArdResult, Polarization};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// DEM used outside the SRTM coverage
pub const HIGH_LATITUDE_DEM: &str = "ASTER 1sec GDEM";
pub const DEFAULT_DEM: &str = "SRTM 1Sec HGT";
/// SRTM coverage ends at this latitude
pub const SRTM_LATITUDE_LIMIT: f64 = 59.0;

/// Pass cap of the batch driver
pub const DEFAULT_MAX_PASSES: u32 = 5;
/// Full re-downloads before a corrupt archive is given up
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 10;

/// Directory layout and scheduling budget of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_dir: PathBuf,
    pub download_dir: PathBuf,
    pub inventory_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Read-only local archive consulted before downloading
    #[serde(default)]
    pub data_mount: Option<PathBuf>,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_transform_concurrency")]
    pub transform_concurrency: usize,
    #[serde(default = "RetryPolicy::unit_default")]
    pub unit_retry: RetryPolicy,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
    /// Latitude of the AOI centre, used for DEM selection
    #[serde(default)]
    pub aoi_center_lat: Option<f64>,
}

fn default_download_concurrency() -> usize {
    2
}

fn default_transform_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(1)
}

fn default_download_attempts() -> u32 {
    DEFAULT_DOWNLOAD_ATTEMPTS
}

fn default_max_passes() -> u32 {
    DEFAULT_MAX_PASSES
}

impl ProjectConfig {
    /// Standard layout below `project_dir`
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        let project_dir = project_dir.as_ref().to_path_buf();
        Self {
            download_dir: project_dir.join("download"),
            inventory_dir: project_dir.join("inventory"),
            processing_dir: project_dir.join("processing"),
            temp_dir: project_dir.join("temp"),
            project_dir,
            data_mount: None,
            download_concurrency: default_download_concurrency(),
            transform_concurrency: default_transform_concurrency(),
            unit_retry: RetryPolicy::unit_default(),
            download_attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
            max_passes: DEFAULT_MAX_PASSES,
            aoi_center_lat: None,
        }
    }

    /// `~/s1ard` when no project directory is given
    pub fn default_project_dir() -> ArdResult<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join("s1ard"))
            .ok_or_else(|| ArdError::InvalidConfiguration("Cannot determine home directory".to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        log::info!("Loading project configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ProjectConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> ArdResult<()> {
        if self.download_concurrency == 0 || self.transform_concurrency == 0 {
            return Err(ArdError::InvalidConfiguration(
                "Concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_passes == 0 {
            return Err(ArdError::InvalidConfiguration(
                "Batch pass cap must be at least 1".to_string(),
            ));
        }
        if self.unit_retry.max_attempts == 0 || self.download_attempts == 0 {
            return Err(ArdError::InvalidConfiguration(
                "Retry budgets must allow at least one attempt".to_string(),
            ));
        }
        for (name, dir) in [
            ("download_dir", &self.download_dir),
            ("inventory_dir", &self.inventory_dir),
            ("processing_dir", &self.processing_dir),
            ("temp_dir", &self.temp_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(ArdError::InvalidConfiguration(format!("{} is empty", name)));
            }
        }
        if let Some(lat) = self.aoi_center_lat {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ArdError::InvalidConfiguration(format!(
                    "AOI centre latitude {} out of range",
                    lat
                )));
            }
        }
        if let Some(mount) = &self.data_mount {
            if !mount.exists() {
                log::warn!("Data mount {} does not exist, scenes will be downloaded", mount.display());
            }
        }
        Ok(())
    }

    pub fn create_dirs(&self) -> ArdResult<()> {
        for dir in [
            &self.project_dir,
            &self.download_dir,
            &self.inventory_dir,
            &self.processing_dir,
            &self.temp_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        log::debug!("Project directories ready below {}", self.project_dir.display());
        Ok(())
    }
}

/// Login for the download mirrors, passed explicitly to every call
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Named ARD parameter presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArdPreset {
    /// Geometric terrain corrected gamma0 at 20 m
    Ost,
    /// Radiometrically terrain corrected with layover/shadow mask
    OstFlat,
    /// CEOS ARD compliant RTC at 10 m
    Ceos,
    /// GTC sigma0 in dB at 10 m
    EarthEngine,
    /// Speckle filtered RTC in dB at 25 m
    Zhuo,
}

impl ArdPreset {
    pub fn parse(value: &str) -> ArdResult<Self> {
        match value {
            "OST" | "Ost" => Ok(ArdPreset::Ost),
            "OST_flat" | "OstFlat" => Ok(ArdPreset::OstFlat),
            "CEOS" | "Ceos" => Ok(ArdPreset::Ceos),
            "EarthEngine" => Ok(ArdPreset::EarthEngine),
            "Zhuo" => Ok(ArdPreset::Zhuo),
            other => Err(ArdError::InvalidConfiguration(format!("Unknown ARD preset: {}", other))),
        }
    }
}

/// Backscatter normalisation produced by the ARD step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterType {
    #[serde(rename = "GTCgamma")]
    GtcGamma,
    #[serde(rename = "GTCsigma")]
    GtcSigma,
    #[serde(rename = "RTC")]
    Rtc,
}

impl BackscatterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackscatterType::GtcGamma => "GTCgamma",
            BackscatterType::GtcSigma => "GTCsigma",
            BackscatterType::Rtc => "RTC",
        }
    }

    fn parse(value: &str) -> ArdResult<Self> {
        match value {
            "GTCgamma" => Ok(BackscatterType::GtcGamma),
            "GTCsigma" => Ok(BackscatterType::GtcSigma),
            "RTC" => Ok(BackscatterType::Rtc),
            other => Err(ArdError::InvalidConfiguration(format!("Unknown product type: {}", other))),
        }
    }
}

/// Numeric type of timeseries and timescan rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDataType {
    Float32,
    UInt16,
    UInt8,
}

impl OutputDataType {
    pub fn parse(value: &str) -> ArdResult<Self> {
        match value.to_lowercase().as_str() {
            "float32" => Ok(OutputDataType::Float32),
            "uint16" => Ok(OutputDataType::UInt16),
            "uint8" => Ok(OutputDataType::UInt8),
            other => Err(ArdError::InvalidConfiguration(format!("Unknown data type: {}", other))),
        }
    }

    /// Type name understood by the GDAL command line tools
    pub fn gdal_name(&self) -> &'static str {
        match self {
            OutputDataType::Float32 => "Float32",
            OutputDataType::UInt16 => "UInt16",
            OutputDataType::UInt8 => "Byte",
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, OutputDataType::Float32)
    }
}

/// Per-pixel timescan statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Avg,
    Max,
    Min,
    Std,
    Cov,
    Median,
    P90,
    P10,
    P95,
    P5,
    Amplitude,
    Phase,
    Residuals,
    /// Expands to amplitude, phase and residuals
    Harmonics,
    /// Expands to p95 and p5
    Percentiles,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Avg => "avg",
            Metric::Max => "max",
            Metric::Min => "min",
            Metric::Std => "std",
            Metric::Cov => "cov",
            Metric::Median => "median",
            Metric::P90 => "p90",
            Metric::P10 => "p10",
            Metric::P95 => "p95",
            Metric::P5 => "p5",
            Metric::Amplitude => "amplitude",
            Metric::Phase => "phase",
            Metric::Residuals => "residuals",
            Metric::Harmonics => "harmonics",
            Metric::Percentiles => "percentiles",
        }
    }

    pub fn parse(value: &str) -> ArdResult<Self> {
        let metric = match value.to_lowercase().as_str() {
            "avg" => Metric::Avg,
            "max" => Metric::Max,
            "min" => Metric::Min,
            "std" => Metric::Std,
            "cov" => Metric::Cov,
            "median" => Metric::Median,
            "p90" => Metric::P90,
            "p10" => Metric::P10,
            "p95" => Metric::P95,
            "p5" => Metric::P5,
            "amplitude" => Metric::Amplitude,
            "phase" => Metric::Phase,
            "residuals" => Metric::Residuals,
            "harmonics" => Metric::Harmonics,
            "percentiles" => Metric::Percentiles,
            other => {
                return Err(ArdError::InvalidConfiguration(format!("Unknown timescan metric: {}", other)))
            }
        };
        Ok(metric)
    }

    pub fn default_set() -> Vec<Metric> {
        vec![Metric::Avg, Metric::Max, Metric::Min, Metric::Std, Metric::Cov]
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Replace the group metrics by the files they actually produce.
/// Order is kept and duplicates are dropped.
pub fn expand_metrics(metrics: &[Metric]) -> Vec<Metric> {
    let mut expanded = Vec::new();
    for metric in metrics {
        let parts: &[Metric] = match metric {
            Metric::Harmonics => &[Metric::Amplitude, Metric::Phase, Metric::Residuals],
            Metric::Percentiles => &[Metric::P95, Metric::P5],
            other => std::slice::from_ref(other),
        };
        for part in parts {
            if !expanded.contains(part) {
                expanded.push(*part);
            }
        }
    }
    expanded
}

/// Multi-temporal speckle filter settings passed to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeckleSettings {
    pub filter: String,
    #[serde(rename = "ENL")]
    pub enl: f64,
    pub estimate_enl: bool,
    pub sigma: f64,
    pub filter_x_size: u32,
    pub filter_y_size: u32,
    pub window_size: String,
    pub target_window_size: String,
    pub num_of_looks: u32,
    pub damping: u32,
    pub pan_size: u32,
}

impl Default for SpeckleSettings {
    fn default() -> Self {
        Self {
            filter: "Refined Lee".to_string(),
            enl: 1.0,
            estimate_enl: true,
            sigma: 0.9,
            filter_x_size: 3,
            filter_y_size: 3,
            window_size: "7x7".to_string(),
            target_window_size: "3x3".to_string(),
            num_of_looks: 1,
            damping: 2,
            pan_size: 50,
        }
    }
}

/// The single parameter record read by every processing stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArdParameters {
    pub preset: ArdPreset,
    pub resolution: u32,
    pub border_noise: bool,
    pub product_type: BackscatterType,
    pub speckle_filter: bool,
    pub ls_mask_create: bool,
    pub ls_mask_apply: bool,
    /// dB conversion inside the ARD step
    pub to_db: bool,
    pub polarisations: Vec<Polarization>,
    pub dem: String,
    pub resampling: String,
    pub mt_speckle_filter: bool,
    /// dB conversion while building the timeseries
    pub to_db_mt: bool,
    pub data_type: OutputDataType,
    pub metrics: Vec<Metric>,
    pub outlier_removal: bool,
    /// SLC only: interferometric coherence between consecutive dates
    #[serde(default)]
    pub coherence: bool,
    /// SLC only: H-A-Alpha dual-pol decomposition
    #[serde(default)]
    pub ha_alpha: bool,
    #[serde(default)]
    pub speckle: SpeckleSettings,
}

/// Build the parameter record of a named preset
pub fn preset_to_parameters(preset: ArdPreset) -> ArdParameters {
    let all_pols = vec![Polarization::VV, Polarization::VH, Polarization::HH, Polarization::HV];
    let base = ArdParameters {
        preset,
        resolution: 20,
        border_noise: true,
        product_type: BackscatterType::GtcGamma,
        speckle_filter: false,
        ls_mask_create: false,
        ls_mask_apply: false,
        to_db: false,
        polarisations: all_pols,
        dem: DEFAULT_DEM.to_string(),
        resampling: "CUBIC_CONVOLUTION".to_string(),
        mt_speckle_filter: true,
        to_db_mt: true,
        data_type: OutputDataType::Float32,
        metrics: Metric::default_set(),
        outlier_removal: true,
        coherence: false,
        ha_alpha: false,
        speckle: SpeckleSettings::default(),
    };

    match preset {
        ArdPreset::Ost => base,
        ArdPreset::OstFlat => ArdParameters {
            product_type: BackscatterType::Rtc,
            ls_mask_create: true,
            ..base
        },
        ArdPreset::Ceos => ArdParameters {
            resolution: 10,
            product_type: BackscatterType::Rtc,
            resampling: "BISINC_5_POINT_INTERPOLATION".to_string(),
            mt_speckle_filter: false,
            to_db_mt: false,
            outlier_removal: false,
            ..base
        },
        ArdPreset::EarthEngine => ArdParameters {
            resolution: 10,
            product_type: BackscatterType::GtcSigma,
            to_db: true,
            resampling: "BISINC_5_POINT_INTERPOLATION".to_string(),
            mt_speckle_filter: false,
            to_db_mt: false,
            outlier_removal: false,
            ..base
        },
        ArdPreset::Zhuo => ArdParameters {
            resolution: 25,
            border_noise: false,
            product_type: BackscatterType::Rtc,
            speckle_filter: true,
            ls_mask_create: true,
            to_db: true,
            mt_speckle_filter: false,
            to_db_mt: false,
            outlier_removal: false,
            ..base
        },
    }
}

impl ArdParameters {
    /// Switch to a global DEM when the AOI lies outside SRTM coverage
    pub fn adjust_dem_for_latitude(&mut self, center_lat: f64) {
        if center_lat.abs() > SRTM_LATITUDE_LIMIT && self.dem == DEFAULT_DEM {
            log::info!(
                "AOI centre at {:.2} lies outside SRTM coverage, switching DEM to {}",
                center_lat,
                HIGH_LATITUDE_DEM
            );
            self.dem = HIGH_LATITUDE_DEM.to_string();
        }
    }

    /// dB conversion applied while building timeseries.
    /// Data already converted by the ARD step is never converted twice.
    pub fn effective_to_db_mt(&self) -> bool {
        !self.to_db && self.to_db_mt
    }

    /// Whether timeseries values end up in dB
    pub fn timeseries_in_db(&self) -> bool {
        self.to_db || self.to_db_mt
    }
}

/// The two historical key/value parameter schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacySchema {
    /// GRD batch keys: `create_ls_mask`, `apply_ls_mask`, `dtype_output`, `remove_outliers`
    GrdBatch,
    /// Burst batch keys: `ls_mask_create`, `ls_mask_apply`, `datatype`, `outlier_removal`
    BurstBatch,
}

impl LegacySchema {
    /// Canonical field name of a legacy key, `None` when the key is unknown
    /// to this schema
    pub fn canonical_key(&self, key: &str) -> Option<&'static str> {
        let shared = match key {
            "type" => Some("preset"),
            "resolution" => Some("resolution"),
            "border_noise" => Some("border_noise"),
            "product_type" => Some("product_type"),
            "speckle_filter" => Some("speckle_filter"),
            "to_db" => Some("to_db"),
            "to_db_mt" => Some("to_db_mt"),
            "polarisation" => Some("polarisations"),
            "dem" => Some("dem"),
            "resampling" => Some("resampling"),
            "mt_speckle_filter" => Some("mt_speckle_filter"),
            "metrics" => Some("metrics"),
            "coherence" => Some("coherence"),
            "ha_alpha" | "H-A-Alpha" => Some("ha_alpha"),
            _ => None,
        };
        if shared.is_some() {
            return shared;
        }
        match (self, key) {
            (LegacySchema::GrdBatch, "create_ls_mask") => Some("ls_mask_create"),
            (LegacySchema::GrdBatch, "apply_ls_mask") => Some("ls_mask_apply"),
            (LegacySchema::GrdBatch, "dtype_output") => Some("data_type"),
            (LegacySchema::GrdBatch, "remove_outliers") => Some("outlier_removal"),
            (LegacySchema::BurstBatch, "ls_mask_create") => Some("ls_mask_create"),
            (LegacySchema::BurstBatch, "ls_mask_apply") => Some("ls_mask_apply"),
            (LegacySchema::BurstBatch, "datatype") => Some("data_type"),
            (LegacySchema::BurstBatch, "outlier_removal") => Some("outlier_removal"),
            _ => None,
        }
    }

    /// Parse a legacy parameter bag on top of the preset it names
    /// (`type`, defaulting to OST)
    pub fn parse(&self, bag: &BTreeMap<String, Value>) -> ArdResult<ArdParameters> {
        let preset = match bag.get("type") {
            Some(value) => ArdPreset::parse(as_str(value, "type")?)?,
            None => ArdPreset::Ost,
        };
        let mut params = preset_to_parameters(preset);

        for (key, value) in bag {
            let canonical = self.canonical_key(key).ok_or_else(|| {
                ArdError::InvalidConfiguration(format!("Unknown parameter `{}` for {:?} schema", key, self))
            })?;
            match canonical {
                "preset" => {}
                "resolution" => {
                    params.resolution = value
                        .as_u64()
                        .ok_or_else(|| invalid_value(key, value))? as u32
                }
                "border_noise" => params.border_noise = as_bool(value, key)?,
                "product_type" => params.product_type = BackscatterType::parse(as_str(value, key)?)?,
                "speckle_filter" => params.speckle_filter = as_bool(value, key)?,
                "ls_mask_create" => params.ls_mask_create = as_bool(value, key)?,
                "ls_mask_apply" => params.ls_mask_apply = as_bool(value, key)?,
                "to_db" => params.to_db = as_bool(value, key)?,
                "to_db_mt" => params.to_db_mt = as_bool(value, key)?,
                "polarisations" => {
                    params.polarisations = as_str(value, key)?
                        .split(',')
                        .map(|p| Polarization::parse(p.trim()).ok_or_else(|| invalid_value(key, value)))
                        .collect::<ArdResult<Vec<_>>>()?
                }
                "dem" => params.dem = as_str(value, key)?.to_string(),
                "resampling" => params.resampling = as_str(value, key)?.to_string(),
                "mt_speckle_filter" => params.mt_speckle_filter = as_bool(value, key)?,
                "data_type" => params.data_type = OutputDataType::parse(as_str(value, key)?)?,
                "metrics" => {
                    let list = value.as_array().ok_or_else(|| invalid_value(key, value))?;
                    params.metrics = list
                        .iter()
                        .map(|m| Metric::parse(as_str(m, key)?))
                        .collect::<ArdResult<Vec<_>>>()?
                }
                "outlier_removal" => params.outlier_removal = as_bool(value, key)?,
                "coherence" => params.coherence = as_bool(value, key)?,
                "ha_alpha" => params.ha_alpha = as_bool(value, key)?,
                _ => return Err(invalid_value(key, value)),
            }
        }
        Ok(params)
    }
}

fn invalid_value(key: &str, value: &Value) -> ArdError {
    ArdError::InvalidConfiguration(format!("Invalid value for `{}`: {}", key, value))
}

fn as_bool(value: &Value, key: &str) -> ArdResult<bool> {
    value.as_bool().ok_or_else(|| invalid_value(key, value))
}

fn as_str<'a>(value: &'a Value, key: &str) -> ArdResult<&'a str> {
    value.as_str().ok_or_else(|| invalid_value(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn presets_follow_their_definitions() {
        let ost = preset_to_parameters(ArdPreset::Ost);
        assert_eq!(ost.resolution, 20);
        assert_eq!(ost.product_type, BackscatterType::GtcGamma);
        assert!(ost.mt_speckle_filter && ost.to_db_mt && ost.outlier_removal);

        let flat = preset_to_parameters(ArdPreset::OstFlat);
        assert_eq!(flat.product_type, BackscatterType::Rtc);
        assert!(flat.ls_mask_create);

        let ee = preset_to_parameters(ArdPreset::EarthEngine);
        assert_eq!(ee.resolution, 10);
        assert!(ee.to_db);
        assert!(!ee.effective_to_db_mt());

        let zhuo = preset_to_parameters(ArdPreset::Zhuo);
        assert_eq!(zhuo.resolution, 25);
        assert!(!zhuo.border_noise && zhuo.speckle_filter);
    }

    #[test]
    fn high_latitude_switches_dem() {
        let mut params = preset_to_parameters(ArdPreset::Ceos);
        params.adjust_dem_for_latitude(45.0);
        assert_eq!(params.dem, DEFAULT_DEM);
        params.adjust_dem_for_latitude(-63.5);
        assert_eq!(params.dem, HIGH_LATITUDE_DEM);
    }

    #[test]
    fn metric_groups_expand() {
        let expanded = expand_metrics(&[Metric::Avg, Metric::Harmonics, Metric::Percentiles, Metric::Avg]);
        assert_eq!(
            expanded,
            vec![Metric::Avg, Metric::Amplitude, Metric::Phase, Metric::Residuals, Metric::P95, Metric::P5]
        );
    }

    #[test]
    fn grd_schema_maps_legacy_keys() {
        let params = LegacySchema::GrdBatch
            .parse(&bag(json!({
                "type": "OST_flat",
                "create_ls_mask": false,
                "apply_ls_mask": true,
                "dtype_output": "uint8",
                "remove_outliers": false,
                "to_db": true
            })))
            .unwrap();
        assert_eq!(params.preset, ArdPreset::OstFlat);
        assert!(!params.ls_mask_create);
        assert!(params.ls_mask_apply);
        assert_eq!(params.data_type, OutputDataType::UInt8);
        assert!(!params.outlier_removal);
        assert!(params.to_db);
    }

    #[test]
    fn burst_schema_rejects_grd_keys() {
        let result = LegacySchema::BurstBatch.parse(&bag(json!({ "dtype_output": "uint8" })));
        assert!(matches!(result, Err(ArdError::InvalidConfiguration(_))));

        let params = LegacySchema::BurstBatch
            .parse(&bag(json!({ "datatype": "uint16", "polarisation": "VV,VH" })))
            .unwrap();
        assert_eq!(params.data_type, OutputDataType::UInt16);
        assert_eq!(params.polarisations, vec![Polarization::VV, Polarization::VH]);
    }

    #[test]
    fn config_layout_and_validation() {
        let config = ProjectConfig::new("/tmp/project");
        assert_eq!(config.processing_dir, PathBuf::from("/tmp/project/processing"));
        assert_eq!(config.max_passes, DEFAULT_MAX_PASSES);
        assert!(config.validate().is_ok());

        let broken = ProjectConfig {
            transform_concurrency: 0,
            ..config
        };
        assert!(matches!(broken.validate(), Err(ArdError::InvalidConfiguration(_))));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("user", "secret");
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}
