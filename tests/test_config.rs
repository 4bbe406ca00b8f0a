mod common;

use common::init_logging;
use s1ard::config::{preset_to_parameters, ArdPreset, LegacySchema, OutputDataType, ProjectConfig, HIGH_LATITUDE_DEM};
use s1ard::core::batch::BatchContext;
use s1ard::core::retry::{Backoff, RetryPolicy};
use s1ard::types::{ArdError, ProductKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn test_project_config_file_round_trip() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = ProjectConfig::new(dir.path().join("project"));
    config.download_concurrency = 8;
    config.unit_retry = RetryPolicy::new(3, Backoff::Fixed { millis: 500 });
    config.aoi_center_lat = Some(47.1);

    let path = dir.path().join("project.json");
    config.to_file(&path).unwrap();
    let loaded = ProjectConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_budgets_take_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let minimal = json!({
        "project_dir": "/data/project",
        "download_dir": "/data/project/download",
        "inventory_dir": "/data/project/inventory",
        "processing_dir": "/data/project/processing",
        "temp_dir": "/tmp/project"
    });
    std::fs::write(&path, minimal.to_string()).unwrap();

    let config = ProjectConfig::from_file(&path).unwrap();
    assert_eq!(config.max_passes, 5);
    assert_eq!(config.download_attempts, 10);
    assert_eq!(config.data_mount, None);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = ProjectConfig::new(dir.path());
    config.max_passes = 0;
    let path = dir.path().join("project.json");
    config.to_file(&path).unwrap();
    assert!(matches!(ProjectConfig::from_file(&path), Err(ArdError::InvalidConfiguration(_))));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(ProjectConfig::from_file(&path), Err(ArdError::Json(_))));
}

#[test]
fn test_both_schemas_yield_the_same_record() {
    let grd: BTreeMap<String, Value> = serde_json::from_value(json!({
        "type": "CEOS",
        "create_ls_mask": true,
        "dtype_output": "uint16",
        "remove_outliers": true
    }))
    .unwrap();
    let burst: BTreeMap<String, Value> = serde_json::from_value(json!({
        "type": "CEOS",
        "ls_mask_create": true,
        "datatype": "uint16",
        "outlier_removal": true
    }))
    .unwrap();

    let from_grd = LegacySchema::GrdBatch.parse(&grd).unwrap();
    let from_burst = LegacySchema::BurstBatch.parse(&burst).unwrap();
    assert_eq!(from_grd, from_burst);
    assert_eq!(from_grd.preset, ArdPreset::Ceos);
    assert_eq!(from_grd.data_type, OutputDataType::UInt16);
}

#[test]
fn test_unknown_key_is_rejected() {
    let bag: BTreeMap<String, Value> = serde_json::from_value(json!({ "to_dB": true })).unwrap();
    assert!(matches!(LegacySchema::GrdBatch.parse(&bag), Err(ArdError::InvalidConfiguration(_))));
}

#[test]
fn test_timeseries_db_conversion_is_never_doubled() {
    let ee = preset_to_parameters(ArdPreset::EarthEngine);
    assert!(ee.to_db);
    assert!(!ee.effective_to_db_mt());
    assert!(ee.timeseries_in_db());

    let mut ost = preset_to_parameters(ArdPreset::Ost);
    assert!(ost.effective_to_db_mt());
    ost.to_db = true;
    assert!(!ost.effective_to_db_mt());
}

#[test]
fn test_context_switches_dem_for_polar_aoi() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = ProjectConfig::new(dir.path());
    config.aoi_center_lat = Some(69.6);

    let context = BatchContext::with_defaults(config, preset_to_parameters(ArdPreset::Ost), ProductKind::Grd, "/graphs")
        .unwrap();
    assert_eq!(context.params.dem, HIGH_LATITUDE_DEM);
}
