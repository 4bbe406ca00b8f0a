//! s1ard: batch orchestration of Sentinel-1 Analysis-Ready-Data production
//!
//! This library drives inventories of Sentinel-1 scenes and bursts through
//! download, ARD processing, timeseries, timescan and mosaic stages. The
//! radar transforms themselves run in external engines (SNAP, OTB, GDAL);
//! this crate decides what has to run, runs it in bounded worker pools and
//! records completion in marker files so that interrupted batches resume.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    ArdError, ArdResult, Burst, FailureClass, OrbitDirection, Polarization, ProductKind, Scene, Subswath,
};

pub use config::{preset_to_parameters, ArdParameters, ArdPreset, Credentials, Metric, ProjectConfig};
pub use core::{BatchContext, BatchInput, PipelineReport, PipelineRequest};
pub use io::{BurstInventory, Inventory, MarkerStore};
