#![allow(dead_code)]

use s1ard::config::{ArdParameters, SpeckleSettings};
use s1ard::core::engine::{
    dimap_paths, metric_output, ConversionRequest, EngineJob, LayerIndexBuilder, LayeredIndex, ProcessingEngine,
    RasterConverter, TimescanRequest,
};
use s1ard::core::grouping::ProcessingUnit;
use s1ard::core::jobs::{CommandSpec, JobRunner};
use s1ard::types::{ArdResult, Scene};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn scene_id(date: &str, absolute_orbit: u32) -> String {
    format!(
        "S1A_IW_GRDH_1SDV_{}T170815_{}T170842_{:06}_0382D5_DADE",
        date, date, absolute_orbit
    )
}

/// A GRD scene with a local archive below `dir`
pub fn local_scene(dir: &Path, date: &str, absolute_orbit: u32) -> Scene {
    let mut scene = Scene::parse(&scene_id(date, absolute_orbit)).unwrap();
    let path = dir.join(format!("{}.zip", scene.identifier));
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(&path, b"archive").unwrap();
    scene.local_path = Some(path);
    scene
}

/// Runs nothing. Arguments `file=<path>` and `layer=<path>` are created as
/// the command's outputs; commands matching a failure pattern exit with 1.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<(String, u32)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` commands whose text contains `pattern`
    pub fn fail_matching(&self, pattern: &str, times: u32) {
        self.failures.lock().unwrap().push((pattern.to_string(), times));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.to_string().contains(pattern)).count()
    }
}

impl JobRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec, log_path: &Path) -> ArdResult<i32> {
        self.calls.lock().unwrap().push(spec.clone());
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(log_path, spec.to_string())?;

        let text = spec.to_string();
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((_, remaining)) = failures.iter_mut().find(|(p, r)| *r > 0 && text.contains(p.as_str())) {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Ok(1);
            }
        }

        for arg in &spec.args {
            if let Some(path) = arg.strip_prefix("file=").or_else(|| arg.strip_prefix("layer=")) {
                let path = Path::new(path);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, b"raster")?;
            }
        }
        Ok(0)
    }
}

fn file_arg(path: &Path) -> String {
    format!("file={}", path.display())
}

fn layer_arg(path: &Path) -> String {
    format!("layer={}", path.display())
}

/// Date encoded at the start of an ARD product name
fn product_date(path: &Path) -> NaiveDate {
    let name = path.file_name().unwrap().to_string_lossy();
    NaiveDate::parse_from_str(&name[..8], "%Y%m%d").unwrap()
}

/// Engine whose commands describe the SNAP/OTB outputs for [`FakeRunner`]
pub struct FakeEngine {
    pub bands: Vec<String>,
}

impl FakeEngine {
    pub fn new(bands: &[&str]) -> Self {
        Self {
            bands: bands.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl ProcessingEngine for FakeEngine {
    fn ard(&self, unit: &ProcessingUnit, inputs: &[PathBuf], _params: &ArdParameters, _temp_dir: &Path)
        -> ArdResult<EngineJob> {
        let stem = unit.out_dir.join(format!("{}.BS", unit.prefix()));
        let (dim, data) = dimap_paths(&stem);
        let mut command = CommandSpec::new("fake-ard").arg(format!("unit={}", unit.out_dir.display()));
        for input in inputs {
            command = command.path_arg(input);
        }
        command = command.arg(file_arg(&dim));
        for band in &self.bands {
            command = command.arg(layer_arg(&data.join(format!("Gamma0_{}.img", band))));
        }
        Ok(EngineJob {
            command,
            expected_outputs: vec![dim, data],
        })
    }

    fn stack(&self, inputs: &[PathBuf], band: &str, output: &Path) -> ArdResult<EngineJob> {
        let (dim, data) = dimap_paths(output);
        let mut command = CommandSpec::new("fake-stack").arg(format!("band={}", band));
        for (i, input) in inputs.iter().enumerate() {
            let date = product_date(input).format("%d%b%Y");
            let name = if i == 0 {
                format!("Gamma0_{}_mst_{}.img", band, date)
            } else {
                format!("Gamma0_{}_slv{}_{}.img", band, i, date)
            };
            command = command.arg(layer_arg(&data.join(name)));
        }
        Ok(EngineJob {
            command: command.arg(file_arg(&dim)),
            expected_outputs: vec![dim, data],
        })
    }

    fn mt_speckle(&self, input: &Path, output: &Path, _settings: &SpeckleSettings) -> ArdResult<EngineJob> {
        let (_, input_data) = dimap_paths(input);
        let (dim, data) = dimap_paths(output);
        let mut names: Vec<String> = std::fs::read_dir(&input_data)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let mut command = CommandSpec::new("fake-mt-speckle");
        for name in names {
            command = command.arg(layer_arg(&data.join(name)));
        }
        Ok(EngineJob {
            command: command.arg(file_arg(&dim)),
            expected_outputs: vec![dim, data],
        })
    }

    fn timescan(&self, request: &TimescanRequest<'_>) -> ArdResult<EngineJob> {
        let outputs: Vec<PathBuf> = request.metrics.iter().map(|m| metric_output(request.prefix, *m)).collect();
        let mut command = CommandSpec::new("fake-timescan").path_arg(request.index);
        for output in &outputs {
            command = command.arg(file_arg(output));
        }
        Ok(EngineJob {
            command,
            expected_outputs: outputs,
        })
    }

    fn mosaic(&self, inputs: &[PathBuf], output: &Path, _temp_dir: &Path) -> ArdResult<EngineJob> {
        let mut command = CommandSpec::new("fake-mosaic");
        for input in inputs {
            command = command.path_arg(input);
        }
        Ok(EngineJob {
            command: command.arg(file_arg(output)),
            expected_outputs: vec![output.to_path_buf()],
        })
    }
}

/// Writes every requested output and remembers the request
#[derive(Default)]
pub struct FakeConverter {
    pub requests: Mutex<Vec<ConversionRequest>>,
    pub fail_on: Mutex<Option<String>>,
}

impl RasterConverter for FakeConverter {
    fn convert(&self, request: &ConversionRequest) -> ArdResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(pattern) = self.fail_on.lock().unwrap().as_ref() {
            if request.output.to_string_lossy().contains(pattern.as_str()) {
                return Err(s1ard::ArdError::Processing(format!("conversion of {} failed", pattern)));
            }
        }
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&request.output, b"converted")?;
        Ok(())
    }
}

/// Writes the index as a plain list of its layers
#[derive(Default)]
pub struct FakeIndexBuilder {
    pub built: Mutex<Vec<LayeredIndex>>,
}

impl FakeIndexBuilder {
    pub fn find(&self, path: &Path) -> Option<LayeredIndex> {
        self.built.lock().unwrap().iter().rev().find(|i| i.path == path).cloned()
    }
}

impl LayerIndexBuilder for FakeIndexBuilder {
    fn build(&self, index: &LayeredIndex) -> ArdResult<()> {
        self.built.lock().unwrap().push(index.clone());
        if let Some(parent) = index.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listing: Vec<String> = index.layers.iter().map(|l| l.display().to_string()).collect();
        std::fs::write(&index.path, listing.join("\n"))?;
        Ok(())
    }
}
