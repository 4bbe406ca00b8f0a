//! External collaborators of the pipeline.
//!
//! The radar transforms, raster conversions and layered indices are produced
//! by external tools. The traits here describe what the orchestration needs
//! from them; the default implementations render SNAP `gpt`, OTB and GDAL
//! command lines and run them through a [`JobRunner`].

use crate::config::{ArdParameters, Metric, OutputDataType, SpeckleSettings};
use crate::core::grouping::{ProcessingUnit, UnitInputs};
use crate::core::jobs::{invoke, log_path_for, CommandSpec, CommandTemplate, JobRunner, TemplateValues};
use crate::core::scaling::ScalingRule;
use crate::types::{ArdError, ArdResult};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A rendered engine command and the files it must leave behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineJob {
    pub command: CommandSpec,
    pub expected_outputs: Vec<PathBuf>,
}

/// DIMAP product written by SNAP: `<stem>.dim` plus `<stem>.data/`
pub fn dimap_paths(stem: &Path) -> (PathBuf, PathBuf) {
    let mut dim = stem.as_os_str().to_os_string();
    dim.push(".dim");
    let mut data = stem.as_os_str().to_os_string();
    data.push(".data");
    (PathBuf::from(dim), PathBuf::from(data))
}

/// Inputs of one timescan metrics computation
#[derive(Debug, Clone)]
pub struct TimescanRequest<'a> {
    /// Layered index of the timeseries
    pub index: &'a Path,
    /// Output prefix, metric files become `<prefix>.<metric>.tif`
    pub prefix: &'a Path,
    pub metrics: &'a [Metric],
    pub dates: &'a [NaiveDate],
    pub rescale: bool,
    pub to_power: bool,
    pub outlier_removal: bool,
}

pub trait ProcessingEngine: Send + Sync {
    /// Scene or burst to ARD. Products go to `unit.out_dir` as
    /// `<prefix>.<product>.dim`.
    fn ard(&self, unit: &ProcessingUnit, inputs: &[PathBuf], params: &ArdParameters, temp_dir: &Path)
        -> ArdResult<EngineJob>;

    /// Co-registered stack of one band over all dates, written as DIMAP at `output`
    fn stack(&self, inputs: &[PathBuf], band: &str, output: &Path) -> ArdResult<EngineJob>;

    /// Multi-temporal speckle filter of a stack
    fn mt_speckle(&self, input: &Path, output: &Path, settings: &SpeckleSettings) -> ArdResult<EngineJob>;

    fn timescan(&self, request: &TimescanRequest<'_>) -> ArdResult<EngineJob>;

    /// Feather-blended spatial mosaic
    fn mosaic(&self, inputs: &[PathBuf], output: &Path, temp_dir: &Path) -> ArdResult<EngineJob>;
}

/// Command templates of the default engine
#[derive(Debug, Clone)]
pub struct EngineTemplates {
    pub grd_ard: CommandTemplate,
    pub burst_ard: CommandTemplate,
    pub stack: CommandTemplate,
    pub mt_speckle: CommandTemplate,
    pub timescan: CommandTemplate,
    pub mosaic: CommandTemplate,
}

impl Default for EngineTemplates {
    fn default() -> Self {
        Self {
            grd_ard: CommandTemplate::new(
                "gpt {graph_dir}/grd_to_ard.xml -x -q {concurrency} -Pinput={inputs_csv} -Poutput={output} \
                 -Presolution={resolution} -Pproduct_type={product_type} -Pborder_noise={border_noise} \
                 -Pspeckle_filter={speckle_filter} -Pto_db={to_db} -Pls_mask={ls_mask_create} \
                 -Pdem={dem} -Presampling={resampling} -Ptemp_dir={temp_dir}",
            ),
            burst_ard: CommandTemplate::new(
                "gpt {graph_dir}/burst_to_ard.xml -x -q {concurrency} -Pinput={inputs_csv} -Poutput={output} \
                 -Pswath={swath} -Pburst={burst_nr} -Presolution={resolution} -Pproduct_type={product_type} \
                 -Pspeckle_filter={speckle_filter} -Pto_db={to_db} -Pls_mask={ls_mask_create} \
                 -Pcoherence={coherence} -Pha_alpha={ha_alpha} -Pdem={dem} -Ptemp_dir={temp_dir}",
            ),
            stack: CommandTemplate::new(
                "gpt {graph_dir}/create_stack.xml -x -q {concurrency} -Pfilelist={inputs_csv} \
                 -Pband={band} -Poutput={output}",
            ),
            mt_speckle: CommandTemplate::new(
                "gpt {graph_dir}/mt_speckle.xml -x -q {concurrency} -Pinput={input} -Poutput={output} \
                 -Pfilter={filter} -PENL={enl} -Pestimate_ENL={estimate_enl} -Psigma={sigma} \
                 -Pfilter_x_size={filter_x_size} -Pfilter_y_size={filter_y_size} \
                 -Pwindow_size={window_size} -Ptarget_window_size={target_window_size} \
                 -Pnum_of_looks={num_of_looks} -Pdamping={damping} -Ppan_size={pan_size}",
            ),
            timescan: CommandTemplate::new(
                "s1ard-metrics --index {input} --prefix {output} --metrics {metrics} --dates {dates} \
                 --rescale {rescale} --to-power {to_power} --outlier-removal {outlier_removal}",
            ),
            mosaic: CommandTemplate::new(
                "otbcli_Mosaic -ram 4000 -progress 1 -comp.feather large -harmo.method band \
                 -harmo.cost rmse -tmpdir {temp_dir} -il {inputs} -out {output} float",
            ),
        }
    }
}

/// SNAP graphs for ARD and stacks, a metrics tool for timescans and
/// `otbcli_Mosaic` for mosaics
#[derive(Debug, Clone)]
pub struct SnapOtbEngine {
    pub graph_dir: PathBuf,
    /// Passed as `-q` to every `gpt` call
    pub concurrency_hint: usize,
    pub templates: EngineTemplates,
}

impl SnapOtbEngine {
    pub fn new<P: AsRef<Path>>(graph_dir: P, concurrency_hint: usize) -> Self {
        Self {
            graph_dir: graph_dir.as_ref().to_path_buf(),
            concurrency_hint: concurrency_hint.max(1),
            templates: EngineTemplates::default(),
        }
    }

    fn base_values(&self) -> TemplateValues {
        TemplateValues::default()
            .with_concurrency(self.concurrency_hint)
            .param("graph_dir", self.graph_dir.display())
    }
}

impl ProcessingEngine for SnapOtbEngine {
    fn ard(
        &self,
        unit: &ProcessingUnit,
        inputs: &[PathBuf],
        params: &ArdParameters,
        temp_dir: &Path,
    ) -> ArdResult<EngineJob> {
        let stem = unit.out_dir.join(format!("{}.BS", unit.prefix()));
        let values = self
            .base_values()
            .with_inputs(inputs)
            .with_output(&stem)
            .param("resolution", params.resolution)
            .param("product_type", params.product_type.as_str())
            .param("border_noise", params.border_noise)
            .param("speckle_filter", params.speckle_filter)
            .param("to_db", params.to_db)
            .param("ls_mask_create", params.ls_mask_create)
            .param("coherence", params.coherence)
            .param("ha_alpha", params.ha_alpha)
            .param("dem", &params.dem)
            .param("resampling", &params.resampling)
            .param("temp_dir", temp_dir.display());

        let command = match &unit.inputs {
            UnitInputs::Scenes(_) => self.templates.grd_ard.render(&values)?,
            UnitInputs::Burst(burst) => self.templates.burst_ard.render(
                &values
                    .param("swath", burst.subswath)
                    .param("burst_nr", burst.burst_nr),
            )?,
        };
        let (dim, data) = dimap_paths(&stem);
        Ok(EngineJob {
            command,
            expected_outputs: vec![dim, data],
        })
    }

    fn stack(&self, inputs: &[PathBuf], band: &str, output: &Path) -> ArdResult<EngineJob> {
        let values = self
            .base_values()
            .with_inputs(inputs)
            .with_output(output)
            .param("band", band);
        let (dim, data) = dimap_paths(output);
        Ok(EngineJob {
            command: self.templates.stack.render(&values)?,
            expected_outputs: vec![dim, data],
        })
    }

    fn mt_speckle(&self, input: &Path, output: &Path, settings: &SpeckleSettings) -> ArdResult<EngineJob> {
        let (input_dim, _) = dimap_paths(input);
        let values = self
            .base_values()
            .with_output(output)
            .param("input", input_dim.display())
            .param("filter", &settings.filter)
            .param("enl", settings.enl)
            .param("estimate_enl", settings.estimate_enl)
            .param("sigma", settings.sigma)
            .param("filter_x_size", settings.filter_x_size)
            .param("filter_y_size", settings.filter_y_size)
            .param("window_size", &settings.window_size)
            .param("target_window_size", &settings.target_window_size)
            .param("num_of_looks", settings.num_of_looks)
            .param("damping", settings.damping)
            .param("pan_size", settings.pan_size);
        let (dim, data) = dimap_paths(output);
        Ok(EngineJob {
            command: self.templates.mt_speckle.render(&values)?,
            expected_outputs: vec![dim, data],
        })
    }

    fn timescan(&self, request: &TimescanRequest<'_>) -> ArdResult<EngineJob> {
        let metrics = request.metrics.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",");
        let dates = request
            .dates
            .iter()
            .map(|d| d.format("%Y%m%d").to_string())
            .collect::<Vec<_>>()
            .join(",");
        let values = self
            .base_values()
            .with_output(request.prefix)
            .param("input", request.index.display())
            .param("metrics", metrics)
            .param("dates", dates)
            .param("rescale", request.rescale)
            .param("to_power", request.to_power)
            .param("outlier_removal", request.outlier_removal);
        Ok(EngineJob {
            command: self.templates.timescan.render(&values)?,
            expected_outputs: request
                .metrics
                .iter()
                .map(|m| metric_output(request.prefix, *m))
                .collect(),
        })
    }

    fn mosaic(&self, inputs: &[PathBuf], output: &Path, temp_dir: &Path) -> ArdResult<EngineJob> {
        let values = self
            .base_values()
            .with_inputs(inputs)
            .with_output(output)
            .param("temp_dir", temp_dir.display());
        Ok(EngineJob {
            command: self.templates.mosaic.render(&values)?,
            expected_outputs: vec![output.to_path_buf()],
        })
    }
}

/// `<prefix>.<metric>.tif`
pub fn metric_output(prefix: &Path, metric: Metric) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!(".{}.tif", metric.as_str()));
    PathBuf::from(name)
}

/// One per-date conversion into a timeseries file
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub rule: ScalingRule,
    pub data_type: OutputDataType,
    /// Optional clip polygon
    pub extent: Option<PathBuf>,
    /// Where the tool logs go
    pub log_dir: PathBuf,
}

pub trait RasterConverter: Send + Sync {
    fn convert(&self, request: &ConversionRequest) -> ArdResult<()>;
}

/// `gdal_calc.py` for dB and clipping, `gdalwarp` for the extent and
/// `gdal_translate` for the final type and linear stretch
pub struct GdalConverter {
    runner: Arc<dyn JobRunner>,
}

impl GdalConverter {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self { runner }
    }

    /// The commands run for `request`, with intermediates in `work_dir`
    pub fn commands(request: &ConversionRequest, work_dir: &Path) -> Vec<(&'static str, CommandSpec)> {
        let rule = &request.rule;
        let clipped = work_dir.join("clipped.tif");
        let mut commands = vec![(
            "calc",
            CommandSpec::new("gdal_calc.py")
                .arg("-A")
                .path_arg(&request.input)
                .arg(format!("--outfile={}", clipped.display()))
                .arg(format!("--calc={}", rule.calc_expression()))
                .arg("--NoDataValue=0")
                .arg("--type=Float32")
                .arg("--overwrite"),
        )];

        let mut current = clipped;
        if let Some(extent) = &request.extent {
            let cut = work_dir.join("cut.tif");
            commands.push((
                "warp",
                CommandSpec::new("gdalwarp")
                    .arg("-overwrite")
                    .arg("-cutline")
                    .path_arg(extent)
                    .arg("-crop_to_cutline")
                    .args(["-srcnodata", "0", "-dstnodata", "0"])
                    .path_arg(&current)
                    .path_arg(&cut),
            ));
            current = cut;
        }

        let mut translate = CommandSpec::new("gdal_translate")
            .args(["-of", "GTiff", "-co", "COMPRESS=DEFLATE", "-a_nodata", "0"])
            .arg("-ot")
            .arg(request.data_type.gdal_name());
        if let Some((src_min, src_max, dst_min, dst_max)) = rule.stretch(request.data_type) {
            translate = translate.arg("-scale").args([
                src_min.to_string(),
                src_max.to_string(),
                dst_min.to_string(),
                dst_max.to_string(),
            ]);
        }
        commands.push(("translate", translate.path_arg(&current).path_arg(&request.output)));
        commands
    }
}

impl RasterConverter for GdalConverter {
    fn convert(&self, request: &ConversionRequest) -> ArdResult<()> {
        let parent = request
            .output
            .parent()
            .ok_or_else(|| ArdError::Processing(format!("{} has no parent", request.output.display())))?;
        std::fs::create_dir_all(parent)?;
        let work_dir = tempfile::Builder::new().prefix(".convert").tempdir_in(parent)?;

        let stem = request
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (step, command) in Self::commands(request, work_dir.path()) {
            invoke(self.runner.as_ref(), &command, &log_path_for(&request.log_dir, &stem, step, None))?;
        }
        Ok(())
    }
}

/// Multi-band index with one band per layer, in the given order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredIndex {
    pub path: PathBuf,
    pub layers: Vec<PathBuf>,
}

pub trait LayerIndexBuilder: Send + Sync {
    fn build(&self, index: &LayeredIndex) -> ArdResult<()>;
}

/// `gdalbuildvrt -separate -srcnodata 0`
pub struct GdalBuildVrt {
    runner: Arc<dyn JobRunner>,
}

impl GdalBuildVrt {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self { runner }
    }

    pub fn command(index: &LayeredIndex) -> CommandSpec {
        let mut spec = CommandSpec::new("gdalbuildvrt")
            .args(["-overwrite", "-separate", "-srcnodata", "0"])
            .path_arg(&index.path);
        for layer in &index.layers {
            spec = spec.path_arg(layer);
        }
        spec
    }
}

impl LayerIndexBuilder for GdalBuildVrt {
    fn build(&self, index: &LayeredIndex) -> ArdResult<()> {
        if index.layers.is_empty() {
            return Err(ArdError::Processing(format!(
                "No layers for index {}",
                index.path.display()
            )));
        }
        let log_path = index.path.with_extension("err_log");
        invoke(self.runner.as_ref(), &Self::command(index), &log_path)?;
        Ok(())
    }
}
