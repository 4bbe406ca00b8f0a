//! External job invocation.
//!
//! Every transform step runs as a subprocess described by a [`CommandSpec`].
//! The core only looks at the exit status and the presence of the expected
//! outputs; engine stdout and stderr go to a per-unit log file whose path
//! is derived from the unit, the stage and an optional polarisation.

use crate::io::marker::MarkerStore;
use crate::types::{ArdError, ArdResult};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A fully resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg<P: AsRef<Path>>(self, path: P) -> Self {
        let arg = path.as_ref().to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Values substituted into a [`CommandTemplate`]
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub params: BTreeMap<String, String>,
}

impl TemplateValues {
    pub fn with_inputs(mut self, inputs: &[PathBuf]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    pub fn with_output<P: AsRef<Path>>(mut self, output: P) -> Self {
        self.output = Some(output.as_ref().to_path_buf());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }
}

/// Whitespace separated command line with `{placeholder}` tokens.
///
/// `{inputs}` expands to one argument per input, `{inputs_csv}` to a single
/// comma-joined argument, `{output}` and `{concurrency}` to their values and
/// any other `{name}` to the named parameter. Placeholders may be embedded in
/// a token, e.g. `-Pinput={inputs_csv}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render(&self, values: &TemplateValues) -> ArdResult<CommandSpec> {
        let mut tokens = self.template.split_whitespace();
        let program = tokens
            .next()
            .ok_or_else(|| ArdError::InvalidConfiguration("Empty command template".to_string()))?;
        let mut spec = CommandSpec::new(program);

        for token in tokens {
            if token == "{inputs}" {
                spec = spec.args(values.inputs.iter().map(|p| p.to_string_lossy().into_owned()));
                continue;
            }
            spec = spec.arg(Self::substitute(token, values)?);
        }
        Ok(spec)
    }

    fn substitute(token: &str, values: &TemplateValues) -> ArdResult<String> {
        let mut out = String::with_capacity(token.len());
        let mut rest = token;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let end = rest[start..].find('}').ok_or_else(|| {
                ArdError::InvalidConfiguration(format!("Unterminated placeholder in `{}`", token))
            })? + start;
            let name = &rest[start + 1..end];
            out.push_str(&Self::lookup(name, values)?);
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(name: &str, values: &TemplateValues) -> ArdResult<String> {
        let missing = || ArdError::InvalidConfiguration(format!("No value for placeholder `{{{}}}`", name));
        match name {
            "inputs_csv" => Ok(values
                .inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(",")),
            "output" => values
                .output
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .ok_or_else(missing),
            "concurrency" => values.concurrency.map(|c| c.to_string()).ok_or_else(missing),
            other => values.params.get(other).cloned().ok_or_else(missing),
        }
    }
}

/// Runs a command with stdout and stderr redirected to `log_path`
/// and returns the exit code
pub trait JobRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, log_path: &Path) -> ArdResult<i32>;
}

/// Default runner spawning real subprocesses
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessRunner;

impl JobRunner for SubprocessRunner {
    fn run(&self, spec: &CommandSpec, log_path: &Path) -> ArdResult<i32> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = File::create(log_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        log::debug!("Executing: {}", spec);
        let status = command
            .status()
            .map_err(|e| ArdError::Processing(format!("Failed to start `{}`: {}", spec.program, e)))?;

        // Terminated by a signal
        Ok(status.code().unwrap_or(-1))
    }
}

/// Outcome of a unit-level invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Marker already present, nothing was run
    AlreadyDone,
    Succeeded { log_path: PathBuf },
}

/// Deterministic log location: `<dir>/<unit>_<stage>[_<pol>].err_log`
pub fn log_path_for<P: AsRef<Path>>(dir: P, unit: &str, stage: &str, polarisation: Option<&str>) -> PathBuf {
    let name = match polarisation {
        Some(pol) => format!("{}_{}_{}.err_log", unit, stage, pol),
        None => format!("{}_{}.err_log", unit, stage),
    };
    dir.as_ref().join(name)
}

/// Run one command, mapping a non-zero exit to [`ArdError::ExternalJobFailed`]
pub fn invoke(runner: &dyn JobRunner, spec: &CommandSpec, log_path: &Path) -> ArdResult<PathBuf> {
    let exit_code = runner.run(spec, log_path)?;
    if exit_code != 0 {
        log::error!(
            "`{}` exited with code {}, engine log at {}",
            spec.program,
            exit_code,
            log_path.display()
        );
        return Err(ArdError::ExternalJobFailed {
            program: spec.program.clone(),
            exit_code,
            log_path: log_path.to_path_buf(),
        });
    }
    Ok(log_path.to_path_buf())
}

/// Run a unit's command unless its marker already exists, then validate
/// the expected outputs and write the marker as the very last step
pub fn invoke_unit(
    runner: &dyn JobRunner,
    marker_dir: &Path,
    qualifier: Option<&str>,
    spec: &CommandSpec,
    log_path: &Path,
    expected_outputs: &[PathBuf],
) -> ArdResult<JobOutcome> {
    if MarkerStore::is_complete(marker_dir, qualifier) {
        log::debug!("{} already processed", marker_dir.display());
        return Ok(JobOutcome::AlreadyDone);
    }
    std::fs::create_dir_all(marker_dir)?;
    let log_path = invoke(runner, spec, log_path)?;
    MarkerStore::mark_complete(marker_dir, qualifier, expected_outputs)?;
    Ok(JobOutcome::Succeeded { log_path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expands_placeholders() {
        let template = CommandTemplate::new("gpt graph.xml -x -q {concurrency} -Pinput={inputs_csv} -Poutput={output} -Pres={resolution}");
        let values = TemplateValues::default()
            .with_inputs(&[PathBuf::from("/a.dim"), PathBuf::from("/b.dim")])
            .with_output("/out/stack")
            .with_concurrency(4)
            .param("resolution", 20);
        let spec = template.render(&values).unwrap();
        assert_eq!(spec.program, "gpt");
        assert_eq!(
            spec.args,
            vec!["graph.xml", "-x", "-q", "4", "-Pinput=/a.dim,/b.dim", "-Poutput=/out/stack", "-Pres=20"]
        );
    }

    #[test]
    fn template_expands_inputs_to_separate_args() {
        let spec = CommandTemplate::new("gdalbuildvrt -separate {output} {inputs}")
            .render(
                &TemplateValues::default()
                    .with_inputs(&[PathBuf::from("1.tif"), PathBuf::from("2.tif")])
                    .with_output("ts.vrt"),
            )
            .unwrap();
        assert_eq!(spec.args, vec!["-separate", "ts.vrt", "1.tif", "2.tif"]);
    }

    #[test]
    fn template_reports_missing_values() {
        let result = CommandTemplate::new("prog {missing}").render(&TemplateValues::default());
        assert!(matches!(result, Err(ArdError::InvalidConfiguration(_))));
    }

    #[test]
    fn log_paths_are_deterministic() {
        assert_eq!(
            log_path_for("/p/117/Timeseries", "117_BS", "stack", Some("VV")),
            PathBuf::from("/p/117/Timeseries/117_BS_stack_VV.err_log")
        );
        assert_eq!(log_path_for("/p/x", "20200103", "ard", None), PathBuf::from("/p/x/20200103_ard.err_log"));
    }
}
