mod common;

use common::init_logging;
use s1ard::core::jobs::{invoke, invoke_unit, log_path_for, CommandSpec, CommandTemplate, JobOutcome, SubprocessRunner, TemplateValues};
use s1ard::io::marker::MarkerStore;
use s1ard::types::ArdError;
use tempfile::TempDir;

fn shell(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh").arg("-c").arg(script)
}

#[test]
fn test_exit_code_and_log_capture() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let log_path = log_path_for(dir.path(), "20200103", "ard", Some("VV"));
    assert_eq!(log_path.file_name().unwrap(), "20200103_ard_VV.err_log");

    let result = invoke(&SubprocessRunner, &shell("echo 'graph failed' >&2; exit 3"), &log_path);
    match result {
        Err(ArdError::ExternalJobFailed { program, exit_code, log_path: logged }) => {
            assert_eq!(program, "/bin/sh");
            assert_eq!(exit_code, 3);
            assert_eq!(logged, log_path);
        }
        other => panic!("Expected ExternalJobFailed, got {:?}", other),
    }
    let log = std::fs::read_to_string(&log_path).unwrap();
    println!("Engine log: {}", log.trim());
    assert!(log.contains("graph failed"));
}

#[test]
fn test_unit_marker_written_after_outputs() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("117").join("20200103");
    let output = out_dir.join("20200103.BS.dim");
    let spec = shell(&format!("mkdir -p '{}' && echo dim > '{}'", out_dir.display(), output.display()));
    let log_path = log_path_for(&out_dir, "20200103", "ard", None);

    let outcome = invoke_unit(&SubprocessRunner, &out_dir, None, &spec, &log_path, &[output.clone()]).unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded { log_path: log_path.clone() });
    assert!(MarkerStore::is_complete(&out_dir, None));

    // Marker present: the command is not run again
    std::fs::remove_file(&output).unwrap();
    let outcome = invoke_unit(&SubprocessRunner, &out_dir, None, &spec, &log_path, &[output.clone()]).unwrap();
    assert_eq!(outcome, JobOutcome::AlreadyDone);
    assert!(!output.exists());
}

#[test]
fn test_missing_output_leaves_no_marker() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("unit");
    let spec = shell("exit 0");
    let result = invoke_unit(
        &SubprocessRunner,
        &out_dir,
        Some("BS.VV"),
        &spec,
        &out_dir.join("stack.err_log"),
        &[out_dir.join("never_written.tif")],
    );
    assert!(matches!(result, Err(ArdError::ArtifactValidation { .. })));
    assert!(!MarkerStore::is_complete(&out_dir, Some("BS.VV")));
}

#[test]
fn test_rendered_template_runs() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("merged.txt");
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, "a\n").unwrap();
    std::fs::write(&b, "b\n").unwrap();

    let spec = CommandTemplate::new("/bin/sh -c {script} sh {inputs} {output}")
        .render(
            &TemplateValues::default()
                .with_inputs(&[a, b])
                .with_output(&output)
                .param("script", "cat \"$1\" \"$2\" > \"$3\""),
        )
        .unwrap();
    invoke(&SubprocessRunner, &spec, &dir.path().join("merge.err_log")).unwrap();
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "a\nb\n");
}

#[test]
fn test_missing_placeholder_is_rejected() {
    let result = CommandTemplate::new("gpt graph.xml -Pdem={dem}").render(&TemplateValues::default());
    assert!(matches!(result, Err(ArdError::InvalidConfiguration(_))));
}
