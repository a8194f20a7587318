mod common;

use std::io::Write;
use std::process::{Command, Output};

use common::HprofStream;

fn hprof(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hprof")).args(args).output().expect("Failed to run hprof")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_converts_valid_file() {
    let file = temp_file(
        &HprofStream::with_thread_and_frame(1000)
            .stack_trace(300_001, 1, &[1])
            .cpu_samples(5, &[(5, 300_001)])
            .build(),
    );

    let output = hprof(&[file.path().to_str().unwrap()]);
    assert!(output.status.success(), "stdout: {}", stdout(&output));

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "THREAD START (obj=1, id = 1, name=\"main\", group=\"null\")");
    assert_eq!(lines[1], "TRACE 300001: (thread=1)");
    assert_eq!(lines[2], "\tMain.run(Main.java:7)");
    assert!(lines[3].starts_with("CPU SAMPLES BEGIN (total = 5) "));
    assert_eq!(lines[4], "rank   self  accum   count trace method");
    assert_eq!(lines[5], "   1 100.00% 100.00%       5  300001 Main.run");
    assert_eq!(lines[6], "CPU SAMPLES END");
}

#[test]
fn test_lenient_mode_is_used() {
    let file = temp_file(
        &HprofStream::with_thread_and_frame(0)
            .stack_trace(1, 1, &[1])
            .stack_trace(2, 1, &[1])
            .cpu_samples(7, &[(3, 1), (4, 2)])
            .build(),
    );

    let output = hprof(&[file.path().to_str().unwrap()]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("CPU SAMPLES BEGIN (total = 7)"));
}

#[test]
fn test_wrong_argument_count_prints_usage() {
    for args in [&[][..], &["a.hprof", "b.hprof"][..]] {
        let output = hprof(args);
        assert_eq!(output.status.code(), Some(1));
        let text = stdout(&output);
        assert!(text.starts_with("ERROR: "), "stdout: {text}");
        assert!(text.contains("usage: hprof <binary-hprof-file>"));
    }
}

#[test]
fn test_missing_file_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.hprof");

    let output = hprof(&[missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.starts_with("ERROR: file "));
    assert!(text.contains("does not exist"));
    assert!(text.contains("usage: hprof <binary-hprof-file>"));
}

#[test]
fn test_malformed_file_reports_without_partial_output() {
    let file = temp_file(
        &HprofStream::with_thread_and_frame(0).stack_trace(1, 1, &[1]).cpu_samples(0, &[(0, 1)]).build(),
    );

    let output = hprof(&[file.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.starts_with("Problem reading binary hprof data from "), "stdout: {text}");
    assert!(text.contains("malformed hprof"));
    assert!(!text.contains("THREAD START"));
}

#[test]
fn test_help_exits_successfully() {
    let output = hprof(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("binary-hprof-file"));
}

#[test]
fn test_version_exits_successfully() {
    let output = hprof(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("hprof "));
}
