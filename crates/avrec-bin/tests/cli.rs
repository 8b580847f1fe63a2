//! Integration tests for the avrec binary
//!
//! Run with: cargo test -p avrec-bin --test cli

use avrec_storage::file_format::{write_record, FileHeader};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn avrec() -> Command {
    Command::new(env!("CARGO_BIN_EXE_avrec"))
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("Failed to execute avrec binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Small buffers so a simulated run does not allocate the production sizes.
fn write_config(dir: &Path, storage: &Path) -> PathBuf {
    let path = dir.join("avrec.toml");
    let toml = format!(
        r#"
[application]
log_level = "warn"

[buffers]
video_capacity_bytes = 8388608
audio_capacity_bytes = 1048576
consumer_poll_ms = 10

[video]
camera_count = 2

[storage]
storage_path = "{}"
"#,
        storage.display()
    );
    std::fs::write(&path, toml).unwrap();
    path
}

/// Video file with `records` frames, optionally cut off mid-record.
fn write_video_file(path: &Path, records: u64, truncate: bool) {
    let mut bytes = FileHeader::Video.encode();
    for i in 0..records {
        write_record(&mut bytes, 100 + i * 33, &[i as u8; 64]).unwrap();
    }
    if truncate {
        bytes.truncate(bytes.len() - 10);
    }
    std::fs::write(path, bytes).unwrap();
}

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_help_lists_subcommands() {
    let output = run(avrec().arg("--help"));
    assert!(output.status.success(), "Help command should succeed");
    let text = stdout(&output);
    for command in ["simulate", "info", "repair", "config"] {
        assert!(text.contains(command), "help should mention {command}");
    }
}

#[test]
fn test_config_prints_effective_values() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), dir.path());

    let output = run(avrec().arg("--config").arg(&config).arg("config"));
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("camera_count = 2"));
    assert!(text.contains("consumer_poll_ms = 10"));
    // Untouched keys keep their defaults
    assert!(text.contains("sample_rate = 44100"));
}

#[test]
fn test_invalid_log_level_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), dir.path());

    let output = run(avrec()
        .arg("--config")
        .arg(&config)
        .args(["--log-level", "loud", "config"]));
    assert!(!output.status.success());
}

#[test]
fn test_log_format_flag() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), dir.path());

    let output = run(avrec()
        .arg("--config")
        .arg(&config)
        .args(["--log-format", "json", "config"]));
    assert!(output.status.success());
    assert!(stdout(&output).contains("log_format = \"json\""));

    let output = run(avrec()
        .arg("--config")
        .arg(&config)
        .args(["--log-format", "xml", "config"]));
    assert!(!output.status.success());
}

/// Bad numbers are reported as errors (exit code 1), not panics.
#[test]
fn test_simulate_rejects_non_finite_arguments() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), dir.path());

    for args in [
        ["--seconds", "NaN"],
        ["--lead-in", "inf"],
        ["--fps", "nan"],
        ["--fps", "0"],
    ] {
        let output = run(avrec().arg("--config").arg(&config).arg("simulate").args(args));
        assert_eq!(output.status.code(), Some(1), "args {:?}", args);
    }
}

// =============================================================================
// File Tools
// =============================================================================

#[test]
fn test_info_reports_records() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cam.vid");
    write_video_file(&file, 3, false);

    let output = run(avrec().arg("info").arg(&file));
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("records:       3"));
    assert!(text.contains("100 .. 166"));
    assert!(!text.contains("TRUNCATED"));
}

#[test]
fn test_repair_drops_partial_tail() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("broken.vid");
    let dst = dir.path().join("fixed.vid");
    write_video_file(&src, 4, true);

    let info = run(avrec().arg("info").arg(&src));
    assert!(info.status.success());
    assert!(stdout(&info).contains("TRUNCATED"));

    let output = run(avrec().arg("repair").arg(&src).arg(&dst));
    assert!(output.status.success());
    assert!(stdout(&output).contains("Kept 3 records"));

    let fixed = run(avrec().arg("info").arg(&dst));
    assert!(fixed.status.success());
    assert!(stdout(&fixed).contains("records:       3"));
    assert!(!stdout(&fixed).contains("TRUNCATED"));
}

#[test]
fn test_repair_onto_source_keeps_recording() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let src = dir.path().join("cam.vid");
    write_video_file(&src, 4, true);
    let len_before = std::fs::metadata(&src).unwrap().len();

    let aliased = dir.path().join("sub/../cam.vid");
    let output = run(avrec().arg("repair").arg(&src).arg(&aliased));
    assert!(!output.status.success());
    assert_eq!(std::fs::metadata(&src).unwrap().len(), len_before);
}

#[test]
fn test_info_rejects_foreign_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, b"definitely not a recording").unwrap();

    let output = run(avrec().arg("info").arg(&file));
    assert!(!output.status.success());
}

// =============================================================================
// Simulated Session
// =============================================================================

#[test]
fn test_simulate_writes_audio_and_video_files() {
    let dir = TempDir::new().unwrap();
    let storage = dir.path().join("rec");
    std::fs::create_dir(&storage).unwrap();
    let config = write_config(dir.path(), &storage);

    let output = run(avrec().arg("--config").arg(&config).args([
        "simulate",
        "--seconds",
        "0.5",
        "--lead-in",
        "0.1",
        "--frame-bytes",
        "4000",
    ]));
    assert!(
        output.status.success(),
        "simulate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let mut names: Vec<String> = std::fs::read_dir(&storage)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.iter().filter(|n| n.ends_with("_audio_00.aud")).count(), 1);
    assert_eq!(names.iter().filter(|n| n.ends_with("_video_00.vid")).count(), 1);
    assert_eq!(names.iter().filter(|n| n.ends_with("_video_01.vid")).count(), 1);

    for name in &names {
        let path = storage.join(name);
        assert!(std::fs::metadata(&path).unwrap().permissions().readonly());
        let info = run(avrec().arg("info").arg(&path));
        assert!(info.status.success());
        assert!(!stdout(&info).contains("records:       0"));
    }
}

#[test]
fn test_simulate_without_storage_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), &dir.path().join("missing"));

    let output = run(avrec()
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--seconds", "0.1", "--lead-in", "0"]));
    assert!(!output.status.success());
}
