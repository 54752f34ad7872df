#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use chimp_oom_agent::cgroup::{
    detect_reader, parse_decimal, parse_v1_limit, parse_v2_limit, V1_UNBOUNDED_THRESHOLD,
};
use chimp_oom_agent::telemetry::ContainerTelemetry;
use chimp_oom_agent::{MemoryTelemetry, OomError};
use std::fs;
use std::path::Path;

fn write_v2(root: &Path, limit: &str, usage: &str) {
    fs::write(root.join("memory.max"), limit).expect("write memory.max");
    fs::write(root.join("memory.current"), usage).expect("write memory.current");
}

fn write_v1(root: &Path, limit: &str, usage: &str) {
    let dir = root.join("memory");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("memory.limit_in_bytes"), limit).expect("write limit");
    fs::write(dir.join("memory.usage_in_bytes"), usage).expect("write usage");
}

#[test]
fn v2_limit_parsing() {
    let p = Path::new("memory.max");
    assert!(matches!(parse_v2_limit(p, "max\n"), Err(OomError::UnboundedLimit { .. })));
    assert_eq!(parse_v2_limit(p, "104857600\n").expect("limit"), 104_857_600);
    assert!(matches!(parse_v2_limit(p, "lots"), Err(OomError::TelemetryParse { .. })));
}

#[test]
fn v1_unlimited_sentinel_is_not_a_limit() {
    let p = Path::new("memory.limit_in_bytes");
    assert!(matches!(
        parse_v1_limit(p, "9223372036854771712\n"),
        Err(OomError::UnboundedLimit { .. })
    ));
    assert!(matches!(
        parse_v1_limit(p, &V1_UNBOUNDED_THRESHOLD.to_string()),
        Err(OomError::UnboundedLimit { .. })
    ));
    assert_eq!(parse_v1_limit(p, "536870912").expect("limit"), 536_870_912);
    assert!(matches!(parse_v1_limit(p, "nope"), Err(OomError::TelemetryParse { .. })));
}

#[test]
fn decimal_parsing_rejects_garbage() {
    let p = Path::new("memory.current");
    assert_eq!(parse_decimal(p, " 42 ").expect("num"), 42);
    assert!(matches!(parse_decimal(p, ""), Err(OomError::TelemetryParse { .. })));
    assert!(matches!(parse_decimal(p, "-1"), Err(OomError::TelemetryParse { .. })));
}

#[test]
fn detects_v2_and_captures_baseline() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v2(dir.path(), "104857600\n", "1000\n");
    let tel = ContainerTelemetry::detect(dir.path()).expect("detect");
    assert_eq!(tel.version_label(), "v2");
    assert_eq!(tel.backend_label(), "container");
    assert_eq!(tel.baseline_usage_bytes(), Some(1000));

    fs::write(dir.path().join("memory.current"), "5000\n").expect("write");
    let snap = tel.snapshot().expect("snapshot");
    assert_eq!(snap.used_bytes, 5000);
    assert_eq!(snap.limit_bytes, 104_857_600);
    assert_eq!(tel.baseline_usage_bytes(), Some(1000));
}

#[test]
fn detects_v1() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v1(dir.path(), "2097152", "1024");
    let tel = ContainerTelemetry::detect(dir.path()).expect("detect");
    assert_eq!(tel.version_label(), "v1");
    let snap = tel.snapshot().expect("snapshot");
    assert_eq!(snap.limit_bytes, 2_097_152);
    assert_eq!(snap.used_bytes, 1024);
}

#[test]
fn v2_wins_when_both_layouts_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v1(dir.path(), "2097152", "1024");
    write_v2(dir.path(), "4096", "1");
    let tel = ContainerTelemetry::from_reader(detect_reader(dir.path()).expect("detect"))
        .expect("telemetry");
    assert_eq!(tel.version_label(), "v2");
    assert_eq!(tel.baseline_usage_bytes(), Some(1));
}

#[test]
fn missing_controller_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(matches!(
        ContainerTelemetry::detect(dir.path()),
        Err(OomError::TelemetryUnavailable(_))
    ));
}

#[test]
fn unbounded_v2_limit_is_fatal_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v2(dir.path(), "max\n", "1000\n");
    assert!(matches!(
        ContainerTelemetry::detect(dir.path()),
        Err(OomError::UnboundedLimit { .. })
    ));
}

#[test]
fn unlimited_v1_sentinel_is_fatal_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v1(dir.path(), "9223372036854771712\n", "1024\n");
    let err = ContainerTelemetry::detect(dir.path()).expect_err("unbounded");
    assert!(matches!(err, OomError::UnboundedLimit { .. }));
    assert!(err.is_telemetry());
}

#[test]
fn malformed_usage_fails_the_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v2(dir.path(), "4096", "10");
    let tel = ContainerTelemetry::detect(dir.path()).expect("detect");
    fs::write(dir.path().join("memory.current"), "not-a-number").expect("write");
    let err = tel.snapshot().expect_err("parse error");
    assert!(matches!(err, OomError::TelemetryParse { .. }));
    assert!(err.is_telemetry());
}

#[test]
fn vanished_file_is_a_read_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_v1(dir.path(), "4096", "10");
    let tel = ContainerTelemetry::detect(dir.path()).expect("detect");
    fs::remove_file(dir.path().join("memory").join("memory.usage_in_bytes")).expect("rm");
    assert!(matches!(tel.snapshot(), Err(OomError::TelemetryRead { .. })));
}
