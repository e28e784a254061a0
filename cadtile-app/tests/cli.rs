use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn cadtile(dir: &std::path::Path) -> Command {
    let mut command = Command::cargo_bin("cadtile").expect("二进制");
    command
        .current_dir(dir)
        .env_remove("CADTILE_CONFIG")
        .env_remove("CADTILE_GDAL_BUNDLE");
    command
}

#[test]
fn missing_input_prints_usage() {
    let dir = tempfile::tempdir().expect("临时目录");
    cadtile(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("用法"));
}

#[test]
fn unknown_flag_is_rejected() {
    let dir = tempfile::tempdir().expect("临时目录");
    cadtile(dir.path())
        .args(["--fast", "plan.dwg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("未知参数：--fast"));
}

#[test]
fn absent_drawing_reports_failed_init_stage() {
    let dir = tempfile::tempdir().expect("临时目录");
    cadtile(dir.path())
        .args(["--work-dir", "jobs", "absent.dwg"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"success\": false"))
        .stdout(predicate::str::contains("\"stage\": \"init\""));
}

#[test]
fn unreadable_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("临时目录");
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[pipeline\nwork_dir = ").expect("写入配置");
    cadtile(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("absent.dxf")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"status\": \"failed\""));
}

#[test]
fn missing_converter_fails_convert_stage() {
    let dir = tempfile::tempdir().expect("临时目录");
    let config = dir.path().join("cadtile.toml");
    fs::write(
        &config,
        "[tools]\nconverter = \"/nonexistent/dwg2dxf\"\ntimeout_secs = 5\n",
    )
    .expect("写入配置");
    fs::write(dir.path().join("plan.dwg"), b"AC1032").expect("写入图纸");

    cadtile(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["--work-dir", "jobs", "plan.dwg"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"stage\": \"convert\""))
        .stdout(predicate::str::contains("无法启动"));
    assert!(!dir.path().join("jobs").join("plan").join("plan_source.dwg").exists());
}
