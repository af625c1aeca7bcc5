use assert_cmd::prelude::*;
use predicates::str::contains;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::{NamedTempFile, TempDir};

fn hotray() -> Command {
    let mut cmd = Command::cargo_bin("hotray").expect("binary exists");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn module_file_name() -> String {
    format!("{DLL_PREFIX}hotray{DLL_SUFFIX}")
}

/// The render module cargo builds next to the host binary.
fn built_module() -> PathBuf {
    let bin = assert_cmd::cargo::cargo_bin("hotray");
    bin.parent().expect("target dir").join(module_file_name())
}

/// Scratch directory with a config that keeps shadow copies inside it.
fn workspace() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = dir.path().join("hotray.json");
    let json = serde_json::json!({
        "shadow_dir": dir.path().join("shadow"),
        "reload_retry_ms": 10,
    });
    fs::write(&config, json.to_string()).expect("write config");
    (dir, config)
}

fn stage_module(dir: &Path) -> PathBuf {
    let module = dir.join(module_file_name());
    let partial = dir.join("module.partial");
    fs::copy(built_module(), &partial).expect("copy render module");
    fs::rename(&partial, &module).expect("move render module into place");
    module
}

fn shadow_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir.join("shadow"))
        .map(|entries| entries.filter_map(|entry| entry.ok().map(|entry| entry.path())).collect())
        .unwrap_or_default()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn finish(mut child: Child) -> Output {
    let deadline = Instant::now() + Duration::from_secs(60);
    while child.try_wait().expect("poll host").is_none() {
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("host did not exit");
        }
        thread::sleep(Duration::from_millis(20));
    }
    child.wait_with_output().expect("collect host output")
}

fn spawn_headless(config: &Path, module: &Path, args: &[&str]) -> Child {
    let mut cmd = hotray();
    cmd.arg("--config")
        .arg(config)
        .arg("--module")
        .arg(module)
        .arg("--headless")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.spawn().expect("spawn host")
}

#[test]
fn forward_step_moves_the_camera_one_unit() {
    let mut cmd = hotray();
    cmd.args(["--headless", "--builtin", "--frames", "1", "--moves", "forward"]);
    cmd.assert()
        .success()
        .stdout(contains("camera pos=("))
        .stdout(contains(", 0.00, -1.00, 1.00)"))
        .stdout(contains("frames=1 draws=1 reloads=1 generation=1 primitives=6 lights=2"));
}

#[test]
fn vertical_moves_only_change_height() {
    let mut cmd = hotray();
    cmd.args([
        "--headless",
        "--builtin",
        "--frames",
        "3",
        "--moves",
        "up,up,down",
    ]);
    cmd.assert()
        .success()
        .stdout(contains("camera pos=(0.00, 0.10, 0.00, 1.00)"));
}

#[test]
fn json_summary_reports_frames_and_camera() {
    let mut cmd = hotray();
    cmd.args(["--headless", "--builtin", "--frames", "2", "--json"]);
    cmd.assert()
        .success()
        .stdout(contains("\"frames\": 2"))
        .stdout(contains("\"draws\": 2"))
        .stdout(contains("\"initialized\": true"))
        .stdout(contains("\"camera\""));
}

#[test]
fn config_file_is_applied() {
    let mut config = NamedTempFile::new().expect("temp config");
    config
        .write_all(br#"{ "width": 64, "height": 48, "reload_retry_ms": 5 }"#)
        .expect("write config");

    let mut cmd = hotray();
    cmd.arg("--config")
        .arg(config.path())
        .args(["--headless", "--builtin", "--frames", "1"]);
    cmd.assert().success().stdout(contains("draws=1"));
}

#[test]
fn unknown_movement_is_rejected() {
    let mut cmd = hotray();
    cmd.args(["--headless", "--builtin", "--moves", "sideways"]);
    cmd.assert()
        .failure()
        .stderr(contains("unknown movement `sideways`"));
}

#[test]
fn dynamic_module_is_loaded_drawn_and_cleaned_up() {
    let (dir, config) = workspace();
    let module = stage_module(dir.path());

    let mut cmd = hotray();
    cmd.arg("--config")
        .arg(&config)
        .arg("--module")
        .arg(&module)
        .args(["--headless", "--frames", "1", "--moves", "forward"]);
    cmd.assert()
        .success()
        .stdout(contains(", 0.00, -1.00, 1.00)"))
        .stdout(contains("frames=1 draws=1 reloads=1 generation=1 primitives=6 lights=2"));

    assert!(shadow_files(dir.path()).is_empty());
}

#[test]
fn touching_the_module_reloads_it() {
    let (dir, config) = workspace();
    let module = stage_module(dir.path());

    let child = spawn_headless(&config, &module, &["--frames", "40", "--fps", "20"]);
    wait_until("the first generation", || !shadow_files(dir.path()).is_empty());
    File::options()
        .write(true)
        .open(&module)
        .expect("open render module")
        .set_modified(SystemTime::now() + Duration::from_secs(5))
        .expect("touch render module");

    let output = finish(child);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("reloads=2 generation=2"), "{stdout}");
    assert!(stdout.contains("draws=40"), "{stdout}");
}

#[test]
fn module_built_after_startup_is_picked_up() {
    let (dir, config) = workspace();
    let module = dir.path().join(module_file_name());

    let child = spawn_headless(&config, &module, &["--frames", "1"]);
    thread::sleep(Duration::from_millis(300));
    stage_module(dir.path());

    let output = finish(child);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("not found yet"), "{stderr}");
    assert!(stdout.contains("draws=1 reloads=1 generation=1"), "{stdout}");
}
