use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use testbridge::modules::ModuleLoadError;
use testbridge::shared::MemoryLogSink;
use testbridge::{
    ActionKind, ControllerRegistry, Driver, DriverConfig, DriverError, DriverPhase,
    IsolationStrategy, Settings, TestEventListener,
};

/// Fake isolation host. Runs execute in a background subshell so that the
/// main loop keeps reading and can honour `stop_run` mid-run.
const HOST: &str = r#"#!/bin/sh
PREFIX=""
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"create_controller"'*)
      PREFIX=$(printf '%s\n' "$line" | sed -n 's/.*"id_prefix":"\([^"]*\)".*/\1/p')
      rm -f stop.flag
      printf '{"id":%s,"created":{"controller":"testkit.api.FrameworkController","api_version":3}}\n' "$id"
      ;;
    *'"action":"load"'*)
      printf '{"id":%s,"report":"<test-suite type=\\"Assembly\\" id=\\"%s1000\\"/>"}\n' "$id" "$PREFIX"
      ;;
    *'"action":"count"'*)
      printf '{"id":%s,"report":"3"}\n' "$id"
      ;;
    *'"action":"explore"'*)
      printf '{"id":%s,"report":"<test-suite><test-case id=\\"%s1001\\"/><test-case id=\\"%s1002\\"/><test-case id=\\"%s1003\\"/></test-suite>"}\n' "$id" "$PREFIX" "$PREFIX" "$PREFIX"
      ;;
    *'"action":"run"'*)
      (
        total=0
        for n in 1001 1002 1003; do
          if [ -f stop.flag ]; then break; fi
          sleep "${STEP_DELAY:-0}"
          printf '{"id":%s,"report":"<test-case id=\\"%s%s\\" result=\\"Passed\\"/>"}\n' "$id" "$PREFIX" "$n"
          total=$((total + 1))
        done
        if [ -f stop.flag ]; then result=Cancelled; else result=Passed; fi
        printf '{"id":%s,"report":"<test-run result=\\"%s\\" total=\\"%s\\"/>"}\n' "$id" "$result" "$total"
      ) &
      ;;
    *'"action":"stop_run"'*)
      touch stop.flag
      printf '{"id":%s,"report":"<stopping/>"}\n' "$id"
      ;;
    *)
      printf '{"id":%s,"error":{"kind":"unknown_action","message":"unsupported"}}\n' "$id"
      ;;
  esac
done
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn write_suite(dir: &Path, host_body: Option<&str>) -> PathBuf {
    let target = dir.join("calculator.tests.dll");
    fs::write(&target, b"suite").expect("write target");
    fs::write(
        dir.join("testkit.framework.yaml"),
        "framework: testkit\ncontroller: testkit.api.FrameworkController\napi_version: 3\nhost: host.sh\n",
    )
    .expect("write descriptor");
    if let Some(body) = host_body {
        write_script(&dir.join("host.sh"), body);
    }
    target
}

fn isolated_config(step_delay: &str) -> DriverConfig {
    let mut config = DriverConfig::default().with_isolation(IsolationStrategy::Isolated);
    config.host_shutdown_grace_ms = 500;
    config
        .host_env
        .insert("STEP_DELAY".to_string(), step_delay.to_string());
    config
}

fn driver(id: &str, config: DriverConfig) -> Driver {
    Driver::new(
        id,
        config,
        ControllerRegistry::new(),
        Arc::new(MemoryLogSink::new()),
    )
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
    first: Mutex<Option<Sender<()>>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }
}

impl TestEventListener for RecordingListener {
    fn on_test_event(&self, fragment: &str) {
        self.events
            .lock()
            .expect("events lock")
            .push(fragment.to_string());
        if let Some(tx) = self.first.lock().expect("first lock").take() {
            let _ = tx.send(());
        }
    }
}

#[test]
fn isolated_host_drives_full_lifecycle() {
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(HOST));
    let mut driver = driver("suite1", isolated_config("0"));

    let report = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");
    assert_eq!(report, "<test-suite type=\"Assembly\" id=\"suite1-1000\"/>");
    assert_eq!(driver.phase(), DriverPhase::Loaded);
    assert_eq!(driver.strategy(), IsolationStrategy::Isolated);

    assert_eq!(driver.count_test_cases("").expect("count"), 3);
    let tree = driver.explore("").expect("explore");
    assert_eq!(tree.matches("id=\"suite1-").count(), 3);

    let listener = Arc::new(RecordingListener::default());
    let result = driver
        .run(listener.clone(), "<filter><test>Adds</test></filter>")
        .expect("run");
    let events = listener.events();
    assert_eq!(events.len(), 4);
    assert!(events[0].contains("suite1-1001"));
    assert!(events[1].contains("suite1-1002"));
    assert!(events[2].contains("suite1-1003"));
    assert_eq!(events.last(), Some(&result));
    assert_eq!(result, "<test-run result=\"Passed\" total=\"3\"/>");
}

#[test]
fn empty_id_leaves_host_ids_unprefixed() {
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(HOST));
    let mut driver = driver("", isolated_config("0"));

    let report = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");
    assert!(report.contains("id=\"1000\""), "{report}");
}

#[test]
fn stop_during_run_is_delivered_concurrently() {
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(HOST));
    let mut driver = driver("suite1", isolated_config("0.3"));
    driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");
    let driver = Arc::new(driver);

    let (first_tx, first_rx) = mpsc::channel();
    let listener = Arc::new(RecordingListener {
        events: Mutex::new(Vec::new()),
        first: Mutex::new(Some(first_tx)),
    });
    let runner = {
        let driver = Arc::clone(&driver);
        let listener = listener.clone();
        thread::spawn(move || driver.run(listener, ""))
    };

    first_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first progress event");
    driver.stop_run(false).expect("stop");

    let result = runner.join().expect("join runner").expect("run result");
    assert!(result.contains("result=\"Cancelled\""), "{result}");
    assert!(listener.events().len() < 4);
}

#[test]
fn handshake_shape_mismatch_is_framework_incompatible() {
    let legacy = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  printf '{"id":%s,"created":{"controller":"testkit.api.FrameworkController"}}\n' "$id"
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(legacy));
    let sink = Arc::new(MemoryLogSink::new());
    let mut driver = Driver::new(
        "",
        isolated_config("0"),
        ControllerRegistry::new(),
        sink.clone(),
    );

    let err = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect_err("incompatible");
    assert!(err.is_incompatible(), "{err:?}");
    assert_eq!(driver.phase(), DriverPhase::Unloaded);
    assert!(sink.events().contains(&"dispatch.incompatible".to_string()));
}

#[test]
fn idless_construction_reply_is_framework_incompatible() {
    let legacy = r#"#!/bin/sh
while IFS= read -r line; do
  printf '{"controller":"testkit.api.FrameworkController"}\n'
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(legacy));
    let location = target.to_str().expect("utf8").to_string();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut driver = driver("", isolated_config("0"));
        let outcome = driver.load(&location, Settings::new());
        let _ = tx.send((outcome, driver.phase()));
    });
    let (outcome, phase) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("load returned");
    let err = outcome.expect_err("incompatible");
    assert!(err.is_incompatible(), "{err:?}");
    assert_eq!(phase, DriverPhase::Unloaded);
}

#[test]
fn done_without_report_is_zero_for_count_and_missing_otherwise() {
    let quiet = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"create_controller"'*)
      printf '{"id":%s,"created":{"controller":"c","api_version":3}}\n' "$id" ;;
    *'"action":"load"'*)
      printf '{"id":%s,"report":"<test-suite/>"}\n' "$id" ;;
    *)
      printf '{"id":%s,"done":true}\n' "$id" ;;
  esac
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(quiet));
    let mut driver = driver("", isolated_config("0"));
    driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");

    assert_eq!(driver.count_test_cases("").expect("count"), 0);
    assert!(matches!(
        driver.explore(""),
        Err(DriverError::MissingResult {
            action: ActionKind::Explore
        })
    ));
}

#[test]
fn unknown_action_reply_is_framework_incompatible() {
    let partial = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"create_controller"'*)
      printf '{"id":%s,"created":{"controller":"c","api_version":2}}\n' "$id" ;;
    *'"action":"load"'*)
      printf '{"id":%s,"report":"<test-suite/>"}\n' "$id" ;;
    *)
      printf '{"id":%s,"error":{"kind":"unknown_action"}}\n' "$id" ;;
  esac
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(partial));
    let mut driver = driver("", isolated_config("0"));
    driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");

    let err = driver.explore("").expect_err("explore");
    assert!(err.is_incompatible(), "{err:?}");
}

#[test]
fn host_failure_reply_is_a_controller_failure() {
    let failing = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  printf '{"id":%s,"error":{"kind":"failed","message":"assembly is not a test suite"}}\n' "$id"
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(failing));
    let mut driver = driver("", isolated_config("0"));
    let err = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect_err("failure");
    assert!(
        matches!(
            err,
            DriverError::ControllerFailure {
                action: ActionKind::Load,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn host_exit_mid_action_disconnects() {
    let crashing = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"create_controller"'*)
      printf '{"id":%s,"created":{"controller":"c","api_version":3}}\n' "$id" ;;
    *'"action":"load"'*)
      printf '{"id":%s,"report":"<test-suite/>"}\n' "$id" ;;
    *)
      exit 3 ;;
  esac
done
"#;
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), Some(crashing));
    let mut driver = driver("", isolated_config("0"));
    driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect("load");

    let err = driver.count_test_cases("").expect_err("host gone");
    assert!(
        matches!(
            err,
            DriverError::HostDisconnected {
                action: ActionKind::Count
            }
        ),
        "{err:?}"
    );
    assert!(matches!(
        driver.explore(""),
        Err(DriverError::HostDisconnected { .. })
    ));
}

#[test]
fn missing_host_executable_is_a_load_error() {
    let dir = tempdir().expect("tempdir");
    let target = write_suite(dir.path(), None);
    let mut driver = driver("", isolated_config("0"));
    let err = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect_err("no host");
    assert!(
        matches!(err, DriverError::ModuleLoad(ModuleLoadError::HostMissing { .. })),
        "{err:?}"
    );
    assert!(!err.is_incompatible());
}

#[test]
fn undeclared_host_is_a_load_error() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("suite.dll");
    fs::write(&target, b"suite").expect("write target");
    fs::write(
        dir.path().join("testkit.framework.yaml"),
        "framework: testkit\ncontroller: testkit.api.FrameworkController\n",
    )
    .expect("write descriptor");

    let mut driver = driver("", isolated_config("0"));
    let err = driver
        .load(target.to_str().expect("utf8"), Settings::new())
        .expect_err("no host declared");
    assert!(
        matches!(
            err,
            DriverError::ModuleLoad(ModuleLoadError::HostUndeclared { .. })
        ),
        "{err:?}"
    );
}
