use super::*;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use tempfile::TempDir;

use crate::app::config::{validate_config, BuildSettings};
use crate::app::logging::init_test_logging;

const APP_ID: &str = "localhost.gogio.endtoend";

// Stand-in for `adb`: records every call, answers from files in the state dir, and emits
// frame-ready log lines after `monkey` and `input tap`. A `fail-<word>` file makes any call
// containing that argument exit 1 with the file's content on stderr.
const FAKE_ADB: &str = r#"#!/bin/sh
STATE="__STATE__"
echo "$*" >> "$STATE/calls.log"
for word in "$@"; do
  if [ -f "$STATE/fail-$word" ]; then
    cat "$STATE/fail-$word" 1>&2
    exit 1
  fi
done
queue_frames() {
  cp "$1" "$STATE/tmp.$$"
  mv "$STATE/tmp.$$" "$STATE/pending-frame-$2-$$"
}
case "$1" in
  devices)
    cat "$STATE/devices.txt"
    ;;
  install)
    touch "$STATE/installed"
    echo "Success"
    ;;
  logcat)
    echo "--------- beginning of main"
    while :; do
      for f in "$STATE"/pending-frame-*; do
        [ -f "$f" ] || continue
        n=$(cat "$f")
        rm -f "$f"
        i=0
        while [ "$i" -lt "$n" ]; do
          echo "I/gio     ( 4242): frame ready"
          i=$((i+1))
        done
      done
      sleep 0.02
    done
    ;;
  shell)
    shift
    case "$1" in
      dumpsys) cat "$STATE/power.txt" ;;
      settings)
        if [ "$2" = "get" ]; then cat "$STATE/policy.txt"; fi
        ;;
      pm)
        if [ "$2" = "uninstall" ]; then
          if [ -f "$STATE/installed" ]; then
            rm -f "$STATE/installed"
            echo "Success"
          else
            echo "Failure [DELETE_FAILED_INTERNAL_ERROR]"
            echo "Unknown package: $3" 1>&2
            exit 1
          fi
        else
          echo "Success"
        fi
        ;;
      monkey) queue_frames "$STATE/frames_per_launch" launch ;;
      input) queue_frames "$STATE/frames_per_tap" tap ;;
      screencap) cat "$STATE/screen.png" ;;
    esac
    ;;
esac
exit 0
"#;

struct FakeDevice {
    sdk: TempDir,
    state: TempDir,
}

impl FakeDevice {
    fn new() -> Self {
        init_test_logging();
        let sdk = TempDir::new().expect("sdk dir");
        let state = TempDir::new().expect("state dir");
        let tools = sdk.path().join("platform-tools");
        fs::create_dir_all(&tools).expect("platform-tools");
        let script = FAKE_ADB.replace("__STATE__", &state.path().to_string_lossy());
        let adb = tools.join("adb");
        fs::write(&adb, script).expect("write adb");
        fs::set_permissions(&adb, fs::Permissions::from_mode(0o755)).expect("chmod adb");

        let device = Self { sdk, state };
        device.set("devices.txt", "List of devices attached\nemulator-5554\tdevice\n\n");
        device.set("power.txt", "POWER MANAGER (dumpsys power)\n  mWakefulness=Awake\n");
        device.set("policy.txt", "null\n");
        device.set("frames_per_launch", "1\n");
        device.set("frames_per_tap", "1\n");
        device.set("calls.log", "");
        device
    }

    fn set(&self, name: &str, contents: &str) {
        fs::write(self.state.path().join(name), contents).expect("write state file");
    }

    fn fail_on(&self, word: &str, stderr: &str) {
        self.set(&format!("fail-{word}"), stderr);
    }

    fn config(&self) -> DriverConfig {
        let mut config = validate_config(DriverConfig::default());
        config.sdk_dir = self.sdk.path().to_string_lossy().to_string();
        config.build = BuildSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "touch \"$0\"".to_string(), "{apk}".to_string()],
            ..BuildSettings::default()
        };
        config.timing.launch_settle_ms = 0;
        config.timing.frame_timeout_ms = 5_000;
        config.timing.adb_timeout_secs = 10;
        config
    }

    /// Recorded calls, minus the long-running logcat whose start races with later calls.
    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.starts_with("logcat"))
            .map(str::to_string)
            .collect()
    }

    fn logcat_calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter(|line| line.starts_with("logcat"))
            .map(str::to_string)
            .collect()
    }

    fn is_installed(&self) -> bool {
        self.state.path().join("installed").exists()
    }
}

fn start(device: &FakeDevice) -> Result<AndroidTestDriver, AppError> {
    AndroidTestDriver::start(device.config(), "./testdata/red", 800, 600)
}

#[test]
fn start_runs_the_full_setup_sequence() {
    let device = FakeDevice::new();
    let driver = start(&device).expect("start");

    assert_eq!(driver.device().serial, "emulator-5554");
    assert_eq!(driver.viewport(), Viewport { width: 800, height: 600 });
    assert!(driver.build_dir().join(APK_FILE_NAME).is_file());
    assert!(device.is_installed());

    let calls = device.calls();
    let apk = driver.build_dir().join(APK_FILE_NAME);
    assert_eq!(
        calls,
        vec![
            "devices".to_string(),
            "shell dumpsys power".to_string(),
            format!("shell pm uninstall {APP_ID}"),
            format!("install {}", apk.display()),
            "shell settings get global policy_control".to_string(),
            format!("shell settings put global policy_control immersive.full={APP_ID}"),
            format!("shell pm clear {APP_ID}"),
            format!("shell monkey -p {APP_ID} 1"),
        ]
    );
    assert_eq!(device.logcat_calls(), vec!["logcat -s -T1 gio:*"]);
    driver.close();
}

#[test]
fn close_unwinds_in_reverse_order() {
    let device = FakeDevice::new();
    let driver = start(&device).expect("start");
    let build_dir = driver.build_dir().to_path_buf();
    let setup_calls = device.calls().len();

    driver.close();

    let calls = device.calls();
    assert_eq!(
        calls[setup_calls..].to_vec(),
        vec![
            "shell settings delete global policy_control".to_string(),
            format!("shell pm uninstall {APP_ID}"),
        ]
    );
    assert!(!device.is_installed());
    assert!(!build_dir.exists());
}

#[test]
fn prior_policy_control_is_put_back() {
    let device = FakeDevice::new();
    device.set("policy.txt", "immersive.status=com.other.app\n");
    let driver = start(&device).expect("start");
    drop(driver);

    let calls = device.calls();
    let restore = "shell settings put global policy_control immersive.status=com.other.app";
    assert!(calls.iter().any(|call| call == restore));
    assert!(!calls.iter().any(|call| call.contains("settings delete")));
}

#[test]
fn missing_sdk_skips_without_running_adb() {
    let device = FakeDevice::new();
    let mut config = device.config();
    config.sdk_dir = String::new();
    let err = AndroidTestDriver::start(config, "./app", 1, 1).err().expect("skip");
    assert!(err.is_skip());
    assert!(err.error.contains("ANDROID_HOME"));
    assert!(device.calls().is_empty());
}

#[test]
fn no_devices_skips() {
    let device = FakeDevice::new();
    device.set("devices.txt", "List of devices attached\n\n");
    let err = start(&device).err().expect("skip");
    assert!(err.is_skip());
    assert_eq!(device.calls(), vec!["devices"]);
}

#[test]
fn offline_device_skips() {
    let device = FakeDevice::new();
    device.set("devices.txt", "List of devices attached\nemulator-5554\toffline\n");
    let err = start(&device).err().expect("skip");
    assert!(err.is_skip());
}

#[test]
fn multiple_devices_skip() {
    let device = FakeDevice::new();
    device.set(
        "devices.txt",
        "List of devices attached\nemulator-5554\tdevice\nemulator-5556\tdevice\n",
    );
    let err = start(&device).err().expect("skip");
    assert!(err.is_skip());
    assert!(err.error.contains("2 Android devices"));
}

#[test]
fn sleeping_device_skips() {
    let device = FakeDevice::new();
    device.set("power.txt", "  mWakefulness=Asleep\n");
    let err = start(&device).err().expect("skip");
    assert!(err.is_skip());
    assert_eq!(device.calls(), vec!["devices", "shell dumpsys power"]);
}

#[test]
fn failed_build_aborts_before_touching_the_device() {
    let device = FakeDevice::new();
    let mut config = device.config();
    config.build.args = vec!["-c".to_string(), "echo 'no Go files' 1>&2; exit 1".to_string()];
    let err = AndroidTestDriver::start(config, "./app", 1, 1).err().expect("fatal");
    assert!(!err.is_skip());
    assert!(err.error.contains("no Go files"));
    assert_eq!(device.calls(), vec!["devices", "shell dumpsys power"]);
}

#[test]
fn failed_install_is_fatal_and_logs_output() {
    let device = FakeDevice::new();
    device.fail_on("install", "adb: failed to install: INSTALL_FAILED_NO_MATCHING_ABIS");
    let err = start(&device).err().expect("fatal");
    assert_eq!(err.code, "ERR_DEPENDENCY");
    assert!(err.error.contains("INSTALL_FAILED_NO_MATCHING_ABIS"));
    // Uninstall was not registered yet, so nothing past the install runs.
    assert!(device.calls().last().is_some_and(|call| call.starts_with("install ")));
}

#[test]
fn partial_start_failure_still_unwinds_registered_hooks() {
    let device = FakeDevice::new();
    device.fail_on("clear", "Error: java.lang.SecurityException");
    let err = start(&device).err().expect("fatal");
    assert!(!err.is_skip());

    let calls = device.calls();
    let clear = calls
        .iter()
        .position(|call| call.starts_with("shell pm clear"))
        .expect("pm clear attempted");
    assert_eq!(
        calls[clear + 1..].to_vec(),
        vec![
            "shell settings delete global policy_control".to_string(),
            format!("shell pm uninstall {APP_ID}"),
        ]
    );
    assert!(!device.is_installed());
}

#[test]
fn click_taps_and_waits_for_the_next_frame() {
    let device = FakeDevice::new();
    let driver = start(&device).expect("start");

    driver.click(120, 340).expect("click");
    assert!(device.calls().contains(&"shell input tap 120 340".to_string()));
    driver.close();
}

#[test]
fn click_returns_on_the_first_of_two_frames() {
    let device = FakeDevice::new();
    device.set("frames_per_tap", "2\n");
    let driver = start(&device).expect("start");

    driver.click(5, 5).expect("click");
    // The second frame from the same tap is still queued.
    driver.wait_for_frame().expect("second frame");
    driver.close();
}

#[test]
fn screenshot_decodes_png() {
    let device = FakeDevice::new();
    let png_path = device.state.path().join("screen.png");
    RgbaImage::from_pixel(4, 3, Rgba([255, 0, 0, 255]))
        .save(&png_path)
        .expect("write png");
    let driver = start(&device).expect("start");

    let img = driver.screenshot().expect("screenshot");
    assert_eq!((img.width(), img.height()), (4, 3));
    assert_eq!(img.to_rgba8().get_pixel(2, 1), &Rgba([255, 0, 0, 255]));
    assert!(device.calls().contains(&"shell screencap -p".to_string()));
    driver.close();
}

#[test]
fn screenshot_rejects_garbage() {
    let device = FakeDevice::new();
    device.set("screen.png", "not a png");
    let driver = start(&device).expect("start");

    let err = driver.screenshot().expect_err("decode should fail");
    assert_eq!(err.code, "ERR_SYSTEM");
    assert!(err.error.contains("decode"));
    driver.close();
}

#[test]
fn uninstall_of_absent_app_is_quiet() {
    let device = FakeDevice::new();
    let driver = start(&device).expect("start");

    assert_eq!(driver.try_uninstall(), UninstallOutcome::Removed);
    assert_eq!(driver.try_uninstall(), UninstallOutcome::NotInstalled);
    driver.close();
}

#[test]
fn uninstall_reports_other_failures() {
    let device = FakeDevice::new();
    let config = device.config();
    let adb = Adb::new(adb_path_in_sdk(&config.sdk_dir), Duration::from_secs(5), "t");
    device.fail_on("uninstall", "Failure [DELETE_FAILED_DEVICE_POLICY_MANAGER]");

    match adb.try_uninstall(APP_ID) {
        UninstallOutcome::Failed(output) => assert!(output.contains("DEVICE_POLICY_MANAGER")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn adb_failures_share_one_error_path() {
    let device = FakeDevice::new();
    let config = device.config();
    let adb = Adb::new(adb_path_in_sdk(&config.sdk_dir), Duration::from_secs(5), "trace-adb");
    device.fail_on("tap", "error: device offline");

    let err = adb.run(&["shell", "input", "tap", "1", "1"]).expect_err("tap fails");
    assert_eq!(err.code, "ERR_DEPENDENCY");
    assert_eq!(err.trace_id, "trace-adb");
    assert!(err.error.contains("adb shell input tap 1 1"));
    assert!(err.error.contains("device offline"));
}

#[test]
fn missing_first_frame_times_out_and_unwinds() {
    let device = FakeDevice::new();
    device.set("frames_per_launch", "0\n");
    let mut config = device.config();
    config.timing.frame_timeout_ms = 300;
    let err = AndroidTestDriver::start(config, "./app", 1, 1).err().expect("no frame");
    assert!(err.error.contains("no frame notification"));
    // Cleanup still ran.
    assert!(!device.is_installed());
}
