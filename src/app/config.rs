use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "E2E_DRIVER_CONFIG_PATH";
pub const ANDROID_HOME_ENV: &str = "ANDROID_HOME";
pub const DEFAULT_APP_ID: &str = "localhost.gogio.endtoend";
pub const DEFAULT_LOG_TAG: &str = "gio";
pub const DEFAULT_FRAME_MARKER: &str = ": frame ready";

const MAX_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    pub program: String,
    /// Argument template. `{appid}`, `{apk}` and `{path}` are substituted per run.
    pub args: Vec<String>,
    /// Directory the build runs in; empty means the current directory.
    pub working_dir: String,
    pub timeout_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            args: vec![
                "run".to_string(),
                ".".to_string(),
                "-target=android".to_string(),
                "-appid={appid}".to_string(),
                "-o={apk}".to_string(),
                "{path}".to_string(),
            ],
            working_dir: String::new(),
            timeout_secs: 600,
        }
    }
}

impl BuildSettings {
    pub fn render_args(&self, app_id: &str, apk: &Path, path: &str) -> Vec<String> {
        let apk = apk.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{appid}", app_id)
                    .replace("{apk}", &apk)
                    .replace("{path}", path)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogcatSettings {
    pub tag: String,
    pub frame_marker: String,
    pub queue_capacity: usize,
}

impl Default for LogcatSettings {
    fn default() -> Self {
        Self {
            tag: DEFAULT_LOG_TAG.to_string(),
            frame_marker: DEFAULT_FRAME_MARKER.to_string(),
            queue_capacity: 1,
        }
    }
}

impl LogcatSettings {
    pub fn filter_spec(&self) -> String {
        format!("{}:*", self.tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    /// Platform launch animations outlive the first frame; there is no signal for
    /// "animation finished", so start() waits this long before trusting frames.
    pub launch_settle_ms: u64,
    /// 0 waits forever, leaving the outer test harness to time out.
    pub frame_timeout_ms: u64,
    pub adb_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            launch_settle_ms: 500,
            frame_timeout_ms: 0,
            adb_timeout_secs: 60,
            install_timeout_secs: 300,
        }
    }
}

impl TimingSettings {
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        (self.frame_timeout_ms > 0).then(|| Duration::from_millis(self.frame_timeout_ms))
    }

    pub fn adb_timeout(&self) -> Duration {
        Duration::from_secs(self.adb_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Android SDK root. Filled from `$ANDROID_HOME` when left empty.
    pub sdk_dir: String,
    pub app_id: String,
    pub build: BuildSettings,
    pub logcat: LogcatSettings,
    pub timing: TimingSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            sdk_dir: String::new(),
            app_id: DEFAULT_APP_ID.to_string(),
            build: BuildSettings::default(),
            logcat: LogcatSettings::default(),
            timing: TimingSettings::default(),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

pub fn load_config(trace_id: &str) -> Result<DriverConfig, AppError> {
    let config = match config_path() {
        Some(path) => load_config_from_path(&path, trace_id)?,
        None => validate_config(DriverConfig::default()),
    };
    Ok(apply_android_home(
        config,
        std::env::var(ANDROID_HOME_ENV).ok(),
    ))
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<DriverConfig, AppError> {
    if !path.exists() {
        return Ok(validate_config(DriverConfig::default()));
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: DriverConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn apply_android_home(mut config: DriverConfig, android_home: Option<String>) -> DriverConfig {
    if config.sdk_dir.trim().is_empty() {
        if let Some(home) = android_home.filter(|value| !value.trim().is_empty()) {
            config.sdk_dir = home.trim().to_string();
        }
    }
    config
}

pub fn validate_config(mut config: DriverConfig) -> DriverConfig {
    config.sdk_dir = config.sdk_dir.trim().to_string();
    if config.app_id.trim().is_empty() {
        config.app_id = DEFAULT_APP_ID.to_string();
    }
    if config.build.program.trim().is_empty() {
        config.build = BuildSettings::default();
    }
    if config.build.timeout_secs == 0 {
        config.build.timeout_secs = BuildSettings::default().timeout_secs;
    }
    if config.logcat.tag.trim().is_empty() {
        config.logcat.tag = DEFAULT_LOG_TAG.to_string();
    }
    if config.logcat.frame_marker.is_empty() {
        config.logcat.frame_marker = DEFAULT_FRAME_MARKER.to_string();
    }
    config.logcat.queue_capacity = config.logcat.queue_capacity.clamp(1, MAX_QUEUE_CAPACITY);
    if config.timing.adb_timeout_secs == 0 {
        config.timing.adb_timeout_secs = TimingSettings::default().adb_timeout_secs;
    }
    if config.timing.install_timeout_secs == 0 {
        config.timing.install_timeout_secs = TimingSettings::default().install_timeout_secs;
    }
    config
}
