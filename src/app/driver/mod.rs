//! Drives an app under test on the single attached Android device.
//!
//! `start` builds, installs and launches the app, then blocks until the app logs its
//! first rendered frame. Everything it sets up is registered on a cleanup stack that
//! unwinds in reverse order when the driver is closed or dropped, including when `start`
//! itself fails partway through.

pub mod adb;

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::locator::{adb_path_in_sdk, validate_adb_program};
use crate::app::adb::logcat::{start_log_listener, FrameReceiver};
use crate::app::adb::parse::{is_awake, parse_attached_devices};
use crate::app::build::{build_app, APK_FILE_NAME};
use crate::app::cleanup::CleanupStack;
use crate::app::config::{load_config, validate_config, DriverConfig};
use crate::app::error::AppError;
use crate::app::models::{DeviceSummary, FrameNotification, Viewport};

pub use adb::{Adb, UninstallOutcome};

const BUILD_DIR_PREFIX: &str = "gio-endtoend-android";

#[cfg(all(test, unix))]
mod tests;

/// Operations an end-to-end scenario needs from a platform driver.
pub trait TestDriver {
    fn screenshot(&self) -> Result<DynamicImage, AppError>;

    /// Taps at device pixel coordinates and waits for the resulting frame.
    fn click(&self, x: u32, y: u32) -> Result<(), AppError>;

    fn wait_for_frame(&self) -> Result<FrameNotification, AppError>;
}

pub struct AndroidTestDriver {
    config: DriverConfig,
    adb: Adb,
    device: DeviceSummary,
    viewport: Viewport,
    build_dir: PathBuf,
    frames: FrameReceiver,
    cleanups: CleanupStack,
    trace_id: String,
}

impl AndroidTestDriver {
    /// Loads configuration from the environment and starts the app at `path`.
    pub fn start_from_env(path: &str, width: u32, height: u32) -> Result<Self, AppError> {
        let trace_id = Uuid::new_v4().to_string();
        let config = load_config(&trace_id)?;
        Self::start_traced(config, path, width, height, trace_id)
    }

    /// Like [`AndroidTestDriver::start_from_env`], but an unusable environment yields
    /// `Ok(None)` so a test can return early instead of failing.
    pub fn start_or_skip(path: &str, width: u32, height: u32) -> Result<Option<Self>, AppError> {
        match Self::start_from_env(path, width, height) {
            Ok(driver) => Ok(Some(driver)),
            Err(err) if err.is_skip() => {
                warn!(
                    trace_id = %err.trace_id,
                    reason = %err.error,
                    "skipping android end-to-end run"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn start(
        config: DriverConfig,
        path: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, AppError> {
        Self::start_traced(config, path, width, height, Uuid::new_v4().to_string())
    }

    fn start_traced(
        config: DriverConfig,
        path: &str,
        width: u32,
        height: u32,
        trace_id: String,
    ) -> Result<Self, AppError> {
        let config = validate_config(config);
        let viewport = Viewport { width, height };
        info!(trace_id = %trace_id, path = %path, width, height, "starting android driver");

        if config.sdk_dir.is_empty() {
            return Err(AppError::skip(
                "Android SDK is required; set $ANDROID_HOME",
                &trace_id,
            ));
        }
        let adb_program = adb_path_in_sdk(&config.sdk_dir);
        validate_adb_program(&adb_program)
            .map_err(|message| AppError::dependency(message, &trace_id))?;
        let adb = Adb::new(&adb_program, config.timing.adb_timeout(), &trace_id);

        let device = select_device(&adb, &trace_id)?;

        // An attached but sleeping device is probably just charging. The screen must be on
        // and unlocked for taps and screenshots to mean anything.
        if !is_awake(&adb.run(&["shell", "dumpsys", "power"])?.stdout_text()) {
            return Err(AppError::skip("Android device isn't awake", &trace_id));
        }

        let app_id = config.app_id.clone();
        let mut cleanups = CleanupStack::new();

        let build_dir = tempfile::Builder::new()
            .prefix(BUILD_DIR_PREFIX)
            .tempdir()
            .map_err(|err| {
                AppError::system(format!("Failed to create build dir: {err}"), &trace_id)
            })?;
        let build_path = build_dir.path().to_path_buf();
        let trace_cleanup = trace_id.clone();
        cleanups.push("remove_build_dir", move || {
            if let Err(err) = build_dir.close() {
                warn!(trace_id = %trace_cleanup, error = %err, "failed to remove build dir");
            }
        });
        let apk = build_path.join(APK_FILE_NAME);
        build_app(&config.build, &app_id, path, &apk, &trace_id)?;

        // A previous failed run may have left the app behind.
        adb.try_uninstall(&app_id);
        let apk_arg = apk.to_string_lossy().to_string();
        adb.run_with_timeout(&["install", &apk_arg], config.timing.install_timeout())?;
        let uninstall_adb = adb.clone();
        let uninstall_id = app_id.clone();
        cleanups.push("uninstall", move || {
            uninstall_adb.try_uninstall(&uninstall_id);
        });

        // Immersive mode keeps the system bars out of screenshots. The setting is global
        // to the device, so the prior value is put back at cleanup.
        let prior_policy = adb.read_policy_control()?;
        let restore_adb = adb.clone();
        cleanups.push("restore_policy_control", move || {
            restore_adb.restore_policy_control(&prior_policy);
        });
        adb.write_policy_control(&format!("immersive.full={app_id}"))?;

        adb.run(&["shell", "pm", "clear", &app_id])?;

        let (mut listener, frames) = start_log_listener(
            adb.program(),
            &config.logcat,
            config.timing.frame_timeout(),
            &trace_id,
        )?;
        cleanups.push("stop_log_listener", move || listener.stop());

        adb.run(&["shell", "monkey", "-p", &app_id, "1"])?;

        // The first frame usually lands while the platform launch animation is still
        // running; there is no signal for its end.
        std::thread::sleep(config.timing.launch_settle());

        let driver = Self {
            config,
            adb,
            device,
            viewport,
            build_dir: build_path,
            frames,
            cleanups,
            trace_id,
        };
        let first = driver.wait_for_frame()?;
        info!(
            trace_id = %driver.trace_id,
            serial = %driver.device.serial,
            line = %first.line,
            "app rendered first frame"
        );
        Ok(driver)
    }

    pub fn device(&self) -> &DeviceSummary {
        &self.device
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Runs an adb subcommand against the device; non-zero exit is fatal.
    pub fn adb(&self, args: &[&str]) -> Result<Vec<u8>, AppError> {
        Ok(self.adb.run(args)?.stdout)
    }

    pub fn try_uninstall(&self) -> UninstallOutcome {
        self.adb.try_uninstall(&self.config.app_id)
    }

    /// Tears everything down now instead of at drop.
    pub fn close(mut self) {
        info!(trace_id = %self.trace_id, "closing android driver");
        self.cleanups.run_all();
    }
}

impl TestDriver for AndroidTestDriver {
    fn screenshot(&self) -> Result<DynamicImage, AppError> {
        let png = self.adb(&["shell", "screencap", "-p"])?;
        image::load_from_memory_with_format(&png, ImageFormat::Png).map_err(|err| {
            AppError::system(format!("could not decode screenshot: {err}"), &self.trace_id)
        })
    }

    fn click(&self, x: u32, y: u32) -> Result<(), AppError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.adb(&["shell", "input", "tap", &x, &y])?;
        self.wait_for_frame().map(|_| ())
    }

    fn wait_for_frame(&self) -> Result<FrameNotification, AppError> {
        self.frames.wait(&self.trace_id)
    }
}

fn select_device(adb: &Adb, trace_id: &str) -> Result<DeviceSummary, AppError> {
    let listing = adb.run(&["devices"])?.stdout_text();
    let mut devices = parse_attached_devices(listing.trim());
    match devices.len() {
        0 => Err(AppError::skip("no Android devices attached via adb", trace_id)),
        1 => Ok(devices.remove(0)),
        count => Err(AppError::skip(
            format!("{count} Android devices attached via adb; need exactly one"),
            trace_id,
        )),
    }
}
