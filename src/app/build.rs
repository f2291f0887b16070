use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::app::adb::runner::run_command_in_dir;
use crate::app::config::BuildSettings;
use crate::app::error::AppError;

pub const APK_FILE_NAME: &str = "e2e.apk";

/// Builds the app at `path` into `apk` using the configured build command.
pub fn build_app(
    settings: &BuildSettings,
    app_id: &str,
    path: &str,
    apk: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    let args = settings.render_args(app_id, apk, path);
    let working_dir = Some(settings.working_dir.trim())
        .filter(|dir| !dir.is_empty())
        .map(Path::new);
    info!(
        trace_id = %trace_id,
        program = %settings.program,
        args = ?args,
        "building app"
    );

    let output = run_command_in_dir(
        &settings.program,
        &args,
        working_dir,
        Duration::from_secs(settings.timeout_secs),
        trace_id,
    )
    .map_err(|err| AppError::dependency(format!("could not build app: {}", err.error), trace_id))?;

    if !output.success() {
        let combined = output.combined_text();
        error!(trace_id = %trace_id, output = %combined, "app build failed");
        return Err(AppError::dependency(
            format!(
                "could not build app: exit code {:?}:\n{}",
                output.exit_code, combined
            ),
            trace_id,
        ));
    }
    if !apk.is_file() {
        return Err(AppError::dependency(
            format!("build succeeded but produced no package at {}", apk.display()),
            trace_id,
        ));
    }
    Ok(())
}
