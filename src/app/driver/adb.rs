use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::app::adb::parse::{is_unknown_package, parse_settings_value};
use crate::app::adb::runner::{run_command_with_timeout, CommandOutput};
use crate::app::error::AppError;
use crate::app::models::PolicyControl;

pub const POLICY_CONTROL_KEY: &str = "policy_control";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed,
    NotInstalled,
    Failed(String),
}

/// adb bound to one executable and trace id; cheap to clone into cleanup hooks.
#[derive(Debug, Clone)]
pub struct Adb {
    program: PathBuf,
    timeout: Duration,
    trace_id: String,
}

impl Adb {
    pub fn new(
        program: impl Into<PathBuf>,
        timeout: Duration,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            timeout,
            trace_id: trace_id.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn run(&self, args: &[&str]) -> Result<CommandOutput, AppError> {
        self.run_with_timeout(args, self.timeout)
    }

    /// Any non-zero exit logs the full output and becomes a fatal error.
    pub fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, AppError> {
        let output = self.exec(args, timeout)?;
        if !output.success() {
            let combined = output.combined_text();
            error!(
                trace_id = %self.trace_id,
                args = ?args,
                exit_code = ?output.exit_code,
                output = %combined,
                "adb command failed"
            );
            return Err(AppError::dependency(
                format!(
                    "adb {} failed with exit code {:?}:\n{}",
                    args.join(" "),
                    output.exit_code,
                    combined.trim_end()
                ),
                &self.trace_id,
            ));
        }
        Ok(output)
    }

    fn exec(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, AppError> {
        debug!(trace_id = %self.trace_id, args = ?args, "adb");
        let owned: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let program = self.program.to_string_lossy();
        run_command_with_timeout(&program, &owned, timeout, &self.trace_id).map_err(|err| {
            error!(
                trace_id = %self.trace_id,
                args = ?args,
                error = %err.error,
                "adb command failed"
            );
            err
        })
    }

    /// Best effort. A package that is already gone is not worth a log line.
    pub fn try_uninstall(&self, app_id: &str) -> UninstallOutcome {
        let output = match self.exec(&["shell", "pm", "uninstall", app_id], self.timeout) {
            Ok(output) => output,
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err.error, "could not uninstall");
                return UninstallOutcome::Failed(err.error);
            }
        };
        if is_unknown_package(&output.combined_text()) {
            return UninstallOutcome::NotInstalled;
        }
        if output.success() {
            return UninstallOutcome::Removed;
        }
        let combined = output.combined_text();
        warn!(
            trace_id = %self.trace_id,
            exit_code = ?output.exit_code,
            output = %combined,
            "could not uninstall"
        );
        UninstallOutcome::Failed(combined)
    }

    pub fn read_policy_control(&self) -> Result<PolicyControl, AppError> {
        let output = self.run(&["shell", "settings", "get", "global", POLICY_CONTROL_KEY])?;
        Ok(parse_settings_value(&output.stdout_text()))
    }

    pub fn write_policy_control(&self, value: &str) -> Result<(), AppError> {
        self.run(&["shell", "settings", "put", "global", POLICY_CONTROL_KEY, value])
            .map(|_| ())
    }

    /// Puts the global setting back the way it was found. Failures are logged only.
    pub fn restore_policy_control(&self, prior: &PolicyControl) {
        let result = match prior {
            PolicyControl::Unset => self
                .run(&["shell", "settings", "delete", "global", POLICY_CONTROL_KEY])
                .map(|_| ()),
            PolicyControl::Value(value) => self.write_policy_control(value),
        };
        if let Err(err) = result {
            warn!(
                trace_id = %self.trace_id,
                error = %err.error,
                "could not restore policy_control"
            );
        }
    }
}
