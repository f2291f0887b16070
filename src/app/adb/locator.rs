use std::path::{Path, PathBuf};

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// `<sdk>/platform-tools/adb`, with `.exe` on Windows.
pub fn adb_path_in_sdk(sdk_dir: &str) -> PathBuf {
    let binary = if cfg!(windows) { "adb.exe" } else { "adb" };
    Path::new(&normalize_command_path(sdk_dir))
        .join("platform-tools")
        .join(binary)
}

pub fn validate_adb_program(program: &Path) -> Result<(), String> {
    if program.as_os_str().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !program.exists() {
        return Err(format!(
            "ADB executable not found at {}",
            program.display()
        ));
    }
    Ok(())
}
