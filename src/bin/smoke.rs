use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use android_e2e_driver::app::error::AppError;
use android_e2e_driver::{init_logging, AndroidTestDriver, TestDriver};
use serde::Serialize;

const USAGE: &str = "Usage: cargo run --bin smoke -- --app PATH [--width N] [--height N] \
[--out DIR] [--tap X,Y]... [--json]\n";

#[derive(Debug, Clone)]
struct Args {
    app_path: String,
    width: u32,
    height: u32,
    out_dir: Option<PathBuf>,
    taps: Vec<(u32, u32)>,
    json: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: Option<String>,
    serial: Option<String>,
    app_id: Option<String>,
    out_dir: String,
    artifacts: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: String,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_tap(value: &str) -> Result<(u32, u32), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("--tap expects X,Y, got {value}"))?;
    let x = x.trim().parse::<u32>().map_err(|_| format!("invalid tap x: {x}"))?;
    let y = y.trim().parse::<u32>().map_err(|_| format!("invalid tap y: {y}"))?;
    Ok((x, y))
}

fn parse_dimension(flag: &str, value: Option<String>) -> Result<u32, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    match value.trim().parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(format!("{flag} must be a positive integer")),
    }
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut app_path: Option<String> = None;
    let mut width = 800u32;
    let mut height = 600u32;
    let mut out_dir: Option<PathBuf> = None;
    let mut taps = Vec::new();
    let mut json = false;

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--app" => {
                app_path = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if app_path.is_none() {
                    return Err("--app requires a value".to_string());
                }
            }
            "--width" => width = parse_dimension("--width", it.next())?,
            "--height" => height = parse_dimension("--height", it.next())?,
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--tap" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--tap requires a value".to_string())?;
                taps.push(parse_tap(&value)?);
            }
            "--json" => json = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    let app_path = app_path.ok_or_else(|| format!("--app is required\n{USAGE}"))?;
    Ok(Args {
        app_path,
        width,
        height,
        out_dir,
        taps,
        json,
    })
}

fn run_check<T>(
    checks: &mut Vec<SmokeCheck>,
    name: impl Into<String>,
    f: impl FnOnce() -> Result<T, AppError>,
) -> Result<T, AppError> {
    let start = Instant::now();
    let result = f();
    let (status, error_code, error) = match &result {
        Ok(_) => ("pass", None, None),
        Err(err) if err.is_skip() => ("skip", Some(err.code.clone()), Some(err.error.clone())),
        Err(err) => ("fail", Some(err.code.clone()), Some(err.error.clone())),
    };
    checks.push(SmokeCheck {
        name: name.into(),
        status,
        duration_ms: start.elapsed().as_millis(),
        error_code,
        error,
    });
    result
}

fn save_screenshot(driver: &AndroidTestDriver, path: &Path) -> Result<(), AppError> {
    let img = driver.screenshot()?;
    img.save(path).map_err(|err| {
        AppError::system(
            format!("Failed to write {}: {err}", path.display()),
            driver.trace_id(),
        )
    })
}

fn print_summary(summary: &SmokeSummary, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }
    println!("{} [{}] out={}", summary.tool, summary.status, summary.out_dir);
    for check in &summary.checks {
        match &check.error {
            Some(error) => println!(
                "  {:<24} {:<4} {}ms  {error}",
                check.name, check.status, check.duration_ms
            ),
            None => println!(
                "  {:<24} {:<4} {}ms",
                check.name, check.status, check.duration_ms
            ),
        }
    }
}

/// Summary status and process exit code for a run that never got past `start`.
/// An unusable environment is a skip, not a failure.
fn start_failure_outcome(err: &AppError) -> (&'static str, i32) {
    if err.is_skip() {
        ("skip", 0)
    } else {
        ("fail", 1)
    }
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    init_logging();

    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("android_e2e_smoke_{}", std::process::id()));
        p
    });
    if let Err(err) = fs::create_dir_all(&out_dir) {
        eprintln!("Failed to create dir {}: {err}", out_dir.display());
        std::process::exit(1);
    }

    let mut checks = Vec::new();
    let mut artifacts = HashMap::new();
    let mut summary = SmokeSummary {
        tool: "android_e2e_smoke",
        status: "pass",
        trace_id: None,
        serial: None,
        app_id: None,
        out_dir: out_dir.to_string_lossy().to_string(),
        artifacts: HashMap::new(),
        checks: Vec::new(),
    };

    let started = run_check(&mut checks, "start", || {
        AndroidTestDriver::start_from_env(&args.app_path, args.width, args.height)
    });
    let driver = match started {
        Ok(driver) => driver,
        Err(err) => {
            let (status, exit_code) = start_failure_outcome(&err);
            summary.status = status;
            summary.trace_id = Some(err.trace_id);
            summary.checks = checks;
            print_summary(&summary, args.json);
            std::process::exit(exit_code);
        }
    };
    summary.trace_id = Some(driver.trace_id().to_string());
    summary.serial = Some(driver.device().serial.clone());
    summary.app_id = Some(driver.app_id().to_string());

    let mut failed = false;
    let initial = out_dir.join("screenshot_initial.png");
    let captured = run_check(&mut checks, "screenshot_initial", || {
        save_screenshot(&driver, &initial)
    });
    if captured.is_ok() {
        artifacts.insert(
            "screenshot_initial".to_string(),
            initial.to_string_lossy().to_string(),
        );
    } else {
        failed = true;
    }

    for (index, (x, y)) in args.taps.iter().copied().enumerate() {
        let name = format!("tap_{index}");
        if run_check(&mut checks, format!("{name}_{x}_{y}"), || driver.click(x, y)).is_err() {
            failed = true;
            break;
        }
        let path = out_dir.join(format!("screenshot_after_{name}.png"));
        let captured = run_check(&mut checks, format!("screenshot_after_{name}"), || {
            save_screenshot(&driver, &path)
        });
        if captured.is_ok() {
            artifacts.insert(
                format!("screenshot_after_{name}"),
                path.to_string_lossy().to_string(),
            );
        } else {
            failed = true;
        }
    }

    driver.close();

    if failed {
        summary.status = "fail";
    }
    summary.artifacts = artifacts;
    summary.checks = checks;
    print_summary(&summary, args.json);
    if failed {
        std::process::exit(1);
    }
}
