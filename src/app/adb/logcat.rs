use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::adb::parse::is_frame_ready;
use crate::app::config::LogcatSettings;
use crate::app::error::AppError;
use crate::app::models::FrameNotification;

const FULL_QUEUE_POLL: Duration = Duration::from_millis(10);

/// `logcat -s -T1 <tag>:*`: silence other tags and skip everything logged before now.
pub fn logcat_args(settings: &LogcatSettings) -> Vec<String> {
    vec![
        "logcat".to_string(),
        "-s".to_string(),
        "-T1".to_string(),
        settings.filter_spec(),
    ]
}

/// Receiving end of the frame queue. Owned by the foreground test flow.
pub struct FrameReceiver {
    rx: Receiver<FrameNotification>,
    timeout: Option<Duration>,
}

impl FrameReceiver {
    pub fn new(rx: Receiver<FrameNotification>, timeout: Option<Duration>) -> Self {
        Self { rx, timeout }
    }

    /// Blocks for the next frame-ready line. Without a timeout this waits indefinitely;
    /// it only returns early if the listener has gone away.
    pub fn wait(&self, trace_id: &str) -> Result<FrameNotification, AppError> {
        let received = match self.timeout {
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(timeout) => self.rx.recv_timeout(timeout),
        };
        match received {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Disconnected) => Err(AppError::dependency(
                "expected notification of new frame, but the app log stream ended",
                trace_id,
            )),
            Err(RecvTimeoutError::Timeout) => Err(AppError::dependency(
                format!(
                    "no frame notification within {}ms",
                    self.timeout.unwrap_or_default().as_millis()
                ),
                trace_id,
            )),
        }
    }

    /// Discards notifications that are already queued.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

pub struct LogListenerHandle {
    stop_flag: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    join: Option<JoinHandle<()>>,
}

impl LogListenerHandle {
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.join.is_none()
    }
}

impl Drop for LogListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn start_log_listener(
    adb_program: &Path,
    settings: &LogcatSettings,
    frame_timeout: Option<Duration>,
    trace_id: &str,
) -> Result<(LogListenerHandle, FrameReceiver), AppError> {
    let mut child = Command::new(adb_program)
        .args(logcat_args(settings))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to start logcat: {err}"), trace_id))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture logcat stdout", trace_id))?;
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(stderr, trace_id.to_string());
    }

    let (tx, rx) = mpsc::sync_channel(settings.queue_capacity.max(1));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let join = spawn_frame_scanner(
        BufReader::new(stdout),
        settings.frame_marker.clone(),
        tx,
        Arc::clone(&stop_flag),
        trace_id.to_string(),
    );

    Ok((
        LogListenerHandle {
            stop_flag,
            child: Arc::new(Mutex::new(Some(child))),
            join: Some(join),
        },
        FrameReceiver::new(rx, frame_timeout),
    ))
}

/// Scans `reader` line by line and queues a notification for each frame-ready line.
/// Exits on EOF, read error, stop request, or when the receiver is dropped.
pub fn spawn_frame_scanner<R>(
    reader: R,
    marker: String,
    tx: SyncSender<FrameNotification>,
    stop_flag: Arc<AtomicBool>,
    trace_id: String,
) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = reader;
        let mut buf = Vec::<u8>::new();
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            buf.clear();
            // Raw bytes: a line with invalid UTF-8 must not end the scan.
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, "failed to read logcat stdout");
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\r', '\n']);
            if !is_frame_ready(line, &marker) {
                continue;
            }
            debug!(trace_id = %trace_id, line = %line, "frame ready");
            if !push_notification(&tx, FrameNotification::new(line), &stop_flag) {
                break;
            }
        }
        debug!(trace_id = %trace_id, "logcat scanner exiting");
    })
}

// A full queue holds the scanner back (and with it, logcat) until the test catches up.
fn push_notification(
    tx: &SyncSender<FrameNotification>,
    mut frame: FrameNotification,
    stop_flag: &AtomicBool,
) -> bool {
    loop {
        match tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(pending)) => {
                if stop_flag.load(Ordering::Relaxed) {
                    return false;
                }
                frame = pending;
                thread::sleep(FULL_QUEUE_POLL);
            }
        }
    }
}

fn forward_stderr(stderr: impl Read + Send + 'static, trace_id: String) {
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            match line {
                Ok(line) if !line.trim().is_empty() => {
                    warn!(trace_id = %trace_id, line = %line, "logcat stderr");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}
