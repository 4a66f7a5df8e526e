use crossbeam_channel::{bounded, Receiver};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{ConfigError, DeleteError};
use crate::sink::Sink;

/// One attempt at removing a file. Implementations never unlink permanently.
pub trait Deleter: Send + Sync {
    fn remove(&self, path: &Path) -> Result<(), DeleteError>;
}

/// Moves files to the platform trash.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrashDeleter;

impl Deleter for TrashDeleter {
    fn remove(&self, path: &Path) -> Result<(), DeleteError> {
        trash::delete(path).map_err(|e| DeleteError::Trash(e.to_string()))
    }
}

/// Hands `path` to the desktop's default application and returns without
/// waiting for it to exit.
pub fn open_in_viewer(path: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(target_os = "macos")]
    let mut cmd = Command::new("open");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let mut cmd = Command::new("xdg-open");

    let mut child = cmd.arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    thread::spawn(move || { let _ = child.wait(); });
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Result<Self, ConfigError> {
        if attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        Ok(Self { attempts, backoff })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub path: PathBuf,
    /// Attempts used on success.
    pub result: Result<u32, DeleteError>,
}

/// Bounded retry loop with a fixed sleep between attempts. Reports the final
/// result to the sink: info on success, error once retries run out.
pub fn delete_with_retry(deleter: &dyn Deleter, path: &Path, policy: RetryPolicy, sink: &dyn Sink) -> DeleteOutcome {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match deleter.remove(path) {
            Ok(()) => {
                sink.info(&format!("Moved to trash: {}", path.display()));
                return DeleteOutcome { path: path.to_path_buf(), result: Ok(attempt) };
            }
            Err(e) => {
                log::debug!("Delete attempt {}/{} failed for {:?}: {}", attempt, attempts, path, e);
                last_error = e.to_string();
                if attempt < attempts {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    let err = DeleteError::Exhausted { attempts, last: last_error };
    sink.error(&format!("Failed to delete {}: {}", path.display(), err));
    DeleteOutcome { path: path.to_path_buf(), result: Err(err) }
}

/// Runs `delete_with_retry` on its own worker thread. The outcome is posted
/// once on the returned channel; dropping the receiver is fine.
pub fn spawn_delete(
    deleter: Arc<dyn Deleter>,
    path: PathBuf,
    policy: RetryPolicy,
    sink: Arc<dyn Sink>,
) -> Receiver<DeleteOutcome> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let outcome = delete_with_retry(deleter.as_ref(), &path, policy, sink.as_ref());
        let _ = tx.send(outcome);
    });
    rx
}
