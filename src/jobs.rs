use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{panic_message, JobError};

/// Runs at most one background job at a time and hands its result back
/// through a single-slot channel.
pub struct JobRunner<T> {
    active: Arc<AtomicBool>,
    result_rx: Option<Receiver<Result<T, JobError>>>,
}

impl<T> Default for JobRunner<T> {
    fn default() -> Self {
        Self { active: Arc::new(AtomicBool::new(false)), result_rx: None }
    }
}

// Clears the busy flag however the worker exits
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Send + 'static> JobRunner<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Starts `job` on a worker thread, or returns `Busy` if one is still running.
    /// An untaken result from an earlier job is discarded; call `take_finished`
    /// first to keep it.
    pub fn try_spawn<F>(&mut self, job: F) -> Result<(), JobError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(JobError::Busy);
        }

        let (tx, rx) = bounded(1);
        self.result_rx = Some(rx);
        let guard = ActiveGuard(self.active.clone());

        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            // Release before posting so a waiter sees an idle runner
            drop(guard);
            let _ = tx.send(result);
        });
        Ok(())
    }

    /// Non-blocking. `None` while running or when there is nothing to take.
    pub fn try_take(&mut self) -> Option<Result<T, JobError>> {
        let rx = self.result_rx.as_ref()?;
        match rx.try_recv() {
            Ok(result) => {
                self.result_rx = None;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.result_rx = None;
                Some(Err(JobError::Disconnected))
            }
        }
    }

    /// Result of a job that is no longer running. The worker goes idle just
    /// before it posts, so this blocks for at most that gap. `None` while a
    /// job runs or when there is nothing to take.
    pub fn take_finished(&mut self) -> Option<Result<T, JobError>> {
        if self.is_busy() { return None; }
        let rx = self.result_rx.take()?;
        Some(rx.recv().unwrap_or(Err(JobError::Disconnected)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn finish<T: Send + 'static>(runner: &mut JobRunner<T>) -> Result<T, JobError> {
        loop {
            if let Some(r) = runner.try_take() { return r; }
            thread::yield_now();
        }
    }

    #[test]
    fn test_second_job_is_rejected_while_first_runs() {
        let mut runner: JobRunner<u32> = JobRunner::new();
        let (release_tx, release_rx) = unbounded::<()>();

        runner.try_spawn(move || { let _ = release_rx.recv(); 7 }).unwrap();
        assert!(runner.is_busy());
        assert_eq!(runner.try_spawn(|| 8), Err(JobError::Busy));
        assert!(runner.try_take().is_none());
        assert!(runner.take_finished().is_none());

        release_tx.send(()).unwrap();
        assert_eq!(finish(&mut runner), Ok(7));
        assert!(!runner.is_busy());

        runner.try_spawn(|| 9).unwrap();
        assert_eq!(finish(&mut runner), Ok(9));
        assert!(runner.try_take().is_none());
    }

    #[test]
    fn test_panicking_job_reports_and_frees_runner() {
        let mut runner: JobRunner<u32> = JobRunner::new();
        runner.try_spawn(|| panic!("hash pass failed")).unwrap();

        assert_eq!(finish(&mut runner), Err(JobError::Panicked("hash pass failed".to_string())));
        assert!(!runner.is_busy());
        assert!(runner.try_spawn(|| 1).is_ok());
    }

    #[test]
    fn test_take_finished_collects_result_once_idle() {
        let mut runner: JobRunner<&'static str> = JobRunner::new();
        assert!(runner.take_finished().is_none());

        runner.try_spawn(|| "done").unwrap();
        while runner.is_busy() { thread::yield_now(); }

        // Idle but possibly not yet posted: still handed over, not dropped
        assert_eq!(runner.take_finished(), Some(Ok("done")));
        assert!(runner.take_finished().is_none());
        assert!(runner.try_take().is_none());
    }
}
