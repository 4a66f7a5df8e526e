use crossbeam_channel::{unbounded, Receiver};
use std::path::Path;
use std::sync::Arc;

use crate::cluster::DuplicateSet;
use crate::error::{AppError, JobError};
use crate::frames::FrameSampler;
use crate::jobs::JobRunner;
use crate::scanner::{self, ScanConfig};
use crate::sink::Sink;
use crate::state::{self, Session};

/// Owns the hashing job and the session, and moves finished sets from one
/// to the other on the foreground thread.
pub struct App {
    sink: Arc<dyn Sink>,
    sampler: Arc<dyn FrameSampler>,
    hashing: JobRunner<DuplicateSet>,
    loaded: Option<DuplicateSet>,
    pub session: Session,
}

impl App {
    pub fn new(sink: Arc<dyn Sink>, sampler: Arc<dyn FrameSampler>, session: Session) -> Self {
        Self { sink, sampler, hashing: JobRunner::new(), loaded: None, session }
    }

    /// Hashing is allowed on an existing directory, outside a session, with no pass running.
    pub fn can_hash(&self, root: &Path) -> bool {
        !self.session.is_active() && root.is_dir() && !self.is_hashing()
    }

    pub fn can_start(&self) -> bool {
        state::can_start(&self.session, self.loaded.as_ref())
    }

    pub fn is_hashing(&self) -> bool {
        self.hashing.is_busy()
    }

    pub fn loaded(&self) -> Option<&DuplicateSet> {
        self.loaded.as_ref()
    }

    /// Validates `config` and starts a hashing pass in the background.
    /// Returns the progress channel of the pass.
    pub fn start_hashing(&mut self, config: ScanConfig) -> Result<Receiver<(usize, usize)>, AppError> {
        if self.session.is_active() {
            return Err(AppError::SessionActive);
        }
        config.validate()?;

        // Load a pass that finished but was never taken, instead of dropping it
        if let Some(result) = self.hashing.take_finished() {
            log::debug!("Loading the result of the previous pass before starting a new one");
            if self.accept(result).is_err() {
                log::debug!("Previous pass had failed");
            }
        }

        let (prog_tx, prog_rx) = unbounded();
        let sink = self.sink.clone();
        let sampler = self.sampler.clone();
        self.hashing.try_spawn(move || {
            scanner::group_validated(&config, sampler.as_ref(), sink.as_ref(), Some(prog_tx))
        })?;

        log::debug!("Hashing pass started");
        Ok(prog_rx)
    }

    fn accept(&mut self, result: Result<DuplicateSet, JobError>) -> Result<bool, AppError> {
        match result {
            Ok(set) => {
                self.loaded = Some(set);
                Ok(true)
            }
            Err(e) => {
                self.sink.error(&format!("Hashing failed: {}", e));
                Err(e.into())
            }
        }
    }

    /// Takes a finished pass, if any. `Ok(true)` when a new set was loaded.
    pub fn poll_hashing(&mut self) -> Result<bool, AppError> {
        match self.hashing.try_take() {
            Some(result) => self.accept(result),
            None => Ok(false),
        }
    }

    /// Hands the loaded set to the session.
    pub fn start_session(&mut self) -> bool {
        if !self.can_start() { return false; }
        match self.loaded.take() {
            Some(set) => self.session.start(set),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, FrameError};
    use crate::fileops::{Deleter, RetryPolicy, TrashDeleter};
    use crate::frames::VideoInfo;
    use crate::media::FrameStrategy;
    use crate::preview::SkipPreviews;
    use crate::sink::MemorySink;
    use image::{DynamicImage, GrayImage, Luma};
    use std::thread;

    struct NoVideo;

    impl FrameSampler for NoVideo {
        fn sample(&self, _path: &Path, _strategy: FrameStrategy) -> Result<DynamicImage, FrameError> {
            Err(FrameError::FfmpegNotFound)
        }

        fn probe(&self, _path: &Path) -> Result<VideoInfo, FrameError> {
            Err(FrameError::FfmpegNotFound)
        }
    }

    fn app() -> App {
        let sink: Arc<dyn Sink> = Arc::new(MemorySink::default());
        let deleter: Arc<dyn Deleter> = Arc::new(TrashDeleter);
        let session = Session::new(deleter, RetryPolicy::default(), Arc::new(SkipPreviews), sink.clone());
        App::new(sink, Arc::new(NoVideo), session)
    }

    fn finish(app: &mut App) -> Result<bool, AppError> {
        loop {
            match app.poll_hashing() {
                Ok(false) => thread::yield_now(),
                other => return other,
            }
        }
    }

    fn dir_with_duplicates() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let img = GrayImage::from_fn(48, 48, |x, y| Luma([((x * 5 + y) % 200) as u8]));
        img.save(dir.path().join("one.png")).unwrap();
        img.save(dir.path().join("two.png")).unwrap();
        dir
    }

    #[test]
    fn test_invalid_root_is_rejected_before_spawning() {
        let mut app = app();
        let err = app.start_hashing(ScanConfig::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::NotADirectory(_))));
        assert!(!app.is_hashing());
        assert!(!app.can_hash(Path::new("/definitely/not/here")));
    }

    #[test]
    fn test_pass_loads_set_and_session_starts() {
        let dir = dir_with_duplicates();
        let mut app = app();
        assert!(app.can_hash(dir.path()));
        assert!(!app.can_start());

        let progress = app.start_hashing(ScanConfig::new(dir.path())).unwrap();
        assert!(finish(&mut app).unwrap());
        assert_eq!(progress.try_iter().last(), Some((2, 2)));
        assert_eq!(app.loaded().unwrap().len(), 1);

        assert!(app.can_start());
        assert!(app.start_session());
        assert!(app.loaded().is_none());
        assert!(!app.can_hash(dir.path()));
        assert!(matches!(app.start_hashing(ScanConfig::new(dir.path())), Err(AppError::SessionActive)));
    }

    #[test]
    fn test_second_pass_is_busy() {
        let dir = dir_with_duplicates();
        let mut app = app();
        // Occupy the runner directly so the test does not race a real pass
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        app.hashing.try_spawn(move || { let _ = release_rx.recv(); DuplicateSet::default() }).unwrap();

        assert!(!app.can_hash(dir.path()));
        assert!(matches!(app.start_hashing(ScanConfig::new(dir.path())), Err(AppError::Job(JobError::Busy))));

        release_tx.send(()).unwrap();
        assert!(finish(&mut app).unwrap());
        assert!(!app.can_start());
    }

    #[test]
    fn test_untaken_pass_is_loaded_not_dropped() {
        let dir = dir_with_duplicates();
        let mut app = app();

        app.start_hashing(ScanConfig::new(dir.path())).unwrap();
        while app.is_hashing() { thread::yield_now(); }
        assert!(app.loaded().is_none());

        // Starting again first takes the finished set
        app.start_hashing(ScanConfig::new(dir.path())).unwrap();
        assert_eq!(app.loaded().map(|s| s.len()), Some(1));

        assert!(finish(&mut app).unwrap());
        assert_eq!(app.loaded().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_pass_is_reported() {
        let mut app = app();
        app.hashing.try_spawn(|| panic!("walk exploded")).unwrap();

        let err = finish(&mut app).unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::Panicked(ref m)) if m == "walk exploded"));
        assert!(app.loaded().is_none());
        assert!(!app.is_hashing());
    }
}
