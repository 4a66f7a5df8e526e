use crossbeam_channel::Sender;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use walkdir::WalkDir;

use crate::cluster::{cluster, DuplicateSet};
use crate::error::{panic_message, ConfigError, HashError};
use crate::frames::FrameSampler;
use crate::hamminghash::{MAX_SIMILARITY_64, MIN_SIMILARITY_64};
use crate::media::{classify, relative_name, validate_strategies, FrameStrategy, Fingerprint, HashKey, MediaFile, MediaKind};
use crate::phash::DctPhash;
use crate::sink::Sink;

pub const DEFAULT_THRESHOLD: u32 = 10;

pub fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"].iter().map(|s| s.to_string()).collect()
}

pub fn default_video_extensions() -> Vec<String> {
    ["mp4", "webm", "mov", "avi", "mkv", "m4v", "wmv", "flv"].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub recursive: bool,
    pub strategies: Vec<FrameStrategy>,
    pub threshold: u32,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            strategies: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }

    /// Everything a pass needs checked before it may start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::NotADirectory(self.root.clone()));
        }
        if !(MIN_SIMILARITY_64..=MAX_SIMILARITY_64).contains(&self.threshold) {
            return Err(ConfigError::ThresholdOutOfRange {
                got: self.threshold,
                min: MIN_SIMILARITY_64,
                max: MAX_SIMILARITY_64,
            });
        }
        validate_strategies(&self.strategies)
    }
}

/// Walks the root and returns every recognised media file, sorted by relative path.
/// Walk errors go to the sink and the entry is skipped.
pub fn collect_media(config: &ScanConfig, sink: &dyn Sink) -> Vec<MediaFile> {
    let mut walker = WalkDir::new(&config.root).min_depth(1);
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    let mut skipped_videos = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                sink.warning(&format!("Skipping unreadable entry: {}", e));
                continue;
            }
        };
        if !entry.file_type().is_file() { continue; }

        let Some(kind) = classify(entry.path(), &config.image_extensions, &config.video_extensions) else {
            continue;
        };
        if kind == MediaKind::Video && config.strategies.is_empty() {
            skipped_videos += 1;
            continue;
        }
        if let Some(path) = relative_name(&config.root, entry.path()) {
            files.push(MediaFile { path, kind });
        }
    }

    if skipped_videos > 0 {
        log::debug!("Skipped {} videos, no frame strategy selected", skipped_videos);
    }
    files.sort();
    files
}

/// Fingerprints for one file: one entry per image, one per successful video frame.
fn hash_file(
    file: &MediaFile,
    abs_path: &Path,
    strategies: &[FrameStrategy],
    hasher: &DctPhash,
    sampler: &dyn FrameSampler,
    sink: &dyn Sink,
) -> Vec<(HashKey, Fingerprint)> {
    match file.kind {
        MediaKind::Image => {
            let result = catch_hash(|| {
                let img = image::open(abs_path).map_err(|e| HashError::Image(e.to_string()))?;
                Ok(hasher.hash_image(&img))
            });
            match result {
                Ok(fp) => vec![(HashKey::image(file.path.clone()), fp)],
                Err(e) => {
                    sink.warning(&format!("Error processing {}: {}", file.path, e));
                    Vec::new()
                }
            }
        }
        MediaKind::Video => strategies.iter().filter_map(|&strategy| {
            let key = HashKey::frame(file.path.clone(), strategy);
            let result = catch_hash(|| {
                let frame = sampler.sample(abs_path, strategy)?;
                Ok(hasher.hash_image(&frame))
            });
            match result {
                Ok(fp) => Some((key, fp)),
                Err(e) => {
                    sink.warning(&format!("Error processing {}: {}", key, e));
                    None
                }
            }
        }).collect(),
    }
}

// Decoders can panic on hostile input; a panic only costs that one key
fn catch_hash<F>(f: F) -> Result<Fingerprint, HashError>
where
    F: FnOnce() -> Result<Fingerprint, HashError>,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(HashError::Panicked(panic_message(payload.as_ref()))))
}

/// Hashes every recognised file under the root in parallel.
///
/// Progress is reported as `(done, total)` files when a channel is given.
pub fn compute_fingerprints(
    config: &ScanConfig,
    sampler: &dyn FrameSampler,
    sink: &dyn Sink,
    progress_tx: Option<Sender<(usize, usize)>>,
) -> BTreeMap<HashKey, Fingerprint> {
    let files = collect_media(config, sink);
    let total_files = files.len();
    if let Some(tx) = &progress_tx { let _ = tx.send((0, total_files)); }
    if files.is_empty() { return BTreeMap::new(); }

    let hash_start = Instant::now();
    let processed_count = AtomicUsize::new(0);

    let entries: Vec<(HashKey, Fingerprint)> = files
        .par_iter()
        .map_init(DctPhash::new, |hasher, file| {
            let abs_path = config.root.join(&file.path);
            let out = hash_file(file, &abs_path, &config.strategies, hasher, sampler, sink);

            if let Some(prog_tx) = &progress_tx {
                let current = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                if current.is_multiple_of(10) || current == total_files {
                    let _ = prog_tx.send((current, total_files));
                }
            }
            out
        })
        .flatten_iter()
        .collect();

    log::debug!("Hashed {} files into {} fingerprints in {:.2}s",
        total_files, entries.len(), hash_start.elapsed().as_secs_f64());

    entries.into_iter().collect()
}

/// One full pass: validate, fingerprint, cluster.
pub fn scan_and_group(
    config: &ScanConfig,
    sampler: &dyn FrameSampler,
    sink: &dyn Sink,
    progress_tx: Option<Sender<(usize, usize)>>,
) -> Result<DuplicateSet, ConfigError> {
    config.validate()?;
    Ok(group_validated(config, sampler, sink, progress_tx))
}

/// `scan_and_group` for a config the caller has already validated.
pub fn group_validated(
    config: &ScanConfig,
    sampler: &dyn FrameSampler,
    sink: &dyn Sink,
    progress_tx: Option<Sender<(usize, usize)>>,
) -> DuplicateSet {
    let map = compute_fingerprints(config, sampler, sink, progress_tx);

    let group_start = Instant::now();
    let set = cluster(&map, config.threshold, &config.root);
    log::debug!("Grouping: {} groups found in {:.2}s", set.len(), group_start.elapsed().as_secs_f64());

    sink.info(&format!("Found {} duplicate groups", set.len()));
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::frames::VideoInfo;
    use crate::sink::{MemorySink, Severity};
    use image::{DynamicImage, GrayImage, Luma};
    use std::fs;

    fn gradient(offset: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([((x * 3 + y * 2 + offset) % 250) as u8]))
    }

    fn checker() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 }]))
    }

    /// First frames decode to the gradient, everything else fails.
    struct FakeSampler;

    impl FrameSampler for FakeSampler {
        fn sample(&self, _path: &Path, strategy: FrameStrategy) -> Result<DynamicImage, FrameError> {
            match strategy {
                FrameStrategy::First => Ok(DynamicImage::ImageLuma8(gradient(0))),
                FrameStrategy::Last => Err(FrameError::NoFrame),
                FrameStrategy::Timestamp(_) => panic!("decoder blew up"),
            }
        }

        fn probe(&self, _path: &Path) -> Result<VideoInfo, FrameError> {
            Err(FrameError::FfmpegNotFound)
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        gradient(0).save(dir.path().join("a.png")).unwrap();
        gradient(0).save(dir.path().join("b.png")).unwrap();
        checker().save(dir.path().join("c.png")).unwrap();
        fs::write(dir.path().join("broken.jpg"), b"not really a jpeg").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        gradient(0).save(dir.path().join("sub").join("d.png")).unwrap();
        dir
    }

    #[test]
    fn test_identical_images_grouped_and_broken_file_skipped() {
        let dir = fixture();
        let sink = MemorySink::default();
        let config = ScanConfig::new(dir.path());

        let set = scan_and_group(&config, &FakeSampler, &sink, None).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).unwrap().members, vec!["a.png", "b.png", "sub/d.png"]);
        assert!(sink.contains("broken.jpg", Severity::Warning));
        assert_eq!(set.root, dir.path());
    }

    #[test]
    fn test_non_recursive_stays_at_top_level() {
        let dir = fixture();
        let sink = MemorySink::default();
        let mut config = ScanConfig::new(dir.path());
        config.recursive = false;

        let files = collect_media(&config, &sink);
        let names: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "broken.jpg", "c.png"]);
    }

    #[test]
    fn test_videos_skipped_without_strategies() {
        let dir = fixture();
        fs::write(dir.path().join("v1.mp4"), b"").unwrap();
        let sink = MemorySink::default();

        let config = ScanConfig::new(dir.path());
        let map = compute_fingerprints(&config, &FakeSampler, &sink, None);
        assert!(map.keys().all(|k| k.strategy.is_none()));
        assert!(!map.keys().any(|k| k.path == "v1.mp4"));
    }

    #[test]
    fn test_failed_frames_leave_no_key() {
        let dir = fixture();
        fs::write(dir.path().join("v1.mp4"), b"").unwrap();
        let sink = MemorySink::default();

        let mut config = ScanConfig::new(dir.path());
        config.strategies = vec![FrameStrategy::First, FrameStrategy::Last, FrameStrategy::Timestamp(4)];
        let map = compute_fingerprints(&config, &FakeSampler, &sink, None);

        assert!(map.contains_key(&HashKey::frame("v1.mp4", FrameStrategy::First)));
        assert!(!map.contains_key(&HashKey::frame("v1.mp4", FrameStrategy::Last)));
        assert!(!map.contains_key(&HashKey::frame("v1.mp4", FrameStrategy::Timestamp(4))));
        assert!(sink.contains("v1.mp4//last", Severity::Warning));
        assert!(sink.contains("decoder blew up", Severity::Warning));

        // The surviving first frame matches the gradient images
        let set = cluster(&map, config.threshold, &config.root);
        assert_eq!(set.get(0).unwrap().members, vec!["a.png", "b.png", "sub/d.png", "v1.mp4"]);
    }

    #[test]
    fn test_progress_reaches_total() {
        let dir = fixture();
        let sink = MemorySink::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = ScanConfig::new(dir.path());

        compute_fingerprints(&config, &FakeSampler, &sink, Some(tx));
        let updates: Vec<(usize, usize)> = rx.try_iter().collect();
        assert_eq!(updates.first(), Some(&(0, 5)));
        assert_eq!(updates.last(), Some(&(5, 5)));
    }

    #[test]
    fn test_validation_rejects_bad_config() {
        let dir = fixture();
        let mut config = ScanConfig::new(dir.path().join("a.png"));
        assert!(matches!(config.validate(), Err(ConfigError::NotADirectory(_))));

        config.root = dir.path().to_path_buf();
        config.threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdOutOfRange { got: 0, .. })));
        config.threshold = 31;
        assert!(config.validate().is_err());
        config.threshold = 30;
        assert!(config.validate().is_ok());

        config.strategies = vec![FrameStrategy::Timestamp(1), FrameStrategy::Timestamp(2)];
        assert_eq!(config.validate(), Err(ConfigError::MultipleTimestamps));
    }
}
