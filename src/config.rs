use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::fileops::RetryPolicy;
use crate::media::FrameStrategy;
use crate::scanner::{default_image_extensions, default_video_extensions, ScanConfig, DEFAULT_THRESHOLD};

const CONFIG_DIR_NAME: &str = "mediadupes";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScanSection {
    pub recursive: bool,
    pub threshold: u32,
    pub frames: Vec<FrameStrategy>,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            recursive: true,
            threshold: DEFAULT_THRESHOLD,
            frames: Vec::new(),
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeleteSection {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for DeleteSection {
    fn default() -> Self {
        Self { attempts: 3, backoff_ms: 500 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub delete: DeleteSection,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), reason: e.to_string() })
    }

    /// Reads the config at `path`, writing a default one first if there is none.
    /// A file missing whole sections gets them written back with defaults.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let read_err = |e: std::io::Error| ConfigError::Read { path: path.to_path_buf(), reason: e.to_string() };

        if !path.exists() {
            log::debug!("Config file does not exist, creating new one at {:?}", path);
            let cfg = Config::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(read_err)?;
            }
            fs::write(path, cfg.to_toml_string()?).map_err(read_err)?;
            return Ok(cfg);
        }

        log::debug!("Loading config from {:?}", path);
        let content = fs::read_to_string(path).map_err(read_err)?;
        let cfg = Self::from_toml_str(&content, path)?;

        let raw_value: toml::Table = toml::from_str(&content).unwrap_or_default();
        let missing_scan = !raw_value.contains_key("scan");
        let missing_delete = !raw_value.contains_key("delete");
        if missing_scan || missing_delete {
            log::debug!("Writing back defaults (missing_scan={}, missing_delete={})", missing_scan, missing_delete);
            // Not fatal: a read-only config still works
            if let Err(e) = fs::write(path, cfg.to_toml_string()?) {
                log::warn!("Could not update {:?}: {}", path, e);
            }
        }
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse { path: PathBuf::new(), reason: e.to_string() })
    }

    pub fn scan_config(&self, root: impl Into<PathBuf>) -> ScanConfig {
        ScanConfig {
            root: root.into(),
            recursive: self.scan.recursive,
            strategies: self.scan.frames.clone(),
            threshold: self.scan.threshold,
            image_extensions: self.scan.image_extensions.iter().map(|e| e.to_lowercase()).collect(),
            video_extensions: self.scan.video_extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(self.delete.attempts, Duration::from_millis(self.delete.backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = Config::load_or_create(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());

        let again = Config::load_or_create(&path).unwrap();
        assert_eq!(again, cfg);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scan]\nthreshold = 4\nframes = [\"first\", \"timestamp=12\"]\n").unwrap();

        let cfg = Config::load_or_create(&path).unwrap();
        assert_eq!(cfg.scan.threshold, 4);
        assert_eq!(cfg.scan.frames, vec![FrameStrategy::First, FrameStrategy::Timestamp(12)]);
        assert!(cfg.scan.recursive);
        assert_eq!(cfg.delete, DeleteSection::default());

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[delete]"));
        assert!(written.contains("timestamp=12"));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let p = Path::new("x.toml");
        assert!(matches!(Config::from_toml_str("[scan]\nframes = [\"middle\"]\n", p), Err(ConfigError::Parse { .. })));
        assert!(matches!(Config::from_toml_str("[scan\n", p), Err(ConfigError::Parse { .. })));

        let cfg = Config::from_toml_str("[delete]\nattempts = 0\n", p).unwrap();
        assert_eq!(cfg.retry_policy(), Err(ConfigError::NoAttempts));
    }

    #[test]
    fn test_scan_config_from_file_values() {
        let cfg = Config::from_toml_str("[scan]\nrecursive = false\nvideo_extensions = [\"MP4\", \"gif\"]\n", Path::new("x")).unwrap();
        let scan = cfg.scan_config("/media");
        assert_eq!(scan.root, PathBuf::from("/media"));
        assert!(!scan.recursive);
        assert_eq!(scan.video_extensions, vec!["mp4", "gif"]);
        assert_eq!(scan.threshold, DEFAULT_THRESHOLD);
        assert_eq!(cfg.retry_policy().unwrap().backoff, Duration::from_millis(500));
    }
}
