use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hamminghash::HammingHash;

/// Separates a video path from its frame tag inside a hash key.
pub const KEY_SEPARATOR: &str = "//";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaFile {
    /// Relative to the scan root, always `/`-separated.
    pub path: String,
    pub kind: MediaKind,
}

/// Which frame of a video stands in for the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameStrategy {
    First,
    Last,
    Timestamp(u64),
}

impl FrameStrategy {
    /// Short form used as the hash key suffix.
    pub fn tag(&self) -> String {
        match self {
            FrameStrategy::First => "first".to_string(),
            FrameStrategy::Last => "last".to_string(),
            FrameStrategy::Timestamp(secs) => secs.to_string(),
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "first" => Some(FrameStrategy::First),
            "last" => Some(FrameStrategy::Last),
            _ => tag.parse::<u64>().ok().map(FrameStrategy::Timestamp),
        }
    }
}

impl fmt::Display for FrameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStrategy::Timestamp(secs) => write!(f, "timestamp={}", secs),
            other => f.write_str(&other.tag()),
        }
    }
}

impl FromStr for FrameStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let value = lower.strip_prefix("timestamp=").unwrap_or(&lower);
        if value.is_empty() || (value != lower && value.parse::<u64>().is_err()) {
            return Err(ConfigError::InvalidFrameStrategy(s.to_string()));
        }
        FrameStrategy::from_tag(value).ok_or_else(|| ConfigError::InvalidFrameStrategy(s.to_string()))
    }
}

impl Serialize for FrameStrategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FrameStrategy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Rejects repeated strategies and more than one timestamp.
pub fn validate_strategies(strategies: &[FrameStrategy]) -> Result<(), ConfigError> {
    let mut seen = Vec::with_capacity(strategies.len());
    let mut timestamps = 0;
    for s in strategies {
        if seen.contains(s) {
            return Err(ConfigError::DuplicateFrameStrategy(s.to_string()));
        }
        if matches!(s, FrameStrategy::Timestamp(_)) {
            timestamps += 1;
            if timestamps > 1 {
                return Err(ConfigError::MultipleTimestamps);
            }
        }
        seen.push(*s);
    }
    Ok(())
}

/// A relative path, optionally tagged with the video frame it was hashed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey {
    pub path: String,
    pub strategy: Option<FrameStrategy>,
}

impl HashKey {
    pub fn image(path: impl Into<String>) -> Self {
        Self { path: path.into(), strategy: None }
    }

    pub fn frame(path: impl Into<String>, strategy: FrameStrategy) -> Self {
        Self { path: path.into(), strategy: Some(strategy) }
    }

    /// The path with any frame tag stripped.
    pub fn canonical_path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            Some(s) => write!(f, "{}{}{}", self.path, KEY_SEPARATOR, s.tag()),
            None => f.write_str(&self.path),
        }
    }
}

/// 64-bit perceptual fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        self.0.hamming_distance(&other.0)
    }
}

impl HammingHash for Fingerprint {
    #[inline(always)]
    fn hamming_distance(&self, other: &Self) -> u32 {
        self.0.hamming_distance(&other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Relative name of `path` under `root`, joined with `/` on every platform.
pub fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() { return None; }
    Some(parts.join("/"))
}

pub fn lowercase_ext(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())
}

/// Video extensions win over image extensions so `gif` can be routed either way.
pub fn classify(path: &Path, image_exts: &[String], video_exts: &[String]) -> Option<MediaKind> {
    let ext = lowercase_ext(path)?;
    if video_exts.iter().any(|v| v.eq_ignore_ascii_case(&ext)) {
        Some(MediaKind::Video)
    } else if image_exts.iter().any(|i| i.eq_ignore_ascii_case(&ext)) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_frame_strategy_parsing() {
        assert_eq!("first".parse::<FrameStrategy>(), Ok(FrameStrategy::First));
        assert_eq!("LAST".parse::<FrameStrategy>(), Ok(FrameStrategy::Last));
        assert_eq!("timestamp=12".parse::<FrameStrategy>(), Ok(FrameStrategy::Timestamp(12)));
        assert_eq!("7".parse::<FrameStrategy>(), Ok(FrameStrategy::Timestamp(7)));
        assert!("timestamp=-3".parse::<FrameStrategy>().is_err());
        assert!("timestamp=first".parse::<FrameStrategy>().is_err());
        assert!("middle".parse::<FrameStrategy>().is_err());
        assert!("".parse::<FrameStrategy>().is_err());
    }

    #[test]
    fn test_strategy_validation() {
        use FrameStrategy::*;
        assert!(validate_strategies(&[First, Last, Timestamp(3)]).is_ok());
        assert!(validate_strategies(&[]).is_ok());
        assert_eq!(validate_strategies(&[First, First]), Err(ConfigError::DuplicateFrameStrategy("first".into())));
        assert_eq!(validate_strategies(&[Timestamp(1), Timestamp(2)]), Err(ConfigError::MultipleTimestamps));
    }

    #[test]
    fn test_hash_key_text_form() {
        let k = HashKey::frame("clips/v1.mp4", FrameStrategy::Timestamp(5));
        assert_eq!(k.to_string(), "clips/v1.mp4//5");
        assert_eq!(k.canonical_path(), "clips/v1.mp4");
        assert_eq!(HashKey::frame("v.mp4", FrameStrategy::Last).to_string(), "v.mp4//last");
        assert_eq!(HashKey::image("a.jpg").to_string(), "a.jpg");
        // Frame keys of one file sort next to each other
        assert!(HashKey::frame("v.mp4", FrameStrategy::First) < HashKey::image("w.jpg"));
    }

    #[test]
    fn test_relative_name_and_classify() {
        let root = PathBuf::from("/data/photos");
        let p = root.join("trip").join("IMG_1.JPG");
        assert_eq!(relative_name(&root, &p).as_deref(), Some("trip/IMG_1.JPG"));
        assert_eq!(relative_name(&root, &root), None);

        let images = vec!["jpg".to_string(), "gif".to_string()];
        let videos = vec!["mp4".to_string()];
        assert_eq!(classify(&p, &images, &videos), Some(MediaKind::Image));
        assert_eq!(classify(Path::new("a.MP4"), &images, &videos), Some(MediaKind::Video));
        assert_eq!(classify(Path::new("notes.txt"), &images, &videos), None);

        let videos_with_gif = vec!["mp4".to_string(), "gif".to_string()];
        assert_eq!(classify(Path::new("anim.gif"), &images, &videos_with_gif), Some(MediaKind::Video));
    }
}
