use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::sync::Arc;

use crate::frames::FrameSampler;
use crate::media::{FrameStrategy, MediaKind};

/// Longest side of a preview thumbnail.
pub const PREVIEW_SIZE: u32 = 512;

/// What the presentation layer shows for one file. Empty strings when the
/// file could not be read.
#[derive(Debug, Clone, Default)]
pub struct Preview {
    pub image: Option<DynamicImage>,
    pub dims: String,
    pub duration: String,
}

pub trait PreviewSource: Send + Sync {
    fn load(&self, path: &Path, kind: MediaKind) -> Preview;
}

/// Reads previews from disk: the image itself, or the first frame of a video.
pub struct DiskPreviews {
    sampler: Arc<dyn FrameSampler>,
}

impl DiskPreviews {
    pub fn new(sampler: Arc<dyn FrameSampler>) -> Self {
        Self { sampler }
    }
}

impl PreviewSource for DiskPreviews {
    fn load(&self, path: &Path, kind: MediaKind) -> Preview {
        match kind {
            MediaKind::Image => match image::open(path) {
                Ok(img) => {
                    let (w, h) = img.dimensions();
                    Preview {
                        image: Some(img.thumbnail(PREVIEW_SIZE, PREVIEW_SIZE)),
                        dims: format!("{}x{}", w, h),
                        duration: String::new(),
                    }
                }
                Err(e) => {
                    log::debug!("Preview failed for {:?}: {}", path, e);
                    Preview::default()
                }
            },
            MediaKind::Video => {
                let mut preview = Preview::default();
                match self.sampler.probe(path) {
                    Ok(info) => {
                        preview.dims = info.resolution_string();
                        preview.duration = info.duration_string().unwrap_or_default();
                    }
                    Err(e) => log::debug!("Probe failed for {:?}: {}", path, e),
                }
                if let Ok(frame) = self.sampler.sample(path, FrameStrategy::First) {
                    preview.image = Some(frame.thumbnail(PREVIEW_SIZE, PREVIEW_SIZE));
                }
                preview
            }
        }
    }
}

/// For callers with no display: dimension and duration strings stay empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipPreviews;

impl PreviewSource for SkipPreviews {
    fn load(&self, _path: &Path, _kind: MediaKind) -> Preview {
        Preview::default()
    }
}
