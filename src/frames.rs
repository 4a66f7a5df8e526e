use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use image::{DynamicImage, RgbImage};
use log::debug;
use serde_json::Value;

use crate::error::FrameError;
use crate::media::FrameStrategy;

/// Pulls a single representative frame out of a video.
///
/// Implementations report every failure as a `FrameError` value; nothing
/// panics past this boundary.
pub trait FrameSampler: Send + Sync {
    fn sample(&self, path: &Path, strategy: FrameStrategy) -> Result<DynamicImage, FrameError>;

    fn probe(&self, path: &Path) -> Result<VideoInfo, FrameError>;
}

/// The subset of ffprobe metadata the rest of the program needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    pub fps: Option<f64>,
    /// Container duration in seconds.
    pub duration: Option<f64>,
}

impl VideoInfo {
    /// Parses `ffprobe -show_format -show_streams -print_format json` output.
    /// Only the first video stream is considered.
    pub fn parse_ffprobe_json(json: &str) -> Result<Self, FrameError> {
        let parsed: Value = serde_json::from_str(json)
            .map_err(|e| FrameError::Probe(e.to_string().chars().take(500).collect()))?;

        let stream = parsed["streams"]
            .as_array()
            .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
            .ok_or_else(|| FrameError::Probe("no video stream".to_string()))?;

        let width = stream["width"].as_u64().unwrap_or(0) as u32;
        let height = stream["height"].as_u64().unwrap_or(0) as u32;

        let frame_count = json_u64(&stream["nb_frames"]).filter(|&n| n > 0);

        let fps = stream["r_frame_rate"].as_str().and_then(parse_frame_rate)
            .or_else(|| stream["avg_frame_rate"].as_str().and_then(parse_frame_rate));

        let duration = json_f64(&parsed["format"]["duration"])
            .or_else(|| json_f64(&stream["duration"]))
            .filter(|d| d.is_finite() && *d >= 0.0);

        Ok(Self { width, height, frame_count, fps, duration })
    }

    pub fn resolution_string(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// `HH:MM:SS` of `round(frames / fps)`, falling back to the container duration.
    pub fn duration_string(&self) -> Option<String> {
        let secs = match (self.frame_count, self.fps) {
            (Some(frames), Some(fps)) if fps > 0.0 => frames as f64 / fps,
            _ => self.duration?,
        };
        Some(format_hms(secs.round() as u64))
    }
}

pub fn format_hms(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Frame index for a timestamp. `None` when the rate is unknown or unusable.
pub fn timestamp_frame_index(seconds: u64, fps: Option<f64>) -> Option<u64> {
    let fps = fps.filter(|f| f.is_finite() && *f > 0.0)?;
    Some((seconds as f64 * fps).round() as u64)
}

/// Accepts `30000/1001`, `25/1` or a plain number. A zero denominator or a
/// non-positive rate means ffprobe does not know.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 { return None; }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

// ffprobe reports most numbers as JSON strings
fn json_u64(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FfmpegCommandName {
    Ffprobe,
    Ffmpeg,
}

impl FfmpegCommandName {
    fn as_os_str(&self) -> &'static OsStr {
        match self {
            Self::Ffprobe => OsStr::new("ffprobe"),
            Self::Ffmpeg => OsStr::new("ffmpeg"),
        }
    }
}

fn map_spawn_error(e: std::io::Error) -> FrameError {
    match e.kind() {
        // By far the most likely cause is ffmpeg not being installed
        std::io::ErrorKind::NotFound => FrameError::FfmpegNotFound,
        _ => FrameError::Io(format!("{:?}", e.kind())),
    }
}

fn run_command(name: FfmpegCommandName, args: &[&OsStr]) -> Result<Output, FrameError> {
    let output = Command::new(name.as_os_str())
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(map_spawn_error)?;

    if !output.status.success() {
        let msg = String::from_utf8_lossy(&output.stderr).chars().take(500).collect::<String>();
        return Err(FrameError::FfmpegInternal(msg));
    }
    Ok(output)
}

/// Samples frames by driving the `ffprobe` and `ffmpeg` binaries on the PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSampler;

impl FfmpegSampler {
    pub fn new() -> Self { Self }

    /// Decodes one frame as PNG over a pipe. `index` selects by frame number,
    /// `None` takes the first decodable frame.
    fn single_frame(&self, path: &Path, index: Option<u64>) -> Result<DynamicImage, FrameError> {
        let select = index.map(|n| format!("select=eq(n\\,{})", n));

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("-hide_banner"),
            OsStr::new("-loglevel"), OsStr::new("error"),
            OsStr::new("-nostats"),
            OsStr::new("-i"), path.as_os_str(),
        ];
        if let Some(filter) = &select {
            args.extend([OsStr::new("-vf"), OsStr::new(filter.as_str())]);
        }
        args.extend([
            OsStr::new("-frames:v"), OsStr::new("1"),
            OsStr::new("-f"), OsStr::new("image2pipe"),
            OsStr::new("-c:v"), OsStr::new("png"),
            OsStr::new("-"),
        ]);

        let output = run_command(FfmpegCommandName::Ffmpeg, &args)?;
        if output.stdout.is_empty() {
            return Err(FrameError::NoFrame);
        }
        image::load_from_memory(&output.stdout).map_err(|e| FrameError::Decode(e.to_string()))
    }

    /// Reads every frame as raw rgb24 and keeps the last complete one.
    fn last_frame_by_scan(&self, path: &Path, info: &VideoInfo) -> Result<DynamicImage, FrameError> {
        let (x, y) = (info.width, info.height);
        if x == 0 || y == 0 {
            return Err(FrameError::InvalidResolution);
        }
        let frame_size = (x as usize)
            .checked_mul(y as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or(FrameError::InvalidResolution)?;

        let args: [&OsStr; 13] = [
            OsStr::new("-hide_banner"),
            OsStr::new("-loglevel"), OsStr::new("error"),
            OsStr::new("-nostats"),
            OsStr::new("-i"), path.as_os_str(),
            OsStr::new("-pix_fmt"), OsStr::new("rgb24"),
            OsStr::new("-f"), OsStr::new("rawvideo"),
            OsStr::new("-c:v"), OsStr::new("rawvideo"),
            OsStr::new("-"),
        ];

        let mut child = Command::new(FfmpegCommandName::Ffmpeg.as_os_str())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(map_spawn_error)?;

        let result = match child.stdout.as_mut() {
            Some(stdout) => read_last_raw_frame(stdout, frame_size),
            None => Err(FrameError::Io("no stdout".to_string())),
        };
        // Reap the child so no zombie is left behind
        let _ = child.kill();
        let _ = child.wait();

        let raw = result?.ok_or(FrameError::NoFrame)?;
        RgbImage::from_raw(x, y, raw)
            .map(DynamicImage::ImageRgb8)
            .ok_or(FrameError::InvalidResolution)
    }
}

/// Reads back-to-back frames of `frame_size` bytes and returns the last complete one.
fn read_last_raw_frame<R: Read>(reader: &mut R, frame_size: usize) -> Result<Option<Vec<u8>>, FrameError> {
    let mut current = vec![0u8; frame_size];
    let mut last: Option<Vec<u8>> = None;
    let mut frames = 0u64;

    loop {
        match reader.read_exact(&mut current) {
            Ok(()) => {
                frames += 1;
                last = Some(current.clone());
            }
            // A trailing partial frame is dropped
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(FrameError::Io(format!("{:?}", e.kind()))),
        }
    }
    debug!("linear scan read {} frames", frames);
    Ok(last)
}

/// Last frame of a video. Seeks straight to frame `nb_frames - 1` when the
/// count is known; an unknown count or a failed seek falls back to `scan`.
/// A failed probe fails the key.
fn last_frame_with_fallback<S, L>(
    path: &Path,
    probe: Result<VideoInfo, FrameError>,
    seek: S,
    scan: L,
) -> Result<DynamicImage, FrameError>
where
    S: FnOnce(u64) -> Result<DynamicImage, FrameError>,
    L: FnOnce(&VideoInfo) -> Result<DynamicImage, FrameError>,
{
    let info = probe?;
    if let Some(last) = info.frame_count.and_then(|n| n.checked_sub(1)) {
        match seek(last) {
            Ok(img) => return Ok(img),
            Err(e) => debug!("{:?}: seek to frame {} failed ({}), scanning", path, last, e),
        }
    }
    scan(&info)
}

impl FrameSampler for FfmpegSampler {
    fn sample(&self, path: &Path, strategy: FrameStrategy) -> Result<DynamicImage, FrameError> {
        match strategy {
            FrameStrategy::First => self.single_frame(path, None),
            FrameStrategy::Last => last_frame_with_fallback(
                path,
                self.probe(path),
                |index| self.single_frame(path, Some(index)),
                |info| self.last_frame_by_scan(path, info),
            ),
            FrameStrategy::Timestamp(secs) => {
                let info = self.probe(path)?;
                let index = timestamp_frame_index(secs, info.fps).ok_or(FrameError::FpsUnavailable)?;
                self.single_frame(path, Some(index))
            }
        }
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo, FrameError> {
        let args = [
            OsStr::new("-v"), OsStr::new("quiet"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            OsStr::new("-print_format"), OsStr::new("json"),
            path.as_os_str(),
        ];
        let output = run_command(FfmpegCommandName::Ffprobe, &args)?;
        let json = String::from_utf8(output.stdout).map_err(|e| FrameError::Probe(e.to_string()))?;
        VideoInfo::parse_ffprobe_json(&json)
    }
}
