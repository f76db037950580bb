//! Dimension probing for images and videos
//!
//! Probing is best-effort: every failure is logged and turned into
//! [`Dimensions::unknown`]. Each probe is bounded by a timeout.

use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use image::ImageReader;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{Dimensions, MediaKind};

/// Bytes of an SVG file searched for the root element
const SVG_HEAD_LIMIT: u64 = 64 * 1024;

/// How often a running ffprobe child is polled for exit
const FFPROBE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Extracts pixel dimensions from a media file
pub trait DimensionProbe: Sync {
    /// Never fails; unreadable files yield unknown dimensions
    fn probe(&self, path: &Path, kind: MediaKind) -> Dimensions;
}

/// Default prober: image headers via the `image` crate, SVG attributes, ffprobe for video
#[derive(Debug, Clone)]
pub struct MediaProber {
    timeout: Duration,
    ffprobe_path: PathBuf,
}

impl MediaProber {
    /// Create a prober with an explicit timeout and ffprobe executable
    pub fn new(timeout: Duration, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            timeout,
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Create a prober from the index configuration
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.probe_timeout(), config.ffprobe_path.clone())
    }

    fn probe_image(&self, path: &Path) -> Result<Dimensions, IndexError> {
        let owned = path.to_path_buf();
        if is_svg(path) {
            run_with_deadline(path, self.timeout, move || read_svg_dimensions(&owned))
        } else {
            run_with_deadline(path, self.timeout, move || read_raster_dimensions(&owned))
        }
    }

    fn probe_video(&self, path: &Path) -> Result<Dimensions, IndexError> {
        let mut child = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                IndexError::probe_error(
                    path.to_path_buf(),
                    format!("cannot run {:?}: {}", self.ffprobe_path, e),
                )
            })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(IndexError::probe_error(
                        path.to_path_buf(),
                        format!("ffprobe timed out after {:?}", self.timeout),
                    ));
                }
                Ok(None) => thread::sleep(FFPROBE_POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(IndexError::from(e).with_path(path));
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| IndexError::from(e).with_path(path))?;
        if !output.status.success() {
            return Err(IndexError::probe_error(
                path.to_path_buf(),
                format!("ffprobe exited with {}", output.status),
            ));
        }
        parse_ffprobe_output(&output.stdout)
            .ok_or_else(|| IndexError::probe_error(path.to_path_buf(), "no video stream size"))
    }
}

impl Default for MediaProber {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl DimensionProbe for MediaProber {
    fn probe(&self, path: &Path, kind: MediaKind) -> Dimensions {
        let result = match kind {
            MediaKind::Image => self.probe_image(path),
            MediaKind::Video => self.probe_video(path),
        };
        match result {
            Ok(dimensions) => {
                log::debug!(
                    "Dimensions for {:?}: {:?}x{:?}",
                    path,
                    dimensions.width(),
                    dimensions.height()
                );
                dimensions
            }
            Err(e) => {
                log::warn!("Failed to get dimensions for {:?}: {}", path, e.message);
                Dimensions::unknown()
            }
        }
    }
}

/// Run `f` on a helper thread and give up waiting once `timeout` passes
///
/// A timed-out helper is left to finish on its own; its result is dropped.
pub fn run_with_deadline<T, F>(path: &Path, timeout: Duration, f: F) -> Result<T, IndexError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IndexError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("probe".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| IndexError::from(e).with_path(path))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(IndexError::probe_error(
            path.to_path_buf(),
            format!("probe timed out after {:?}", timeout),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(IndexError::probe_error(
            path.to_path_buf(),
            "probe thread exited without a result",
        )),
    }
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"))
}

/// Read width/height from the image header without decoding pixels
fn read_raster_dimensions(path: &Path) -> Result<Dimensions, IndexError> {
    let reader = ImageReader::open(path)
        .map_err(|e| IndexError::from(e).with_path(path))?
        .with_guessed_format()
        .map_err(|e| IndexError::from(e).with_path(path))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| IndexError::probe_error(path.to_path_buf(), e.to_string()))?;
    Ok(Dimensions::new(width, height))
}

fn read_svg_dimensions(path: &Path) -> Result<Dimensions, IndexError> {
    let mut head = Vec::new();
    File::open(path)
        .and_then(|f| f.take(SVG_HEAD_LIMIT).read_to_end(&mut head))
        .map_err(|e| IndexError::from(e).with_path(path))?;
    parse_svg_dimensions(&String::from_utf8_lossy(&head))
        .ok_or_else(|| IndexError::probe_error(path.to_path_buf(), "no usable size on <svg> element"))
}

/// Size of the root `<svg>` element from `width`/`height`, else `viewBox`
pub fn parse_svg_dimensions(text: &str) -> Option<Dimensions> {
    let start = text.find("<svg")? + "<svg".len();
    let tag = &text[start..];
    let attrs = &tag[..tag.find('>')?];

    let width = svg_attr(attrs, "width").and_then(parse_svg_length);
    let height = svg_attr(attrs, "height").and_then(parse_svg_length);
    if let (Some(width), Some(height)) = (width, height) {
        return Some(Dimensions::new(width, height));
    }

    let numbers: Vec<f64> = svg_attr(attrs, "viewBox")?
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if numbers.len() != 4 {
        return None;
    }
    let dimensions = Dimensions::new(to_pixels(numbers[2])?, to_pixels(numbers[3])?);
    dimensions.is_known().then_some(dimensions)
}

fn svg_attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(found) = attrs[from..].find(name) {
        let start = from + found;
        from = start + name.len();

        // Reject suffix matches such as stroke-width.
        let boundary = attrs[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        if !boundary {
            continue;
        }
        let Some(rest) = attrs[from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            continue;
        }
        let value = &rest[1..];
        return value.find(quote).map(|end| &value[..end]);
    }
    None
}

fn parse_svg_length(value: &str) -> Option<u32> {
    let value = value.trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim_end();
    to_pixels(value.parse::<f64>().ok()?)
}

fn to_pixels(value: f64) -> Option<u32> {
    (value.is_finite() && value > 0.0 && value <= u32::MAX as f64).then(|| value.round() as u32)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// First stream size from `ffprobe -of json` output
fn parse_ffprobe_output(stdout: &[u8]) -> Option<Dimensions> {
    let output: FfprobeOutput = serde_json::from_slice(stdout).ok()?;
    let stream = output.streams.first()?;
    let dimensions = Dimensions::from_parts(stream.width, stream.height);
    dimensions.is_known().then_some(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind;
    use std::fs;

    #[test]
    fn test_probe_png_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        image::RgbImage::new(7, 5).save(&path).unwrap();

        let dims = MediaProber::default().probe(&path, MediaKind::Image);
        assert_eq!(dims, Dimensions::new(7, 5));
    }

    #[test]
    fn test_probe_guesses_format_despite_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("pic.png");
        image::RgbImage::new(3, 9).save(&png).unwrap();
        let renamed = dir.path().join("pic.jpg");
        fs::rename(&png, &renamed).unwrap();

        let dims = MediaProber::default().probe(&renamed, MediaKind::Image);
        assert_eq!(dims, Dimensions::new(3, 9));
    }

    #[test]
    fn test_probe_corrupt_image_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"this is not a jpeg").unwrap();

        let dims = MediaProber::default().probe(&path, MediaKind::Image);
        assert_eq!(dims, Dimensions::unknown());
    }

    #[test]
    fn test_probe_missing_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let dims = MediaProber::default().probe(&dir.path().join("gone.png"), MediaKind::Image);
        assert_eq!(dims, Dimensions::unknown());
    }

    #[test]
    fn test_probe_svg_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.SVG");
        fs::write(
            &path,
            r#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg" width="120" height="80"></svg>"#,
        )
        .unwrap();

        let dims = MediaProber::default().probe(&path, MediaKind::Image);
        assert_eq!(dims, Dimensions::new(120, 80));
    }

    #[test]
    fn test_video_without_ffprobe_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"\0\0\0\x18ftypmp42").unwrap();

        let prober = MediaProber::new(Duration::from_secs(1), dir.path().join("no-ffprobe"));
        assert_eq!(prober.probe(&path, MediaKind::Video), Dimensions::unknown());
    }

    #[cfg(unix)]
    fn fake_ffprobe(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffprobe");
        fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_ffprobe_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        fs::write(&clip, b"\0\0\0\x18ftypmp42").unwrap();
        let ffprobe = fake_ffprobe(dir.path(), "exec sleep 30");

        let prober = MediaProber::new(Duration::from_millis(200), ffprobe);
        let started = Instant::now();
        assert_eq!(prober.probe(&clip, MediaKind::Video), Dimensions::unknown());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffprobe_stream_size_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.webm");
        fs::write(&clip, b"webm").unwrap();
        let ffprobe = fake_ffprobe(
            dir.path(),
            r#"echo '{"streams": [{"width": 640, "height": 360}]}'"#,
        );

        let prober = MediaProber::new(Duration::from_secs(10), ffprobe);
        assert_eq!(prober.probe(&clip, MediaKind::Video), Dimensions::new(640, 360));
    }

    #[test]
    fn test_parse_svg_dimensions() {
        assert_eq!(
            parse_svg_dimensions(r#"<svg width="64px" height='32'>"#),
            Some(Dimensions::new(64, 32))
        );
        assert_eq!(
            parse_svg_dimensions(r#"<svg viewBox="0 0 300.4 150"><rect/></svg>"#),
            Some(Dimensions::new(300, 150))
        );
        assert_eq!(
            parse_svg_dimensions(r#"<svg width="100%" height="100%" viewBox="0,0,20,10">"#),
            Some(Dimensions::new(20, 10))
        );
        assert_eq!(parse_svg_dimensions(r#"<svg width="10mm" height="5mm">"#), None);
        assert_eq!(parse_svg_dimensions("<html></html>"), None);
    }

    #[test]
    fn test_svg_attr_skips_prefixed_names() {
        let attrs = r#" stroke-width="4" width="12" height="3""#;
        assert_eq!(svg_attr(attrs, "width"), Some("12"));
        assert_eq!(svg_attr(attrs, "height"), Some("3"));
        assert_eq!(svg_attr(attrs, "viewBox"), None);
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let json = br#"{"programs": [], "streams": [{"width": 1920, "height": 1080}]}"#;
        assert_eq!(parse_ffprobe_output(json), Some(Dimensions::new(1920, 1080)));

        assert_eq!(parse_ffprobe_output(br#"{"streams": []}"#), None);
        assert_eq!(parse_ffprobe_output(br#"{"streams": [{"width": 640}]}"#), None);
        assert_eq!(parse_ffprobe_output(b"garbage"), None);
    }

    #[test]
    fn test_run_with_deadline_times_out() {
        let result: Result<(), IndexError> =
            run_with_deadline(Path::new("slow.png"), Duration::from_millis(20), || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            });
        let err = result.unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::ProbeError);
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_run_with_deadline_returns_result() {
        let result = run_with_deadline(Path::new("fast.png"), Duration::from_secs(5), || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }
}
