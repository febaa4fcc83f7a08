//! Frame naming, downsampling and the file sink.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;

use crate::capture::CaptureResult;
use crate::error::SinkError;

pub const RGB_SUFFIX: &str = "_rgb";
pub const DEPTH_SUFFIX: &str = "_depth";
pub const SEMANTIC_SUFFIX: &str = "_seg";
pub const INSTANCE_SUFFIX: &str = "_instance";
pub const FLOW_SUFFIX: &str = "_flow";

/// Shared file-name prefix of every output of one frame:
/// `{unix seconds}_{frame index}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameStem {
    pub timestamp: u64,
    pub frame_index: u64,
}

impl FrameStem {
    pub fn new(timestamp: u64, frame_index: u64) -> Self {
        Self {
            timestamp,
            frame_index,
        }
    }

    pub fn now(frame_index: u64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::new(timestamp, frame_index)
    }

    /// `stem` + `suffix` + `.extension`.
    pub fn file_name(&self, suffix: &str, extension: &str) -> String {
        format!("{self}{suffix}.{extension}")
    }
}

impl fmt::Display for FrameStem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.timestamp, self.frame_index)
    }
}

/// Output size after keeping every `rate`-th pixel.
pub fn downsampled_size(width: u32, height: u32, rate: u32) -> (u32, u32) {
    let rate = rate.max(1);
    (width.div_ceil(rate), height.div_ceil(rate))
}

/// Nearest-neighbour downsample of row-major pixels with `channels` values
/// each, keeping every `rate`-th column and row starting at the origin.
pub fn downsample<T: Copy>(
    data: &[T],
    width: u32,
    height: u32,
    channels: usize,
    rate: u32,
) -> Vec<T> {
    let rate = rate.max(1) as usize;
    if rate == 1 {
        return data.to_vec();
    }
    let (w, h) = (width as usize, height as usize);
    let (out_w, out_h) = downsampled_size(width, height, rate as u32);
    let mut out = Vec::with_capacity(out_w as usize * out_h as usize * channels);
    for y in (0..h).step_by(rate) {
        for x in (0..w).step_by(rate) {
            let i = (y * w + x) * channels;
            out.extend_from_slice(&data[i..i + channels]);
        }
    }
    out
}

/// Builds an image from tightly packed RGB8 rows.
pub(crate) fn rgb_image(width: u32, height: u32, pixels: Vec<u8>) -> Option<RgbImage> {
    RgbImage::from_raw(width, height, pixels)
}

/// Receives finished captures.
pub trait CaptureSink {
    fn write(&mut self, result: &CaptureResult) -> Result<(), SinkError>;
}

/// Writes each output as `{stem}{suffix}.png` into one directory, plus the
/// linear depth as little-endian `f32` in `{stem}_depth.raw`.
#[derive(Clone, Debug)]
pub struct PngDirectorySink {
    dir: PathBuf,
    write_raw_depth: bool,
}

impl PngDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_raw_depth: true,
        }
    }

    pub fn with_raw_depth(mut self, enabled: bool) -> Self {
        self.write_raw_depth = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save(&self, image: &RgbImage, name: String) -> Result<PathBuf, SinkError> {
        let path = self.dir.join(name);
        image.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(path)
    }
}

impl CaptureSink for PngDirectorySink {
    fn write(&mut self, result: &CaptureResult) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir)?;
        let stem = result.stem;

        let images = [
            (result.rgb.as_ref(), RGB_SUFFIX),
            (result.depth.as_ref().map(|d| &d.image), DEPTH_SUFFIX),
            (result.semantic.as_ref(), SEMANTIC_SUFFIX),
            (result.instance.as_ref(), INSTANCE_SUFFIX),
            (result.flow.as_ref(), FLOW_SUFFIX),
        ];
        for (image, suffix) in images {
            if let Some(image) = image {
                let path = self.save(image, stem.file_name(suffix, "png"))?;
                tracing::debug!(path = %path.display(), "wrote capture image");
            }
        }

        if self.write_raw_depth
            && let Some(depth) = &result.depth
        {
            let bytes: Vec<u8> = depth.linear.iter().flat_map(|v| v.to_le_bytes()).collect();
            fs::write(self.dir.join(stem.file_name(DEPTH_SUFFIX, "raw")), bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_format() {
        let stem = FrameStem::new(1_700_000_000, 7);
        assert_eq!(stem.to_string(), "1700000000_7");
        assert_eq!(stem.file_name(SEMANTIC_SUFFIX, "png"), "1700000000_7_seg.png");
    }

    #[test]
    fn downsample_keeps_every_nth_pixel() {
        // 3x3 single-channel image holding its own index
        let data: Vec<u8> = (0..9).collect();
        assert_eq!(downsample(&data, 3, 3, 1, 2), vec![0, 2, 6, 8]);
        assert_eq!(downsampled_size(3, 3, 2), (2, 2));
        assert_eq!(downsample(&data, 3, 3, 1, 1), data);

        let rgb: Vec<u8> = (0..12).collect();
        assert_eq!(downsample(&rgb, 2, 2, 3, 2), vec![0, 1, 2]);
    }

    #[test]
    fn png_sink_writes_every_output() {
        use crate::capture::DepthOutput;
        use crate::depth::DepthRange;

        let dir = std::env::temp_dir().join(format!("segcap-sink-{}", std::process::id()));
        let image = RgbImage::from_pixel(2, 2, image::Rgb([30, 60, 90]));
        let result = CaptureResult {
            frame_index: 3,
            stem: FrameStem::new(42, 3),
            width: 2,
            height: 2,
            rgb: Some(image.clone()),
            depth: Some(DepthOutput {
                linear: vec![0.0, 0.25, 0.5, 1.0],
                raw: vec![0.0, 0.9, 0.99, 1.0],
                image: image.clone(),
                range: DepthRange::new(0.1, 100.0).unwrap(),
            }),
            semantic: Some(image.clone()),
            instance: None,
            flow: Some(image),
            passes: Vec::new(),
        };

        let mut sink = PngDirectorySink::new(&dir);
        sink.write(&result).unwrap();

        for name in ["42_3_rgb.png", "42_3_depth.png", "42_3_seg.png", "42_3_flow.png"] {
            assert!(dir.join(name).exists(), "{name} missing");
        }
        assert!(!dir.join("42_3_instance.png").exists());

        let raw = fs::read(dir.join("42_3_depth.raw")).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(f32::from_le_bytes(raw[4..8].try_into().unwrap()), 0.25);

        let decoded = image::open(dir.join("42_3_seg.png")).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(1, 1).0, [30, 60, 90]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
