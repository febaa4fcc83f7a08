//! Capture configuration.
//!
//! ```
//! use segcap::CaptureConfig;
//!
//! let config = CaptureConfig::new()
//!     .flow(true)
//!     .interval(10)
//!     .downscale(2);
//! assert!(config.flow);
//! assert_eq!(config.interval, 10);
//! ```
//!
//! The same fields load from RON:
//!
//! ```
//! use segcap::CaptureConfig;
//!
//! let config = CaptureConfig::from_ron("(flow: true, scan_radius: 4)").unwrap();
//! assert_eq!(config.scan_radius, 4);
//! assert!(config.semantic);
//! ```

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::ConfigError;
use crate::framebuffer::DepthCopyPolicy;
use crate::motion::DEFAULT_FLOW_GAIN;

/// Ticks between automatic captures unless configured otherwise.
pub const DEFAULT_INTERVAL: u32 = 20;

/// Settings for one [`CaptureOrchestrator`](crate::capture::CaptureOrchestrator).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub depth: bool,
    pub semantic: bool,
    pub instance: bool,
    pub flow: bool,
    /// Ticks between auto-captures; clamped to at least 1.
    pub interval: u32,
    /// Keep every n-th pixel of each output. 1 keeps full resolution.
    pub downscale: u32,
    /// Visible chunks drawn between flushes on the fast path.
    pub flush_interval: usize,
    /// Cells scanned around the camera on the fallback path.
    pub scan_radius: i32,
    pub max_scan_radius: i32,
    pub depth_copy: DepthCopyPolicy,
    pub flow_gain: f32,
    /// Exponent applied to linear depth before the grayscale image.
    pub contrast_gamma: Option<f32>,
    pub background: Rgb,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            depth: true,
            semantic: true,
            instance: true,
            flow: false,
            interval: DEFAULT_INTERVAL,
            downscale: 1,
            flush_interval: 64,
            scan_radius: 8,
            max_scan_radius: 16,
            depth_copy: DepthCopyPolicy::Independent,
            flow_gain: DEFAULT_FLOW_GAIN,
            contrast_gamma: None,
            background: Rgb::BACKGROUND,
        }
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn depth(mut self, enabled: bool) -> Self {
        self.depth = enabled;
        self
    }

    pub fn semantic(mut self, enabled: bool) -> Self {
        self.semantic = enabled;
        self
    }

    pub fn instance(mut self, enabled: bool) -> Self {
        self.instance = enabled;
        self
    }

    pub fn flow(mut self, enabled: bool) -> Self {
        self.flow = enabled;
        self
    }

    pub fn interval(mut self, ticks: u32) -> Self {
        self.interval = ticks.max(1);
        self
    }

    pub fn downscale(mut self, rate: u32) -> Self {
        self.downscale = rate.max(1);
        self
    }

    pub fn flush_interval(mut self, chunks: usize) -> Self {
        self.flush_interval = chunks.max(1);
        self
    }

    pub fn scan_radius(mut self, radius: i32, max: i32) -> Self {
        self.scan_radius = radius.max(0);
        self.max_scan_radius = max.max(0);
        self
    }

    pub fn depth_copy(mut self, policy: DepthCopyPolicy) -> Self {
        self.depth_copy = policy;
        self
    }

    pub fn flow_gain(mut self, gain: f32) -> Self {
        self.flow_gain = gain;
        self
    }

    pub fn contrast_gamma(mut self, gamma: f32) -> Self {
        self.contrast_gamma = Some(gamma);
        self
    }

    pub fn background(mut self, color: Rgb) -> Self {
        self.background = color;
        self
    }

    /// Scan radius actually used by the fallback traversal.
    pub fn effective_scan_radius(&self) -> i32 {
        self.scan_radius.min(self.max_scan_radius).max(0)
    }

    /// Same as `downscale`, but never zero even if deserialized that way.
    pub fn sample_rate(&self) -> u32 {
        self.downscale.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.interval, 20);
        assert_eq!(config.depth_copy, DepthCopyPolicy::Independent);
        assert!(!config.flow);
        assert_eq!(config.background, Rgb::BACKGROUND);
    }

    #[test]
    fn builder_clamps() {
        let config = CaptureConfig::new().interval(0).downscale(0).scan_radius(40, 16);
        assert_eq!(config.interval, 1);
        assert_eq!(config.downscale, 1);
        assert_eq!(config.effective_scan_radius(), 16);
    }

    #[test]
    fn ron_round_trip() {
        let config = CaptureConfig::new()
            .flow(true)
            .contrast_gamma(0.5)
            .depth_copy(DepthCopyPolicy::CopyFromMain);
        let text = ron::to_string(&config).unwrap();
        assert_eq!(CaptureConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn malformed_ron_is_an_error() {
        assert!(CaptureConfig::from_ron("(flow: maybe)").is_err());
    }
}
