//! When to capture.
//!
//! The host calls [`CaptureScheduler::tick`] once per simulation tick and
//! captures whenever it returns `true`. Captures come from two sources: a
//! one-shot [`request`](CaptureScheduler::request) (a key press) and the
//! auto-capture timer.

use crate::config::{CaptureConfig, DEFAULT_INTERVAL};

#[derive(Clone, Debug)]
pub struct CaptureScheduler {
    auto: bool,
    interval: u32,
    ticks: u32,
    requested: bool,
}

impl Default for CaptureScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl CaptureScheduler {
    pub fn new(interval: u32) -> Self {
        Self {
            auto: false,
            interval: interval.max(1),
            ticks: 0,
            requested: false,
        }
    }

    /// Scheduler ticking at `config.interval`, auto-capture off.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.interval)
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn set_interval(&mut self, ticks: u32) {
        self.interval = ticks.max(1);
        self.ticks = self.ticks.min(self.interval);
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// Turns auto-capture on or off and returns the notice to show.
    pub fn set_auto(&mut self, enabled: bool) -> String {
        self.auto = enabled;
        self.ticks = 0;
        let notice = if enabled {
            format!("Auto-capture enabled (every {} ticks)", self.interval)
        } else {
            "Auto-capture disabled".to_string()
        };
        tracing::info!("{notice}");
        notice
    }

    pub fn toggle_auto(&mut self) -> String {
        self.set_auto(!self.auto)
    }

    /// Asks for one capture on the next ready tick.
    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Advances one tick. `ready` is false while there is no scene to
    /// capture (loading screens, menus); such ticks neither count nor fire.
    pub fn tick(&mut self, ready: bool) -> bool {
        if !ready {
            return false;
        }
        let mut fire = std::mem::take(&mut self.requested);
        if self.auto {
            self.ticks += 1;
            if self.ticks >= self.interval {
                self.ticks = 0;
                fire = true;
            }
        }
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_capture_fires_every_interval() {
        let mut scheduler = CaptureScheduler::new(3);
        assert_eq!(scheduler.set_auto(true), "Auto-capture enabled (every 3 ticks)");
        let fired: Vec<bool> = (0..7).map(|_| scheduler.tick(true)).collect();
        assert_eq!(fired, [false, false, true, false, false, true, false]);
    }

    #[test]
    fn disabled_scheduler_only_fires_on_request() {
        let mut scheduler = CaptureScheduler::default();
        assert_eq!(scheduler.interval(), 20);
        assert!(!(0..40).any(|_| scheduler.tick(true)));
        scheduler.request();
        assert!(!scheduler.tick(false));
        assert!(scheduler.tick(true));
        assert!(!scheduler.tick(true));
    }

    #[test]
    fn interval_comes_from_config() {
        let config = CaptureConfig::from_ron("(interval: 2)").unwrap();
        let mut scheduler = CaptureScheduler::from_config(&config);
        assert_eq!(scheduler.interval(), 2);
        assert!(!scheduler.is_auto());
        scheduler.set_auto(true);
        let fired: Vec<bool> = (0..4).map(|_| scheduler.tick(true)).collect();
        assert_eq!(fired, [false, true, false, true]);
    }

    #[test]
    fn toggle_and_interval_floor() {
        let mut scheduler = CaptureScheduler::new(0);
        assert_eq!(scheduler.interval(), 1);
        scheduler.toggle_auto();
        assert!(scheduler.is_auto());
        assert!(scheduler.tick(true));
        assert_eq!(scheduler.toggle_auto(), "Auto-capture disabled");
        assert!(!scheduler.tick(true));
    }
}
