/// Fixed-duration sliding window over timestamped samples.
///
/// Used for the player's attack bonus: `current_value()` is the AB printed on
/// the most recent swing, `current_max()` the best AB seen in the last
/// `window_ms`. When a buff lapses the max falls once the buffed swings age out.
use std::collections::VecDeque;

/// Default attack-bonus window width.
pub const AB_WINDOW_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingSample<T> {
    pub timestamp_ms: u64,
    pub value:        T,
}

#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    samples:   VecDeque<RollingSample<T>>,
    latest:    Option<RollingSample<T>>,
    window_ms: u64,
}

impl<T: Copy + Ord> RollingWindow<T> {
    pub fn new(window_ms: u64) -> Self {
        Self { samples: VecDeque::new(), latest: None, window_ms }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Samples must arrive in chronological order (the log is processed in order).
    pub fn record(&mut self, value: T, timestamp_ms: u64) {
        let sample = RollingSample { timestamp_ms, value };
        self.samples.push_back(sample);
        self.latest = Some(sample);
    }

    /// Most recent sample, regardless of age.
    pub fn current_value(&self) -> Option<T> {
        self.latest.map(|s| s.value)
    }

    /// Maximum over samples with `timestamp >= now - window`. Evicts stale samples.
    pub fn current_max(&mut self, now_ms: u64) -> Option<T> {
        self.evict(now_ms);
        self.samples.iter().map(|s| s.value).max()
    }

    /// Number of samples still inside the window as of the last eviction.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn evict(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.samples.front().is_some_and(|s| s.timestamp_ms < cutoff) {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_sample_ages_out_of_max() {
        let mut w = RollingWindow::new(30_000);
        w.record(20, 0);
        w.record(10, 35_000);
        assert_eq!(w.current_max(40_000), Some(10));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn max_spans_whole_window() {
        let mut w = RollingWindow::new(AB_WINDOW_MS);
        w.record(38, 1_000);
        w.record(33, 5_000);
        w.record(35, 9_000);
        assert_eq!(w.current_max(10_000), Some(38));
        assert_eq!(w.current_value(), Some(35));
    }

    #[test]
    fn sample_on_cutoff_is_kept() {
        let mut w = RollingWindow::new(30_000);
        w.record(12, 10_000);
        assert_eq!(w.current_max(40_000), Some(12));
        assert_eq!(w.current_max(40_001), None);
    }

    #[test]
    fn current_value_survives_eviction() {
        let mut w = RollingWindow::new(1_000);
        w.record(7, 0);
        assert_eq!(w.current_max(60_000), None);
        assert!(w.is_empty());
        assert_eq!(w.current_value(), Some(7));
    }

    #[test]
    fn empty_window() {
        let mut w: RollingWindow<i32> = RollingWindow::new(30_000);
        assert_eq!(w.current_max(0), None);
        assert_eq!(w.current_value(), None);
    }
}
