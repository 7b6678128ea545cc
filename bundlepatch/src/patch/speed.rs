//! Aggregate download progress and transfer speed.

use std::time::{Duration, Instant};

/// Window over which received bytes are turned into a speed figure.
pub const SPEED_WINDOW: Duration = Duration::from_secs(1);

/// Aggregate progress across every downloader of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DownloadProgress {
    pub total_count: usize,
    pub current_count: usize,
    pub total_bytes: u64,
    pub current_bytes: u64,
    /// Bytes received during the last completed window.
    pub speed_bytes_per_sec: u64,
    /// `current_bytes / total_bytes`, 0 when there is nothing to download.
    pub progress: f32,
}

impl DownloadProgress {
    pub fn new(
        total_count: usize,
        current_count: usize,
        total_bytes: u64,
        current_bytes: u64,
        speed_bytes_per_sec: u64,
    ) -> Self {
        let progress = if total_bytes == 0 {
            0.0
        } else {
            (current_bytes as f64 / total_bytes as f64).min(1.0) as f32
        };
        Self {
            total_count,
            current_count,
            total_bytes,
            current_bytes,
            speed_bytes_per_sec,
            progress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.current_bytes >= self.total_bytes
    }
}

/// Turns absolute byte counters into a per-second speed.
///
/// Once a run reaches both its file and byte totals the next report only
/// resets the calculator, so a following run starts from a clean window.
#[derive(Debug, Default)]
pub struct SpeedCalculator {
    window_start: Option<Instant>,
    last_bytes: u64,
    window_bytes: u64,
    speed: u64,
    done: bool,
}

impl SpeedCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record absolute counters; `None` when this call only reset the
    /// calculator after a completed run.
    pub fn on_progress(
        &mut self,
        total_count: usize,
        current_count: usize,
        total_bytes: u64,
        current_bytes: u64,
    ) -> Option<DownloadProgress> {
        self.on_progress_at(
            Instant::now(),
            total_count,
            current_count,
            total_bytes,
            current_bytes,
        )
    }

    pub(crate) fn on_progress_at(
        &mut self,
        now: Instant,
        total_count: usize,
        current_count: usize,
        total_bytes: u64,
        current_bytes: u64,
    ) -> Option<DownloadProgress> {
        if self.done {
            *self = Self::default();
            return None;
        }
        // Bytes can settle before the file count does.
        if current_bytes >= total_bytes && current_count >= total_count {
            self.done = true;
        }

        self.window_bytes += current_bytes.saturating_sub(self.last_bytes);
        self.last_bytes = current_bytes;

        let window_elapsed = self
            .window_start
            .map_or(true, |start| now.duration_since(start) > SPEED_WINDOW);
        if window_elapsed {
            self.speed = self.window_bytes;
            self.window_bytes = 0;
            self.window_start = Some(now);
        }

        Some(DownloadProgress::new(
            total_count,
            current_count,
            total_bytes,
            current_bytes,
            self.speed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_is_bytes_per_window() {
        let start = Instant::now();
        let mut calc = SpeedCalculator::new();

        // First report opens the window.
        let p = calc.on_progress_at(start, 2, 0, 10_000, 1_000).unwrap();
        assert_eq!(p.speed_bytes_per_sec, 1_000);

        // Inside the window the previous figure is kept.
        let p = calc
            .on_progress_at(start + Duration::from_millis(500), 2, 1, 10_000, 3_000)
            .unwrap();
        assert_eq!(p.speed_bytes_per_sec, 1_000);

        let p = calc
            .on_progress_at(start + Duration::from_millis(1_600), 2, 1, 10_000, 6_000)
            .unwrap();
        assert_eq!(p.speed_bytes_per_sec, 5_000);
        assert!((p.progress - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_resets_after_completion() {
        let start = Instant::now();
        let mut calc = SpeedCalculator::new();

        let p = calc.on_progress_at(start, 1, 1, 100, 100).unwrap();
        assert!(p.is_complete());
        assert!(calc.on_progress_at(start, 1, 1, 100, 100).is_none());

        // A new run starts from zero.
        let p = calc.on_progress_at(start, 1, 0, 50, 20).unwrap();
        assert_eq!(p.speed_bytes_per_sec, 20);
    }

    #[test]
    fn test_count_tick_after_full_bytes_is_published() {
        let start = Instant::now();
        let mut calc = SpeedCalculator::new();

        calc.on_progress_at(start, 2, 1, 10, 4).unwrap();
        let p = calc.on_progress_at(start, 2, 1, 10, 10).unwrap();
        assert_eq!(p.current_count, 1);

        let p = calc.on_progress_at(start, 2, 2, 10, 10).unwrap();
        assert_eq!(p.current_count, 2);
        assert!(calc.on_progress_at(start, 2, 2, 10, 10).is_none());
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(DownloadProgress::new(0, 0, 0, 0, 0).progress, 0.0);
        assert_eq!(DownloadProgress::new(4, 4, 200, 200, 0).progress, 1.0);
    }
}
