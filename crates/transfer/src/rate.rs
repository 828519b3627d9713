use std::time::Duration;

use tokio::time::Instant;

/// Minimum window before a rate is considered meaningful.
const MIN_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// What the uploader should do before sending the next chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Send immediately.
    Proceed,
    /// Cool down for the given duration first.
    Wait(Duration),
}

/// Feedback throttle for a single transfer.
///
/// Bytes accumulate over a window that starts at [`reset`](Self::reset).
/// Once the window spans at least one second, the achieved rate is compared
/// against the ceiling and any overshoot turns into a proportional delay:
/// `((rate - ceiling) / ceiling) * 1000` milliseconds. Shorter windows never
/// throttle, so sub-second bursts pass through.
///
/// A ceiling of `0` means unlimited.
#[derive(Debug, Clone)]
pub struct RateMeasurer {
    ceiling: u64,
    window_start: Instant,
    last_sample: Instant,
    accumulated: u64,
    ended_at: Option<Instant>,
}

impl RateMeasurer {
    /// Creates a measurer with the given ceiling in bytes/second.
    pub fn new(ceiling: u64) -> Self {
        let now = Instant::now();
        Self {
            ceiling,
            window_start: now,
            last_sample: now,
            accumulated: 0,
            ended_at: None,
        }
    }

    /// Ceiling in bytes/second (0 = unlimited).
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn set_ceiling(&mut self, ceiling: u64) {
        self.ceiling = ceiling;
    }

    /// Starts a new window now.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Starts a new window at `start`.
    pub fn reset_at(&mut self, start: Instant) {
        self.window_start = start;
        self.last_sample = start;
        self.accumulated = 0;
        self.ended_at = None;
    }

    /// Folds in a chunk and returns the throttle decision.
    pub fn tick(&mut self, bytes: u64) -> Throttle {
        self.tick_at(bytes, Instant::now())
    }

    /// Like [`tick`](Self::tick) with an explicit sample time.
    pub fn tick_at(&mut self, bytes: u64, now: Instant) -> Throttle {
        self.accumulated = self.accumulated.saturating_add(bytes);
        self.last_sample = now;

        if self.ceiling == 0 {
            return Throttle::Proceed;
        }
        let Some(rate) = self.raw_rate() else {
            return Throttle::Proceed;
        };
        let ceiling = self.ceiling as f64;
        if rate <= ceiling {
            return Throttle::Proceed;
        }
        let delay_ms = ((rate - ceiling) / ceiling) * 1000.0;
        Throttle::Wait(Duration::from_millis(delay_ms.round() as u64))
    }

    /// Folds in the last chunk and freezes the end time.
    pub fn finish(&mut self, bytes: u64) {
        self.finish_at(bytes, Instant::now());
    }

    /// Like [`finish`](Self::finish) with an explicit end time.
    pub fn finish_at(&mut self, bytes: u64, now: Instant) {
        if self.ended_at.is_some() {
            return;
        }
        self.accumulated = self.accumulated.saturating_add(bytes);
        self.last_sample = now;
        self.ended_at = Some(now);
    }

    /// Rolling rate in bytes/second, `None` until the window spans one second.
    pub fn achieved_rate(&self) -> Option<u64> {
        self.raw_rate().map(|r| r.round() as u64)
    }

    /// Mean rate over the whole transfer, available after [`finish`](Self::finish).
    ///
    /// A transfer that finished within the same instant it started reports
    /// its byte count as the rate.
    pub fn average_rate(&self) -> Option<u64> {
        let end = self.ended_at?;
        let secs = end.saturating_duration_since(self.window_start).as_secs_f64();
        if secs <= 0.0 {
            return Some(self.accumulated);
        }
        Some((self.accumulated as f64 / secs).round() as u64)
    }

    /// Bytes counted in the current window.
    pub fn accumulated_bytes(&self) -> u64 {
        self.accumulated
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    fn raw_rate(&self) -> Option<f64> {
        let elapsed = self.last_sample.saturating_duration_since(self.window_start);
        if elapsed < MIN_SAMPLE_WINDOW {
            return None;
        }
        Some(self.accumulated as f64 / elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurer(ceiling: u64) -> (RateMeasurer, Instant) {
        let mut m = RateMeasurer::new(ceiling);
        let start = Instant::now();
        m.reset_at(start);
        (m, start)
    }

    #[test]
    fn overshoot_yields_proportional_delay() {
        let (mut m, start) = measurer(1000);
        let t = m.tick_at(2500, start + Duration::from_secs(1));
        assert_eq!(t, Throttle::Wait(Duration::from_millis(1500)));
        assert_eq!(m.achieved_rate(), Some(2500));
    }

    #[test]
    fn sub_second_window_never_throttles() {
        let (mut m, start) = measurer(1000);
        let t = m.tick_at(10_000_000, start + Duration::from_millis(999));
        assert_eq!(t, Throttle::Proceed);
        assert_eq!(m.achieved_rate(), None);
    }

    #[test]
    fn rate_under_ceiling_proceeds() {
        let (mut m, start) = measurer(1000);
        assert_eq!(m.tick_at(500, start + Duration::from_millis(400)), Throttle::Proceed);
        assert_eq!(m.tick_at(500, start + Duration::from_secs(2)), Throttle::Proceed);
        assert_eq!(m.achieved_rate(), Some(500));
    }

    #[test]
    fn rate_exactly_at_ceiling_proceeds() {
        let (mut m, start) = measurer(1000);
        assert_eq!(m.tick_at(2000, start + Duration::from_secs(2)), Throttle::Proceed);
    }

    #[test]
    fn zero_ceiling_is_unlimited() {
        let (mut m, start) = measurer(0);
        let t = m.tick_at(u64::MAX / 2, start + Duration::from_secs(5));
        assert_eq!(t, Throttle::Proceed);
        // The rate is still measured.
        assert!(m.achieved_rate().is_some());
    }

    #[test]
    fn accumulation_spans_ticks() {
        let (mut m, start) = measurer(1000);
        m.tick_at(1000, start + Duration::from_millis(500));
        let t = m.tick_at(2000, start + Duration::from_secs(2));
        // 3000 bytes over 2 s = 1500 B/s, 50% over.
        assert_eq!(t, Throttle::Wait(Duration::from_millis(500)));
        assert_eq!(m.accumulated_bytes(), 3000);
    }

    #[test]
    fn reset_clears_window() {
        let (mut m, start) = measurer(1000);
        m.tick_at(5000, start + Duration::from_secs(1));
        let later = start + Duration::from_secs(10);
        m.reset_at(later);
        assert_eq!(m.accumulated_bytes(), 0);
        assert_eq!(m.achieved_rate(), None);
        assert_eq!(m.tick_at(500, later + Duration::from_secs(1)), Throttle::Proceed);
    }

    #[test]
    fn average_rate_only_after_finish() {
        let (mut m, start) = measurer(0);
        m.tick_at(1000, start + Duration::from_secs(1));
        assert_eq!(m.average_rate(), None);

        m.finish_at(3000, start + Duration::from_secs(4));
        assert!(m.is_finished());
        assert_eq!(m.average_rate(), Some(1000));

        // Frozen: a second finish changes nothing.
        m.finish_at(9999, start + Duration::from_secs(8));
        assert_eq!(m.average_rate(), Some(1000));
    }

    #[test]
    fn average_rate_for_instant_transfer() {
        let (mut m, start) = measurer(0);
        m.finish_at(42, start);
        assert_eq!(m.average_rate(), Some(42));
    }

    #[test]
    fn average_rate_rounds() {
        let (mut m, start) = measurer(0);
        m.finish_at(1000, start + Duration::from_secs(3));
        assert_eq!(m.average_rate(), Some(333));
    }
}
