use std::time::{Duration, Instant};

/// Decides when the next frame may start.
///
/// A frame is accepted once at least `interval` has passed since the last
/// accepted one. A zero interval accepts every poll.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last: Option<Instant>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Pacer targeting `fps` frames per second; zero disables pacing.
    pub fn from_fps(fps: u32) -> Self {
        if fps == 0 {
            Self::new(Duration::ZERO)
        } else {
            Self::new(Duration::from_secs(1) / fps)
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        let due = match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    /// When the next frame becomes due, if one has been accepted before.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.last.map(|last| last + self.interval)
    }

    /// Busy-polls until a frame is accepted and returns its start time.
    pub fn wait(&mut self) -> Instant {
        loop {
            let now = Instant::now();
            if self.accept(now) {
                return now;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_is_always_accepted() {
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        assert!(pacer.accept(Instant::now()));
    }

    #[test]
    fn frames_inside_the_interval_are_rejected() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        assert!(pacer.accept(start));
        assert!(!pacer.accept(start + Duration::from_millis(5)));
        assert!(!pacer.accept(start + Duration::from_millis(15)));
        assert!(pacer.accept(start + Duration::from_millis(16)));
        assert_eq!(
            pacer.next_deadline(),
            Some(start + Duration::from_millis(32))
        );
    }

    #[test]
    fn zero_interval_accepts_every_poll() {
        let now = Instant::now();
        let mut pacer = FramePacer::from_fps(0);
        assert!(pacer.accept(now));
        assert!(pacer.accept(now));
    }

    #[test]
    fn wait_returns_once_the_interval_elapsed() {
        let mut pacer = FramePacer::new(Duration::from_millis(2));
        let first = pacer.wait();
        let second = pacer.wait();
        assert!(second.duration_since(first) >= Duration::from_millis(2));
    }
}
