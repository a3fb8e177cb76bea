//! Navigation responsiveness layer (§4.6). Single authority for the
//! quiescence timer: every navigation tick swaps the cheap pointer fields
//! inline, but callers route the "should I also run the expensive diff +
//! capture refresh" question through one [`Debouncer`] rather than keeping
//! a second copy of the timer logic inline (Open Question 1, resolved in
//! DESIGN.md).

use std::time::{Duration, Instant};

pub const QUIESCENCE_WINDOW: Duration = Duration::from_millis(150);

/// Tracks the most recent navigation event and reports whether enough quiet
/// time has passed to justify an expensive refresh.
pub struct Debouncer {
    last_nav_at: Option<Instant>,
    pending: bool,
    window: Duration,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::with_window(QUIESCENCE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            last_nav_at: None,
            pending: false,
            window,
        }
    }

    /// Record a navigation event. Always succeeds instantly (the "swap
    /// pointer" half of the split-update policy); marks an expensive
    /// refresh as pending.
    pub fn notify_navigation(&mut self) {
        self.last_nav_at = Some(Instant::now());
        self.pending = true;
    }

    /// Call on every event-loop tick. Returns `true` at most once per burst,
    /// exactly when the quiescence window has elapsed since the last
    /// navigation and a refresh is still pending.
    pub fn poll_due(&mut self) -> bool {
        let Some(last) = self.last_nav_at else {
            return false;
        };
        if self.pending && last.elapsed() >= self.window {
            self.pending = false;
            true
        } else {
            false
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn no_navigation_never_fires() {
        let mut d = Debouncer::new();
        assert!(!d.poll_due());
    }

    #[test]
    fn fires_once_after_quiescence_window() {
        let mut d = Debouncer::with_window(Duration::from_millis(20));
        d.notify_navigation();
        assert!(!d.poll_due());
        sleep(Duration::from_millis(30));
        assert!(d.poll_due());
        // Doesn't fire again without a further navigation event.
        assert!(!d.poll_due());
    }

    #[test]
    fn rapid_burst_yields_single_pending_refresh() {
        let mut d = Debouncer::with_window(Duration::from_millis(50));
        for _ in 0..50 {
            d.notify_navigation();
            assert!(!d.poll_due());
        }
        sleep(Duration::from_millis(60));
        assert!(d.poll_due());
        assert!(!d.poll_due());
    }
}
