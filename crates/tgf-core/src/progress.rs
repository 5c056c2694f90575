//! Download progress throttling.
//!
//! The SDK may report progress for every chunk. [`ProgressTracker`] decides which
//! of those reports are worth a status edit, and [`ProgressReporter`] publishes
//! them into a single-slot "latest value" cell drained by the request's own task.

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub received: u64,
    pub total: u64,
}

impl ProgressUpdate {
    pub fn status_line(&self) -> String {
        format!(
            "Downloading... {}% ({}/{})",
            self.percent, self.received, self.total
        )
    }
}

/// Per-request progress state. Never shared between requests.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    last_reported_percent: u8,
    step: u8,
}

impl ProgressTracker {
    pub fn new(step: u8) -> Self {
        Self {
            last_reported_percent: 0,
            step: step.clamp(1, 100),
        }
    }

    pub fn last_reported_percent(&self) -> u8 {
        self.last_reported_percent
    }

    /// Feed a raw `(received, total)` report; returns the update to publish, if any.
    ///
    /// Published percentages strictly increase, each at least `step` above the
    /// previous one, except that 100 is always published once reached.
    pub fn observe(&mut self, received: u64, total: Option<u64>) -> Option<ProgressUpdate> {
        let total = total.filter(|t| *t > 0)?;
        let percent = ((received.min(total) as u128 * 100) / total as u128) as u8;

        if percent <= self.last_reported_percent {
            return None;
        }
        let advanced = percent - self.last_reported_percent;
        if advanced < self.step && percent < 100 {
            return None;
        }

        self.last_reported_percent = percent;
        Some(ProgressUpdate {
            percent,
            received,
            total,
        })
    }
}

/// Progress sink handed to [`crate::source::MediaSource::download_media`].
///
/// Dropping the reporter closes the channel, which ends the drain loop.
#[derive(Debug)]
pub struct ProgressReporter {
    tracker: ProgressTracker,
    tx: watch::Sender<Option<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn channel(step: u8) -> (Self, watch::Receiver<Option<ProgressUpdate>>) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                tracker: ProgressTracker::new(step),
                tx,
            },
            rx,
        )
    }

    pub fn report(&mut self, received: u64, total: Option<u64>) {
        if let Some(update) = self.tracker.observe(received, total) {
            self.tx.send_replace(Some(update));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_on_step_boundaries_only() {
        let mut t = ProgressTracker::new(10);
        let total = Some(1000);
        assert_eq!(t.observe(50, total), None);
        assert_eq!(t.observe(100, total).map(|u| u.percent), Some(10));
        assert_eq!(t.observe(150, total), None);
        assert_eq!(t.observe(199, total), None);
        assert_eq!(t.observe(230, total).map(|u| u.percent), Some(23));
        assert_eq!(t.observe(1000, total).map(|u| u.percent), Some(100));
        assert_eq!(t.observe(1000, total), None);
    }

    #[test]
    fn unknown_total_reports_nothing() {
        let mut t = ProgressTracker::new(5);
        assert_eq!(t.observe(10, None), None);
        assert_eq!(t.observe(10, Some(0)), None);
        assert_eq!(t.last_reported_percent(), 0);
    }

    #[test]
    fn notified_sequence_is_increasing_without_repeats() {
        for step in [1u8, 5, 7, 10, 33] {
            let mut t = ProgressTracker::new(step);
            let total = 9_973u64;
            let mut seen = Vec::new();
            let mut received = 0u64;
            while received < total {
                received = (received + 17 + received / 50).min(total);
                if let Some(u) = t.observe(received, Some(total)) {
                    seen.push(u.percent);
                }
            }
            assert!(seen.windows(2).all(|w| w[0] < w[1]), "step {step}: {seen:?}");
            assert!(seen
                .windows(2)
                .all(|w| w[1] == 100 || w[1] - w[0] >= step));
            assert_eq!(seen.last(), Some(&100));
        }
    }

    #[test]
    fn huge_sizes_do_not_overflow() {
        let mut t = ProgressTracker::new(10);
        let total = u64::MAX;
        assert_eq!(t.observe(u64::MAX / 2, Some(total)).map(|u| u.percent), Some(49));
    }

    #[tokio::test]
    async fn reporter_keeps_latest_and_closes_on_drop() {
        let (mut reporter, mut rx) = ProgressReporter::channel(10);
        reporter.report(10, Some(100));
        reporter.report(20, Some(100));
        reporter.report(25, Some(100));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().map(|u| u.percent), Some(20));

        drop(reporter);
        assert!(rx.changed().await.is_err());
    }
}
