use crate::ports::{StatusHandle, StatusSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counters shared by the page workers of one channel scan.
#[derive(Debug, Default)]
pub struct ScanCounters {
    processed: AtomicU64,
    stored: AtomicU64,
}

impl ScanCounters {
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }
}

pub fn progress_line(channel_id: u64, processed: u64) -> String {
    format!("<#{}>: Processed {} messages.", channel_id, processed)
}

/// Smallest multiple of `increment` strictly above `processed`, never below
/// `current`.
pub fn next_threshold(current: u64, processed: u64, increment: u64) -> u64 {
    let increment = increment.max(1);
    if processed < current {
        return current;
    }
    (processed / increment + 1) * increment
}

/// Polls a scan's counters and edits one status message as they advance.
pub struct ProgressReporter {
    pub status: Arc<dyn StatusSink>,
    pub handle: StatusHandle,
    pub channel_id: u64,
    pub counters: Arc<ScanCounters>,
    pub increment: u64,
    pub poll_interval: Duration,
}

impl ProgressReporter {
    pub async fn run(self, stop: CancellationToken) {
        let mut next = self.increment.max(1);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let processed = self.counters.processed();
            if processed < next {
                continue;
            }

            let line = progress_line(self.channel_id, processed);
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                result = self.status.edit(self.handle, &line) => {
                    if let Err(e) = result {
                        warn!("Failed to update progress for channel {}: {}", self.channel_id, e);
                    }
                }
            }
            next = next_threshold(next, processed, self.increment);
        }
        debug!("Progress reporter for channel {} stopped", self.channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStatus;

    #[test]
    fn test_next_threshold() {
        assert_eq!(next_threshold(10, 3, 10), 10);
        assert_eq!(next_threshold(10, 10, 10), 20);
        assert_eq!(next_threshold(10, 37, 10), 40);
        assert_eq!(next_threshold(5, 5, 0), 6);
    }

    #[tokio::test]
    async fn test_reporter_throttles_edits() {
        let status = Arc::new(RecordingStatus::default());
        let counters = Arc::new(ScanCounters::default());
        for _ in 0..25 {
            counters.record_processed();
        }

        let stop = CancellationToken::new();
        let reporter = ProgressReporter {
            status: status.clone(),
            handle: 3,
            channel_id: 9,
            counters: counters.clone(),
            increment: 10,
            poll_interval: Duration::from_millis(1),
        };
        let task = tokio::spawn(reporter.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.cancel();
        task.await.unwrap();

        // The counter never moved past 25, so only one edit was warranted.
        assert_eq!(status.edits(), vec![(3, progress_line(9, 25))]);
    }

    #[tokio::test]
    async fn test_reporter_stays_quiet_below_increment() {
        let status = Arc::new(RecordingStatus::default());
        let counters = Arc::new(ScanCounters::default());
        counters.record_processed();

        let stop = CancellationToken::new();
        let task = tokio::spawn(
            ProgressReporter {
                status: status.clone(),
                handle: 0,
                channel_id: 9,
                counters,
                increment: 10,
                poll_interval: Duration::from_millis(1),
            }
            .run(stop.clone()),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.cancel();
        task.await.unwrap();
        assert!(status.edits().is_empty());
    }
}
