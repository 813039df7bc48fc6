// src/utils/progress.rs
use std::time::{Duration, Instant};

/// Running progress of a fixed-size job, logged one line per step.
#[derive(Debug)]
pub struct Progress {
    label: String,
    total: usize,
    started: Instant,
}

/// Figures behind one progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub done: usize,
    pub remaining: usize,
    pub fraction: f64,
    pub secs_per_item: f64,
    pub eta: Duration,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Self {
            label: label.into(),
            total,
            started: Instant::now(),
        }
    }

    /// Computes the snapshot after `done` items given `elapsed` time.
    pub fn snapshot(&self, done: usize, elapsed: Duration) -> ProgressSnapshot {
        let done = done.min(self.total);
        let remaining = self.total - done;
        if done == 0 {
            return ProgressSnapshot {
                done,
                remaining,
                fraction: 0.0,
                secs_per_item: 0.0,
                eta: Duration::ZERO,
            };
        }
        let secs_per_item = elapsed.as_secs_f64() / done as f64;
        ProgressSnapshot {
            done,
            remaining,
            fraction: done as f64 / self.total as f64,
            secs_per_item,
            eta: Duration::from_secs_f64(secs_per_item * remaining as f64),
        }
    }

    /// Logs progress after `done` items, with free-form trailing details.
    pub fn report(&self, done: usize, extra: &[String]) {
        let snap = self.snapshot(done, self.started.elapsed());
        tracing::info!(
            "[{}] {:.2}% {}+{}, {:.6}s per item, Remaining: {} {}",
            self.label,
            snap.fraction * 100.0,
            snap.done,
            snap.remaining,
            snap.secs_per_item,
            format_eta(snap.eta),
            extra.join(" ")
        );
    }
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (hours, rest) = (secs / 3600, secs % 3600);
    format!("{}h {:02}m {:02}s", hours, rest / 60, rest % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_math() {
        let progress = Progress::new("test", 10);
        let snap = progress.snapshot(4, Duration::from_secs(8));
        assert_eq!(snap.done, 4);
        assert_eq!(snap.remaining, 6);
        assert!((snap.fraction - 0.4).abs() < 1e-9);
        assert!((snap.secs_per_item - 2.0).abs() < 1e-9);
        assert_eq!(snap.eta, Duration::from_secs(12));
    }

    #[test]
    fn test_snapshot_before_first_item() {
        let progress = Progress::new("test", 3);
        let snap = progress.snapshot(0, Duration::from_secs(5));
        assert_eq!(snap.remaining, 3);
        assert_eq!(snap.eta, Duration::ZERO);
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
