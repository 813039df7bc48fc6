// src/discovery/nsd.rs
//! Which NSD ids to try next: ids likely published since the last known
//! filing (extrapolated from the historical publication rate), then the holes
//! left in the known id range.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Nothing is known yet, so nothing can be extrapolated.
    NoHistory,
    Extrapolated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    /// Candidate ids past the last known one, ascending.
    pub forward: Vec<u64>,
    /// Missing ids in `[1, last_id]`, ascending.
    pub gaps: Vec<u64>,
    pub outcome: DiscoveryOutcome,
}

impl Discovery {
    fn empty() -> Self {
        Self {
            forward: Vec::new(),
            gaps: Vec::new(),
            outcome: DiscoveryOutcome::NoHistory,
        }
    }

    /// Fetch order: forward ids first, then gaps.
    pub fn candidates(&self) -> Vec<u64> {
        self.forward.iter().chain(self.gaps.iter()).copied().collect()
    }
}

const SECONDS_PER_DAY: f64 = 86_400.0;

fn days_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / SECONDS_PER_DAY
}

/// Computes forward candidates and gaps from the known `(id, sent_date)`
/// pairs. Ids without a date still count for the gaps and the last id.
/// At most `max_forward` ids past the last one are proposed.
pub fn discover(history: &[(u64, Option<NaiveDateTime>)], now: NaiveDateTime, max_forward: u64) -> Discovery {
    let known: BTreeSet<u64> = history.iter().map(|(nsd, _)| *nsd).filter(|nsd| *nsd > 0).collect();
    let Some(&last_id) = known.iter().next_back() else {
        tracing::info!("No NSD history yet, nothing to discover");
        return Discovery::empty();
    };

    let dates = history.iter().filter_map(|(_, sent)| *sent);
    let earliest = dates.clone().min();
    let latest = dates.max();

    let forward_count = match (earliest, latest) {
        (Some(earliest), Some(latest)) => {
            let span = days_between(earliest, latest);
            let rate = if span > 0.0 { last_id as f64 / span } else { 0.0 };
            let elapsed = days_between(latest, now).max(0.0);
            let count = (rate * elapsed).floor();
            tracing::debug!(
                "NSD rate {:.2}/day over {:.1} days, {:.1} days since the last filing",
                rate,
                span,
                elapsed
            );
            if count.is_finite() && count > 0.0 {
                count as u64
            } else {
                0
            }
        }
        _ => 0,
    };

    let forward_count = if forward_count > max_forward {
        tracing::warn!(
            "NSD forward window of {} ids capped at {}",
            forward_count,
            max_forward
        );
        max_forward
    } else {
        forward_count
    };

    let forward = if forward_count == 0 {
        Vec::new()
    } else {
        (last_id..=last_id.saturating_add(forward_count)).collect()
    };
    let gaps: Vec<u64> = (1..=last_id).filter(|nsd| !known.contains(nsd)).collect();

    tracing::info!(
        "NSD discovery: last id {}, {} forward candidates, {} gaps",
        last_id,
        forward.len(),
        gaps.len()
    );

    Discovery {
        forward,
        gaps,
        outcome: DiscoveryOutcome::Extrapolated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const WINDOW: u64 = 20_000;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_gaps_are_missing_ids() {
        let history: Vec<_> = [1, 2, 4, 6].into_iter().map(|n| (n, Some(day(2020, 1, 1)))).collect();
        let result = discover(&history, day(2020, 1, 10), WINDOW);
        assert_eq!(result.gaps, vec![3, 5]);
        assert_eq!(result.outcome, DiscoveryOutcome::Extrapolated);
    }

    #[test]
    fn test_zero_span_gives_no_forward_candidates() {
        let history = vec![(1, Some(day(2020, 1, 1))), (3, Some(day(2020, 1, 1)))];
        let result = discover(&history, day(2021, 1, 1), WINDOW);
        assert!(result.forward.is_empty());
        assert_eq!(result.gaps, vec![2]);
    }

    #[test]
    fn test_forward_extrapolates_rate() {
        // 100 ids over 10 days is 10 a day; 2 days later expect 20 more.
        let history = vec![(1, Some(day(2020, 1, 1))), (100, Some(day(2020, 1, 11)))];
        let result = discover(&history, day(2020, 1, 13), WINDOW);
        assert_eq!(result.forward.first(), Some(&100));
        assert_eq!(result.forward.last(), Some(&120));
        assert_eq!(result.forward.len(), 21);
        assert_eq!(result.candidates()[..21], result.forward[..]);
        assert_eq!(result.candidates().len(), 21 + 98);
    }

    #[test]
    fn test_no_history_is_empty_not_an_error() {
        let result = discover(&[], day(2020, 1, 1), WINDOW);
        assert!(result.forward.is_empty());
        assert!(result.gaps.is_empty());
        assert_eq!(result.outcome, DiscoveryOutcome::NoHistory);
    }

    #[test]
    fn test_one_second_span_is_capped() {
        let noon = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let history = vec![
            (120_000, Some(noon)),
            (120_001, Some(noon + chrono::Duration::seconds(1))),
        ];
        let result = discover(&history, day(2024, 6, 1), 500);
        assert_eq!(result.forward.len(), 501);
        assert_eq!(result.forward.first(), Some(&120_001));
        assert_eq!(result.forward.last(), Some(&120_501));
        assert_eq!(result.outcome, DiscoveryOutcome::Extrapolated);
    }

    #[test]
    fn test_missing_dates_still_yield_gaps() {
        let result = discover(&[(2, None), (5, None)], day(2020, 1, 1), WINDOW);
        assert!(result.forward.is_empty());
        assert_eq!(result.gaps, vec![1, 3, 4]);
    }
}
