// src/math/delta.rs
//! "B3 math": turns figures reported cumulatively since the start of the
//! fiscal year into per-quarter figures.
//!
//! Which rule applies depends on the account family (first character of the
//! account code):
//!
//! * last-quarter families (income statement flows): only December is
//!   cumulative, so December becomes `Dec - (Sep + Jun + Mar)`.
//! * all-quarters families (cash flow, value added): every quarter end is
//!   cumulative, so each quarter becomes its figure minus the adjusted figures
//!   of the earlier quarters (`Jun - Mar`, `Sep - (Jun' + Mar)`, ...), which is
//!   the same as subtracting the previous quarter's cumulative figure.
//!
//! Every adjustment of a year group is computed from one snapshot of the
//! quarterly maxima before anything is written back.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::FamilySettings;
use crate::model::{AccountingRecord, Quarter, YearGroupKey};
use crate::utils::error::MathError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaRule {
    LastQuarter,
    AllQuarters,
    PassThrough,
}

/// What happened to one year group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    Adjusted,
    PassedThrough,
    /// Values were left exactly as observed.
    Failed(MathError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub adjusted: usize,
    pub passed_through: usize,
    pub failed: Vec<(YearGroupKey, MathError)>,
}

impl NormalizeReport {
    pub fn record(&mut self, key: &YearGroupKey, outcome: GroupOutcome) {
        match outcome {
            GroupOutcome::Adjusted => self.adjusted += 1,
            GroupOutcome::PassedThrough => self.passed_through += 1,
            GroupOutcome::Failed(err) => {
                tracing::warn!("B3 math skipped for {}: {}", key, err);
                self.failed.push((key.clone(), err));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeltaNormalizer {
    last_quarter: BTreeSet<char>,
    all_quarters: BTreeSet<char>,
}

type QuarterValues = [Option<Decimal>; 4];

impl DeltaNormalizer {
    pub fn new(families: &FamilySettings) -> Self {
        Self {
            last_quarter: families.last_quarter.iter().copied().collect(),
            all_quarters: families.all_quarters.iter().copied().collect(),
        }
    }

    pub fn rule_for(&self, account_code: &str) -> DeltaRule {
        match account_code.trim().chars().next() {
            Some(f) if self.last_quarter.contains(&f) => DeltaRule::LastQuarter,
            Some(f) if self.all_quarters.contains(&f) => DeltaRule::AllQuarters,
            _ => DeltaRule::PassThrough,
        }
    }

    /// Normalizes one year group in place. Rows are never added or removed;
    /// on failure the values are left untouched.
    pub fn normalize_group(&self, rows: &mut [AccountingRecord]) -> GroupOutcome {
        let Some(first) = rows.first() else {
            return GroupOutcome::PassedThrough;
        };
        let key = first.year_group();
        if rows.iter().any(|r| r.year_group() != key) {
            return GroupOutcome::Failed(MathError::MixedGroup(key.to_string()));
        }

        let rule = self.rule_for(&key.account_code);
        if rule == DeltaRule::PassThrough {
            return GroupOutcome::PassedThrough;
        }

        let adjusted = match quarter_snapshot(rows).and_then(|snap| adjust(rule, &snap, &key.account_code)) {
            Ok(values) => values,
            Err(err) => return GroupOutcome::Failed(err),
        };

        for row in rows.iter_mut() {
            if let Some(value) = row.quarter().and_then(|q| adjusted[q.index()]) {
                row.value = Some(value);
            }
        }
        GroupOutcome::Adjusted
    }

    /// Splits `rows` into year groups and normalizes each one. The output
    /// holds the same rows, ordered by year group.
    pub fn normalize(&self, rows: Vec<AccountingRecord>) -> (Vec<AccountingRecord>, NormalizeReport) {
        let mut groups: BTreeMap<YearGroupKey, Vec<AccountingRecord>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.year_group()).or_default().push(row);
        }

        let mut report = NormalizeReport::default();
        let mut out = Vec::new();
        for (key, mut group) in groups {
            let outcome = self.normalize_group(&mut group);
            report.record(&key, outcome);
            out.extend(group);
        }
        (out, report)
    }
}

/// Largest value per quarter; `None` where the quarter has no row.
fn quarter_snapshot(rows: &[AccountingRecord]) -> Result<QuarterValues, MathError> {
    let mut maxima: QuarterValues = [None; 4];
    let mut non_numeric: [Option<NaiveDate>; 4] = [None; 4];

    for row in rows {
        let Some(quarter) = row.quarter() else {
            continue;
        };
        let slot = quarter.index();
        match row.value {
            Some(v) => maxima[slot] = Some(maxima[slot].map_or(v, |m| m.max(v))),
            None => non_numeric[slot] = Some(row.quarter_end_date),
        }
    }

    for quarter in Quarter::ALL {
        let slot = quarter.index();
        if let (None, Some(date)) = (maxima[slot], non_numeric[slot]) {
            let account = rows.first().map(|r| r.account_code.clone()).unwrap_or_default();
            return Err(MathError::NonNumeric { account, quarter: date });
        }
    }
    Ok(maxima)
}

/// New values per quarter; `None` means "leave as is" (absent or unchanged).
fn adjust(rule: DeltaRule, snapshot: &QuarterValues, account: &str) -> Result<QuarterValues, MathError> {
    let original = |slot: usize| snapshot[slot].unwrap_or(Decimal::ZERO);
    let overflow = || MathError::Overflow(account.to_string());
    let mut out: QuarterValues = [None; 4];

    match rule {
        DeltaRule::LastQuarter => {
            if snapshot[3].is_some() {
                let earlier = original(0)
                    .checked_add(original(1))
                    .and_then(|sum| sum.checked_add(original(2)))
                    .ok_or_else(overflow)?;
                out[3] = Some(original(3).checked_sub(earlier).ok_or_else(overflow)?);
            }
        }
        DeltaRule::AllQuarters => {
            // Running sum of adjusted values, absent quarters included as
            // computed (not written) values.
            let mut earlier = Decimal::ZERO;
            for slot in 0..4 {
                let value = original(slot).checked_sub(earlier).ok_or_else(overflow)?;
                earlier = earlier.checked_add(value).ok_or_else(overflow)?;
                if snapshot[slot].is_some() {
                    out[slot] = Some(value);
                }
            }
        }
        DeltaRule::PassThrough => {}
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::fixtures::record;
    use rust_decimal_macros::dec;

    fn normalizer() -> DeltaNormalizer {
        DeltaNormalizer::new(&FamilySettings::default())
    }

    fn year(account: &str, values: [Option<i64>; 4]) -> Vec<AccountingRecord> {
        let dates = [(2016, 3, 31), (2016, 6, 30), (2016, 9, 30), (2016, 12, 31)];
        dates
            .iter()
            .zip(values)
            .filter_map(|(date, v)| v.map(|v| record("EMBRAER SA", account, *date, v, 1)))
            .collect()
    }

    fn values(rows: &[AccountingRecord]) -> Vec<Decimal> {
        rows.iter().map(|r| r.value.unwrap()).collect()
    }

    #[test]
    fn test_rule_selection() {
        let n = normalizer();
        assert_eq!(n.rule_for("3.01"), DeltaRule::LastQuarter);
        assert_eq!(n.rule_for("4.02"), DeltaRule::LastQuarter);
        assert_eq!(n.rule_for("6.01.01"), DeltaRule::AllQuarters);
        assert_eq!(n.rule_for("7.08"), DeltaRule::AllQuarters);
        assert_eq!(n.rule_for("1.01"), DeltaRule::PassThrough);
        assert_eq!(n.rule_for(""), DeltaRule::PassThrough);
    }

    #[test]
    fn test_last_quarter_family_only_changes_december() {
        let mut rows = year("3.01", [Some(10), Some(5), Some(8), Some(30)]);
        let outcome = normalizer().normalize_group(&mut rows);
        assert_eq!(outcome, GroupOutcome::Adjusted);
        assert_eq!(values(&rows), vec![dec!(10), dec!(5), dec!(8), dec!(7)]);
    }

    #[test]
    fn test_all_quarters_family_uses_original_snapshot() {
        let mut rows = year("6.01", [Some(10), Some(18), Some(25), Some(40)]);
        let outcome = normalizer().normalize_group(&mut rows);
        assert_eq!(outcome, GroupOutcome::Adjusted);
        assert_eq!(values(&rows), vec![dec!(10), dec!(8), dec!(7), dec!(15)]);
        // Incremental figures add back up to the cumulative December figure.
        assert_eq!(values(&rows).iter().sum::<Decimal>(), dec!(40));
    }

    #[test]
    fn test_all_quarters_with_missing_quarter() {
        // June absent counts as a cumulative 0, so September stands on its own.
        let mut rows = year("7.01", [Some(10), None, Some(25), Some(40)]);
        normalizer().normalize_group(&mut rows);
        assert_eq!(rows.len(), 3);
        assert_eq!(values(&rows), vec![dec!(10), dec!(25), dec!(15)]);
    }

    #[test]
    fn test_only_december_present_is_unchanged() {
        let mut rows = year("3.01", [None, None, None, Some(30)]);
        normalizer().normalize_group(&mut rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(values(&rows), vec![dec!(30)]);
    }

    #[test]
    fn test_pass_through_is_idempotent() {
        let original = year("1.01", [Some(10), Some(18), Some(25), Some(40)]);
        let n = normalizer();
        let (once, report) = n.normalize(original.clone());
        let (twice, _) = n.normalize(once.clone());
        assert_eq!(report.passed_through, 1);
        assert_eq!(once, original);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_duplicate_quarter_uses_maximum() {
        let mut rows = year("3.01", [Some(10), Some(5), Some(8), Some(30)]);
        rows.push(record("EMBRAER SA", "3.01", (2016, 3, 31), 4, 1));
        normalizer().normalize_group(&mut rows);
        // December uses March = max(10, 4); March rows themselves are untouched.
        assert_eq!(rows[3].value, Some(dec!(7)));
        assert_eq!(rows[4].value, Some(dec!(4)));
    }

    #[test]
    fn test_non_numeric_value_leaves_group_unchanged() {
        let mut rows = year("6.01", [Some(10), Some(18), Some(25), Some(40)]);
        rows[1].value = None;
        let before = rows.clone();
        let outcome = normalizer().normalize_group(&mut rows);
        assert!(matches!(outcome, GroupOutcome::Failed(MathError::NonNumeric { .. })));
        assert_eq!(rows, before);
    }

    #[test]
    fn test_overflow_is_reported_not_raised() {
        let mut rows = year("6.01", [Some(0), Some(0), Some(0), Some(0)]);
        rows[0].value = Some(Decimal::MIN);
        rows[1].value = Some(Decimal::MAX);
        let before = rows.clone();
        let outcome = normalizer().normalize_group(&mut rows);
        assert!(matches!(outcome, GroupOutcome::Failed(MathError::Overflow(_))));
        assert_eq!(rows, before);
    }

    #[test]
    fn test_mixed_groups_are_rejected() {
        let mut rows = year("3.01", [Some(10), None, None, Some(30)]);
        rows.push(record("EMBRAER SA", "3.01", (2017, 12, 31), 50, 1));
        let outcome = normalizer().normalize_group(&mut rows);
        assert!(matches!(outcome, GroupOutcome::Failed(MathError::MixedGroup(_))));
    }

    #[test]
    fn test_normalize_splits_groups_and_reports() {
        let mut rows = year("3.01", [Some(10), Some(5), Some(8), Some(30)]);
        rows.extend(year("6.01", [Some(10), Some(18), Some(25), Some(40)]));
        let mut broken = year("7.01", [Some(1), None, None, None]);
        broken[0].value = None;
        rows.extend(broken);

        let (out, report) = normalizer().normalize(rows);
        assert_eq!(out.len(), 9);
        assert_eq!(report.adjusted, 2);
        assert_eq!(report.failed.len(), 1);
        let december_3 = out
            .iter()
            .find(|r| r.account_code == "3.01" && r.quarter() == Some(Quarter::Q4))
            .unwrap();
        assert_eq!(december_3.value, Some(dec!(7)));
    }
}
