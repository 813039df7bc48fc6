// src/math/reconcile.rs
//! Decides which freshly scraped rows replace what is on file.
//!
//! `existing` always holds *as-reported* rows: the year groups touched by an
//! accepted candidate are rebuilt from them and re-normalized, since one
//! changed quarter changes the deltas of the whole year.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;

use crate::math::delta::{DeltaNormalizer, NormalizeReport};
use crate::model::{AccountingRecord, RecordKey, YearGroupKey};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// As-reported rows to upsert: new rows, or on-file rows carrying the
    /// newer filing's value and version.
    pub accepted: Vec<AccountingRecord>,
    /// Every row of every touched year group, normalized.
    pub normalized: Vec<AccountingRecord>,
    /// Candidates that did not beat the version on file (or lost to a
    /// sibling candidate for the same key).
    pub dropped: usize,
    pub report: NormalizeReport,
}

pub struct VersionReconciler<'a> {
    normalizer: &'a DeltaNormalizer,
}

impl<'a> VersionReconciler<'a> {
    pub fn new(normalizer: &'a DeltaNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn reconcile(&self, existing: &[AccountingRecord], candidates: Vec<AccountingRecord>) -> Reconciliation {
        let candidate_count = candidates.len();
        let on_file = latest_by_key(existing.iter().cloned());
        let incoming = latest_by_key(candidates);
        let mut dropped = candidate_count - incoming.len();

        let mut accepted: BTreeMap<RecordKey, AccountingRecord> = BTreeMap::new();
        for (key, candidate) in incoming {
            match on_file.get(&key) {
                None => {
                    accepted.insert(key, candidate);
                }
                Some(current) if candidate.disclosure_version > current.disclosure_version => {
                    let merged = merge(current, candidate);
                    accepted.insert(key, merged);
                }
                Some(current) => {
                    tracing::trace!(
                        "Dropping {:?}: version {} does not beat {}",
                        key,
                        candidate.disclosure_version,
                        current.disclosure_version
                    );
                    dropped += 1;
                }
            }
        }

        let touched: BTreeSet<YearGroupKey> = accepted.keys().map(RecordKey::year_group).collect();
        let mut groups: BTreeMap<YearGroupKey, BTreeMap<RecordKey, AccountingRecord>> = BTreeMap::new();
        for (key, row) in &on_file {
            let group = key.year_group();
            if touched.contains(&group) {
                groups.entry(group).or_default().insert(key.clone(), row.clone());
            }
        }
        for (key, row) in &accepted {
            groups.entry(key.year_group()).or_default().insert(key.clone(), row.clone());
        }

        let mut report = NormalizeReport::default();
        let mut normalized = Vec::new();
        for (group, rows) in groups {
            let mut rows: Vec<AccountingRecord> = rows.into_values().collect();
            let outcome = self.normalizer.normalize_group(&mut rows);
            report.record(&group, outcome);
            normalized.extend(rows);
        }

        tracing::debug!(
            "Reconciled {} candidates: {} accepted, {} dropped, {} year groups rebuilt",
            candidate_count,
            accepted.len(),
            dropped,
            touched.len()
        );

        Reconciliation {
            accepted: accepted.into_values().collect(),
            normalized,
            dropped,
            report,
        }
    }
}

/// Year groups whose as-reported rows are missing from the normalized store,
/// or stored there under an older version.
pub fn stale_year_groups(as_reported: &[AccountingRecord], normalized: &[AccountingRecord]) -> BTreeSet<YearGroupKey> {
    let normalized_versions: BTreeMap<RecordKey, u32> = latest_by_key(normalized.iter().cloned())
        .into_iter()
        .map(|(key, row)| (key, row.disclosure_version))
        .collect();

    as_reported
        .iter()
        .filter(|row| {
            normalized_versions
                .get(&row.key())
                .map_or(true, |version| row.disclosure_version > *version)
        })
        .map(AccountingRecord::year_group)
        .collect()
}

/// One row per natural key: the highest version wins, then the later
/// filing, then the larger value. Independent of input order.
fn latest_by_key(rows: impl IntoIterator<Item = AccountingRecord>) -> BTreeMap<RecordKey, AccountingRecord> {
    let mut latest: BTreeMap<RecordKey, AccountingRecord> = BTreeMap::new();
    for row in rows {
        let key = row.key();
        match latest.get(&key) {
            Some(current) if precedence(current) >= precedence(&row) => {}
            _ => {
                latest.insert(key, row);
            }
        }
    }
    latest
}

fn precedence(row: &AccountingRecord) -> (u32, u64, Option<Decimal>) {
    (row.disclosure_version, row.statement_id, row.value)
}

/// Newer filing over an on-file row: value, version and statement id follow
/// the filing; descriptive columns only when the filing has them.
fn merge(current: &AccountingRecord, newer: AccountingRecord) -> AccountingRecord {
    let mut merged = current.clone();
    merged.value = newer.value;
    merged.disclosure_version = newer.disclosure_version;
    merged.statement_id = newer.statement_id;

    let overrides = [
        (&mut merged.account_description, newer.account_description),
        (&mut merged.sector, newer.sector),
        (&mut merged.subsector, newer.subsector),
        (&mut merged.segment, newer.segment),
    ];
    for (field, supplied) in overrides {
        if !supplied.trim().is_empty() {
            *field = supplied;
        }
    }
    merged
}
