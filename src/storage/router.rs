// src/storage/router.rs
//! Routes a batch of records to per-sector stores.
//!
//! Every sector owns an as-reported store (what candidates are reconciled
//! against) and a normalized store (what the B3 math produced). Both are
//! backed up before they are touched. A failing sector is logged and the
//! remaining ones are still written.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::config::Settings;
use crate::math::{stale_year_groups, DeltaNormalizer, NormalizeReport, VersionReconciler};
use crate::model::{cmp_classification, AccountingRecord};
use crate::storage::sector::FinsheetStore;
use crate::storage::{backup_file, SectorPaths, StoreLayout};
use crate::utils::error::StorageError;

/// Outcome for one sector store.
#[derive(Debug, Default)]
pub struct SectorWrite {
    /// File label of the store (the sector, or the unclassified label).
    pub label: String,
    pub accepted: usize,
    pub normalized: usize,
    pub dropped: usize,
    pub math: NormalizeReport,
}

#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: Vec<SectorWrite>,
    pub failed: Vec<(String, StorageError)>,
}

impl PersistReport {
    pub fn accepted(&self) -> usize {
        self.written.iter().map(|w| w.accepted).sum()
    }

    pub fn dropped(&self) -> usize {
        self.written.iter().map(|w| w.dropped).sum()
    }

    pub fn normalized(&self) -> usize {
        self.written.iter().map(|w| w.normalized).sum()
    }

    pub fn merge(&mut self, other: PersistReport) {
        self.written.extend(other.written);
        self.failed.extend(other.failed);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows accepted, {} normalized, {} dropped, {} sector failures",
            self.accepted(),
            self.normalized(),
            self.dropped(),
            self.failed.len()
        )
    }
}

/// Splits `records` by sector. Sectors come out in listing order with the
/// empty sector last; every record lands in exactly one partition.
pub fn partition_by_sector(records: Vec<AccountingRecord>) -> Vec<(String, Vec<AccountingRecord>)> {
    let mut by_sector: HashMap<String, Vec<AccountingRecord>> = HashMap::new();
    for record in records {
        by_sector.entry(record.sector.clone()).or_default().push(record);
    }
    let mut partitions: Vec<(String, Vec<AccountingRecord>)> = by_sector.into_iter().collect();
    partitions.sort_by(|a, b| cmp_classification((a.0.as_str(), "", ""), (b.0.as_str(), "", "")));
    partitions
}

pub struct SectorRouter {
    layout: StoreLayout,
    normalizer: DeltaNormalizer,
}

impl SectorRouter {
    pub fn new(settings: &Settings) -> Result<Self, StorageError> {
        Ok(Self {
            layout: StoreLayout::new(settings)?,
            normalizer: DeltaNormalizer::new(&settings.families),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Reconciles `records` against what each sector has on file and writes
    /// the accepted and re-normalized rows.
    pub fn persist(&self, records: Vec<AccountingRecord>) -> PersistReport {
        let mut report = PersistReport::default();
        for (sector, rows) in partition_by_sector(records) {
            let paths = self.layout.sector_paths(&sector);
            match self.persist_sector(&paths, rows) {
                Ok(write) => {
                    tracing::info!(
                        "[{}] {} accepted, {} normalized, {} dropped, {} year groups left as reported",
                        write.label,
                        write.accepted,
                        write.normalized,
                        write.dropped,
                        write.math.failed.len()
                    );
                    report.written.push(write);
                }
                Err(e) => {
                    tracing::error!("[{}] write failed, backup kept: {}", paths.label, e);
                    report.failed.push((paths.label, e));
                }
            }
        }
        report
    }

    fn persist_sector(&self, paths: &SectorPaths, rows: Vec<AccountingRecord>) -> Result<SectorWrite, StorageError> {
        backup_file(&paths.raw, &paths.raw_backup)?;
        backup_file(&paths.math, &paths.math_backup)?;

        let mut raw = FinsheetStore::open(&paths.raw)?;
        let mut math = FinsheetStore::open(&paths.math)?;

        let companies: BTreeSet<String> = rows.iter().map(|r| r.company_name.clone()).collect();
        let existing = raw.load_companies(&companies)?;
        let reconciliation = VersionReconciler::new(&self.normalizer).reconcile(&existing, rows);

        let accepted = raw.upsert(&reconciliation.accepted)?;
        let normalized = math.upsert(&reconciliation.normalized)?;

        Ok(SectorWrite {
            label: paths.label.clone(),
            accepted,
            normalized,
            dropped: reconciliation.dropped,
            math: reconciliation.report,
        })
    }

    /// Re-normalizes every year group whose normalized rows are missing or
    /// older than the as-reported ones.
    pub fn recalculate(&self) -> Result<PersistReport, StorageError> {
        let mut report = PersistReport::default();
        for paths in self.layout.sector_stores()? {
            match self.recalculate_sector(&paths) {
                Ok(write) => {
                    tracing::info!("[{}] {} rows recalculated", write.label, write.normalized);
                    report.written.push(write);
                }
                Err(e) => {
                    tracing::error!("[{}] recalculation failed: {}", paths.label, e);
                    report.failed.push((paths.label, e));
                }
            }
        }
        Ok(report)
    }

    fn recalculate_sector(&self, paths: &SectorPaths) -> Result<SectorWrite, StorageError> {
        let raw = FinsheetStore::open(&paths.raw)?;
        let as_reported = raw.load_all()?;
        let stale = {
            let math = FinsheetStore::open(&paths.math)?;
            stale_year_groups(&as_reported, &math.load_all()?)
        };

        let mut write = SectorWrite {
            label: paths.label.clone(),
            ..SectorWrite::default()
        };
        if stale.is_empty() {
            return Ok(write);
        }

        let rows: Vec<AccountingRecord> = as_reported
            .into_iter()
            .filter(|r| stale.contains(&r.year_group()))
            .collect();
        let (normalized, math_report) = self.normalizer.normalize(rows);

        backup_file(&paths.math, &paths.math_backup)?;
        let mut math = FinsheetStore::open(&paths.math)?;
        write.normalized = math.upsert(&normalized)?;
        write.math = math_report;
        Ok(write)
    }

    /// Highest stored version per (company, quarter) across all sectors.
    pub fn stored_versions(&self) -> Result<HashMap<(String, NaiveDate), u32>, StorageError> {
        let mut versions: HashMap<(String, NaiveDate), u32> = HashMap::new();
        for paths in self.layout.sector_stores()? {
            let store = FinsheetStore::open(&paths.raw)?;
            for (key, version) in store.max_versions()? {
                let slot = versions.entry(key).or_insert(version);
                *slot = (*slot).max(version);
            }
        }
        Ok(versions)
    }
}
