// src/driver.rs
//! Fetch, normalize, reconcile and persist in bounded chunks.
//!
//! Each chunk of `batch_size` filings is fetched one page at a time, turned
//! into accounting records and flushed through the sector router before the
//! next chunk starts. Failures stay inside the filing or sector they hit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Settings;
use crate::cvm::{parse_capital_composition, parse_statement_table, FilingSource, StatementRow};
use crate::model::{AccountingRecord, QueuedFiling, SheetSpec};
use crate::storage::{CompanyRegistry, MainStore, PersistReport, SectorRouter};
use crate::utils::debug_dump::{dump_annotated_page, STATEMENT_PAGE_MARKERS};
use crate::utils::progress::Progress;

/// A unit of work: an id to probe, or a known filing to expand.
#[derive(Debug, Clone)]
enum WorkItem {
    Probe(u64),
    Filing(QueuedFiling),
}

#[derive(Debug, Default)]
pub struct DriverReport {
    pub processed: usize,
    /// Filings whose metadata was found (probe runs only).
    pub filings_found: usize,
    pub records: usize,
    pub fetch_failures: usize,
    pub persist: PersistReport,
    pub cancelled: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum PageKind {
    Statement,
    Capital,
}

pub struct BatchDriver<'a, S: FilingSource> {
    source: &'a S,
    settings: &'a Settings,
    main_store: &'a MainStore,
    registry: &'a CompanyRegistry,
    router: &'a SectorRouter,
    cancel: Arc<AtomicBool>,
}

impl<'a, S: FilingSource> BatchDriver<'a, S> {
    pub fn new(
        source: &'a S,
        settings: &'a Settings,
        main_store: &'a MainStore,
        registry: &'a CompanyRegistry,
        router: &'a SectorRouter,
    ) -> Self {
        Self {
            source,
            settings,
            main_store,
            registry,
            router,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the run before the next chunk once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Probes candidate ids: records each filing's metadata and expands the
    /// filings of a statement-bearing type into records.
    pub async fn run(&self, candidates: Vec<u64>) -> DriverReport {
        self.run_items("nsd", candidates.into_iter().map(WorkItem::Probe).collect())
            .await
    }

    /// Expands already known filings into records.
    pub async fn run_queue(&self, queue: Vec<QueuedFiling>) -> DriverReport {
        self.run_items("finsheet", queue.into_iter().map(WorkItem::Filing).collect())
            .await
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    async fn run_items(&self, label: &str, items: Vec<WorkItem>) -> DriverReport {
        let mut report = DriverReport::default();
        let progress = Progress::new(label, items.len());
        let batch_size = self.settings.batch_size.max(1);

        for chunk in items.chunks(batch_size) {
            if self.is_cancelled() {
                tracing::warn!("Cancelled after {} of {} items", report.processed, items.len());
                report.cancelled = true;
                break;
            }

            let mut records = Vec::new();
            for item in chunk {
                records.extend(self.process(item, &mut report).await);
                report.processed += 1;
            }

            report.records += records.len();
            let persisted = self.router.persist(records);
            let summary = persisted.summary();
            report.persist.merge(persisted);
            progress.report(report.processed, &[summary]);
        }

        tracing::info!(
            "[{}] done: {} items, {} records, {} fetch failures, {}",
            label,
            report.processed,
            report.records,
            report.fetch_failures,
            report.persist.summary()
        );
        report
    }

    async fn process(&self, item: &WorkItem, report: &mut DriverReport) -> Vec<AccountingRecord> {
        match item {
            WorkItem::Filing(queued) => self.expand_filing(queued, report).await,
            WorkItem::Probe(nsd) => {
                let filing = match self.source.fetch_metadata(*nsd).await {
                    Ok(Some(filing)) => filing,
                    Ok(None) => {
                        tracing::debug!("NSD {} does not exist", nsd);
                        return Vec::new();
                    }
                    Err(e) => {
                        tracing::warn!("NSD {}: metadata fetch failed: {}", nsd, e);
                        report.fetch_failures += 1;
                        return Vec::new();
                    }
                };
                report.filings_found += 1;
                if let Err(e) = self.main_store.upsert_if_newer(&filing) {
                    tracing::error!("NSD {}: could not record metadata: {}", nsd, e);
                }
                if !self.settings.finsheet_types.contains(&filing.nsd_type) {
                    return Vec::new();
                }
                let company = self.registry.resolve(&filing.company);
                self.expand_filing(&QueuedFiling { filing, company }, report).await
            }
        }
    }

    /// Fetches every configured page of one filing and builds its records.
    async fn expand_filing(&self, queued: &QueuedFiling, report: &mut DriverReport) -> Vec<AccountingRecord> {
        let nsd = queued.filing.nsd;
        if queued.filing.date.is_none() {
            tracing::warn!("NSD {} has no reference date, statements skipped", nsd);
            return Vec::new();
        }

        let pages = self
            .settings
            .statement_sheets
            .iter()
            .map(|sheet| (sheet, PageKind::Statement))
            .chain(self.settings.capital_sheets.iter().map(|sheet| (sheet, PageKind::Capital)));

        let mut records = Vec::new();
        for (sheet, kind) in pages {
            let html = match self.source.fetch_statement(nsd, sheet).await {
                Ok(Some(html)) => html,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("NSD {} {} / {}: fetch failed: {}", nsd, sheet.scope, sheet.kind, e);
                    report.fetch_failures += 1;
                    continue;
                }
            };
            let parsed = match kind {
                PageKind::Statement => parse_statement_table(&html),
                PageKind::Capital => parse_capital_composition(&html),
            };
            match parsed {
                Ok(rows) if !rows.is_empty() => records.extend(build_records(queued, sheet, rows)),
                Ok(_) => {
                    tracing::debug!("NSD {} {} / {}: no rows", nsd, sheet.scope, sheet.kind);
                    self.dump_page(nsd, sheet, &html);
                }
                Err(e) => {
                    tracing::warn!("NSD {} {} / {}: {}", nsd, sheet.scope, sheet.kind, e);
                    self.dump_page(nsd, sheet, &html);
                }
            }
        }
        tracing::debug!("NSD {} ({}): {} records", nsd, queued.company.company_name, records.len());
        records
    }

    fn dump_page(&self, nsd: u64, sheet: &SheetSpec, html: &str) {
        if !self.settings.debug {
            return;
        }
        let name = format!("{} {} {}", nsd, sheet.scope, sheet.kind);
        if let Err(e) = dump_annotated_page(&self.settings.debug_dir(), &name, html, STATEMENT_PAGE_MARKERS) {
            tracing::warn!("Failed to save debug page for NSD {}: {}", nsd, e);
        }
    }
}

/// Ties parsed rows to their filing. Invalid records are dropped here.
fn build_records(queued: &QueuedFiling, sheet: &SheetSpec, rows: Vec<StatementRow>) -> Vec<AccountingRecord> {
    let Some(quarter_end_date) = queued.filing.date else {
        return Vec::new();
    };
    rows.into_iter()
        .map(|row| AccountingRecord {
            statement_id: queued.filing.nsd,
            company_name: queued.company.company_name.clone(),
            statement_scope: sheet.scope,
            statement_kind: sheet.kind.clone(),
            sector: queued.company.sector.clone(),
            subsector: queued.company.subsector.clone(),
            segment: queued.company.segment.clone(),
            account_code: row.account_code,
            account_description: row.description,
            quarter_end_date,
            value: row.value,
            disclosure_version: queued.filing.version,
        })
        .filter(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping record of NSD {}: {}", record.statement_id, e);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompanyInfo, NsdRecord, StatementScope};
    use crate::storage::FinsheetStore;
    use crate::utils::error::FetchError;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    /// Pages held in memory, keyed by (nsd, statement kind).
    #[derive(Default)]
    struct FakeSource {
        metadata: HashMap<u64, NsdRecord>,
        pages: HashMap<(u64, String), String>,
        broken: Vec<u64>,
    }

    impl FilingSource for FakeSource {
        async fn fetch_metadata(&self, nsd: u64) -> Result<Option<NsdRecord>, FetchError> {
            if self.broken.contains(&nsd) {
                return Err(FetchError::RateLimited);
            }
            Ok(self.metadata.get(&nsd).cloned())
        }

        async fn fetch_statement(&self, nsd: u64, sheet: &SheetSpec) -> Result<Option<String>, FetchError> {
            Ok(self.pages.get(&(nsd, sheet.kind.clone())).cloned())
        }
    }

    fn income_page(value: &str) -> String {
        format!(
            "<div id=\"TituloTabelaSemBorda\">(Reais Mil)</div>\
             <table id=\"ctl00_cphPopUp_tbDados\">\
             <tr><td>Conta</td><td>Descrição</td><td>Valor</td></tr>\
             <tr><td>3.01</td><td>Receita</td><td>{}</td></tr></table>",
            value
        )
    }

    fn filing(nsd: u64, date: (i32, u32, u32), version: u32) -> NsdRecord {
        NsdRecord {
            nsd,
            company: "Embraer S.A.".to_string(),
            nsd_type: "INFORMACOES TRIMESTRAIS".to_string(),
            version,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            sent_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).and_then(|d| d.and_hms_opt(12, 0, 0)),
            ..NsdRecord::default()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: Settings,
        main_store: MainStore,
        registry: CompanyRegistry,
        router: SectorRouter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            db_folder: dir.path().to_path_buf(),
            batch_size: 2,
            statement_sheets: vec![SheetSpec::new(StatementScope::Consolidated, "Demonstração do Resultado")],
            ..Settings::default()
        };
        let main_store = MainStore::open(settings.main_db_path()).unwrap();
        let registry = CompanyRegistry::from_companies(
            vec![CompanyInfo {
                company_name: "EMBRAER SA".to_string(),
                sector: "BENS INDUSTRIAIS".to_string(),
                ..CompanyInfo::default()
            }],
            &settings.legal_terms,
        );
        let router = SectorRouter::new(&settings).unwrap();
        Fixture {
            _dir: dir,
            settings,
            main_store,
            registry,
            router,
        }
    }

    fn year_source() -> FakeSource {
        let mut source = FakeSource::default();
        for (nsd, date, value) in [
            (1, (2016, 3, 31), "10"),
            (2, (2016, 6, 30), "5"),
            (3, (2016, 9, 30), "8"),
            (4, (2016, 12, 31), "30"),
        ] {
            source.metadata.insert(nsd, filing(nsd, date, 1));
            source
                .pages
                .insert((nsd, "Demonstração do Resultado".to_string()), income_page(value));
        }
        source
    }

    #[tokio::test]
    async fn test_probe_run_stores_metadata_and_normalized_values() {
        let fx = fixture();
        let mut source = year_source();
        source.broken.push(6);
        let driver = BatchDriver::new(&source, &fx.settings, &fx.main_store, &fx.registry, &fx.router);

        let report = driver.run(vec![1, 2, 3, 4, 5, 6]).await;

        assert_eq!(report.processed, 6);
        assert_eq!(report.filings_found, 4);
        assert_eq!(report.records, 4);
        assert_eq!(report.fetch_failures, 1);
        assert!(!report.cancelled);
        assert_eq!(fx.main_store.history().unwrap().len(), 4);

        let paths = fx.router.layout().sector_paths("BENS INDUSTRIAIS");
        let math = FinsheetStore::open(&paths.math).unwrap().load_all().unwrap();
        let values: Vec<_> = math.iter().map(|r| r.value).collect();
        assert_eq!(
            values,
            vec![Some(dec!(10000)), Some(dec!(5000)), Some(dec!(8000)), Some(dec!(7000))]
        );
        assert!(math.iter().all(|r| r.company_name == "EMBRAER SA"));
    }

    #[test]
    fn test_queue_run_with_cancel_flag_stops_before_first_chunk() {
        let fx = fixture();
        let source = year_source();
        let flag = Arc::new(AtomicBool::new(true));
        let driver = BatchDriver::new(&source, &fx.settings, &fx.main_store, &fx.registry, &fx.router)
            .with_cancel_flag(flag);
        let queue = vec![QueuedFiling {
            filing: filing(1, (2016, 3, 31), 1),
            company: fx.registry.resolve("EMBRAER SA"),
        }];

        let report = tokio_test::block_on(driver.run_queue(queue));

        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_queue_run_skips_other_document_types_and_missing_pages() {
        let fx = fixture();
        let mut source = year_source();
        let mut notice = filing(9, (2016, 3, 31), 1);
        notice.nsd_type = "FATO RELEVANTE".to_string();
        source.metadata.insert(9, notice);
        let driver = BatchDriver::new(&source, &fx.settings, &fx.main_store, &fx.registry, &fx.router);

        let report = driver.run(vec![9, 1]).await;
        assert_eq!(report.filings_found, 2);
        assert_eq!(report.records, 1);

        // Filing 7 has metadata but no statement pages.
        let queue = vec![QueuedFiling {
            filing: filing(7, (2017, 3, 31), 1),
            company: fx.registry.resolve("EMBRAER SA"),
        }];
        let report = driver.run_queue(queue).await;
        assert_eq!(report.records, 0);
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn test_build_records_drops_invalid_rows() {
        let queued = QueuedFiling {
            filing: filing(1, (2016, 3, 31), 2),
            company: CompanyInfo {
                company_name: "EMBRAER SA".to_string(),
                ..CompanyInfo::default()
            },
        };
        let sheet = SheetSpec::new(StatementScope::Individual, "Balanço Patrimonial Ativo");
        let rows = vec![
            StatementRow {
                account_code: "1".to_string(),
                description: "Ativo Total".to_string(),
                value: Some(dec!(5)),
            },
            StatementRow {
                account_code: " ".to_string(),
                description: "sem conta".to_string(),
                value: None,
            },
        ];

        let records = build_records(&queued, &sheet, rows);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].disclosure_version, 2);
        assert_eq!(records[0].statement_scope, StatementScope::Individual);
        assert_eq!(records[0].sector, "");
    }
}
