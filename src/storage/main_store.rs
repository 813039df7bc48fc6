// src/storage/main_store.rs
//! The main database: filing metadata (`nsd`) and the company registry
//! (`company_info`).

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::model::{CompanyInfo, NsdRecord};
use crate::utils::error::StorageError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nsd (
    nsd        INTEGER PRIMARY KEY,
    company    TEXT NOT NULL DEFAULT '',
    dri        TEXT NOT NULL DEFAULT '',
    nsd_type   TEXT NOT NULL DEFAULT '',
    version    INTEGER NOT NULL DEFAULT 0,
    auditor    TEXT NOT NULL DEFAULT '',
    auditor_rt TEXT NOT NULL DEFAULT '',
    protocolo  TEXT NOT NULL DEFAULT '',
    date       TEXT,
    sent_date  TEXT,
    reason     TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS company_info (
    company_name TEXT PRIMARY KEY,
    cvm_code     TEXT NOT NULL DEFAULT '',
    ticker       TEXT NOT NULL DEFAULT '',
    setor        TEXT NOT NULL DEFAULT '',
    subsetor     TEXT NOT NULL DEFAULT '',
    segmento     TEXT NOT NULL DEFAULT ''
);
";

// Timestamps are stored as "%Y-%m-%d %H:%M:%S" text, so SQL comparisons
// follow chronological order.
const UPSERT_NSD: &str = "
INSERT INTO nsd (nsd, company, dri, nsd_type, version, auditor, auditor_rt, protocolo, date, sent_date, reason)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT (nsd) DO UPDATE SET
    company = excluded.company,
    dri = excluded.dri,
    nsd_type = excluded.nsd_type,
    version = excluded.version,
    auditor = excluded.auditor,
    auditor_rt = excluded.auditor_rt,
    protocolo = excluded.protocolo,
    date = excluded.date,
    sent_date = excluded.sent_date,
    reason = excluded.reason
WHERE nsd.sent_date IS NULL OR excluded.sent_date > nsd.sent_date
";

const SELECT_NSD: &str =
    "SELECT nsd, company, dri, nsd_type, version, auditor, auditor_rt, protocolo, date, sent_date, reason FROM nsd";

pub struct MainStore {
    conn: Connection,
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(&raw), "%Y-%m-%d").ok()
}

fn parse_timestamp(raw: Option<String>) -> Option<NaiveDateTime> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

fn nsd_from_row(row: &Row<'_>) -> rusqlite::Result<NsdRecord> {
    Ok(NsdRecord {
        nsd: row.get::<_, i64>(0)?.max(0) as u64,
        company: row.get(1)?,
        dri: row.get(2)?,
        nsd_type: row.get(3)?,
        version: row.get::<_, i64>(4)?.max(0) as u32,
        auditor: row.get(5)?,
        auditor_rt: row.get(6)?,
        protocolo: row.get(7)?,
        date: parse_date(row.get(8)?),
        sent_date: parse_timestamp(row.get(9)?),
        reason: row.get(10)?,
    })
}

impl MainStore {
    /// Opens (creating if needed) the main database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Inserts `record`, or replaces the stored row when `record` was sent
    /// later. Returns whether anything was written.
    pub fn upsert_if_newer(&self, record: &NsdRecord) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            UPSERT_NSD,
            params![
                record.nsd,
                record.company,
                record.dri,
                record.nsd_type,
                record.version,
                record.auditor,
                record.auditor_rt,
                record.protocolo,
                record.date.map(|d| d.format("%Y-%m-%d").to_string()),
                record.sent_date.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()),
                record.reason,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, nsd: u64) -> Result<Option<NsdRecord>, StorageError> {
        let sql = format!("{} WHERE nsd = ?1", SELECT_NSD);
        Ok(self.conn.query_row(&sql, [nsd], nsd_from_row).optional()?)
    }

    /// Every known id with its delivery timestamp, by id.
    pub fn history(&self) -> Result<Vec<(u64, Option<NaiveDateTime>)>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT nsd, sent_date FROM nsd ORDER BY nsd")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (nsd, sent) = row?;
            if let Ok(nsd) = u64::try_from(nsd) {
                out.push((nsd, parse_timestamp(sent)));
            }
        }
        Ok(out)
    }

    /// Filings whose document type is one of `types`.
    pub fn filings_of_types(&self, types: &[String]) -> Result<Vec<NsdRecord>, StorageError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; types.len()].join(", ");
        let sql = format!("{} WHERE nsd_type IN ({}) ORDER BY nsd", SELECT_NSD, placeholders);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(types.iter()), nsd_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn upsert_company(&self, company: &CompanyInfo) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO company_info (company_name, cvm_code, ticker, setor, subsetor, segmento)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (company_name) DO UPDATE SET
                 cvm_code = excluded.cvm_code,
                 ticker = excluded.ticker,
                 setor = excluded.setor,
                 subsetor = excluded.subsetor,
                 segmento = excluded.segmento",
            params![
                company.company_name,
                company.cvm_code,
                company.ticker,
                company.sector,
                company.subsector,
                company.segment,
            ],
        )?;
        Ok(())
    }

    pub fn companies(&self) -> Result<Vec<CompanyInfo>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT company_name, cvm_code, ticker, setor, subsetor, segmento FROM company_info ORDER BY company_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CompanyInfo {
                company_name: row.get(0)?,
                cvm_code: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ticker: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                sector: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                subsector: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                segment: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
