// src/storage/sector.rs
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, Row};
use rust_decimal::Decimal;

use crate::model::{sort_records, AccountingRecord, StatementScope};
use crate::utils::error::{ParseError, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS finsheet (
    nsd          INTEGER NOT NULL,
    tipo         TEXT    NOT NULL,
    setor        TEXT    NOT NULL DEFAULT '',
    subsetor     TEXT    NOT NULL DEFAULT '',
    segmento     TEXT    NOT NULL DEFAULT '',
    company_name TEXT    NOT NULL,
    quadro       TEXT    NOT NULL,
    quarter      TEXT    NOT NULL,
    conta        TEXT    NOT NULL,
    descricao    TEXT    NOT NULL DEFAULT '',
    valor        TEXT,
    version      INTEGER NOT NULL,
    UNIQUE (company_name, quadro, tipo, conta, quarter)
);
CREATE INDEX IF NOT EXISTS idx_finsheet_company ON finsheet (company_name);
";

const UPSERT: &str = "
INSERT INTO finsheet (nsd, tipo, setor, subsetor, segmento, company_name, quadro, quarter, conta, descricao, valor, version)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT (company_name, quadro, tipo, conta, quarter) DO UPDATE SET
    nsd = excluded.nsd,
    setor = excluded.setor,
    subsetor = excluded.subsetor,
    segmento = excluded.segmento,
    descricao = excluded.descricao,
    valor = excluded.valor,
    version = excluded.version
";

const SELECT_COLUMNS: &str =
    "SELECT nsd, tipo, setor, subsetor, segmento, company_name, quadro, quarter, conta, descricao, valor, version FROM finsheet";

/// One `finsheet` table in one SQLite file (a sector's as-reported or
/// normalized store). Rows are unique on the natural key and written by
/// upsert only. Values are kept as decimal text so no digits are lost;
/// numeric cells left by older stores are still read.
pub struct FinsheetStore {
    conn: Connection,
    path: PathBuf,
}

/// Column values as read, before validation.
struct StoredRow {
    nsd: i64,
    tipo: String,
    setor: String,
    subsetor: String,
    segmento: String,
    company_name: String,
    quadro: String,
    quarter: String,
    conta: String,
    descricao: String,
    valor: Option<String>,
    version: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            nsd: row.get(0)?,
            tipo: row.get(1)?,
            setor: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            subsetor: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            segmento: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            company_name: row.get(5)?,
            quadro: row.get(6)?,
            quarter: row.get(7)?,
            conta: row.get(8)?,
            descricao: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            valor: match row.get_ref(10)? {
                ValueRef::Null => None,
                ValueRef::Integer(n) => Some(n.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(_) => Some(String::from("<blob>")),
            },
            version: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<AccountingRecord, ParseError> {
        let invalid = |field: &str, value: String| ParseError::InvalidValue {
            field: field.to_string(),
            value,
        };
        // Older stores hold full timestamps ("2016-03-31 00:00:00").
        let date_part = self.quarter.get(..10).unwrap_or(&self.quarter);
        let quarter_end_date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|_| invalid("quarter", self.quarter.clone()))?;
        let statement_id = u64::try_from(self.nsd).map_err(|_| invalid("nsd", self.nsd.to_string()))?;
        let disclosure_version =
            u32::try_from(self.version).map_err(|_| invalid("version", self.version.to_string()))?;
        let value = match self.valor {
            Some(raw) => Some(Decimal::from_str(raw.trim()).map_err(|_| invalid("valor", raw.clone()))?),
            None => None,
        };

        let record = AccountingRecord {
            statement_id,
            company_name: self.company_name,
            statement_scope: self.quadro.parse::<StatementScope>()?,
            statement_kind: self.tipo,
            sector: self.setor,
            subsector: self.subsetor,
            segment: self.segmento,
            account_code: self.conta,
            account_description: self.descricao,
            quarter_end_date,
            value,
            disclosure_version,
        };
        record.validate()?;
        Ok(record)
    }
}

impl FinsheetStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path })
    }

    /// Inserts or updates `rows` by natural key in one transaction.
    pub fn upsert(&mut self, rows: &[AccountingRecord]) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for r in rows {
                stmt.execute(params![
                    r.statement_id,
                    r.statement_kind,
                    r.sector,
                    r.subsector,
                    r.segment,
                    r.company_name,
                    r.statement_scope.label(),
                    r.quarter_end_date.format("%Y-%m-%d").to_string(),
                    r.account_code,
                    r.account_description,
                    r.value.map(|v| v.to_string()),
                    r.disclosure_version,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!("Upserted {} rows into {}", rows.len(), self.path.display());
        Ok(rows.len())
    }

    /// Every valid row, in listing order (empty classifications last).
    pub fn load_all(&self) -> Result<Vec<AccountingRecord>, StorageError> {
        let mut rows = self.query(SELECT_COLUMNS, Vec::<String>::new())?;
        sort_records(&mut rows);
        Ok(rows)
    }

    /// Every valid row of the given companies.
    pub fn load_companies(&self, companies: &BTreeSet<String>) -> Result<Vec<AccountingRecord>, StorageError> {
        let mut out = Vec::new();
        let sql = format!("{} WHERE company_name = ?1", SELECT_COLUMNS);
        for company in companies {
            out.extend(self.query(&sql, [company.as_str()])?);
        }
        Ok(out)
    }

    /// Highest stored version per (company, quarter).
    pub fn max_versions(&self) -> Result<HashMap<(String, NaiveDate), u32>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT company_name, quarter, MAX(version) FROM finsheet GROUP BY company_name, quarter")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut versions = HashMap::new();
        for row in rows {
            let (company, quarter, version) = row?;
            let date_part = quarter.get(..10).unwrap_or(&quarter);
            match (NaiveDate::parse_from_str(date_part, "%Y-%m-%d"), u32::try_from(version)) {
                (Ok(date), Ok(version)) => {
                    versions.insert((company, date), version);
                }
                _ => tracing::warn!("Skipping unreadable version row for {} at '{}'", company, quarter),
            }
        }
        Ok(versions)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM finsheet", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn query<P>(&self, sql: &str, params: P) -> Result<Vec<AccountingRecord>, StorageError>
    where
        P: IntoIterator,
        P::Item: rusqlite::ToSql,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(params), StoredRow::from_row)?;

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match row?.into_record() {
                Ok(record) => out.push(record),
                Err(e) => {
                    skipped += 1;
                    tracing::debug!("Skipping invalid row in {}: {}", self.path.display(), e);
                }
            }
        }
        if skipped > 0 {
            tracing::warn!("Skipped {} invalid rows in {}", skipped, self.path.display());
        }
        Ok(out)
    }
}
