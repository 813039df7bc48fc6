// src/model/nsd.rs
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Disclosure metadata for one NSD (row of the `nsd` table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NsdRecord {
    pub nsd: u64,
    pub company: String,
    pub dri: String,
    pub nsd_type: String,
    pub version: u32,
    pub auditor: String,
    pub auditor_rt: String,
    pub protocolo: String,
    /// Reference (quarter-end) date of the statements.
    pub date: Option<NaiveDate>,
    /// When the filing was delivered to the regulator.
    pub sent_date: Option<NaiveDateTime>,
    pub reason: String,
}

/// Registry entry (row of the `company_info` table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyInfo {
    pub company_name: String,
    pub cvm_code: String,
    pub ticker: String,
    pub sector: String,
    pub subsector: String,
    pub segment: String,
}

/// A known filing waiting for its statements to be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedFiling {
    pub filing: NsdRecord,
    pub company: CompanyInfo,
}
