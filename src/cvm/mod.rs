// src/cvm/mod.rs
pub mod client;
pub mod parser;

pub use client::CvmClient;
pub use parser::{parse_capital_composition, parse_statement_table, StatementRow};

use crate::model::{NsdRecord, SheetSpec};
use crate::utils::error::FetchError;

/// Where filings come from. The batch driver only talks to this trait, so a
/// run can be fed from the CVM site or from pages held in memory.
#[allow(async_fn_in_trait)]
pub trait FilingSource {
    /// Metadata of filing `nsd`, or `None` if there is no such filing.
    async fn fetch_metadata(&self, nsd: u64) -> Result<Option<NsdRecord>, FetchError>;

    /// Raw HTML of one statement page of filing `nsd`, or `None` if the
    /// filing has no such page.
    async fn fetch_statement(&self, nsd: u64, sheet: &SheetSpec) -> Result<Option<String>, FetchError>;
}
