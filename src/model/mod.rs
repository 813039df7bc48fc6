// src/model/mod.rs
pub mod nsd;
pub mod record;

pub use nsd::{CompanyInfo, NsdRecord, QueuedFiling};
pub use record::{
    cmp_classification, sort_records, AccountingRecord, Quarter, RecordKey, SheetSpec, StatementScope,
    YearGroupKey,
};
