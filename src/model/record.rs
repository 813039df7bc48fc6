// src/model/record.rs
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::error::ParseError;

/// Parent company alone, or the consolidated group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatementScope {
    Individual,
    Consolidated,
}

impl StatementScope {
    /// Label used by the CVM pages and stored in the `quadro` column.
    pub fn label(&self) -> &'static str {
        match self {
            StatementScope::Individual => "DFs Individuais",
            StatementScope::Consolidated => "DFs Consolidadas",
        }
    }
}

impl fmt::Display for StatementScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StatementScope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if lowered.contains("individ") {
            Ok(StatementScope::Individual)
        } else if lowered.contains("consolid") {
            Ok(StatementScope::Consolidated)
        } else {
            Err(ParseError::InvalidValue {
                field: "statement_scope".to_string(),
                value: s.to_string(),
            })
        }
    }
}

/// One statement page to fetch for a filing: scope plus statement label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetSpec {
    pub scope: StatementScope,
    pub kind: String,
}

impl SheetSpec {
    pub fn new(scope: StatementScope, kind: impl Into<String>) -> Self {
        Self { scope, kind: kind.into() }
    }
}

/// Calendar quarter, identified by its end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    /// The quarter `date` closes, or `None` if it is not a quarter end.
    pub fn of(date: NaiveDate) -> Option<Quarter> {
        match (date.month(), date.day()) {
            (3, 31) => Some(Quarter::Q1),
            (6, 30) => Some(Quarter::Q2),
            (9, 30) => Some(Quarter::Q3),
            (12, 31) => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn end_date(self, year: i32) -> Option<NaiveDate> {
        let (month, day) = match self {
            Quarter::Q1 => (3, 31),
            Quarter::Q2 => (6, 30),
            Quarter::Q3 => (9, 30),
            Quarter::Q4 => (12, 31),
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// One disclosed line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingRecord {
    pub statement_id: u64,
    pub company_name: String,
    pub statement_scope: StatementScope,
    pub statement_kind: String,
    pub sector: String,
    pub subsector: String,
    pub segment: String,
    pub account_code: String,
    pub account_description: String,
    pub quarter_end_date: NaiveDate,
    /// `None` when the source cell was not a number.
    pub value: Option<Decimal>,
    pub disclosure_version: u32,
}

/// (company, scope, kind, account, year): the unit of delta normalization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearGroupKey {
    pub company_name: String,
    pub statement_scope: StatementScope,
    pub statement_kind: String,
    pub account_code: String,
    pub year: i32,
}

impl fmt::Display for YearGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} / {} / {}",
            self.company_name, self.statement_scope, self.statement_kind, self.account_code, self.year
        )
    }
}

/// Natural key a store upserts on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub company_name: String,
    pub statement_scope: StatementScope,
    pub statement_kind: String,
    pub account_code: String,
    pub quarter_end_date: NaiveDate,
}

impl RecordKey {
    pub fn year_group(&self) -> YearGroupKey {
        YearGroupKey {
            company_name: self.company_name.clone(),
            statement_scope: self.statement_scope,
            statement_kind: self.statement_kind.clone(),
            account_code: self.account_code.clone(),
            year: self.quarter_end_date.year(),
        }
    }
}

impl AccountingRecord {
    /// First character of the account code.
    pub fn family(&self) -> Option<char> {
        self.account_code.trim().chars().next()
    }

    pub fn year(&self) -> i32 {
        self.quarter_end_date.year()
    }

    pub fn quarter(&self) -> Option<Quarter> {
        Quarter::of(self.quarter_end_date)
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            company_name: self.company_name.clone(),
            statement_scope: self.statement_scope,
            statement_kind: self.statement_kind.clone(),
            account_code: self.account_code.clone(),
            quarter_end_date: self.quarter_end_date,
        }
    }

    pub fn year_group(&self) -> YearGroupKey {
        YearGroupKey {
            company_name: self.company_name.clone(),
            statement_scope: self.statement_scope,
            statement_kind: self.statement_kind.clone(),
            account_code: self.account_code.clone(),
            year: self.year(),
        }
    }

    /// Rows without a company or a quarter-end date never enter normalization.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.company_name.trim().is_empty() {
            return Err(ParseError::MissingField("company_name".to_string()));
        }
        if self.account_code.trim().is_empty() {
            return Err(ParseError::MissingField("account_code".to_string()));
        }
        if self.quarter().is_none() {
            return Err(ParseError::InvalidValue {
                field: "quarter_end_date".to_string(),
                value: self.quarter_end_date.to_string(),
            });
        }
        Ok(())
    }
}

// --- Ordering ---

/// Stands in for an empty classification while sorting so it lands last.
pub const LAST_ORDER: &str = "\u{10FFFF}";

/// Sort key for a classification field: empty sorts after everything else.
pub fn order_key(value: &str) -> &str {
    if value.is_empty() {
        LAST_ORDER
    } else {
        value
    }
}

/// Compares (sector, subsector, segment) triples with empty values last.
pub fn cmp_classification(a: (&str, &str, &str), b: (&str, &str, &str)) -> Ordering {
    order_key(a.0)
        .cmp(order_key(b.0))
        .then_with(|| order_key(a.1).cmp(order_key(b.1)))
        .then_with(|| order_key(a.2).cmp(order_key(b.2)))
}

/// Listing order: sector, subsector, segment (empty last), company, quarter,
/// scope, kind, account, version.
pub fn sort_records(records: &mut [AccountingRecord]) {
    records.sort_by(|a, b| {
        cmp_classification(
            (a.sector.as_str(), a.subsector.as_str(), a.segment.as_str()),
            (b.sector.as_str(), b.subsector.as_str(), b.segment.as_str()),
        )
        .then_with(|| a.company_name.cmp(&b.company_name))
        .then_with(|| a.quarter_end_date.cmp(&b.quarter_end_date))
        .then_with(|| a.statement_scope.cmp(&b.statement_scope))
        .then_with(|| a.statement_kind.cmp(&b.statement_kind))
        .then_with(|| a.account_code.cmp(&b.account_code))
        .then_with(|| a.disclosure_version.cmp(&b.disclosure_version))
        .then_with(|| a.statement_id.cmp(&b.statement_id))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Income-statement style record for `company` at `date`.
    pub fn record(company: &str, account: &str, date: (i32, u32, u32), value: i64, version: u32) -> AccountingRecord {
        AccountingRecord {
            statement_id: 100 + version as u64,
            company_name: company.to_string(),
            statement_scope: StatementScope::Consolidated,
            statement_kind: "Demonstração do Resultado".to_string(),
            sector: "BENS INDUSTRIAIS".to_string(),
            subsector: "MATERIAL DE TRANSPORTE".to_string(),
            segment: "MATERIAL AERONAUTICO".to_string(),
            account_code: account.to_string(),
            account_description: "Receita de Venda".to_string(),
            quarter_end_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            value: Some(Decimal::from(value)),
            disclosure_version: version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn test_quarter_of_dates() {
        assert_eq!(Quarter::of(NaiveDate::from_ymd_opt(2020, 3, 31).unwrap()), Some(Quarter::Q1));
        assert_eq!(Quarter::of(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()), Some(Quarter::Q4));
        assert_eq!(Quarter::of(NaiveDate::from_ymd_opt(2020, 3, 30).unwrap()), None);
        assert_eq!(Quarter::Q3.end_date(2021), NaiveDate::from_ymd_opt(2021, 9, 30));
    }

    #[test]
    fn test_scope_labels_round_trip() {
        assert_eq!("DFs Individuais".parse::<StatementScope>().unwrap(), StatementScope::Individual);
        assert_eq!("DFs Consolidadas".parse::<StatementScope>().unwrap(), StatementScope::Consolidated);
        assert_eq!("Consolidated".parse::<StatementScope>().unwrap(), StatementScope::Consolidated);
        assert!("Dados da Empresa".parse::<StatementScope>().is_err());
    }

    #[test]
    fn test_family_and_keys() {
        let rec = record("EMBRAER SA", "3.01", (2016, 6, 30), 10, 1);
        assert_eq!(rec.family(), Some('3'));
        assert_eq!(rec.year_group().year, 2016);
        assert_eq!(rec.key().year_group(), rec.year_group());
    }

    #[test]
    fn test_validate_rejects_empty_company_and_odd_dates() {
        let mut rec = record("", "3.01", (2016, 6, 30), 10, 1);
        assert!(rec.validate().is_err());
        rec.company_name = "EMBRAER SA".to_string();
        assert!(rec.validate().is_ok());
        rec.quarter_end_date = NaiveDate::from_ymd_opt(2016, 6, 15).unwrap();
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_empty_sector_sorts_last_and_stays_empty() {
        let mut unclassified = record("ALPHA SA", "3.01", (2016, 3, 31), 1, 1);
        unclassified.sector = String::new();
        let mut zeta = record("ZETA SA", "3.01", (2016, 3, 31), 1, 1);
        zeta.sector = "UTILIDADE PUBLICA".to_string();
        let mut rows = vec![unclassified, zeta, record("BETA SA", "3.01", (2016, 3, 31), 1, 1)];

        sort_records(&mut rows);

        assert_eq!(rows[0].company_name, "BETA SA");
        assert_eq!(rows[1].company_name, "ZETA SA");
        assert_eq!(rows[2].company_name, "ALPHA SA");
        assert_eq!(rows[2].sector, "");
    }
}
