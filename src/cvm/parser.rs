// src/cvm/parser.rs

// --- Imports ---
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};

use crate::model::NsdRecord;
use crate::utils::error::ParseError;
use crate::utils::text::clean_text;

// --- CSS Selectors (Lazy Static) ---
static DATA_TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("table#ctl00_cphPopUp_tbDados").expect("Failed to compile DATA_TABLE_SELECTOR")
});

static ANY_TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("Failed to compile ANY_TABLE_SELECTOR"));

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW_SELECTOR"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td, th").expect("Failed to compile CELL_SELECTOR"));

static TABLE_TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("#TituloTabelaSemBorda").expect("Failed to compile TABLE_TITLE_SELECTOR")
});

static CAPITAL_UNIT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("#UltimaTabela table tr").expect("Failed to compile CAPITAL_UNIT_SELECTOR")
});

// --- Regex Patterns ---
// "Mil" as a word: "Valores em (Mil Reais)", "(Reais Mil)".
static THOUSANDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bMil\b").expect("Failed to compile THOUSANDS_RE"));

static BR_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d{1,3}(\.\d{3})+|\d+)(,\d+)?$").expect("Failed to compile BR_NUMBER_RE")
});

/// Capital composition cells and the synthetic accounts they are stored under.
pub const CAPITAL_FIELDS: [(&str, &str, &str); 4] = [
    ("QtdAordCapiItgz_1", "00.01.01", "Ações Ordinárias ON"),
    ("QtdAprfCapiItgz_1", "00.01.02", "Ações Preferenciais PN"),
    ("QtdAordTeso_1", "00.02.01", "Ações em Tesouraria Ordinárias ON"),
    ("QtdAprfTeso_1", "00.02.02", "Ações em Tesouraria Preferenciais PN"),
];

// --- Data Structures ---
/// One line of a statement table, before it is tied to a filing.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRow {
    pub account_code: String,
    pub description: String,
    /// `None` when the cell held something that is not a number.
    pub value: Option<Decimal>,
}

// --- Numbers ---
/// Parses a pt-BR formatted number: `1.234.567,89`, `-1.234`, `(1.234)`.
pub fn parse_br_number(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim().replace('\u{a0}', "");
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, trimmed.as_str()),
    };
    if !BR_NUMBER_RE.is_match(body) {
        return None;
    }
    let normalized = body.replace('.', "").replace(',', ".");
    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Cell value: empty cells count as zero, unreadable ones as non-numeric.
fn cell_value(raw: &str, multiplier: Decimal) -> Option<Decimal> {
    if raw.trim().is_empty() {
        return Some(Decimal::ZERO);
    }
    parse_br_number(raw).and_then(|v| v.checked_mul(multiplier))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn unit_multiplier(text: &str) -> Decimal {
    if THOUSANDS_RE.is_match(text) {
        Decimal::ONE_THOUSAND
    } else {
        Decimal::ONE
    }
}

// --- Statement tables ---
/// Reads a statement table page. The first row is the header; the first
/// three columns are account code, description and value.
pub fn parse_statement_table(html: &str) -> Result<Vec<StatementRow>, ParseError> {
    let document = Html::parse_document(html);
    let table = document
        .select(&DATA_TABLE_SELECTOR)
        .next()
        .or_else(|| document.select(&ANY_TABLE_SELECTOR).next())
        .ok_or_else(|| ParseError::TableNotFound("statement table".to_string()))?;

    let multiplier = document
        .select(&TABLE_TITLE_SELECTOR)
        .next()
        .map(|title| unit_multiplier(&element_text(title)))
        .unwrap_or(Decimal::ONE);

    let mut rows = Vec::new();
    for row in table.select(&ROW_SELECTOR).skip(1) {
        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(element_text).collect();
        if cells.len() < 3 {
            continue;
        }
        let account_code = cells[0].clone();
        if account_code.is_empty() {
            continue;
        }
        let value = cell_value(&cells[2], multiplier);
        if value.is_none() {
            tracing::debug!("Non-numeric value '{}' for account {}", cells[2], account_code);
        }
        rows.push(StatementRow {
            account_code,
            description: cells[1].clone(),
            value,
        });
    }
    tracing::debug!("Parsed {} statement rows (multiplier {})", rows.len(), multiplier);
    Ok(rows)
}

/// Reads the share counts of a capital composition page into the synthetic
/// `00.0x.0y` accounts.
pub fn parse_capital_composition(html: &str) -> Result<Vec<StatementRow>, ParseError> {
    let document = Html::parse_document(html);
    let multiplier = document
        .select(&CAPITAL_UNIT_SELECTOR)
        .next()
        .map(|row| unit_multiplier(&element_text(row)))
        .unwrap_or(Decimal::ONE);

    let mut rows = Vec::new();
    for (id, account, description) in CAPITAL_FIELDS {
        let selector = Selector::parse(&format!("#{}", id)).map_err(|_| ParseError::InvalidValue {
            field: "selector".to_string(),
            value: id.to_string(),
        })?;
        if let Some(cell) = document.select(&selector).next() {
            rows.push(StatementRow {
                account_code: account.to_string(),
                description: description.to_string(),
                value: cell_value(&element_text(cell), multiplier),
            });
        }
    }
    if rows.is_empty() {
        return Err(ParseError::TableNotFound("capital composition".to_string()));
    }
    Ok(rows)
}

// --- Filing metadata ---
#[derive(Debug, Clone, Copy, PartialEq)]
enum MetadataField {
    Company,
    Dri,
    DocumentType,
    Version,
    AuditorRt,
    Auditor,
    Protocol,
    ReferenceDate,
    SentDate,
    Reason,
}

/// Order matters: more specific labels first.
const METADATA_LABELS: &[(&str, MetadataField)] = &[
    ("RESPONSAVEL TECNICO", MetadataField::AuditorRt),
    ("AUDITOR RT", MetadataField::AuditorRt),
    ("AUDITOR", MetadataField::Auditor),
    ("DRI", MetadataField::Dri),
    ("DATA DE REFERENCIA", MetadataField::ReferenceDate),
    ("DATA REFERENCIA", MetadataField::ReferenceDate),
    ("DATA DE ENTREGA", MetadataField::SentDate),
    ("DATA DE ENVIO", MetadataField::SentDate),
    ("DATA ENTREGA", MetadataField::SentDate),
    ("TIPO", MetadataField::DocumentType),
    ("DOCUMENTO", MetadataField::DocumentType),
    ("VERSAO", MetadataField::Version),
    ("PROTOCOLO", MetadataField::Protocol),
    ("MOTIVO", MetadataField::Reason),
    ("COMPANHIA", MetadataField::Company),
    ("EMPRESA", MetadataField::Company),
];

fn metadata_field(label: &str) -> Option<MetadataField> {
    let label = clean_text(label);
    METADATA_LABELS
        .iter()
        .find(|(prefix, _)| label.starts_with(prefix))
        .map(|(_, field)| *field)
}

fn parse_br_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%d/%m/%Y").ok()
}

fn parse_br_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_br_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Reads a filing's metadata page made of label/value rows. Returns `None`
/// when the page describes no filing (no recognizable rows or no company).
pub fn parse_metadata_page(nsd: u64, html: &str) -> Result<Option<NsdRecord>, ParseError> {
    let document = Html::parse_document(html);
    let mut record = NsdRecord {
        nsd,
        ..NsdRecord::default()
    };
    let mut recognized = 0usize;

    for row in document.select(&ROW_SELECTOR) {
        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(element_text).collect();
        let [label, value, ..] = cells.as_slice() else {
            continue;
        };
        let Some(field) = metadata_field(label.trim_end_matches(':')) else {
            continue;
        };
        recognized += 1;
        match field {
            MetadataField::Company => record.company = value.clone(),
            MetadataField::Dri => record.dri = value.clone(),
            MetadataField::DocumentType => record.nsd_type = clean_text(value),
            MetadataField::Version => {
                record.version = value.trim().parse().map_err(|_| ParseError::InvalidValue {
                    field: "version".to_string(),
                    value: value.clone(),
                })?
            }
            MetadataField::Auditor => record.auditor = value.clone(),
            MetadataField::AuditorRt => record.auditor_rt = value.clone(),
            MetadataField::Protocol => record.protocolo = value.clone(),
            MetadataField::ReferenceDate => record.date = parse_br_date(value),
            MetadataField::SentDate => record.sent_date = parse_br_timestamp(value),
            MetadataField::Reason => record.reason = value.clone(),
        }
    }

    if recognized == 0 || record.company.trim().is_empty() {
        tracing::debug!("NSD {}: no filing metadata on page", nsd);
        return Ok(None);
    }
    Ok(Some(record))
}
