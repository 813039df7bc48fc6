// src/config/mod.rs
//! Immutable runtime settings. Built once in `main` (defaults, then an
//! optional JSON file, then CLI overrides) and handed to each component by
//! reference.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{SheetSpec, StatementScope};
use crate::utils::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Filings fetched between two store flushes.
    pub batch_size: usize,
    /// Most ids probed past the last known filing in one discovery.
    pub max_forward: u64,
    /// Folder holding the main database and the per-sector stores.
    pub db_folder: PathBuf,
    /// Main database file name; sector stores are named `<stem> <SECTOR>.db`.
    pub db_name: String,
    /// Document types (nsd_type) that carry financial statements.
    pub finsheet_types: Vec<String>,
    pub statement_sheets: Vec<SheetSpec>,
    pub capital_sheets: Vec<SheetSpec>,
    pub families: FamilySettings,
    /// Legal-status suffixes stripped from company names.
    pub legal_terms: Vec<String>,
    /// File label for the store of records without a sector.
    pub unclassified_sector: String,
    pub cvm: CvmSettings,
    pub debug: bool,
}

/// Account families (first character of the account code) per delta rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilySettings {
    /// Only the December figure is cumulative for the year.
    pub last_quarter: Vec<char>,
    /// Every quarter-end figure is cumulative since the start of the year.
    pub all_quarters: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvmSettings {
    pub base_url: String,
    /// Filing metadata page; `{nsd}` is substituted.
    pub metadata_path: String,
    /// Statement table page; `{nsd}`, `{grupo}` and `{quadro}` are substituted.
    pub statement_path: String,
    pub user_agent: String,
    pub request_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let statement_kinds = [
            "Balanço Patrimonial Ativo",
            "Balanço Patrimonial Passivo",
            "Demonstração do Resultado",
            "Demonstração do Fluxo de Caixa",
            "Demonstração de Valor Adicionado",
        ];
        let statement_sheets = [StatementScope::Individual, StatementScope::Consolidated]
            .iter()
            .flat_map(|scope| {
                statement_kinds
                    .iter()
                    .map(move |kind| SheetSpec::new(*scope, *kind))
            })
            .collect();

        Self {
            batch_size: 50,
            max_forward: 20_000,
            db_folder: PathBuf::from("data"),
            db_name: "b3.db".to_string(),
            finsheet_types: vec![
                "DEMONSTRACOES FINANCEIRAS PADRONIZADAS".to_string(),
                "INFORMACOES TRIMESTRAIS".to_string(),
            ],
            statement_sheets,
            capital_sheets: vec![SheetSpec::new(StatementScope::Individual, "Composição do Capital")],
            families: FamilySettings::default(),
            legal_terms: [
                "EM LIQUIDACAO",
                "EXTRAJUDICIAL",
                "EM RECUPERACAO JUDICIAL",
                "EM REC JUDICIAL",
                "EM LIQUIDACAO EXTRAJUDICIAL",
                "EMPRESA FALIDA",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            unclassified_sector: "SEM SETOR".to_string(),
            cvm: CvmSettings::default(),
            debug: false,
        }
    }
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            last_quarter: vec!['3', '4'],
            all_quarters: vec!['6', '7'],
        }
    }
}

impl Default for CvmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.rad.cvm.gov.br/ENET".to_string(),
            metadata_path: "frmGerenciaPaginaFRE.aspx?NumeroSequencialDocumento={nsd}&CodigoTipoInstituicao=1"
                .to_string(),
            statement_path: "frmDemonstracaoFinanceiraITR.aspx?Grupo={grupo}&Quadro={quadro}&NumeroSequencialDocumento={nsd}&CodigoTipoInstituicao=1"
                .to_string(),
            user_agent: "b3_finsheet/0.1".to_string(),
            request_delay_ms: 150,
            retry_delay_ms: 2_000,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
            .map_err(|e| AppError::Config(format!("Invalid settings in {}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Rejects settings no component can work with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::Config("batch_size must be greater than zero".to_string()));
        }
        if self.max_forward == 0 {
            return Err(AppError::Config("max_forward must be greater than zero".to_string()));
        }
        if self.db_name.trim().is_empty() {
            return Err(AppError::Config("db_name must not be empty".to_string()));
        }
        if self.unclassified_sector.trim().is_empty() {
            return Err(AppError::Config("unclassified_sector must not be empty".to_string()));
        }
        if let Some(shared) = self
            .families
            .last_quarter
            .iter()
            .find(|f| self.families.all_quarters.contains(f))
        {
            return Err(AppError::Config(format!(
                "Account family '{}' is listed under both delta rules",
                shared
            )));
        }
        Ok(())
    }

    pub fn main_db_path(&self) -> PathBuf {
        self.db_folder.join(&self.db_name)
    }

    /// File-name stem shared by every store (`b3` for `b3.db`).
    pub fn db_stem(&self) -> &str {
        Path::new(&self.db_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("b3")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.db_folder.join("debug")
    }
}
