// src/storage/company.rs
use std::collections::HashMap;

use crate::model::CompanyInfo;
use crate::storage::MainStore;
use crate::utils::error::StorageError;
use crate::utils::text::clean_company_name;

/// Company classification looked up by cleaned name, so "Embraer S.A." on a
/// filing page finds "EMBRAER SA" in the registry.
#[derive(Debug, Default)]
pub struct CompanyRegistry {
    by_name: HashMap<String, CompanyInfo>,
    legal_terms: Vec<String>,
}

impl CompanyRegistry {
    pub fn load(store: &MainStore, legal_terms: &[String]) -> Result<Self, StorageError> {
        let registry = Self::from_companies(store.companies()?, legal_terms);
        tracing::debug!("Company registry loaded with {} entries", registry.len());
        Ok(registry)
    }

    pub fn from_companies(companies: impl IntoIterator<Item = CompanyInfo>, legal_terms: &[String]) -> Self {
        let by_name = companies
            .into_iter()
            .map(|mut company| {
                company.company_name = clean_company_name(&company.company_name, legal_terms);
                (company.company_name.clone(), company)
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self {
            by_name,
            legal_terms: legal_terms.to_vec(),
        }
    }

    pub fn clean_name(&self, raw: &str) -> String {
        clean_company_name(raw, &self.legal_terms)
    }

    /// Registry entry for `name` (raw or cleaned).
    pub fn lookup(&self, name: &str) -> Option<&CompanyInfo> {
        self.by_name.get(&self.clean_name(name))
    }

    /// Entry for `name`, or an unclassified one carrying the cleaned name.
    pub fn resolve(&self, name: &str) -> CompanyInfo {
        let cleaned = self.clean_name(name);
        self.by_name.get(&cleaned).cloned().unwrap_or(CompanyInfo {
            company_name: cleaned,
            ..CompanyInfo::default()
        })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}
