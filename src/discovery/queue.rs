// src/discovery/queue.rs
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::model::{cmp_classification, NsdRecord, QueuedFiling};
use crate::storage::CompanyRegistry;

/// Known filings whose statements still need fetching.
///
/// Keeps the latest version per (company, reference date), orders the result
/// by sector, subsector, segment (unclassified last), company, date and
/// version, and drops filings whose version is already stored.
pub fn build_scrape_queue(
    filings: Vec<NsdRecord>,
    registry: &CompanyRegistry,
    stored_versions: &HashMap<(String, NaiveDate), u32>,
) -> Vec<QueuedFiling> {
    let total = filings.len();
    let mut latest: BTreeMap<(String, NaiveDate), QueuedFiling> = BTreeMap::new();
    for filing in filings {
        let Some(date) = filing.date else {
            tracing::debug!("NSD {} has no reference date, not queued", filing.nsd);
            continue;
        };
        let company = registry.resolve(&filing.company);
        if company.company_name.is_empty() {
            tracing::debug!("NSD {} has no company name, not queued", filing.nsd);
            continue;
        }
        let key = (company.company_name.clone(), date);
        let newer = latest
            .get(&key)
            .map_or(true, |q| (filing.version, filing.nsd) > (q.filing.version, q.filing.nsd));
        if newer {
            latest.insert(key, QueuedFiling { filing, company });
        }
    }

    let mut queue: Vec<QueuedFiling> = latest.into_values().collect();
    queue.sort_by(|a, b| {
        cmp_classification(
            (a.company.sector.as_str(), a.company.subsector.as_str(), a.company.segment.as_str()),
            (b.company.sector.as_str(), b.company.subsector.as_str(), b.company.segment.as_str()),
        )
        .then_with(|| a.company.company_name.cmp(&b.company.company_name))
        .then_with(|| a.filing.date.cmp(&b.filing.date))
        .then_with(|| a.filing.version.cmp(&b.filing.version))
    });

    queue.retain(|q| {
        let Some(date) = q.filing.date else { return false };
        stored_versions
            .get(&(q.company.company_name.clone(), date))
            .map_or(true, |stored| q.filing.version > *stored)
    });

    tracing::info!("Scrape queue: {} of {} known filings need statements", queue.len(), total);
    queue
}
