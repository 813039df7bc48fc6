// src/storage/mod.rs
pub mod company;
pub mod main_store;
pub mod router;
pub mod sector;

pub use company::CompanyRegistry;
pub use main_store::MainStore;
pub use router::{PersistReport, SectorRouter};
pub use sector::FinsheetStore;

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::utils::error::StorageError;

/// Files backing one sector: as-reported and normalized stores plus the
/// last-known-good copy of each.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorPaths {
    pub label: String,
    pub raw: PathBuf,
    pub raw_backup: PathBuf,
    pub math: PathBuf,
    pub math_backup: PathBuf,
}

/// Naming scheme of the store files inside the database folder.
pub struct StoreLayout {
    base_dir: PathBuf,
    stem: String,
    unclassified: String,
}

impl StoreLayout {
    /// Creates the layout, making the base directory if it doesn't exist
    pub fn new(settings: &Settings) -> Result<Self, StorageError> {
        let base_dir = settings.db_folder.clone();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(StorageError::IoError)?;
        }
        Ok(Self {
            base_dir,
            stem: settings.db_stem().to_string(),
            unclassified: settings.unclassified_sector.clone(),
        })
    }

    /// Store files for `sector`; an empty sector maps to the unclassified label.
    pub fn sector_paths(&self, sector: &str) -> SectorPaths {
        let label = if sector.trim().is_empty() {
            self.unclassified.clone()
        } else {
            sanitize_label(sector)
        };
        let file = |suffix: &str| self.base_dir.join(format!("{} {}{}.db", self.stem, label, suffix));
        SectorPaths {
            raw: file(""),
            raw_backup: file(" backup"),
            math: file(" math"),
            math_backup: file(" math backup"),
            label,
        }
    }

    /// Sector stores currently on disk, sorted by label.
    pub fn sector_stores(&self) -> Result<Vec<SectorPaths>, StorageError> {
        let prefix = format!("{} ", self.stem);
        let mut stores = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(label) = name.strip_prefix(&prefix).and_then(|rest| rest.strip_suffix(".db")) else {
                continue;
            };
            if label.ends_with(" backup") || label.ends_with(" math") {
                continue;
            }
            stores.push(self.sector_paths(label));
        }
        stores.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(stores)
    }
}

fn sanitize_label(sector: &str) -> String {
    sector
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '-' } else { c })
        .collect()
}

/// Copies `src` over `dst` through a temporary file that is synced and then
/// renamed, so `dst` is either the old backup or a complete new one.
/// Returns `false` when there is nothing to back up yet.
pub fn backup_file(src: &Path, dst: &Path) -> Result<bool, StorageError> {
    if !src.exists() {
        return Ok(false);
    }
    let failed = |source| StorageError::Backup {
        path: src.display().to_string(),
        source,
    };
    let mut tmp_name = dst.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::copy(src, &tmp).map_err(failed)?;
    fs::File::open(&tmp).and_then(|f| f.sync_all()).map_err(failed)?;
    fs::rename(&tmp, dst).map_err(failed)?;
    tracing::debug!("Backed up {} to {}", src.display(), dst.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dir: &Path) -> StoreLayout {
        let settings = Settings {
            db_folder: dir.to_path_buf(),
            ..Settings::default()
        };
        StoreLayout::new(&settings).unwrap()
    }

    #[test]
    fn test_sector_paths_naming() {
        let dir = tempfile::tempdir().unwrap();
        let paths = layout(dir.path()).sector_paths("BENS INDUSTRIAIS");
        assert_eq!(paths.raw, dir.path().join("b3 BENS INDUSTRIAIS.db"));
        assert_eq!(paths.math, dir.path().join("b3 BENS INDUSTRIAIS math.db"));
        assert_eq!(paths.raw_backup, dir.path().join("b3 BENS INDUSTRIAIS backup.db"));
        assert_eq!(paths.math_backup, dir.path().join("b3 BENS INDUSTRIAIS math backup.db"));
    }

    #[test]
    fn test_empty_sector_uses_unclassified_label() {
        let dir = tempfile::tempdir().unwrap();
        let paths = layout(dir.path()).sector_paths("");
        assert_eq!(paths.label, "SEM SETOR");
        let odd = layout(dir.path()).sector_paths("PETROLEO/GAS");
        assert_eq!(odd.label, "PETROLEO-GAS");
    }

    #[test]
    fn test_sector_stores_skip_backups_and_math() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b3.db", "b3 FINANCEIRO.db", "b3 FINANCEIRO math.db", "b3 FINANCEIRO backup.db", "b3 SAUDE.db", "other.db"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let labels: Vec<String> = layout(dir.path())
            .sector_stores()
            .unwrap()
            .into_iter()
            .map(|p| p.label)
            .collect();
        assert_eq!(labels, vec!["FINANCEIRO".to_string(), "SAUDE".to_string()]);
    }

    #[test]
    fn test_backup_file_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.db");
        let dst = dir.path().join("a backup.db");
        assert!(!backup_file(&src, &dst).unwrap());
        fs::write(&src, b"first").unwrap();
        assert!(backup_file(&src, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"first");
        assert!(!dir.path().join("a backup.db.tmp").exists());
    }
}
