use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::record::BucketKind;

const DEFAULT_FILE: &str = "taxdigest.toml";
const ENV_PREFIX: &str = "TAXDIGEST";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sheets,
    Sqlite,
    Memory,
}

/// Everything a run needs, read once in `main` and passed down.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreBackend,
    pub spreadsheet_id: Option<String>,
    pub sheets_token_file: Option<PathBuf>,
    /// Bucket name (`rulings`, `gst`, ...) → sheet tab.
    pub sheet_names: BTreeMap<String, String>,
    pub sqlite_path: PathBuf,
    pub backup_path: PathBuf,
    pub digest_path: PathBuf,
    pub spider_api_key: Option<String>,
    pub max_pages: usize,
    pub fetch_details: bool,
    pub retry_attempts: u32,
    pub input_dir: Option<PathBuf>,
    pub utc_offset_minutes: i32,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreBackend::Sheets,
            spreadsheet_id: None,
            sheets_token_file: None,
            sheet_names: BTreeMap::new(),
            sqlite_path: PathBuf::from("downloads/sheets.sqlite"),
            backup_path: PathBuf::from("downloads/rulings.json"),
            digest_path: PathBuf::from("downloads/digest.html"),
            spider_api_key: None,
            max_pages: 10,
            fetch_details: true,
            retry_attempts: 3,
            input_dir: None,
            utc_offset_minutes: 330,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Layer `TAXDIGEST_*` environment variables over the TOML file. An
    /// explicit `path` must exist; the default `taxdigest.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        // same variable the scraper has always read
        if settings.spider_api_key.is_none() {
            settings.spider_api_key = std::env::var("SPIDER_API_KEY").ok();
        }
        Ok(settings)
    }

    /// Uploads go to memory and the backup is written beside the real one,
    /// `rulings.json` becoming `rulings.dry-run.json`.
    pub fn into_dry_run(mut self) -> Self {
        self.store = StoreBackend::Memory;
        let stem = self
            .backup_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup".to_string());
        self.backup_path.set_file_name(format!("{}.dry-run.json", stem));
        self
    }

    pub fn sheet_name(&self, kind: BucketKind) -> String {
        self.sheet_names
            .get(kind.name())
            .cloned()
            .unwrap_or_else(|| kind.default_sheet().to_string())
    }

    /// Every problem at once, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.store == StoreBackend::Sheets {
            if self.spreadsheet_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                problems.push("spreadsheet_id is required for the sheets store".to_string());
            }
            if self.sheets_token_file.is_none() {
                problems.push("sheets_token_file is required for the sheets store".to_string());
            }
        }
        for (key, sheet) in &self.sheet_names {
            if BucketKind::parse(key).is_none() {
                problems.push(format!("sheet_names: unknown bucket {:?}", key));
            }
            if sheet.trim().is_empty() {
                problems.push(format!("sheet_names.{}: empty sheet name", key));
            }
        }
        if self.max_pages == 0 {
            problems.push("max_pages must be at least 1".to_string());
        }
        if self.retry_attempts > 10 {
            problems.push(format!("retry_attempts {} is more than 10", self.retry_attempts));
        }
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            problems.push(format!(
                "utc_offset_minutes {} is outside -720..=840",
                self.utc_offset_minutes
            ));
        }
        if self.backup_path.as_os_str().is_empty() {
            problems.push("backup_path must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.backup_path, PathBuf::from("downloads/rulings.json"));
        assert_eq!(s.max_pages, 10);
        assert_eq!(s.utc_offset_minutes, 330);
        assert_eq!(s.sheet_name(BucketKind::FemaBanking), "Taxmann FEMA & Banking");
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxdigest.toml");
        std::fs::write(
            &path,
            r#"
store = "sqlite"
sqlite_path = "/tmp/cells.sqlite"
fetch_details = false

[sheet_names]
rulings = "DT Rulings"
"#,
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.store, StoreBackend::Sqlite);
        assert!(!s.fetch_details);
        assert_eq!(s.sheet_name(BucketKind::Rulings), "DT Rulings");
        assert_eq!(s.sheet_name(BucketKind::Gst), "Taxmann GST");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/taxdigest.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut s = Settings {
            max_pages: 0,
            utc_offset_minutes: 2000,
            ..Settings::default()
        };
        s.sheet_names.insert("bogus".into(), " ".into());
        let Err(ConfigError::Invalid(problems)) = s.validate() else {
            panic!("expected invalid");
        };
        // missing id, missing token file, unknown bucket, empty name, pages, offset
        assert_eq!(problems.len(), 6);
    }

    #[test]
    fn dry_run_backup_sits_beside_the_real_one() {
        let s = Settings::default().into_dry_run();
        assert_eq!(s.store, StoreBackend::Memory);
        assert_eq!(s.backup_path, PathBuf::from("downloads/rulings.dry-run.json"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn memory_store_needs_no_credentials() {
        let s = Settings {
            store: StoreBackend::Memory,
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }
}
