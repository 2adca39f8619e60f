use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{CollectError, Collector};
use crate::classify::{RecordClassifier, Verdict};
use crate::record::{BucketKind, FieldBag, RawRecord};

/// Records exported by an external scraper: a JSON array of flat objects,
/// newest first, keyed the way the sites label their fields.
pub struct JsonFileCollector {
    kind: BucketKind,
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(kind: BucketKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// `<dir>/<source>-<bucket>.json`, e.g. `taxsutra-rulings.json`.
    pub fn in_dir(kind: BucketKind, dir: &Path) -> Self {
        Self::new(kind, dir.join(format!("{}.json", kind)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_fields(row: BTreeMap<String, serde_json::Value>) -> FieldBag {
    row.into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

#[async_trait]
impl Collector for JsonFileCollector {
    fn kind(&self) -> BucketKind {
        self.kind
    }

    async fn collect(&self, classifier: &mut RecordClassifier) -> Result<Vec<RawRecord>, CollectError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CollectError::Io {
                path: self.path.clone(),
                source,
            })?;
        let rows: Vec<BTreeMap<String, serde_json::Value>> =
            serde_json::from_str(&raw).map_err(|source| CollectError::Json {
                path: self.path.clone(),
                source,
            })?;

        let total = rows.len();
        let mut records = Vec::new();
        for row in rows {
            let record = RawRecord::from_fields(self.kind, &to_fields(row));
            match classifier.observe(record.date().unwrap_or("")) {
                Verdict::Accept => records.push(record),
                Verdict::Stop => break,
                Verdict::SkipToday | Verdict::SkipOutside => {
                    debug!(title = record.title().unwrap_or("N/A"), "skipped");
                }
            }
        }

        info!(
            bucket = %self.kind,
            path = %self.path.display(),
            rows = total,
            accepted = records.len(),
            "export read"
        );
        Ok(records)
    }
}
