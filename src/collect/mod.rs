pub mod file;
pub mod listing;
pub mod spider;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::classify::RecordClassifier;
use crate::dates::{self, DateResolver, TargetDateSet};
use crate::record::{BucketKind, Buckets, RawRecord};

pub use file::JsonFileCollector;
pub use spider::{PageFetcher, SpiderCollector, SpiderSession};

#[derive(Debug, Error)]
pub enum CollectError {
    /// No usable scraping session. Collection cannot continue at all.
    #[error("no scraping session: {0}")]
    Fatal(String),
    #[error("fetching {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CollectError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CollectError::Fatal(_))
    }
}

/// One source/category feed. The collector walks its listing in publication
/// order, asks the classifier about every entry, and returns what was
/// accepted.
#[async_trait]
pub trait Collector: Send + Sync {
    fn kind(&self) -> BucketKind;

    async fn collect(&self, classifier: &mut RecordClassifier) -> Result<Vec<RawRecord>, CollectError>;
}

#[derive(Debug)]
pub struct Collection {
    pub buckets: Buckets,
    /// Set when collection was aborted. Buckets hold what came in before.
    pub fatal: Option<CollectError>,
}

pub struct CollectionPipeline {
    resolver: DateResolver,
    targets: TargetDateSet,
}

impl CollectionPipeline {
    pub fn new(resolver: DateResolver, targets: TargetDateSet) -> Self {
        Self { resolver, targets }
    }

    /// Run collectors one after another, each with a fresh classifier.
    pub async fn run(&self, collectors: &[Box<dyn Collector>]) -> Collection {
        let mut buckets = Buckets::default();

        for collector in collectors {
            let kind = collector.kind();
            let mut classifier = RecordClassifier::new(&self.resolver, self.targets.clone());

            match collector.collect(&mut classifier).await {
                Ok(records) => {
                    let window = classifier.targets().to_strings();
                    let returned = records.len();
                    let kept: Vec<RawRecord> = records
                        .into_iter()
                        .filter(|record| {
                            let inside = record.date().is_some_and(|d| dates::is_target_date(d, &window));
                            if !inside {
                                warn!(
                                    bucket = %kind,
                                    date = record.date().unwrap_or("N/A"),
                                    title = record.title().unwrap_or("N/A"),
                                    "dropping record outside the target window"
                                );
                            }
                            inside
                        })
                        .collect();
                    info!(
                        bucket = %kind,
                        kept = kept.len(),
                        dropped = returned - kept.len(),
                        accepted = classifier.accepted(),
                        state = ?classifier.state(),
                        "collected"
                    );
                    buckets.extend(kind, kept);
                }
                Err(e) if e.is_fatal() => {
                    error!(bucket = %kind, error = %e, "collection aborted");
                    return Collection {
                        buckets,
                        fatal: Some(e),
                    };
                }
                Err(e) => {
                    warn!(bucket = %kind, error = %e, "collector failed, bucket left empty");
                }
            }
        }

        Collection {
            buckets,
            fatal: None,
        }
    }
}
