use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::collect::{Collector, CollectionPipeline, JsonFileCollector, PageFetcher, SpiderCollector, SpiderSession};
use crate::dates::{DateResolver, TargetDateSet};
use crate::digest::{DigestSink, HtmlDigestSink, Snapshot};
use crate::record::{BucketKind, Buckets};
use crate::settings::{Settings, StoreBackend};
use crate::store::{MemoryStore, SheetsStore, SqliteStore, StoreError, TableStore};
use crate::upload::{BucketUpload, UploadMerger, UploadResult};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_UPLOADS_FAILED: i32 = 2;

/// Open the configured backend. Sheets credentials are checked here, so a
/// missing token file surfaces as `StoreError::Auth` before any upload.
pub fn open_store(settings: &Settings) -> Result<Box<dyn TableStore>, StoreError> {
    match settings.store {
        StoreBackend::Sheets => {
            let id = settings
                .spreadsheet_id
                .clone()
                .ok_or_else(|| StoreError::Auth("spreadsheet_id is not set".into()))?;
            let token_file = settings
                .sheets_token_file
                .as_ref()
                .ok_or_else(|| StoreError::Auth("sheets_token_file is not set".into()))?;
            let store = SheetsStore::from_token_file(id, token_file)?;
            info!(url = %store.sheet_url(), "using Google Sheets store");
            Ok(Box::new(store))
        }
        StoreBackend::Sqlite => {
            info!(path = %settings.sqlite_path.display(), "using SQLite store");
            Ok(Box::new(SqliteStore::open(&settings.sqlite_path)?))
        }
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

/// Spider collectors for every bucket, or JSON export collectors when
/// `exports` names a directory. Buckets without an export file are skipped.
pub fn build_collectors(settings: &Settings, exports: Option<&Path>) -> Vec<Box<dyn Collector>> {
    match exports {
        Some(dir) => BucketKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let collector = JsonFileCollector::in_dir(kind, dir);
                if collector.path().exists() {
                    Some(Box::new(collector) as Box<dyn Collector>)
                } else {
                    debug!(path = %collector.path().display(), "no export for bucket");
                    None
                }
            })
            .collect(),
        None => {
            let session = SpiderSession::new(settings.spider_api_key.as_deref(), settings.retry_attempts);
            if !session.is_connected() {
                warn!("No spider.cloud session, collection will abort on the first fetch");
            }
            let session: Arc<dyn PageFetcher> = Arc::new(session);
            BucketKind::ALL
                .into_iter()
                .map(|kind| {
                    Box::new(
                        SpiderCollector::new(kind, Arc::clone(&session))
                            .with_max_pages(settings.max_pages)
                            .with_details(settings.fetch_details),
                    ) as Box<dyn Collector>
                })
                .collect()
        }
    }
}

pub fn build_sinks(settings: &Settings) -> Vec<Box<dyn DigestSink>> {
    if settings.digest_path.as_os_str().is_empty() {
        return Vec::new();
    }
    vec![Box::new(HtmlDigestSink::new(settings.digest_path.clone()))]
}

pub fn merger<'a>(store: &'a dyn TableStore, settings: &Settings) -> UploadMerger<'a> {
    BucketKind::ALL
        .into_iter()
        .fold(UploadMerger::new(store), |m, kind| m.with_sheet(kind, settings.sheet_name(kind)))
}

pub struct RunContext<'a> {
    pub settings: &'a Settings,
    pub resolver: DateResolver,
    pub collectors: Vec<Box<dyn Collector>>,
    /// `None` when the store could not be opened; every upload then fails.
    pub store: Option<&'a dyn TableStore>,
    pub sinks: Vec<Box<dyn DigestSink>>,
    pub clear: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_date: NaiveDate,
    pub targets: TargetDateSet,
    pub collected: Vec<(BucketKind, usize)>,
    pub backup: Option<PathBuf>,
    pub uploads: Vec<BucketUpload>,
    pub fatal: Option<String>,
    pub exit_code: i32,
}

impl RunReport {
    fn new(run_date: NaiveDate, targets: TargetDateSet) -> Self {
        Self {
            run_date,
            targets,
            collected: Vec::new(),
            backup: None,
            uploads: Vec::new(),
            fatal: None,
            exit_code: EXIT_OK,
        }
    }

    pub fn total_collected(&self) -> usize {
        self.collected.iter().map(|(_, n)| n).sum()
    }

    pub fn print(&self) {
        println!("Run date:  {}", self.run_date.format("%a %d %b %Y"));
        println!("Targets:   {}", self.targets);
        for (kind, n) in &self.collected {
            println!("  {:<30} {:>4}", kind.to_string(), n);
        }
        println!("Collected: {}", self.total_collected());
        match &self.backup {
            Some(path) => println!("Backup:    {}", path.display()),
            None => println!("Backup:    (not written)"),
        }
        for u in &self.uploads {
            let status = if u.result.success { "ok" } else { "FAILED" };
            let start = u
                .result
                .start_row
                .map(|r| format!("from row {}", r))
                .unwrap_or_default();
            println!(
                "  {:<30} -> {:<26} {:<6} {:>4} rows {}",
                u.kind.to_string(),
                u.sheet,
                status,
                u.result.rows_written,
                start
            );
        }
        if let Some(fatal) = &self.fatal {
            println!("Fatal:     {}", fatal);
        }
    }
}

/// What the `targets` command prints for a reference day.
pub fn describe_targets(resolver: &DateResolver) -> Vec<String> {
    let targets = resolver.target_dates();
    let window = if targets.is_empty() {
        "Weekend: nothing to collect".to_string()
    } else if targets.is_weekend_rollup() {
        format!("Targets: {} (weekend)", resolver.weekend_dates().join(", "))
    } else {
        format!("Targets: {}", resolver.yesterday_string())
    };
    vec![format!("Today:   {}", resolver.today_string()), window]
}

/// Exit status for a set of uploads: 2 when every attempted upload failed.
pub fn upload_exit_code(uploads: &[BucketUpload]) -> i32 {
    if !uploads.is_empty() && uploads.iter().all(|u| !u.result.success) {
        EXIT_UPLOADS_FAILED
    } else {
        EXIT_OK
    }
}

async fn upload_buckets(
    store: Option<&dyn TableStore>,
    settings: &Settings,
    buckets: &Buckets,
    clear: bool,
) -> Vec<BucketUpload> {
    match store {
        Some(store) => merger(store, settings).upload_all(buckets, clear).await,
        None => buckets
            .iter()
            .filter(|b| clear || !b.is_empty())
            .map(|b| {
                error!(bucket = %b.kind, "no store available, bucket not uploaded");
                BucketUpload {
                    kind: b.kind,
                    sheet: settings.sheet_name(b.kind),
                    result: UploadResult::default(),
                }
            })
            .collect(),
    }
}

/// One daily run: resolve targets, collect, back up, upload, deliver.
///
/// The JSON backup is written before anything can fail the run, including
/// after a fatal collection error.
pub async fn run_daily(ctx: RunContext<'_>) -> RunReport {
    let today = ctx.resolver.today();
    let targets = ctx.resolver.target_dates();
    let mut report = RunReport::new(today, targets.clone());

    if targets.is_empty() {
        info!(date = %today, "weekend, nothing to collect");
        return report;
    }
    info!(targets = %targets, collectors = ctx.collectors.len(), "collecting");

    let collection = CollectionPipeline::new(ctx.resolver, targets)
        .run(&ctx.collectors)
        .await;
    report.collected = collection
        .buckets
        .iter()
        .map(|b| (b.kind, b.len()))
        .collect();

    let snapshot = Snapshot::from_buckets(&collection.buckets, today);
    match snapshot.write_json(&ctx.settings.backup_path) {
        Ok(()) => report.backup = Some(ctx.settings.backup_path.clone()),
        Err(e) => error!("JSON backup failed: {:#}", e),
    }

    if let Some(fatal) = collection.fatal {
        report.fatal = Some(fatal.to_string());
        report.exit_code = EXIT_FATAL;
        return report;
    }

    report.uploads = upload_buckets(ctx.store, ctx.settings, &collection.buckets, ctx.clear).await;
    for u in &report.uploads {
        info!(
            bucket = %u.kind,
            sheet = %u.sheet,
            success = u.result.success,
            rows = u.result.rows_written,
            "upload result"
        );
    }

    for sink in &ctx.sinks {
        if let Err(e) = sink.deliver(&snapshot).await {
            warn!(sink = sink.name(), "digest delivery failed: {:#}", e);
        }
    }

    report.exit_code = upload_exit_code(&report.uploads);
    report
}

/// Re-upload a JSON backup written by an earlier run.
pub async fn upload_backup(
    store: Option<&dyn TableStore>,
    settings: &Settings,
    backup: &Path,
    clear: bool,
) -> Result<Vec<BucketUpload>> {
    let buckets = Snapshot::read_json(backup)?.into_buckets();
    info!(path = %backup.display(), records = buckets.total(), "re-uploading backup");
    Ok(upload_buckets(store, settings, &buckets, clear).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawRecord;

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            store: StoreBackend::Memory,
            backup_path: dir.join("downloads/rulings.json"),
            digest_path: dir.join("downloads/digest.html"),
            ..Settings::default()
        }
    }

    fn resolver(y: i32, m: u32, d: u32) -> DateResolver {
        DateResolver::new(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn export_collectors() -> Vec<Box<dyn Collector>> {
        vec![Box::new(JsonFileCollector::new(
            BucketKind::LitigationTracker,
            "tests/fixtures/export_litigation.json",
        ))]
    }

    #[tokio::test]
    async fn weekend_run_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = MemoryStore::new();
        let report = run_daily(RunContext {
            settings: &settings,
            resolver: resolver(2025, 6, 7),
            collectors: export_collectors(),
            store: Some(&store),
            sinks: build_sinks(&settings),
            clear: false,
        })
        .await;
        assert_eq!(report.exit_code, EXIT_OK);
        assert!(report.targets.is_empty());
        assert!(report.backup.is_none());
        assert!(!settings.backup_path.exists());
    }

    #[tokio::test]
    async fn monday_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = MemoryStore::new();
        let report = run_daily(RunContext {
            settings: &settings,
            resolver: resolver(2025, 6, 9),
            collectors: export_collectors(),
            store: Some(&store),
            sinks: build_sinks(&settings),
            clear: false,
        })
        .await;

        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(report.total_collected(), 2);
        assert_eq!(report.backup.as_deref(), Some(settings.backup_path.as_path()));
        assert_eq!(report.uploads.len(), 1);
        assert!(report.uploads[0].result.success);
        // header + two entries
        assert_eq!(store.rows("Litigation Tracker").len(), 3);
        assert!(settings.digest_path.exists());

        let backup = Snapshot::read_json(&settings.backup_path).unwrap();
        assert_eq!(backup.taxsutra.litigation_tracker.len(), 2);
    }

    #[tokio::test]
    async fn fatal_collection_still_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = MemoryStore::new();
        let session: Arc<dyn PageFetcher> = Arc::new(SpiderSession::new(None, 0));
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(JsonFileCollector::new(
                BucketKind::LitigationTracker,
                "tests/fixtures/export_litigation.json",
            )),
            Box::new(SpiderCollector::new(BucketKind::Rulings, session)),
        ];
        let report = run_daily(RunContext {
            settings: &settings,
            resolver: resolver(2025, 6, 9),
            collectors,
            store: Some(&store),
            sinks: Vec::new(),
            clear: false,
        })
        .await;

        assert_eq!(report.exit_code, EXIT_FATAL);
        assert!(report.fatal.is_some());
        assert!(report.uploads.is_empty());
        assert!(store.rows("Litigation Tracker").is_empty());
        let backup = Snapshot::read_json(&settings.backup_path).unwrap();
        assert_eq!(backup.taxsutra.litigation_tracker.len(), 2);
    }

    #[tokio::test]
    async fn missing_store_fails_every_upload() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let report = run_daily(RunContext {
            settings: &settings,
            resolver: resolver(2025, 6, 9),
            collectors: export_collectors(),
            store: None,
            sinks: Vec::new(),
            clear: false,
        })
        .await;
        assert_eq!(report.exit_code, EXIT_UPLOADS_FAILED);
        assert_eq!(report.uploads.len(), 1);
        assert_eq!(report.uploads[0].kind, BucketKind::LitigationTracker);
        assert!(report.backup.is_some());
    }

    #[tokio::test]
    async fn backup_reupload_appends_after_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let mut buckets = Buckets::default();
        buckets.extend(
            BucketKind::Gst,
            [RawRecord::Update(crate::record::ExternalUpdate {
                title: Some("CBIC notifies amnesty conditions".into()),
                date: Some("08 Jun 2025".into()),
                ..Default::default()
            })],
        );
        Snapshot::from_buckets(&buckets, NaiveDate::from_ymd_opt(2025, 6, 9).unwrap())
            .write_json(&settings.backup_path)
            .unwrap();

        let store = MemoryStore::new();
        let first = upload_backup(Some(&store), &settings, &settings.backup_path, false)
            .await
            .unwrap();
        assert_eq!(upload_exit_code(&first), EXIT_OK);
        let second = upload_backup(Some(&store), &settings, &settings.backup_path, false)
            .await
            .unwrap();
        assert_eq!(second[0].result.start_row, Some(3));
        assert_eq!(store.rows("Taxmann GST").len(), 3);
    }

    #[test]
    fn targets_lines_follow_the_weekday() {
        assert_eq!(
            describe_targets(&resolver(2025, 6, 9)),
            vec!["Today:   09 June 2025", "Targets: Jun 07, 2025, Jun 08, 2025 (weekend)"]
        );
        assert_eq!(
            describe_targets(&resolver(2025, 6, 11))[1],
            "Targets: Jun 10, 2025"
        );
        for saturday_or_sunday in [7, 8] {
            assert_eq!(
                describe_targets(&resolver(2025, 6, saturday_or_sunday))[1],
                "Weekend: nothing to collect"
            );
        }
    }

    #[tokio::test]
    async fn dry_run_leaves_the_real_backup_alone() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        std::fs::create_dir_all(settings.backup_path.parent().unwrap()).unwrap();
        std::fs::write(&settings.backup_path, "last real run").unwrap();

        let dry = settings.clone().into_dry_run();
        let store = MemoryStore::new();
        let report = run_daily(RunContext {
            settings: &dry,
            resolver: resolver(2025, 6, 9),
            collectors: export_collectors(),
            store: Some(&store),
            sinks: Vec::new(),
            clear: false,
        })
        .await;

        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(std::fs::read_to_string(&settings.backup_path).unwrap(), "last real run");
        assert!(Snapshot::read_json(&dry.backup_path).is_ok());
    }

    #[test]
    fn export_dir_only_builds_present_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("taxmann-gst.json"), "[]").unwrap();
        let settings = Settings::default();
        let collectors = build_collectors(&settings, Some(dir.path()));
        assert_eq!(collectors.len(), 1);
        assert_eq!(collectors[0].kind(), BucketKind::Gst);
        assert_eq!(build_collectors(&settings, None).len(), 6);
    }

    #[test]
    fn store_auth_errors_surface_at_open() {
        let settings = Settings {
            spreadsheet_id: Some("abc".into()),
            sheets_token_file: Some(PathBuf::from("/nonexistent/token.json")),
            ..Settings::default()
        };
        assert!(matches!(open_store(&settings), Err(StoreError::Auth(_))));
    }
}
