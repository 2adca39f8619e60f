use std::collections::BTreeMap;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::digest::court_abbreviation;
use crate::record::{
    Bucket, BucketKind, Buckets, ExpertArticle, ExternalUpdate, LitigationEntry, RawRecord, Ruling,
    Source,
};
use crate::store::{StoreError, TableStore};

pub const HEADERS: [&str; 4] = ["Date", "Category", "Sub-Category", "Summary"];
pub const PLACEHOLDER: &str = "N/A";
/// Column whose populated length decides where the next write lands.
const KEY_COLUMN: &str = "A";

/// Fixed column layout of one bucket kind and the sheet it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub kind: BucketKind,
    pub sheet: String,
    pub headers: Vec<String>,
}

impl Schema {
    pub fn for_kind(kind: BucketKind) -> Self {
        Self {
            kind,
            sheet: kind.default_sheet().to_string(),
            headers: HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = sheet.into();
        self
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn header_row(&self) -> Vec<String> {
        self.headers.clone()
    }

    fn render(&self, record: &RawRecord) -> Vec<String> {
        let category = self.kind.category();
        match record {
            RawRecord::Ruling(r) => ruling_row(r, category),
            RawRecord::Expert(r) => expert_row(r, category),
            RawRecord::Litigation(r) => litigation_row(r, category),
            RawRecord::Update(r) => update_row(r, category, self.kind.source()),
        }
    }
}

/// Map each record to exactly `schema.width()` cells. Missing values are
/// rendered as the placeholder here and nowhere else.
pub fn prepare_rows(bucket: &Bucket, schema: &Schema) -> Vec<Vec<String>> {
    bucket
        .records
        .iter()
        .map(|record| {
            let mut row = schema.render(record);
            row.resize(schema.width(), PLACEHOLDER.to_string());
            row
        })
        .collect()
}

fn or_placeholder(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(PLACEHOLDER)
        .to_string()
}

/// Join non-empty paragraphs with a blank line between them.
fn paragraphs<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let kept: Vec<&str> = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n\n"))
    }
}

fn ruling_row(r: &Ruling, category: &str) -> Vec<String> {
    let court = r.judicial_level.as_deref().and_then(court_abbreviation);
    let sub_category = match court {
        Some(court) => format!("Case Laws ({})", court),
        None => "Case Laws".to_string(),
    };

    let refs: Vec<&str> = [
        r.citation.as_deref(),
        r.case_name.as_deref(),
        r.judicial_level.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    let citation = if refs.is_empty() {
        format!("Source: {}", Source::Taxsutra.display_name())
    } else {
        format!("{} | {}", Source::Taxsutra.display_name(), refs.join(" | "))
    };

    let body = r.conclusion.as_deref().or(r.decision_summary.as_deref());
    vec![
        or_placeholder(r.published_date.as_deref()),
        category.to_string(),
        sub_category,
        or_placeholder(paragraphs([r.title.as_deref(), body, Some(citation.as_str())]).as_deref()),
    ]
}

fn expert_row(r: &ExpertArticle, category: &str) -> Vec<String> {
    let link = r.url.as_deref().map(|u| format!("Read more: {}", u));
    vec![
        or_placeholder(r.date.as_deref()),
        category.to_string(),
        r.tag.clone().unwrap_or_else(|| "Expert Articles".to_string()),
        or_placeholder(
            paragraphs([
                r.title.as_deref(),
                link.as_deref(),
                Some("Source: Taxsutra Expert Corner"),
            ])
            .as_deref(),
        ),
    ]
}

fn litigation_row(r: &LitigationEntry, category: &str) -> Vec<String> {
    vec![
        or_placeholder(r.date.as_deref()),
        category.to_string(),
        "Litigation Tracker".to_string(),
        or_placeholder(
            paragraphs([
                r.title.as_deref(),
                r.summary.as_deref(),
                Some("Source: Taxsutra Litigation Tracker"),
            ])
            .as_deref(),
        ),
    ]
}

fn update_row(r: &ExternalUpdate, category: &str, source: Source) -> Vec<String> {
    let trailer = match (&r.citation, &r.source) {
        (Some(citation), _) => format!("Citation: {}", citation),
        (None, Some(src)) => format!("Source: {}", src),
        (None, None) => format!("Source: {}", source.display_name()),
    };
    vec![
        or_placeholder(r.date.as_deref()),
        r.category.clone().unwrap_or_else(|| category.to_string()),
        r.sub_category.clone().unwrap_or_else(|| "General".to_string()),
        or_placeholder(paragraphs([r.title.as_deref(), r.summary.as_deref(), Some(trailer.as_str())]).as_deref()),
    ]
}

/// Next writable row of `sheet`: 1 for an empty sheet (header goes first),
/// otherwise one past the last populated key-column cell.
///
/// Not safe with concurrent writers: two runs can compute the same cursor
/// and overwrite each other's first rows.
pub async fn next_available_row(store: &dyn TableStore, sheet: &str) -> Result<usize, StoreError> {
    let existing = store.read_column(sheet, KEY_COLUMN).await?;
    Ok(if existing.is_empty() { 1 } else { existing.len() + 1 })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub success: bool,
    pub cells_written: usize,
    pub rows_written: usize,
    pub start_row: Option<usize>,
}

impl UploadResult {
    fn failed() -> Self {
        Self::default()
    }
}

/// Write one bucket. Appends after existing data unless `clear_first`, in
/// which case the sheet is wiped and rewritten from row 1 with headers.
///
/// Store failures are logged and reported as `success == false`; they never
/// propagate. Not idempotent: two default calls append the data twice.
pub async fn upload(
    store: &dyn TableStore,
    bucket: &Bucket,
    schema: &Schema,
    clear_first: bool,
) -> UploadResult {
    match try_upload(store, bucket, schema, clear_first).await {
        Ok(result) => result,
        Err(e) => {
            error!(bucket = %bucket.kind, sheet = %schema.sheet, "upload failed: {}", e);
            UploadResult::failed()
        }
    }
}

async fn try_upload(
    store: &dyn TableStore,
    bucket: &Bucket,
    schema: &Schema,
    clear_first: bool,
) -> Result<UploadResult, StoreError> {
    if bucket.is_empty() && !clear_first {
        info!(bucket = %bucket.kind, "nothing to upload");
        return Ok(UploadResult {
            success: true,
            ..UploadResult::default()
        });
    }

    let data = prepare_rows(bucket, schema);

    let start_row = if clear_first {
        if !store.clear(&schema.sheet).await? {
            return Err(StoreError::Other(format!("could not clear {}", schema.sheet)));
        }
        1
    } else {
        next_available_row(store, &schema.sheet).await?
    };

    let mut rows = Vec::with_capacity(data.len() + 1);
    if start_row == 1 {
        rows.push(schema.header_row());
    }
    rows.extend(data);

    let summary = store.write(&schema.sheet, start_row, &rows).await?;
    info!(
        bucket = %bucket.kind,
        sheet = %schema.sheet,
        start_row,
        records = bucket.len(),
        cells = summary.cells_written,
        "uploaded"
    );

    Ok(UploadResult {
        success: true,
        cells_written: summary.cells_written,
        rows_written: bucket.len(),
        start_row: Some(start_row),
    })
}

#[derive(Debug, Clone)]
pub struct BucketUpload {
    pub kind: BucketKind,
    pub sheet: String,
    pub result: UploadResult,
}

/// Uploads every bucket of a run through one store, one after another.
pub struct UploadMerger<'a> {
    store: &'a dyn TableStore,
    schemas: BTreeMap<BucketKind, Schema>,
}

impl<'a> UploadMerger<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self {
            store,
            schemas: BucketKind::ALL
                .into_iter()
                .map(|k| (k, Schema::for_kind(k)))
                .collect(),
        }
    }

    pub fn with_sheet(mut self, kind: BucketKind, sheet: impl Into<String>) -> Self {
        self.schemas.insert(kind, Schema::for_kind(kind).with_sheet(sheet));
        self
    }

    pub fn schema(&self, kind: BucketKind) -> Schema {
        self.schemas
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Schema::for_kind(kind))
    }

    /// Upload each non-empty bucket independently; a failure in one never
    /// stops the others. With `clear_first`, empty buckets are also reset.
    pub async fn upload_all(&self, buckets: &Buckets, clear_first: bool) -> Vec<BucketUpload> {
        let pending: Vec<&Bucket> = buckets
            .iter()
            .filter(|b| clear_first || !b.is_empty())
            .collect();

        let pb = ProgressBar::new(pending.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:30} {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("=> "));
        }

        let mut results = Vec::with_capacity(pending.len());
        for bucket in pending {
            let schema = self.schema(bucket.kind);
            pb.set_message(schema.sheet.clone());
            let result = upload(self.store, bucket, &schema, clear_first).await;
            if result.success {
                info!(bucket = %bucket.kind, rows = result.rows_written, "bucket uploaded");
            } else {
                warn!(bucket = %bucket.kind, "bucket failed to upload, data kept in JSON backup");
            }
            results.push(BucketUpload {
                kind: bucket.kind,
                sheet: schema.sheet,
                result,
            });
            pb.inc(1);
        }
        pb.finish_and_clear();
        results
    }
}
