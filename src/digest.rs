use std::fmt::Write as _;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dates;
use crate::record::{
    BucketKind, Buckets, ExpertArticle, ExternalUpdate, LitigationEntry, RawRecord, Ruling,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxsutraSection {
    #[serde(default)]
    pub rulings: Vec<Ruling>,
    #[serde(default)]
    pub expert_corner: Vec<ExpertArticle>,
    #[serde(default)]
    pub litigation_tracker: Vec<LitigationEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxmannSection {
    #[serde(default)]
    pub gst: Vec<ExternalUpdate>,
    #[serde(default)]
    pub direct_tax: Vec<ExternalUpdate>,
    #[serde(default)]
    pub fema_banking: Vec<ExternalUpdate>,
}

/// Everything one run collected, keyed source → bucket name → records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,
    #[serde(default)]
    pub taxsutra: TaxsutraSection,
    #[serde(default)]
    pub taxmann: TaxmannSection,
}

impl Snapshot {
    pub fn from_buckets(buckets: &Buckets, run_date: NaiveDate) -> Self {
        let mut snap = Snapshot {
            run_date: Some(dates::format_long(run_date)),
            ..Snapshot::default()
        };
        for bucket in buckets.iter() {
            for record in &bucket.records {
                match (bucket.kind, record) {
                    (BucketKind::Rulings, RawRecord::Ruling(r)) => snap.taxsutra.rulings.push(r.clone()),
                    (BucketKind::ExpertCorner, RawRecord::Expert(r)) => {
                        snap.taxsutra.expert_corner.push(r.clone())
                    }
                    (BucketKind::LitigationTracker, RawRecord::Litigation(r)) => {
                        snap.taxsutra.litigation_tracker.push(r.clone())
                    }
                    (BucketKind::Gst, RawRecord::Update(r)) => snap.taxmann.gst.push(r.clone()),
                    (BucketKind::DirectTax, RawRecord::Update(r)) => {
                        snap.taxmann.direct_tax.push(r.clone())
                    }
                    (BucketKind::FemaBanking, RawRecord::Update(r)) => {
                        snap.taxmann.fema_banking.push(r.clone())
                    }
                    (kind, _) => warn!(bucket = %kind, "record shape does not match bucket, left out of snapshot"),
                }
            }
        }
        snap
    }

    /// Rebuild buckets, e.g. to re-upload a backup.
    pub fn into_buckets(self) -> Buckets {
        let mut buckets = Buckets::default();
        buckets.extend(BucketKind::Rulings, self.taxsutra.rulings.into_iter().map(RawRecord::Ruling));
        buckets.extend(
            BucketKind::ExpertCorner,
            self.taxsutra.expert_corner.into_iter().map(RawRecord::Expert),
        );
        buckets.extend(
            BucketKind::LitigationTracker,
            self.taxsutra.litigation_tracker.into_iter().map(RawRecord::Litigation),
        );
        buckets.extend(BucketKind::Gst, self.taxmann.gst.into_iter().map(RawRecord::Update));
        buckets.extend(BucketKind::DirectTax, self.taxmann.direct_tax.into_iter().map(RawRecord::Update));
        buckets.extend(
            BucketKind::FemaBanking,
            self.taxmann.fema_banking.into_iter().map(RawRecord::Update),
        );
        buckets
    }

    pub fn total(&self) -> usize {
        self.taxsutra.rulings.len()
            + self.taxsutra.expert_corner.len()
            + self.taxsutra.litigation_tracker.len()
            + self.taxmann.gst.len()
            + self.taxmann.direct_tax.len()
            + self.taxmann.fema_banking.len()
    }

    /// Write the backup: UTF-8, two-space indent. Parent directories are created.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let file = fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!(path = %path.display(), records = self.total(), "JSON backup saved");
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {:?}", path))
    }
}

/// Receives the final snapshot of a run (mailer, shipper, archive).
/// Failures are logged by the caller and never fail the run.
#[async_trait]
pub trait DigestSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Renders a plain HTML digest to a file for the mailer to pick up.
pub struct HtmlDigestSink {
    path: PathBuf,
}

impl HtmlDigestSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DigestSink for HtmlDigestSink {
    fn name(&self) -> &str {
        "html-digest"
    }

    async fn deliver(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        fs::write(&self.path, render_html(snapshot))
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        info!(path = %self.path.display(), "digest written");
        Ok(())
    }
}

struct DigestRow<'a> {
    title: &'a str,
    category: String,
    source: &'a str,
    url: Option<&'a str>,
    summary: &'a str,
}

pub fn render_html(snapshot: &Snapshot) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Daily Tax Updates</title></head><body>\n",
    );
    if let Some(date) = &snapshot.run_date {
        let _ = writeln!(html, "<h1>Daily Tax Updates: {}</h1>", escape(date));
    }

    let rulings: Vec<DigestRow> = snapshot
        .taxsutra
        .rulings
        .iter()
        .map(|r| DigestRow {
            title: r.title.as_deref().unwrap_or("Untitled"),
            category: match r.judicial_level.as_deref().and_then(court_abbreviation) {
                Some(court) => format!("Ruling ({})", court),
                None => "Ruling".to_string(),
            },
            source: "Taxsutra",
            url: r.url.as_deref(),
            summary: r
                .conclusion
                .as_deref()
                .or(r.decision_summary.as_deref())
                .unwrap_or(""),
        })
        .collect();
    let litigation: Vec<DigestRow> = snapshot
        .taxsutra
        .litigation_tracker
        .iter()
        .map(|r| DigestRow {
            title: r.title.as_deref().unwrap_or("Untitled"),
            category: "Litigation Tracker".to_string(),
            source: "Taxsutra",
            url: r.url.as_deref(),
            summary: r.summary.as_deref().unwrap_or(""),
        })
        .collect();
    let experts: Vec<DigestRow> = snapshot
        .taxsutra
        .expert_corner
        .iter()
        .map(|r| DigestRow {
            title: r.title.as_deref().unwrap_or("Untitled"),
            category: r.tag.clone().unwrap_or_else(|| "Expert Articles".to_string()),
            source: "Taxsutra",
            url: r.url.as_deref(),
            summary: "",
        })
        .collect();
    let taxmann: Vec<DigestRow> = [
        &snapshot.taxmann.gst,
        &snapshot.taxmann.direct_tax,
        &snapshot.taxmann.fema_banking,
    ]
    .into_iter()
    .flatten()
    .map(|r| DigestRow {
        title: r.title.as_deref().unwrap_or("Untitled"),
        category: match (&r.category, &r.sub_category) {
            (Some(c), Some(s)) => format!("{} / {}", c, s),
            (Some(c), None) => c.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => String::new(),
        },
        source: r.source.as_deref().unwrap_or("Taxmann.com"),
        url: r.url.as_deref(),
        summary: r.summary.as_deref().unwrap_or(""),
    })
    .collect();

    let sections = [
        ("Taxsutra Rulings", rulings),
        ("Litigation Tracker", litigation),
        ("Expert Corner", experts),
        ("Taxmann Updates", taxmann),
    ];
    let mut any = false;
    for (heading, rows) in &sections {
        if rows.is_empty() {
            continue;
        }
        any = true;
        let _ = writeln!(html, "<h2>{}</h2>", heading);
        html.push_str("<table><tr><th>S.No</th><th>Title, Category, Source &amp; Summary</th></tr>\n");
        for (i, row) in rows.iter().enumerate() {
            let title = match row.url {
                Some(url) => format!("<a href=\"{}\">{}</a>", escape(url), escape(row.title)),
                None => escape(row.title),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td><b>{}</b><br>{} | {}<br>{}</td></tr>",
                i + 1,
                title,
                escape(&row.category),
                escape(row.source),
                escape(&shorten_summary(row.summary, 5)),
            );
        }
        html.push_str("</table>\n");
    }
    if !any {
        html.push_str("<p>No updates were found for this period.</p>\n");
    }
    html.push_str("</body></html>\n");
    html
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Trim a summary to roughly `max_lines` digest lines (300 chars each),
/// cutting at a word boundary.
pub fn shorten_summary(summary: &str, max_lines: usize) -> String {
    let summary = summary.trim();
    if dates::is_blank(summary) {
        return String::new();
    }
    let max_chars = max_lines * 300;
    if summary.chars().count() <= max_chars {
        return summary.to_string();
    }
    let truncated: String = summary.chars().take(max_chars).collect();
    match truncated.rsplit_once(' ') {
        Some((head, _)) => head.trim_end().to_string(),
        None => truncated,
    }
}

/// Short court label from a "Judicial Level & Location" value.
pub fn court_abbreviation(judicial_level: &str) -> Option<&'static str> {
    let level = judicial_level.trim();
    if dates::is_blank(level) {
        return None;
    }
    Some(if level.contains("High Court") {
        "HC"
    } else if level.contains("Supreme Court") {
        "SC"
    } else if level.contains("ITAT") {
        "ITAT"
    } else if level.contains("Tribunal") {
        "Tribunal"
    } else {
        "Court"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldBag;

    fn sample_buckets() -> Buckets {
        let mut b = Buckets::default();
        b.extend(
            BucketKind::Rulings,
            [RawRecord::Ruling(Ruling {
                title: Some("PCIT v. Résidence Hotels".into()),
                published_date: Some("Jun 07, 2025".into()),
                judicial_level: Some("High Court of Bombay".into()),
                conclusion: Some("Revenue's appeal dismissed <in full>.".into()),
                url: Some("https://www.taxsutra.com/dt/rulings/pcit-v-residence".into()),
                ..Ruling::default()
            })],
        );
        let fields: FieldBag = [("Title", "GST on ESOPs"), ("Date", "07 Jun 2025")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        b.extend(BucketKind::Gst, [RawRecord::from_fields(BucketKind::Gst, &fields)]);
        b
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()
    }

    #[test]
    fn backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads/rulings.json");
        let buckets = sample_buckets();
        let snap = Snapshot::from_buckets(&buckets, run_date());
        snap.write_json(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"taxsutra\": {"));
        assert!(text.contains("Résidence"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["taxsutra"]["rulings"].is_array());
        assert_eq!(value["taxmann"]["gst"][0]["Title"], "GST on ESOPs");
        assert_eq!(value["taxsutra"]["rulings"][0]["Published Date"], "Jun 07, 2025");

        let back = Snapshot::read_json(&path).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.into_buckets(), buckets);
    }

    #[test]
    fn reads_backup_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulings.json");
        fs::write(&path, r#"{"taxsutra": {"expert_corner": [{"title": "A", "date": "Jun 07, 2025"}]}}"#).unwrap();
        let snap = Snapshot::read_json(&path).unwrap();
        assert_eq!(snap.total(), 1);
        assert_eq!(snap.into_buckets().get(BucketKind::ExpertCorner).len(), 1);
    }

    #[test]
    fn html_digest_escapes_and_sections() {
        let snap = Snapshot::from_buckets(&sample_buckets(), run_date());
        let html = render_html(&snap);
        assert!(html.contains("<h1>Daily Tax Updates: 09 June 2025</h1>"));
        assert!(html.contains("<h2>Taxsutra Rulings</h2>"));
        assert!(html.contains("Ruling (HC)"));
        assert!(html.contains("&lt;in full&gt;"));
        assert!(html.contains("<h2>Taxmann Updates</h2>"));
        assert!(!html.contains("Expert Corner</h2>"));

        let empty = render_html(&Snapshot::default());
        assert!(empty.contains("No updates were found"));
    }

    #[tokio::test]
    async fn html_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = HtmlDigestSink::new(dir.path().join("out/digest.html"));
        sink.deliver(&Snapshot::from_buckets(&sample_buckets(), run_date()))
            .await
            .unwrap();
        assert!(dir.path().join("out/digest.html").exists());
    }

    #[test]
    fn summaries_shorten_at_word_boundary() {
        assert_eq!(shorten_summary("N/A", 5), "");
        assert_eq!(shorten_summary("  short  ", 5), "short");
        let long = "word ".repeat(400);
        let cut = shorten_summary(&long, 1);
        assert!(cut.chars().count() <= 300);
        assert!(cut.ends_with("word"));
    }

    #[test]
    fn court_labels() {
        assert_eq!(court_abbreviation("High Court of Madras"), Some("HC"));
        assert_eq!(court_abbreviation("Supreme Court"), Some("SC"));
        assert_eq!(court_abbreviation("ITAT Mumbai"), Some("ITAT"));
        assert_eq!(court_abbreviation("Customs Tribunal"), Some("Tribunal"));
        assert_eq!(court_abbreviation("AAR"), Some("Court"));
        assert_eq!(court_abbreviation("N/A"), None);
    }
}
