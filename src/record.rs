use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dates;

/// Loosely-keyed fields as scraped, before conversion.
pub type FieldBag = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Taxsutra,
    Taxmann,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::Taxsutra => "taxsutra",
            Source::Taxmann => "taxmann",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Source::Taxsutra => "Taxsutra",
            Source::Taxmann => "Taxmann.com",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketKind {
    Rulings,
    ExpertCorner,
    LitigationTracker,
    Gst,
    DirectTax,
    FemaBanking,
}

impl BucketKind {
    pub const ALL: [BucketKind; 6] = [
        BucketKind::Rulings,
        BucketKind::ExpertCorner,
        BucketKind::LitigationTracker,
        BucketKind::Gst,
        BucketKind::DirectTax,
        BucketKind::FemaBanking,
    ];

    pub fn source(self) -> Source {
        match self {
            BucketKind::Rulings | BucketKind::ExpertCorner | BucketKind::LitigationTracker => {
                Source::Taxsutra
            }
            BucketKind::Gst | BucketKind::DirectTax | BucketKind::FemaBanking => Source::Taxmann,
        }
    }

    /// Key under the source in the JSON backup.
    pub fn name(self) -> &'static str {
        match self {
            BucketKind::Rulings => "rulings",
            BucketKind::ExpertCorner => "expert_corner",
            BucketKind::LitigationTracker => "litigation_tracker",
            BucketKind::Gst => "gst",
            BucketKind::DirectTax => "direct_tax",
            BucketKind::FemaBanking => "fema_banking",
        }
    }

    pub fn default_sheet(self) -> &'static str {
        match self {
            BucketKind::Rulings => "Rulings",
            BucketKind::ExpertCorner => "Expert Corner",
            BucketKind::LitigationTracker => "Litigation Tracker",
            BucketKind::Gst => "Taxmann GST",
            BucketKind::DirectTax => "Taxmann Direct Tax",
            BucketKind::FemaBanking => "Taxmann FEMA & Banking",
        }
    }

    /// Category column value when the record carries none.
    pub fn category(self) -> &'static str {
        match self {
            BucketKind::Rulings | BucketKind::ExpertCorner | BucketKind::LitigationTracker => {
                "Direct Tax"
            }
            BucketKind::Gst => "GST",
            BucketKind::DirectTax => "Direct Tax",
            BucketKind::FemaBanking => "FEMA & Banking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|k| {
            k.name() == key || format!("{}_{}", k.source().name(), k.name()) == key
        })
    }

    /// Route a Taxmann archive link to its category bucket by URL path.
    pub fn from_taxmann_url(url: &str) -> Option<Self> {
        if url.contains("/research/gst-new") {
            Some(BucketKind::Gst)
        } else if url.contains("/research/direct-tax-laws") {
            Some(BucketKind::DirectTax)
        } else if url.contains("/research/fema-banking-insurance") {
            Some(BucketKind::FemaBanking)
        } else {
            None
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source().name(), self.name().replace('_', "-"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruling {
    #[serde(rename = "Title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "Citation", default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(rename = "Published Date", default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(rename = "Conclusion", default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(rename = "Decision Summary", default, skip_serializing_if = "Option::is_none")]
    pub decision_summary: Option<String>,
    #[serde(rename = "Case Law Information", default, skip_serializing_if = "Option::is_none")]
    pub case_law_information: Option<String>,
    #[serde(rename = "Case Name", default, skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
    #[serde(rename = "Judicial Level & Location", default, skip_serializing_if = "Option::is_none")]
    pub judicial_level: Option<String>,
    #[serde(rename = "Taxpayer Name", default, skip_serializing_if = "Option::is_none")]
    pub taxpayer_name: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "PDF Path", default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertArticle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LitigationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUpdate {
    #[serde(rename = "Title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "Category", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "Sub-Category", default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(rename = "Summary", default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "Citation", default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One scraped item, typed by where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RawRecord {
    Ruling(Ruling),
    Expert(ExpertArticle),
    Litigation(LitigationEntry),
    Update(ExternalUpdate),
}

impl RawRecord {
    /// Convert a scraped field bag at the collector boundary. Keys are
    /// matched case-insensitively against each field's aliases; blank and
    /// "N/A" values become `None`.
    pub fn from_fields(kind: BucketKind, fields: &FieldBag) -> Self {
        let get = |aliases: &[&str]| lookup(fields, aliases);
        match kind {
            BucketKind::Rulings => RawRecord::Ruling(Ruling {
                title: get(&["Title"]),
                citation: get(&["Citation"]),
                published_date: get(&["Published Date", "Date", "Published"]),
                conclusion: get(&["Conclusion"]),
                decision_summary: get(&["Decision Summary", "Summary"]),
                case_law_information: get(&["Case Law Information"]),
                case_name: get(&["Case Name"]),
                judicial_level: get(&["Judicial Level & Location", "Judicial Level", "Court"]),
                taxpayer_name: get(&["Taxpayer Name"]),
                url: get(&["URL", "Link", "href"]),
                pdf_path: get(&["PDF Path"]),
            }),
            BucketKind::ExpertCorner => RawRecord::Expert(ExpertArticle {
                title: get(&["title"]),
                date: get(&["date", "Published Date"]),
                url: get(&["URL", "link", "href"]),
                tag: get(&["tag", "Sub-Category"]),
            }),
            BucketKind::LitigationTracker => RawRecord::Litigation(LitigationEntry {
                date: get(&["date", "Published Date"]),
                title: get(&["title"]),
                summary: get(&["summary", "Conclusion"]),
                url: get(&["URL", "link", "href"]),
            }),
            BucketKind::Gst | BucketKind::DirectTax | BucketKind::FemaBanking => {
                RawRecord::Update(ExternalUpdate {
                    title: get(&["Title"]),
                    category: get(&["Category"]).or_else(|| Some(kind.category().to_string())),
                    sub_category: get(&["Sub-Category", "Subcategory", "Sub Category"]),
                    summary: get(&["Summary"]),
                    citation: get(&["Citation"]),
                    date: get(&["Date", "Published Date"]),
                    source: get(&["Source"]).or_else(|| Some(kind.source().display_name().to_string())),
                    url: get(&["URL", "link", "href"]),
                })
            }
        }
    }

    pub fn date(&self) -> Option<&str> {
        match self {
            RawRecord::Ruling(r) => r.published_date.as_deref(),
            RawRecord::Expert(r) => r.date.as_deref(),
            RawRecord::Litigation(r) => r.date.as_deref(),
            RawRecord::Update(r) => r.date.as_deref(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            RawRecord::Ruling(r) => r.title.as_deref(),
            RawRecord::Expert(r) => r.title.as_deref(),
            RawRecord::Litigation(r) => r.title.as_deref(),
            RawRecord::Update(r) => r.title.as_deref(),
        }
    }
}

fn lookup(fields: &FieldBag, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        fields
            .iter()
            .find(|(k, v)| k.trim().eq_ignore_ascii_case(alias) && !dates::is_blank(v))
            .map(|(_, v)| v.trim().to_string())
    })
}

/// Records collected for one source/category, in collection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub kind: BucketKind,
    pub records: Vec<RawRecord>,
}

impl Bucket {
    pub fn new(kind: BucketKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_records(kind: BucketKind, records: Vec<RawRecord>) -> Self {
        Self { kind, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// All buckets of a run, one per kind, in `BucketKind::ALL` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    buckets: BTreeMap<BucketKind, Bucket>,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            buckets: BucketKind::ALL
                .into_iter()
                .map(|k| (k, Bucket::new(k)))
                .collect(),
        }
    }
}

impl Buckets {
    pub fn get(&self, kind: BucketKind) -> &Bucket {
        // every kind is seeded in Default and never removed
        &self.buckets[&kind]
    }

    pub fn extend(&mut self, kind: BucketKind, records: impl IntoIterator<Item = RawRecord>) {
        self.buckets
            .entry(kind)
            .or_insert_with(|| Bucket::new(kind))
            .records
            .extend(records);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    pub fn total(&self) -> usize {
        self.buckets.values().map(Bucket::len).sum()
    }
}
