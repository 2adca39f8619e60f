//! Listing pages as markdown → line blocks → (title, url, date) entries.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::dates;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static SINGLE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[([^\]]*)\]\(([^)\s]+)(?:\s+"[^"]*")?\)(.*)$"#).unwrap());
static INLINE_LINKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[([^\]]*)\]\(([^)\s]+)(?:\s+"[^"]*")?\)"#).unwrap());
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\**([A-Z][A-Za-z &]{1,40}?)\**\s*:\s*\**(.+?)\**$").unwrap());
static DATE_IN_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b\d{1,2}(?:st|nd|rd|th)?\s+[A-Z][a-z]{2,8}\.?,?\s+\d{4}\b   # 07 Jun 2025
        | \b[A-Z][a-z]{2,8}\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b # Jun 07, 2025
        | \b\d{1,2}[-/.]\d{1,2}[-/.]\d{4}\b                          # 07-06-2025
        | \b\d{4}-\d{1,2}-\d{1,2}\b                                  # 2025-06-07
        ",
    )
    .unwrap()
});

/// How far (in non-empty blocks) past a link to look for its date.
const DATE_WINDOW: usize = 4;
/// Shortest text block taken as a teaser or detail paragraph.
const MIN_PARAGRAPH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Link { text: String, url: String },
    Text(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    pub url: String,
    pub date: Option<String>,
    pub teaser: Option<String>,
}

pub fn classify_lines(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for raw in markdown.lines() {
        let line = raw.trim().trim_start_matches(['*', '-', '+']).trim();
        if line.is_empty() {
            blocks.push(Block::Empty);
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            let text = caps[2].trim();
            // "### [Title](url)" is a title link, not a heading
            if let Some(link) = SINGLE_LINK_RE.captures(text) {
                push_link(&link[1], &link[2], link[3].trim(), &mut blocks);
            } else {
                blocks.push(Block::Heading {
                    level: caps[1].len() as u8,
                    text: text.to_string(),
                });
            }
            continue;
        }

        if let Some(caps) = SINGLE_LINK_RE.captures(line) {
            if !caps[3].contains("](") {
                push_link(&caps[1], &caps[2], caps[3].trim(), &mut blocks);
                continue;
            }
        }

        if line.contains("](") {
            for caps in INLINE_LINKS_RE.captures_iter(line) {
                push_link(&caps[1], &caps[2], "", &mut blocks);
            }
            let rest = INLINE_LINKS_RE.replace_all(line, " ");
            let rest = rest.trim_matches(|c: char| c.is_whitespace() || c == '|');
            if !rest.is_empty() {
                blocks.push(Block::Text(rest.to_string()));
            }
            continue;
        }

        blocks.push(Block::Text(line.to_string()));
    }
    blocks
}

fn push_link(text: &str, url: &str, trailing: &str, blocks: &mut Vec<Block>) {
    blocks.push(Block::Link {
        text: clean_text(text),
        url: url.trim_matches(['<', '>']).to_string(),
    });
    let trailing = trailing.trim_matches(|c: char| c.is_whitespace() || c == '|');
    if !trailing.is_empty() {
        blocks.push(Block::Text(trailing.to_string()));
    }
}

fn clean_text(text: &str) -> String {
    text.replace(['*', '_'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First date-looking substring of a text line that actually parses.
pub fn find_date(text: &str) -> Option<String> {
    let trimmed = text.trim();
    DATE_IN_TEXT_RE
        .find_iter(trimmed)
        .map(|m| m.as_str().trim().to_string())
        .find(|candidate| dates::parse_date(candidate).is_some())
        .or_else(|| {
            (trimmed.len() <= 24 && dates::parse_date(trimmed).is_some()).then(|| trimmed.to_string())
        })
}

/// Pair every link accepted by `keep` with the nearest date after it, or
/// failing that, before it. Searches never cross another accepted link.
/// Repeated URLs (thumbnail and title linking the same page) keep the
/// first titled occurrence.
pub fn parse_entries(markdown: &str, keep: impl Fn(&str) -> bool) -> Vec<ListingEntry> {
    let blocks: Vec<Block> = classify_lines(&strip_images(markdown))
        .into_iter()
        .filter(|b| !matches!(b, Block::Empty))
        .collect();

    let is_entry = |b: &Block| matches!(b, Block::Link { text, url } if !text.is_empty() && keep(url));

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        let Block::Link { text, url } = block else {
            continue;
        };
        if !is_entry(block) || !seen.insert(url.clone()) {
            continue;
        }

        let after: Vec<&Block> = blocks[i + 1..]
            .iter()
            .take_while(|&b| !is_entry(b) || matches!(b, Block::Link { url: u, .. } if u == url))
            .take(DATE_WINDOW)
            .collect();
        let before: Vec<&Block> = blocks[..i]
            .iter()
            .rev()
            .take_while(|&b| !is_entry(b))
            .take(DATE_WINDOW)
            .collect();

        let date = after
            .iter()
            .chain(before.iter())
            .find_map(|b| match b {
                Block::Text(t) => find_date(t),
                _ => None,
            });
        let teaser = after.iter().find_map(|b| match b {
            Block::Text(t) if is_paragraph(t) => Some(t.clone()),
            _ => None,
        });

        entries.push(ListingEntry {
            title: text.clone(),
            url: url.clone(),
            date,
            teaser,
        });
    }
    entries
}

fn is_paragraph(text: &str) -> bool {
    text.chars().count() >= MIN_PARAGRAPH && find_date(text).map_or(true, |d| d.len() * 3 < text.len())
}

/// First substantial prose paragraph of a detail page, used as its summary.
pub fn first_paragraph(markdown: &str) -> Option<String> {
    let mut paragraph: Vec<&str> = Vec::new();
    for line in markdown.lines().map(str::trim) {
        let prose = !line.is_empty()
            && !line.starts_with('#')
            && !line.starts_with('[')
            && !line.starts_with('|')
            && !line.contains("](");
        if prose {
            paragraph.push(line);
            continue;
        }
        let joined = paragraph.join(" ");
        if is_paragraph(&joined) {
            return Some(joined);
        }
        paragraph.clear();
    }
    let joined = paragraph.join(" ");
    is_paragraph(&joined).then_some(joined)
}

/// `Key: Value` lines of a detail page ("Citation: ...", "Judicial Level &
/// Location: ...").
pub fn meta_fields(markdown: &str) -> Vec<(String, String)> {
    markdown
        .lines()
        .filter_map(|line| META_RE.captures(line.trim()))
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .filter(|(_, value)| !value.is_empty() && !value.contains("]("))
        .collect()
}

/// Remove markdown image syntax and collapse runs of blank lines.
pub fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}
