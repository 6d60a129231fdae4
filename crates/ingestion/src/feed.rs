//! arXiv Atom feed parsing
//!
//! `parse_feed` turns one search-results page into a `ParsedFeed`: the query
//! echoed in the feed title, whether the page was empty, and one
//! `EntryOutcome` per `<entry>`. Nothing here touches the database.

use crate::errors::IngestionError;
use chrono::{DateTime, Datelike, Utc};
use paperharvest_common::db::models::{Author, CategoryIndex, Eprint, Organisation, Paper};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Prefix of entry ids
pub const ABSTRACT_URL_PREFIX: &str = "http://arxiv.org/abs/";
/// Prefix of the default pdf link
pub const PDF_URL_PREFIX: &str = "http://arxiv.org/pdf/";
/// Title of the entry arXiv returns for a malformed query
pub const ERROR_TITLE: &str = "Error";

const FEED_TITLE_PATTERN: &str =
    r"(.*): search_query=(.*)&id_list=(.*)&start=(\d+)&max_results=(\d+)";
const CATEGORY_QUERY_PATTERN: &str = r"cat:(.+)";

fn feed_title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FEED_TITLE_PATTERN).expect("valid feed title pattern"))
}

fn category_query_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CATEGORY_QUERY_PATTERN).expect("valid category pattern"))
}

/// Query echoed by a search feed's title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// First category of the `cat:` query
    pub category_code: String,
    pub start: u64,
    pub max_results: u64,
}

/// Recover the query from a title like
/// `ArXiv Query: search_query=cat:cs.AI&id_list=&start=0&max_results=1000`
pub fn parse_feed_title(title: &str) -> Option<FeedQuery> {
    let caps = feed_title_regex().captures(title)?;
    let search_query = caps.get(2)?.as_str();
    let start = caps.get(4)?.as_str().parse().ok()?;
    let max_results = caps.get(5)?.as_str().parse().ok()?;

    let raw_categories = category_query_regex().captures(search_query)?.get(1)?.as_str();
    let category_code = raw_categories.split(',').next()?.trim();
    if category_code.is_empty() {
        return None;
    }

    Some(FeedQuery {
        category_code: category_code.to_string(),
        start,
        max_results,
    })
}

/// Result of parsing one `<entry>`
#[derive(Debug)]
pub enum EntryOutcome {
    /// Eprint graph ready to be saved
    Parsed(Box<Eprint>),
    /// arXiv reported an error instead of a paper
    RemoteError { summary: String },
    /// Entry skipped, e.g. unparsable identifier
    Invalid(IngestionError),
}

/// One parsed search-results page
#[derive(Debug)]
pub struct ParsedFeed {
    pub title: String,
    pub query: Option<FeedQuery>,
    pub total_results: Option<u64>,
    pub entries: Vec<EntryOutcome>,
}

impl ParsedFeed {
    /// No `<entry>` at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry is an arXiv error report
    pub fn only_remote_errors(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| matches!(e, EntryOutcome::RemoteError { .. }))
    }

    pub fn category_code(&self) -> Option<&str> {
        self.query.as_ref().map(|q| q.category_code.as_str())
    }
}

#[derive(Debug, Default)]
struct RawAuthor {
    name: String,
    affiliations: Vec<String>,
}

#[derive(Debug, Default)]
struct RawEntry {
    id: String,
    title: String,
    summary: String,
    doi: String,
    journal_ref: String,
    comment: String,
    published: String,
    updated: String,
    pdf_link: Option<String>,
    primary_category: Option<String>,
    categories: Vec<String>,
    authors: Vec<RawAuthor>,
}

impl RawEntry {
    /// Attributes of an element opened directly under `<entry>` or deeper
    fn on_element(&mut self, name: &str, element: &BytesStart<'_>, depth: usize) {
        if depth != 2 {
            return;
        }
        match name {
            "author" => self.authors.push(RawAuthor::default()),
            "link" => {
                if attribute(element, "title").as_deref() == Some("pdf") {
                    self.pdf_link = attribute(element, "href");
                }
            }
            "primary_category" => self.primary_category = attribute(element, "term"),
            "category" => {
                if let Some(term) = attribute(element, "term") {
                    self.categories.push(term);
                }
            }
            _ => {}
        }
    }

    /// Text of a closed element; `parent` is the path above it
    fn on_text(&mut self, name: &str, parent: &[String], text: &str) {
        match parent.len() {
            2 => {
                let field = match name {
                    "id" => &mut self.id,
                    "title" => &mut self.title,
                    "summary" => &mut self.summary,
                    "doi" => &mut self.doi,
                    "journal_ref" => &mut self.journal_ref,
                    "comment" => &mut self.comment,
                    "published" => &mut self.published,
                    "updated" => &mut self.updated,
                    _ => return,
                };
                *field = text.to_string();
            }
            3 if parent[2] == "author" => {
                if let Some(author) = self.authors.last_mut() {
                    match name {
                        "name" => author.name = text.to_string(),
                        "affiliation" => author.affiliations.push(text.to_string()),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Identifier without the abstract URL prefix
pub fn parse_source_id(id: &str) -> Option<String> {
    let id = id.trim();
    let rest = id
        .strip_prefix(ABSTRACT_URL_PREFIX)
        .or_else(|| id.strip_prefix("https://arxiv.org/abs/"))?;
    non_empty(rest)
}

/// Number after the last `v`, e.g. 3 for `2101.00001v3`
pub fn parse_latest_version(source_id: &str) -> Option<i32> {
    let (_, version) = source_id.rsplit_once('v')?;
    version.parse().ok()
}

fn parse_date(raw: &str, field: &str, source_id: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(date) => Some(date.with_timezone(&Utc)),
        Err(e) => {
            warn!(source_id, field, raw, error = %e, "Unparsable date, using epoch");
            None
        }
    }
}

fn build_entry(raw: RawEntry, index: &CategoryIndex) -> EntryOutcome {
    if raw.title.trim() == ERROR_TITLE {
        return EntryOutcome::RemoteError {
            summary: raw.summary,
        };
    }

    let source_id = match parse_source_id(&raw.id) {
        Some(id) => id,
        None => {
            return EntryOutcome::Invalid(IngestionError::InvalidEntry(format!(
                "unexpected arXiv id format: `{}`",
                raw.id
            )))
        }
    };
    debug!(source_id = %source_id, "Parsing entry");

    let mut authors = Vec::new();
    for raw_author in raw.authors {
        let name = raw_author.name.trim();
        if name.is_empty() {
            break;
        }
        let mut author = Author::new(name);
        if let Some(affiliation) = raw_author.affiliations.iter().find_map(|a| non_empty(a)) {
            author.organisations.push(Organisation::new(affiliation));
        }
        authors.push(author);
    }

    let published = parse_date(&raw.published, "published", &source_id);
    let updated = parse_date(&raw.updated, "updated", &source_id);

    let mut paper = Paper::new(raw.title.trim(), raw.summary.trim());
    paper.doi = non_empty(&raw.doi);
    paper.journal_ref = non_empty(&raw.journal_ref);
    paper.year = published.map(|d| d.year());
    paper.authors = authors;

    let mut eprint = Eprint::new(source_id.clone(), paper);
    eprint.comment = non_empty(&raw.comment);
    eprint.published_at = published.unwrap_or_default();
    eprint.updated_at = updated.unwrap_or_default();

    match parse_latest_version(&source_id) {
        Some(version) => eprint.latest_version = version,
        None => warn!(source_id = %source_id, "No version suffix in arXiv id"),
    }

    let default_pdf = format!("{}{}", PDF_URL_PREFIX, source_id);
    eprint.pdf_link = raw
        .pdf_link
        .as_deref()
        .and_then(non_empty)
        .filter(|link| *link != default_pdf);

    let primary_code = raw.primary_category.as_deref().and_then(non_empty);
    let mut extra_categories = Vec::new();
    let mut seen = HashSet::new();

    if let Some(code) = primary_code.as_deref() {
        seen.insert(code.to_string());
        match index.get(code) {
            Some(category) => eprint.primary_category = Some(category.clone()),
            None => extra_categories.push(code.to_string()),
        }
    }

    for code in raw.categories.iter().filter_map(|c| non_empty(c)) {
        if !seen.insert(code.clone()) {
            continue;
        }
        match index.get(&code) {
            Some(category) => eprint.other_categories.push(category.clone()),
            None => extra_categories.push(code),
        }
    }

    if !extra_categories.is_empty() {
        eprint.extra = Some(serde_json::json!({ "categories": extra_categories }));
    }

    EntryOutcome::Parsed(Box::new(eprint))
}

/// Parse one Atom search-results page
pub fn parse_feed(xml: &str, index: &CategoryIndex) -> Result<ParsedFeed, IngestionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut title = String::new();
    let mut total_results = None;
    let mut current: Option<RawEntry> = None;
    let mut raw_entries = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                let name = local_name(&element);
                if name == "entry" && path.len() == 1 {
                    current = Some(RawEntry::default());
                } else if let Some(entry) = current.as_mut() {
                    entry.on_element(&name, &element, path.len());
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(element) => {
                if let Some(entry) = current.as_mut() {
                    entry.on_element(&local_name(&element), &element, path.len());
                }
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t)),
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                let value = text.trim();
                if path.len() == 1 && name == "entry" {
                    if let Some(entry) = current.take() {
                        raw_entries.push(entry);
                    }
                } else if let Some(entry) = current.as_mut() {
                    entry.on_text(&name, &path, value);
                } else if path.len() == 1 {
                    match name.as_str() {
                        "title" => title = value.to_string(),
                        "totalResults" => total_results = value.parse().ok(),
                        _ => {}
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if path.first().map(String::as_str) == Some("feed") {
        return Err(IngestionError::Xml("unterminated <feed>".to_string()));
    }

    let query = parse_feed_title(&title);
    if query.is_none() {
        warn!(title = %title, "No category found in feed title");
    }

    let entries = raw_entries
        .into_iter()
        .map(|raw| build_entry(raw, index))
        .collect();

    Ok(ParsedFeed {
        title,
        query,
        total_results,
        entries,
    })
}
