//! Page classification and item extraction.
//!
//! [`PageParser`] is driven by a [`SelectorSet`] built from the
//! jurisdiction's `selectors` map, falling back to defaults that fit most
//! municipal sites. Parsing is synchronous and CPU-bound; async callers run
//! it on the blocking pool.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use bylawdb_shared::{BylawError, DocumentKind, ExtractedItem, ItemKind, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

/// A page whose content region holds more matching links than this is a listing.
pub const LISTING_LINK_THRESHOLD: usize = 5;

/// URL extensions treated as binary documents.
pub const BINARY_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "rtf", "odt"];

pub const DEFAULT_LINKS: &str = r#"a[href*="bylaw"], a[href*="ordinance"]"#;
pub const DEFAULT_TITLE: &str = "h1, h2, .title, .bylaw-title";
pub const DEFAULT_NUMBER: &str = ".bylaw-number, .number";
pub const DEFAULT_CONTENT: &str = ".content, .bylaw-content, article, main";
pub const DEFAULT_PAGINATION: &str = r#".pagination a, .pager a, a[href*="page"]"#;

const NAVIGATION_WORDS: &[&str] = &["previous", "prev", "first", "last"];

static IDENTIFIER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:bylaw|ordinance|regulation)\s*(?:no\.?|#|number)?\s*(\d+(?:-\d+)*)",
        r"(?i)(?:bl|ord|reg)\.?\s*(\d+(?:-\d+)*)",
        r"(\d{4}-\d+)",
        r"(\d+/\d+)",
        r"#(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid identifier pattern"))
    .collect()
});

static EFFECTIVE_DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)effective\s+(?:date\s+)?(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})",
        r"(?i)enacted\s+(?:on\s+)?(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})",
        r"(?i)passed\s+(?:on\s+)?(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid date pattern"))
    .collect()
});

static LABELS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("dt, th, label").expect("valid label selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));

/// Metadata keys and the label keywords that identify them, in priority order.
const METADATA_KEYS: &[(&str, &[&str])] = &[
    ("effective_date", &["effective", "date", "enacted"]),
    ("amended_date", &["amended", "modified", "updated"]),
    ("status", &["status", "active", "repealed"]),
    ("department", &["department", "division", "office"]),
];

const CATEGORIES: &[(&str, &[&str])] = &[
    ("zoning", &["zoning", "land use", "development", "subdivision"]),
    ("adu", &["accessory dwelling", "secondary suite", "adu", "in-law"]),
    ("building", &["building code", "construction", "permit"]),
    ("parking", &["parking", "vehicle"]),
    ("noise", &["noise", "sound"]),
    ("business", &["business", "commercial", "license"]),
];

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Compiled CSS selectors, one per purpose.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub links: Selector,
    pub title: Selector,
    pub number: Selector,
    pub content: Selector,
    pub pagination: Selector,
}

impl SelectorSet {
    /// Compile the configured selectors. Both short purpose names (`links`)
    /// and the older `bylaw_`-prefixed names are accepted.
    pub fn from_config(selectors: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            links: compile(selectors, &["links", "bylaw_links"], DEFAULT_LINKS)?,
            title: compile(selectors, &["title", "bylaw_title"], DEFAULT_TITLE)?,
            number: compile(selectors, &["number", "bylaw_number"], DEFAULT_NUMBER)?,
            content: compile(selectors, &["content", "bylaw_content"], DEFAULT_CONTENT)?,
            pagination: compile(selectors, &["pagination"], DEFAULT_PAGINATION)?,
        })
    }
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            links: Selector::parse(DEFAULT_LINKS).expect("valid default selector"),
            title: Selector::parse(DEFAULT_TITLE).expect("valid default selector"),
            number: Selector::parse(DEFAULT_NUMBER).expect("valid default selector"),
            content: Selector::parse(DEFAULT_CONTENT).expect("valid default selector"),
            pagination: Selector::parse(DEFAULT_PAGINATION).expect("valid default selector"),
        }
    }
}

fn compile(selectors: &BTreeMap<String, String>, keys: &[&str], default: &str) -> Result<Selector> {
    let (key, raw) = keys
        .iter()
        .find_map(|k| selectors.get(*k).map(|v| (*k, v.as_str())))
        .unwrap_or(("default", default));
    Selector::parse(raw)
        .map_err(|e| BylawError::parse(format!("invalid '{key}' selector '{raw}': {e:?}")))
}

// ---------------------------------------------------------------------------
// Parsed output
// ---------------------------------------------------------------------------

/// Everything the parser learned from one page.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub kind: DocumentKind,
    pub items: Vec<ExtractedItem>,
    /// Further listing pages to fetch.
    pub pagination: Vec<String>,
    /// Plain text of the content region (or the whole body) for requirement extraction.
    pub text: String,
}

impl ParsedPage {
    fn empty(kind: DocumentKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            pagination: Vec::new(),
            text: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PageParser {
    selectors: SelectorSet,
}

impl PageParser {
    pub fn new(selectors: SelectorSet) -> Self {
        Self { selectors }
    }

    pub fn from_config(selectors: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self::new(SelectorSet::from_config(selectors)?))
    }

    /// Decide what kind of document `html` (fetched from `url`) is.
    pub fn classify(&self, html: &str, url: &str) -> DocumentKind {
        if is_binary_url(url) {
            return DocumentKind::Binary;
        }
        self.classify_document(&Html::parse_document(html))
    }

    fn classify_document(&self, doc: &Html) -> DocumentKind {
        if doc.select(&self.selectors.content).next().is_none() {
            return DocumentKind::Unknown;
        }
        if self.content_links(doc).len() > LISTING_LINK_THRESHOLD {
            DocumentKind::Listing
        } else {
            DocumentKind::Regulation
        }
    }

    /// Classify and extract items, pagination links and text from a page.
    #[instrument(skip_all, fields(url = %url))]
    pub fn parse(&self, html: &str, url: &str) -> Result<ParsedPage> {
        let base = Url::parse(url).map_err(|e| BylawError::parse(format!("{url}: {e}")))?;
        if is_binary_url(url) {
            return Ok(Self::parse_binary(url));
        }

        let doc = Html::parse_document(html);
        let kind = self.classify_document(&doc);
        let mut page = ParsedPage::empty(kind);

        match kind {
            DocumentKind::Regulation => {
                let item = self.extract_regulation(&doc, url);
                page.text = item
                    .full_text
                    .clone()
                    .unwrap_or_else(|| body_text(&doc));
                page.items.push(item);
            }
            DocumentKind::Listing => {
                page.items = self.extract_links(&doc, &base);
                page.text = self.content_text(&doc).unwrap_or_default();
            }
            DocumentKind::Unknown | DocumentKind::Binary => {
                page.text = body_text(&doc);
            }
        }
        page.pagination = self.pagination_links(&doc, &base);

        debug!(
            kind = kind.as_str(),
            items = page.items.len(),
            pagination = page.pagination.len(),
            "parsed page"
        );
        Ok(page)
    }

    /// Item for a non-HTML document; its content is archived, not parsed.
    pub fn parse_binary(url: &str) -> ParsedPage {
        let mut item = ExtractedItem::new(ItemKind::BinaryDocument, url);
        item.identifier = extract_identifier(url);
        let mut page = ParsedPage::empty(DocumentKind::Binary);
        page.items.push(item);
        page
    }

    fn extract_regulation(&self, doc: &Html, url: &str) -> ExtractedItem {
        let mut item = ExtractedItem::new(ItemKind::Regulation, url);

        item.title = doc
            .select(&self.selectors.title)
            .map(element_text)
            .find(|t| !t.is_empty());

        item.identifier = doc
            .select(&self.selectors.number)
            .map(element_text)
            .find(|t| !t.is_empty())
            .or_else(|| {
                let haystack = format!("{} {url}", item.title.as_deref().unwrap_or_default());
                extract_identifier(&haystack)
            });

        item.full_text = self.content_text(doc);
        item.metadata = extract_metadata(doc);
        item.category = Some(
            categorize(
                item.title.as_deref().unwrap_or_default(),
                item.full_text.as_deref().unwrap_or_default(),
            )
            .to_string(),
        );
        item.effective_date = extract_effective_date(&body_text(doc));
        item
    }

    /// Matching links inside the content regions, in document order.
    fn content_links<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        // Nested regions (article inside main) would otherwise yield links twice.
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for region in doc.select(&self.selectors.content) {
            for link in region.select(&self.selectors.links) {
                if seen.insert(link.id()) {
                    links.push(link);
                }
            }
        }
        links
    }

    fn extract_links(&self, doc: &Html, base: &Url) -> Vec<ExtractedItem> {
        let mut items = Vec::new();
        for link in self.content_links(doc) {
            let Some(target) = link.value().attr("href").and_then(|h| resolve_href(base, h)) else {
                continue;
            };
            let text = element_text(link);
            let mut item = ExtractedItem::new(ItemKind::Link, target);
            item.identifier = extract_identifier(&text);
            item.title = (!text.is_empty()).then_some(text);
            item.found_at = Some(base.to_string());
            items.push(item);
        }
        items
    }

    fn content_text(&self, doc: &Html) -> Option<String> {
        doc.select(&self.selectors.content)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    /// Pagination targets, skipping previous/first/last navigation.
    pub fn pagination_links(&self, doc: &Html, base: &Url) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for link in doc.select(&self.selectors.pagination) {
            let text = element_text(link).to_lowercase();
            if NAVIGATION_WORDS.contains(&text.as_str()) {
                continue;
            }
            if let Some(target) = link.value().attr("href").and_then(|h| resolve_href(base, h)) {
                if seen.insert(target.clone()) {
                    urls.push(target);
                }
            }
        }
        urls
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whether the URL path ends in a known binary document extension.
pub fn is_binary_url(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.rsplit_once('.')
        .map(|(_, ext)| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Whether a response content type describes something other than a web page.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    !(ct.contains("html") || ct.starts_with("text/"))
}

/// First identifier found by the ordered patterns.
pub fn extract_identifier(text: &str) -> Option<String> {
    IDENTIFIER_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Category from keyword sets over title and body; `general` when none match.
pub fn categorize(title: &str, text: &str) -> &'static str {
    let haystack = format!("{title} {text}").to_lowercase();
    CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or("general")
}

pub fn extract_effective_date(text: &str) -> Option<String> {
    EFFECTIVE_DATE_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Label/value pairs: a `dt`/`th`/`label` whose text names a known key,
/// followed by a `dd`/`td` sibling or, failing that, the next element after
/// its parent.
pub fn extract_metadata(doc: &Html) -> BTreeMap<String, String> {
    let labels: Vec<(String, ElementRef<'_>)> = doc
        .select(&LABELS)
        .map(|el| (element_text(el).to_lowercase(), el))
        .collect();

    let mut metadata = BTreeMap::new();
    for (key, keywords) in METADATA_KEYS {
        let value = keywords.iter().find_map(|kw| {
            labels
                .iter()
                .filter(|(text, _)| text.contains(kw))
                .find_map(|(_, el)| label_value(*el))
        });
        if let Some(value) = value {
            metadata.insert((*key).to_string(), value);
        }
    }
    metadata
}

fn label_value(label: ElementRef<'_>) -> Option<String> {
    let sibling = label
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| matches!(el.value().name(), "dd" | "td"));
    if let Some(value) = sibling.map(element_text).filter(|t| !t.is_empty()) {
        return Some(value);
    }
    label
        .parent()
        .and_then(ElementRef::wrap)
        .and_then(|p| p.next_siblings().find_map(ElementRef::wrap))
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Visible text with whitespace collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn body_text(doc: &Html) -> String {
    doc.select(&BODY)
        .next()
        .map(element_text)
        .unwrap_or_else(|| element_text(doc.root_element()))
}

/// Resolve an href against `base`, dropping fragments and non-navigable links.
pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.to_string())
}
