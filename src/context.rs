use crate::assets::AssetSet;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// A crawled page with its references rewritten to point inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenPage {
    /// Identifier of the page URL, also its file stem.
    pub key: String,
    pub title: String,
    /// Serialized `<head>` element.
    pub head: String,
    /// Serialized `<body>` element.
    pub body: String,
}

/// Pages in crawl order. Inserting a key twice replaces the page in its original position.
#[derive(Debug, Default)]
pub struct PageSet {
    pages: Vec<RewrittenPage>,
    positions: HashMap<String, usize>,
}

impl PageSet {
    pub fn insert(&mut self, page: RewrittenPage) {
        match self.positions.get(&page.key) {
            Some(&position) => self.pages[position] = page,
            None => {
                self.positions.insert(page.key.clone(), self.pages.len());
                self.pages.push(page);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&RewrittenPage> {
        self.positions.get(key).map(|&position| &self.pages[position])
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RewrittenPage> {
        self.pages.iter()
    }
}

/// Something that went wrong without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A reference no rule recognised. The attribute was blanked.
    DroppedUrl { attribute: String, url: String },
    /// The asset does not exist on the wiki. The link to it was kept.
    NotFound { url: String },
    /// The asset could not be downloaded. The attribute was blanked.
    NetworkError { url: String, reason: String },
    /// The page answered with an error status and was left out of the book.
    PageSkipped { url: String, status: u16 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DroppedUrl { attribute, url } => write!(f, "dropped url ({attribute}): {url}"),
            Self::NotFound { url } => write!(f, "not found: {url}"),
            Self::NetworkError { url, reason } => write!(f, "network error occurred for {url}: {reason}"),
            Self::PageSkipped { url, status } => write!(f, "skipped page {url}: HTTP status {status}"),
        }
    }
}

/// Everything one run accumulates, threaded through crawling and rewriting.
#[derive(Debug, Default)]
pub struct RunContext {
    pub pages: PageSet,
    pub assets: AssetSet,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunContext {
    /// Records a diagnostic, reporting it as it happens.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
fn page(key: &str, title: &str) -> RewrittenPage {
    RewrittenPage {
        key: key.to_string(),
        title: title.to_string(),
        head: "<head></head>".to_string(),
        body: "<body></body>".to_string(),
    }
}

#[test]
fn test_duplicate_key_overwrites_in_place() {
    let mut pages = PageSet::default();
    pages.insert(page("a", "First"));
    pages.insert(page("b", "Second"));
    pages.insert(page("a", "First again"));

    assert_eq!(2, pages.len());
    assert_eq!(
        vec!["First again", "Second"],
        pages.iter().map(|page| page.title.as_str()).collect::<Vec<_>>()
    );
    assert_eq!("Second", pages.get("b").unwrap().title);
}

#[test]
fn test_diagnostic_names_dropped_url() {
    let mut context = RunContext::default();
    context.report(Diagnostic::DroppedUrl {
        attribute: "href".to_string(),
        url: "javascript:void(0)".to_string(),
    });

    assert_eq!(1, context.diagnostics.len());
    assert!(context.diagnostics[0].to_string().contains("javascript:void(0)"));
}
