use crate::context::{RewrittenPage, RunContext};
use crate::crawl::{CrawledWiki, STYLESHEET_FILE};
use crate::packager::DocumentPackager;
use chrono::Local;
use easy_error::{err_msg, Error};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

lazy_static! {
    /// Culture codes accepted for the book's language, with the language code written into the book.
    static ref LANGUAGE_CODES: HashMap<&'static str, &'static str> = HashMap::from([
        ("ja-JP", "ja"),
        ("en-US", "en"),
        ("en-GB", "en"),
        ("en-AU", "en"),
        ("en-CA", "en"),
        ("zh-CN", "zh"),
        ("zh-TW", "zh"),
        ("zh-HK", "zh"),
        ("ko-KR", "ko"),
        ("fr-FR", "fr"),
        ("fr-CA", "fr"),
        ("de-DE", "de"),
        ("es-ES", "es"),
        ("es-MX", "es"),
        ("it-IT", "it"),
        ("pt-BR", "pt"),
        ("pt-PT", "pt"),
        ("ru-RU", "ru"),
        ("nl-NL", "nl"),
        ("sv-SE", "sv"),
        ("pl-PL", "pl"),
        ("th-TH", "th"),
        ("vi-VN", "vi"),
    ]);
}

/// Placeholder used for metadata nobody supplied.
pub const UNKNOWN: &str = "unknown";

/// Book metadata that does not come from the wiki itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    /// Culture code, e.g. `ja-JP`.
    pub language: String,
    pub author: String,
    pub rights: String,
    pub publisher: String,
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            language: "ja-JP".to_string(),
            author: UNKNOWN.to_string(),
            rights: UNKNOWN.to_string(),
            publisher: UNKNOWN.to_string(),
        }
    }
}

pub fn short_language_code(culture: &str) -> Option<&'static str> {
    LANGUAGE_CODES.get(culture).copied()
}

/// A non-page file of the book, stored under `files/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Everything the packager needs to write the archive.
#[derive(Debug, Clone)]
pub struct Book {
    /// Short language code, e.g. `ja`.
    pub language: String,
    pub title: String,
    pub author: String,
    pub rights: String,
    pub publisher: String,
    pub identifier: String,
    /// In crawl order.
    pub pages: Vec<RewrittenPage>,
    pub files: Vec<BookFile>,
}

pub struct BookAssembler {
    metadata: BookMetadata,
    language: &'static str,
}

impl BookAssembler {
    /// Fails if the metadata's language is not a known culture code.
    pub fn new(metadata: BookMetadata) -> Result<Self, Error> {
        let language = short_language_code(&metadata.language).ok_or(err_msg(format!(
            "Language culture code '{}' does not exist",
            metadata.language
        )))?;
        Ok(Self { metadata, language })
    }

    /// `<site_id>_<YYYYmmddHHMMSS>`, unique per run.
    pub fn default_identifier(site_id: &str) -> String {
        format!("{}_{}", site_id, Local::now().format("%Y%m%d%H%M%S"))
    }

    /// Puts the crawled pages, the downloaded assets and the stylesheet together.
    /// Assets that were never downloaded are left out.
    pub fn assemble(&self, title: String, identifier: String, context: RunContext, stylesheet: Vec<u8>) -> Book {
        let mut files: Vec<BookFile> = context
            .assets
            .iter()
            .filter_map(|record| match &record.bytes {
                Some(bytes) => Some(BookFile {
                    name: record.name.clone(),
                    bytes: bytes.clone(),
                    media_type: record.media_type.clone(),
                }),
                None => {
                    debug!("Leaving out {} from {} ({:?})", record.name, record.source, record.status);
                    None
                }
            })
            .collect();
        debug!("{} of {} assets downloaded", files.len(), context.assets.len());

        files.push(BookFile {
            name: STYLESHEET_FILE.to_string(),
            bytes: stylesheet,
            media_type: "text/css".to_string(),
        });

        Book {
            language: self.language.to_string(),
            title,
            author: self.metadata.author.clone(),
            rights: self.metadata.rights.clone(),
            publisher: self.metadata.publisher.clone(),
            identifier,
            pages: context.pages.iter().cloned().collect(),
            files,
        }
    }

    /// Assembles the book and hands it to the packager, once. Packager errors are returned as they are.
    pub fn build(
        &self,
        wiki: CrawledWiki,
        identifier: String,
        stylesheet: Vec<u8>,
        packager: &dyn DocumentPackager,
        output: &Path,
    ) -> Result<Book, Error> {
        info!("Assembling {}", wiki.title);
        let book = self.assemble(wiki.title, identifier, wiki.context, stylesheet);
        info!(
            "Writing {} pages and {} files to {:?}",
            book.pages.len(),
            book.files.len(),
            output
        );
        packager.package(&book, output)?;
        Ok(book)
    }
}

#[cfg(test)]
use crate::assets::{AssetRecord, FetchStatus};
#[cfg(test)]
use reqwest::Url;
#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::path::PathBuf;

#[cfg(test)]
#[derive(Default)]
struct RecordingPackager {
    calls: RefCell<Vec<(String, PathBuf)>>,
    fail: bool,
}

#[cfg(test)]
impl DocumentPackager for RecordingPackager {
    fn package(&self, book: &Book, output: &Path) -> Result<(), Error> {
        self.calls.borrow_mut().push((book.title.clone(), output.to_path_buf()));
        if self.fail {
            return Err(err_msg("disk full"));
        }
        Ok(())
    }
}

#[cfg(test)]
fn record(name: &str, bytes: Option<&[u8]>, status: FetchStatus) -> AssetRecord {
    AssetRecord {
        name: name.to_string(),
        source: Url::parse("http://wikiwiki.jp/mywiki/x").unwrap(),
        bytes: bytes.map(|bytes| bytes.to_vec()),
        media_type: "image/png".to_string(),
        status,
    }
}

#[cfg(test)]
fn crawled() -> CrawledWiki {
    let mut context = RunContext::default();
    context.pages.insert(RewrittenPage {
        key: "b".to_string(),
        title: "Second".to_string(),
        head: "<head></head>".to_string(),
        body: "<body></body>".to_string(),
    });
    context.pages.insert(RewrittenPage {
        key: "a".to_string(),
        title: "First".to_string(),
        head: "<head></head>".to_string(),
        body: "<body></body>".to_string(),
    });
    context.assets.insert(record("ok", Some(b"png"), FetchStatus::Fetched));
    context.assets.insert(record("gone", None, FetchStatus::NotFound));
    context.assets.insert(record("offline", None, FetchStatus::NetworkError("timeout".to_string())));
    CrawledWiki {
        title: "My Wiki".to_string(),
        context,
    }
}

#[test]
fn test_unknown_language_is_rejected() {
    let metadata = BookMetadata {
        language: "xx-YY".to_string(),
        ..BookMetadata::default()
    };
    assert!(BookAssembler::new(metadata).is_err());
    assert!(BookAssembler::new(BookMetadata::default()).is_ok());
    assert_eq!(Some("ja"), short_language_code("ja-JP"));
}

#[test]
fn test_default_identifier() {
    let identifier = BookAssembler::default_identifier("mywiki");
    let (site, timestamp) = identifier.split_once('_').expect("No separator.");
    assert_eq!("mywiki", site);
    assert_eq!(14, timestamp.len());
    assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_assemble_skips_missing_assets() {
    let assembler = BookAssembler::new(BookMetadata {
        author: "Someone".to_string(),
        ..BookMetadata::default()
    })
    .unwrap();
    let wiki = crawled();

    let book = assembler.assemble(wiki.title, "mywiki_1".to_string(), wiki.context, b"p {}".to_vec());

    assert_eq!("ja", book.language);
    assert_eq!("Someone", book.author);
    assert_eq!(UNKNOWN, book.publisher);
    assert_eq!("mywiki_1", book.identifier);
    assert_eq!(vec!["b", "a"], book.pages.iter().map(|page| page.key.as_str()).collect::<Vec<_>>());
    assert_eq!(vec!["ok", "style.css"], book.files.iter().map(|file| file.name.as_str()).collect::<Vec<_>>());
    assert_eq!("text/css", book.files[1].media_type);
}

#[test]
fn test_build_packages_once() {
    let assembler = BookAssembler::new(BookMetadata::default()).unwrap();
    let packager = RecordingPackager::default();

    assembler
        .build(crawled(), "id".to_string(), Vec::new(), &packager, Path::new("out.epub"))
        .expect("Build failed.");

    assert_eq!(vec![("My Wiki".to_string(), PathBuf::from("out.epub"))], *packager.calls.borrow());
}

#[test]
fn test_packager_error_propagates() {
    let assembler = BookAssembler::new(BookMetadata::default()).unwrap();
    let packager = RecordingPackager {
        fail: true,
        ..RecordingPackager::default()
    };

    let err = assembler
        .build(crawled(), "id".to_string(), Vec::new(), &packager, Path::new("out.epub"))
        .expect_err("Build should fail.");
    assert_eq!("disk full", err.to_string());
}
