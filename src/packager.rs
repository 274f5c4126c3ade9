use crate::book::Book;
use crate::context::RewrittenPage;
use easy_error::{err_msg, Error, ResultExt};
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Writes an assembled book to disk.
pub trait DocumentPackager {
    fn package(&self, book: &Book, output: &Path) -> Result<(), Error>;
}

/// Location of a page inside the archive, next to `files/`.
pub fn page_path(key: &str) -> String {
    format!("pages/{key}.xhtml")
}

pub fn file_path(name: &str) -> String {
    format!("files/{name}")
}

/// Wraps the serialized head and body of a page into a standalone XHTML document.
pub fn page_document(page: &RewrittenPage, language: &str) -> String {
    let lang = html_escape::encode_double_quoted_attribute(language);
    format!(
        "<?xml version='1.0' encoding='utf-8' ?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n{}\n{}\n</html>",
        page.head, page.body
    )
}

/// EPUB 3 output.
#[derive(Default)]
pub struct EpubPackager;

impl DocumentPackager for EpubPackager {
    fn package(&self, book: &Book, output: &Path) -> Result<(), Error> {
        let mut builder = EpubBuilder::new(ZipLibrary::new().context("Could not create ZipLibrary")?)
            .context("Could not create EpubBuilder")?;

        // There is no publisher or identifier field, both end up in the description.
        let description = format!("Publisher: {}\nIdentifier: {}", book.publisher, book.identifier);
        builder
            .epub_version(EpubVersion::V30)
            .metadata("title", &book.title).context("Could not set title metadata")?
            .metadata("lang", &book.language).context("Could not set language metadata")?
            .metadata("author", &book.author).context("Could not set author metadata")?
            .metadata("license", &book.rights).context("Could not set license metadata")?
            .metadata("description", description).context("Could not set description metadata")?;

        for page in &book.pages {
            let document = page_document(page, &book.language);
            // Titles with & end up unescaped in nav.xhtml, and escaping them ourselves
            // double escapes them in toc.ncx.
            let title = page.title.replace('&', "﹠");
            builder
                .add_content(
                    EpubContent::new(page_path(&page.key), document.as_bytes())
                        .title(title)
                        .reftype(ReferenceType::Text),
                )
                .context(format!("Could not add page {}", page.key))?;
        }

        let mut names = HashSet::new();
        for file in &book.files {
            if !names.insert(file.name.as_str()) {
                return Err(err_msg(format!("File {} added twice", file.name)));
            }
            debug!("Adding {} ({})", file.name, file.media_type);
            builder
                .add_resource(file_path(&file.name), &*file.bytes, file.media_type.as_str())
                .context(format!("Could not add file {}", file.name))?;
        }

        let mut zipfile = File::create(output).context(format!("Could not create {}", output.display()))?;
        builder.generate(&mut zipfile).context("Could not generate ebook")?;
        Ok(())
    }
}

#[cfg(test)]
use crate::book::BookFile;
#[cfg(test)]
use std::fs;

#[cfg(test)]
fn page() -> RewrittenPage {
    RewrittenPage {
        key: "abc".to_string(),
        title: "Q&A".to_string(),
        head: "<head><title>Q&amp;A</title></head>".to_string(),
        body: "<body><p>Hi</p></body>".to_string(),
    }
}

#[cfg(test)]
fn book(files: Vec<BookFile>) -> Book {
    Book {
        language: "ja".to_string(),
        title: "My Wiki".to_string(),
        author: "unknown".to_string(),
        rights: "unknown".to_string(),
        publisher: "unknown".to_string(),
        identifier: "mywiki_20200101000000".to_string(),
        pages: vec![page()],
        files,
    }
}

#[cfg(test)]
fn css(name: &str) -> BookFile {
    BookFile {
        name: name.to_string(),
        bytes: b"p {}".to_vec(),
        media_type: "text/css".to_string(),
    }
}

#[test]
fn test_page_document() {
    let document = page_document(&page(), "ja");

    assert!(document.starts_with("<?xml"));
    assert!(document.contains(r#"xml:lang="ja" lang="ja""#));
    assert!(document.contains("<head><title>Q&amp;A</title></head>\n<body><p>Hi</p></body>\n</html>"));
}

#[test]
fn test_archive_paths() {
    assert_eq!("pages/abc.xhtml", page_path("abc"));
    assert_eq!("files/style.css", file_path("style.css"));
}

#[test]
fn test_writes_epub() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.epub");

    EpubPackager.package(&book(vec![css("style.css")]), &path).expect("Packaging failed.");

    let bytes = fs::read(&path).unwrap();
    assert_eq!(b"PK", &bytes[..2]);
}

#[test]
fn test_duplicate_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("duplicate.epub");

    assert!(EpubPackager.package(&book(vec![css("style.css"), css("style.css")]), &path).is_err());
    assert!(!path.exists());
}
