//! Makes a parsed wiki page self-contained: removes scripts and hidden content
//! markers, and points every link and embedded asset at its copy inside the archive.

use crate::assets::{AssetFetcher, FetchStatus};
use crate::context::{Diagnostic, RunContext};
use crate::dom_manipulation::{DomOperation, MutableDom};
use crate::platform::{Reference, WikiSite};
use crate::xml_utils::{html_attr_name, html_elem_name};
use ego_tree::NodeId;
use html5ever::tree_builder::{Attribute, ElementFlags, TreeSink};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

lazy_static! {
    // The e-book converter gives up on documents with too much hidden content.
    static ref HIDE_DIRECTIVE: Regex = Regex::new(r"(?i)display\s*:\s*none").unwrap();
    static ref HEAD_SELECTOR: Selector = Selector::parse("head").unwrap();
}

/// Attributes pointing at alternative image sizes. Only `src` is downloaded.
const RESPONSIVE_IMAGE_ATTRIBUTES: [&str; 2] = ["srcset", "sizes"];

/// What became of one `href` or `src` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOutcome {
    /// Points inside the archive now.
    Rewritten(String),
    /// No rule recognised the url.
    Dropped(String),
    /// An asset at `url` that could not be downloaded.
    FetchFailed { url: String, reason: String },
}

impl ReferenceOutcome {
    /// The new attribute value. Anything that does not resolve inside the archive is blanked.
    pub fn attribute_value(&self) -> &str {
        match self {
            Self::Rewritten(path) => path,
            Self::Dropped(_) | Self::FetchFailed { .. } => "",
        }
    }
}

/// Walks every element of `doc` once, in document order, and rewrites it in place.
///
/// Assets the page refers to are fetched into `context.assets` on the way.
/// Nothing here fails the page, problems end up in `context.diagnostics`.
pub fn rewrite_document(doc: &mut Html, site: &WikiSite, assets: &mut AssetFetcher, context: &mut RunContext) {
    let mut ops = Vec::new();

    for node in doc.tree.root().descendants() {
        let element = match ElementRef::wrap(node) {
            Some(element) => element,
            None => continue,
        };
        let node_id = element.id();
        let value = element.value();

        if value.name() == "script" {
            ops.push(DomOperation::RemoveElement { node_id });
            continue;
        }

        for (attr_name, _) in value.attrs.iter() {
            let local: &str = &attr_name.local;
            if local.starts_with("on") || (value.name() == "img" && RESPONSIVE_IMAGE_ATTRIBUTES.contains(&local)) {
                ops.push(DomOperation::RemoveAttribute {
                    node_id,
                    attr_name: attr_name.clone(),
                });
            }
        }

        if let Some(style) = value.attr("style") {
            let cleaned = HIDE_DIRECTIVE.replace_all(style, "");
            if cleaned != style {
                ops.push(DomOperation::SetAttribute {
                    node_id,
                    attr_name: html_attr_name("style"),
                    value: cleaned.into_owned(),
                });
            }
        }

        if let Some(href) = value.attr("href").filter(|href| !href.is_empty()) {
            // Fragment-only links already work inside the page.
            if let Some(reference) = site.classify_href(href) {
                let outcome = rewrite_reference(&reference, href, "href", site, assets, context);
                ops.push(DomOperation::SetAttribute {
                    node_id,
                    attr_name: html_attr_name("href"),
                    value: outcome.attribute_value().to_string(),
                });
            }
        }

        if let Some(src) = value.attr("src").filter(|src| !src.is_empty()) {
            let reference = site.classify_src(src);
            let outcome = rewrite_reference(&reference, src, "src", site, assets, context);
            ops.push(DomOperation::SetAttribute {
                node_id,
                attr_name: html_attr_name("src"),
                value: outcome.attribute_value().to_string(),
            });
        }
    }

    doc.perform_operations(ops);
}

/// Decides the new value for one reference, fetching it if it is an asset.
pub fn rewrite_reference(
    reference: &Reference,
    raw: &str,
    attribute: &str,
    site: &WikiSite,
    assets: &mut AssetFetcher,
    context: &mut RunContext,
) -> ReferenceOutcome {
    let (target, media_type) = match reference {
        Reference::Page { .. } => return ReferenceOutcome::Rewritten(reference.internal_path()),
        Reference::Stylesheet { target } => (target, site.platform().stylesheet_media_type()),
        Reference::Image { target, .. } => (target, site.platform().image_media_type()),
        Reference::Unrecognized => {
            context.report(Diagnostic::DroppedUrl {
                attribute: attribute.to_string(),
                url: raw.to_string(),
            });
            return ReferenceOutcome::Dropped(raw.to_string());
        }
    };

    let name = match reference.asset_name() {
        Some(name) => name,
        None => return ReferenceOutcome::Dropped(raw.to_string()),
    };

    match assets.ensure_fetched(&mut context.assets, target, &name, media_type) {
        FetchStatus::Fetched | FetchStatus::SkippedPageOnly => ReferenceOutcome::Rewritten(reference.internal_path()),
        FetchStatus::NotFound => {
            // Linked anyway, the file is simply missing from the archive.
            context.report(Diagnostic::NotFound { url: target.to_string() });
            ReferenceOutcome::Rewritten(reference.internal_path())
        }
        FetchStatus::NetworkError(reason) => {
            context.report(Diagnostic::NetworkError {
                url: target.to_string(),
                reason: reason.clone(),
            });
            ReferenceOutcome::FetchFailed {
                url: target.to_string(),
                reason,
            }
        }
    }
}

/// Appends `<link rel="stylesheet" type="text/css">` pointing at `href` to the document's `<head>`.
pub fn inject_stylesheet(doc: &mut Html, href: &str) {
    let head: Option<NodeId> = doc.select(&HEAD_SELECTOR).next().map(|head| head.id());
    if let Some(head) = head {
        let attrs = [("rel", "stylesheet"), ("href", href), ("type", "text/css")]
            .iter()
            .map(|(name, value)| Attribute {
                name: html_attr_name(name),
                value: (*value).into(),
            })
            .collect();
        let link = doc.create_element(html_elem_name("link"), attrs, ElementFlags::default());
        doc.perform_operation(DomOperation::AppendChild {
            parent_id: head,
            child_id: link,
        });
    }
}

#[cfg(test)]
use crate::assets::testing::FakeFetcher;
#[cfg(test)]
use crate::identifier::identifier_of;
#[cfg(test)]
use crate::platform::{Platform, FILES_DIR};

#[cfg(test)]
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

#[cfg(test)]
fn atwiki() -> WikiSite {
    WikiSite::new(Platform::Atwiki { server: 1 }, "mywiki").expect("Could not create site.")
}

#[cfg(test)]
fn rewrite(site: &WikiSite, fetcher: &mut FakeFetcher, page_only: bool, html: &str) -> (Html, RunContext) {
    let mut doc = Html::parse_document(html);
    let mut context = RunContext::default();
    let mut assets = AssetFetcher::new(fetcher, page_only);
    rewrite_document(&mut doc, site, &mut assets, &mut context);
    (doc, context)
}

#[cfg(test)]
fn attr(doc: &Html, selector: &str, name: &str) -> Option<String> {
    doc.select(&Selector::parse(selector).unwrap())
        .next()
        .and_then(|element| element.value().attr(name))
        .map(String::from)
}

#[test]
fn test_page_link_with_anchor() {
    let mut fetcher = FakeFetcher::default();
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<a id="l" href="/mywiki/pages/42.html#section2">Forty-two</a>"#,
    );

    assert_eq!(
        Some(identifier_of("http://www1.atwiki.jp/mywiki/pages/42.html") + ".xhtml#section2"),
        attr(&doc, "#l", "href")
    );
    assert!(context.diagnostics.is_empty());
    assert!(fetcher.requests.is_empty());
}

#[test]
fn test_image_is_fetched_and_renamed() {
    let src = "http://host/img/photo.JPG?v=2";
    let mut fetcher = FakeFetcher::default().with(src, 200, Some("text/plain"), PNG);
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        &format!(r#"<img src="{src}" srcset="{src} 2x" sizes="100vw" alt="Photo">"#),
    );

    assert_eq!(1, fetcher.requests_for(src));
    assert_eq!(Some(format!("../files/{}", identifier_of(src))), attr(&doc, "img", "src"));
    assert_eq!(None, attr(&doc, "img", "srcset"));
    assert_eq!(None, attr(&doc, "img", "sizes"));
    assert_eq!(Some("Photo".to_string()), attr(&doc, "img", "alt"));

    let record = context.assets.get(&identifier_of(src)).expect("Asset not stored.");
    // Sniffed, the header is wrong.
    assert_eq!("image/png", record.media_type);
}

#[test]
fn test_unrecognized_href_is_dropped() {
    let mut fetcher = FakeFetcher::default();
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<a id="js" href="javascript:void(0)">Menu</a>"#,
    );

    assert_eq!(Some(String::new()), attr(&doc, "#js", "href"));
    assert_eq!(
        vec![Diagnostic::DroppedUrl {
            attribute: "href".to_string(),
            url: "javascript:void(0)".to_string(),
        }],
        context.diagnostics
    );
}

#[test]
fn test_shared_stylesheet_fetched_once() {
    let css = "http://www1.atwiki.jp/common/_css/style.css?v=1";
    let mut fetcher = FakeFetcher::default().with(css, 200, Some("application/octet-stream"), b"p { margin: 0 }");
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<head><link id="a" rel="stylesheet" href="/common/_css/style.css?v=1"></head>
           <body><a id="b" href="//www1.atwiki.jp/common/_css/style.css?v=1">CSS</a></body>"#,
    );

    let expected = format!("../files/{}.css", identifier_of(css));
    assert_eq!(1, fetcher.requests_for(css));
    assert_eq!(Some(expected.clone()), attr(&doc, "#a", "href"));
    assert_eq!(Some(expected), attr(&doc, "#b", "href"));
    assert_eq!("text/css", context.assets.get(&format!("{}.css", identifier_of(css))).unwrap().media_type);
}

#[test]
fn test_fragment_links_untouched() {
    let mut fetcher = FakeFetcher::default();
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r##"<a id="hash" href="#">Top</a><a id="frag" href="#section2">Down</a>"##,
    );

    assert_eq!(Some("#".to_string()), attr(&doc, "#hash", "href"));
    assert_eq!(Some("#section2".to_string()), attr(&doc, "#frag", "href"));
    assert!(context.diagnostics.is_empty());
}

#[test]
fn test_censorship() {
    let mut fetcher = FakeFetcher::default();
    let (doc, _) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<head><script src="/common/_js/jquery.js"></script></head>
           <body><div id="d" onclick="toggle()" onmouseover="hint()" style="color: red; display : none;">Hidden</div>
           <script>track();</script></body>"#,
    );

    assert_eq!(0, doc.select(&Selector::parse("script").unwrap()).count());
    assert_eq!(None, attr(&doc, "#d", "onclick"));
    assert_eq!(None, attr(&doc, "#d", "onmouseover"));
    assert_eq!(Some("color: red; ;".to_string()), attr(&doc, "#d", "style"));
    // Script sources are removed with the element, never fetched.
    assert!(fetcher.requests.is_empty());
}

#[test]
fn test_fetch_failures() {
    let gone = "http://www1.atwiki.jp/mywiki/gone.png";
    let mut fetcher = FakeFetcher::default().with(gone, 404, None, b"");
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<img id="gone" src="/mywiki/gone.png"><img id="offline" src="/mywiki/offline.png">"#,
    );

    // Missing files keep their link, unreachable ones are blanked.
    assert_eq!(Some(format!("../files/{}", identifier_of(gone))), attr(&doc, "#gone", "src"));
    assert_eq!(Some(String::new()), attr(&doc, "#offline", "src"));
    assert_eq!(2, context.diagnostics.len());
    assert!(matches!(context.diagnostics[0], Diagnostic::NotFound { .. }));
    assert!(matches!(context.diagnostics[1], Diagnostic::NetworkError { .. }));
    assert_eq!(2, context.assets.len());
}

#[test]
fn test_markup_paths_match_asset_names() {
    let ok = "http://www1.atwiki.jp/mywiki/ok.png";
    let gone = "http://www1.atwiki.jp/mywiki/gone.gif";
    let mut fetcher = FakeFetcher::default()
        .with(ok, 200, None, PNG)
        .with(gone, 404, None, b"");
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        false,
        r#"<img src="/mywiki/ok.png"><img src="/mywiki/gone.gif"><link rel="stylesheet" href="/mywiki/x.css">"#,
    );

    let mut written: Vec<String> = doc
        .select(&Selector::parse("img, link").unwrap())
        .filter_map(|element| element.value().attr("src").or_else(|| element.value().attr("href")))
        .filter(|path| !path.is_empty())
        .map(String::from)
        .collect();
    written.sort();
    let mut stored: Vec<String> = context
        .assets
        .iter()
        .filter(|record| !matches!(record.status, FetchStatus::NetworkError(_)))
        .map(|record| format!("{FILES_DIR}{}", record.name))
        .collect();
    stored.sort();

    assert_eq!(stored, written);
}

#[test]
fn test_page_only_rewrites_without_fetching() {
    let mut fetcher = FakeFetcher::default().with("http://www1.atwiki.jp/mywiki/ok.png", 200, None, PNG);
    let (doc, context) = rewrite(
        &atwiki(),
        &mut fetcher,
        true,
        r#"<a href="/mywiki/pages/3.html">Three</a><img src="/mywiki/ok.png">"#,
    );

    assert_eq!(
        Some(identifier_of("http://www1.atwiki.jp/mywiki/pages/3.html") + ".xhtml"),
        attr(&doc, "a", "href")
    );
    assert_eq!(
        Some(format!("../files/{}", identifier_of("http://www1.atwiki.jp/mywiki/ok.png"))),
        attr(&doc, "img", "src")
    );
    assert_eq!(0, context.assets.len());
    assert!(fetcher.requests.is_empty());
}

#[test]
fn test_rewriting_is_deterministic() {
    let html = r#"<html><head><title>T</title><link rel="stylesheet" href="/a.css"></head>
        <body><p style="display:none" class="c" id="p">x</p><a href="/mywiki/pages/1.html#x" title="t">1</a>
        <img src="//cdn1.atwikiimg.com/mywiki/pub/1" alt="a" width="10"></body></html>"#;
    let site = atwiki();

    let render = || {
        let mut fetcher = FakeFetcher::default()
            .with("http://www1.atwiki.jp/a.css", 200, Some("text/css"), b"a{}")
            .with("http://cdn1.atwikiimg.com/mywiki/pub/1", 200, None, PNG);
        let (mut doc, _) = rewrite(&site, &mut fetcher, false, html);
        inject_stylesheet(&mut doc, "../files/style.css");
        doc.root_element().html()
    };

    assert_eq!(render(), render());
}

#[test]
fn test_inject_stylesheet() {
    let mut doc = Html::parse_document("<html><head><title>T</title></head><body></body></html>");
    inject_stylesheet(&mut doc, "../files/style.css");

    assert_eq!(
        "<head><title>T</title><link rel=\"stylesheet\" href=\"../files/style.css\" type=\"text/css\"></head>",
        doc.select(&HEAD_SELECTOR).next().unwrap().html()
    );
}

#[test]
fn test_reference_outcomes() {
    let site = atwiki();
    let mut fetcher = FakeFetcher::default();
    let mut context = RunContext::default();
    let mut assets = AssetFetcher::new(&mut fetcher, false);

    let dropped = rewrite_reference(&site.classify_src("/x.js"), "/x.js", "src", &site, &mut assets, &mut context);
    assert_eq!(ReferenceOutcome::Dropped("/x.js".to_string()), dropped);

    let failed = rewrite_reference(&site.classify_src("/a.png"), "/a.png", "src", &site, &mut assets, &mut context);
    match &failed {
        ReferenceOutcome::FetchFailed { url, reason } => {
            assert_eq!("http://www1.atwiki.jp/a.png", url);
            assert!(reason.contains("connection refused"));
        }
        other => panic!("Expected a failed fetch, got {other:?}"),
    }
    assert_eq!("", failed.attribute_value());
}
