use crate::assets::AssetFetcher;
use crate::cached_client::Fetch;
use crate::context::{Diagnostic, RewrittenPage, RunContext};
use crate::identifier::identifier_of;
use crate::platform::{Platform, WikiSite, FILES_DIR};
use crate::rewriter::{inject_stylesheet, rewrite_document};
use crate::sitemap::{self, fetch_document};
use crate::xml_utils::XmlSerializable;
use easy_error::{err_msg, Error};
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::info;

/// File name of the stylesheet every page links to.
pub const STYLESHEET_FILE: &str = "style.css";

lazy_static! {
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref SITE_NAME_SELECTOR: Selector = Selector::parse(r#"head > meta[property="og:site_name"]"#).unwrap();
    static ref HEAD_SELECTOR: Selector = Selector::parse("head").unwrap();
    static ref BODY_SELECTOR: Selector = Selector::parse("body").unwrap();
}

/// A crawled wiki, ready to be assembled into a book.
pub struct CrawledWiki {
    pub title: String,
    pub context: RunContext,
}

fn page_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SELECTOR)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// The wiki's name, as shown on its top page.
fn book_title(platform: Platform, top_page: &Html) -> Result<String, Error> {
    match platform {
        Platform::Wikiwiki => page_title(top_page).ok_or(err_msg("no element named 'title' on top page")),
        Platform::Atwiki { .. } => top_page
            .select(&SITE_NAME_SELECTOR)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(|name| name.trim().to_string())
            .ok_or(err_msg("no og:site_name meta element on top page")),
    }
}

/// Crawls every page of `site`, rewriting each and collecting the assets they use.
///
/// All page URLs are enumerated before the first page is fetched. Failing to
/// enumerate them, or a transport error on a page, aborts the run.
pub fn crawl(site: &WikiSite, fetcher: &mut dyn Fetch, page_only: bool) -> Result<CrawledWiki, Error> {
    info!("Getting site info for {}", site.base_url());
    let top_page = fetch_document(fetcher, site.base_url())?;
    let title = book_title(site.platform(), &top_page)?;

    info!("Getting site map of {title}");
    let urls = sitemap::for_platform(site.platform()).discover(site, fetcher)?;

    info!("Generating {} pages", urls.len());
    let mut context = RunContext::default();
    let mut assets = AssetFetcher::new(fetcher, page_only);

    for (index, url) in urls.iter().enumerate() {
        info!("Page {} of {}: {}", index + 1, urls.len(), url);

        let response = assets.fetcher().fetch(url)?.into_contents();
        if !response.is_success() {
            context.report(Diagnostic::PageSkipped {
                url: url.to_string(),
                status: response.status,
            });
            continue;
        }

        let page = rewrite_page(site, url, &response.text(), &mut assets, &mut context)?;
        context.pages.insert(page);
    }

    Ok(CrawledWiki { title, context })
}

/// Parses and rewrites one page, linking it to the book's stylesheet.
pub fn rewrite_page(
    site: &WikiSite,
    url: &Url,
    html: &str,
    assets: &mut AssetFetcher,
    context: &mut RunContext,
) -> Result<RewrittenPage, Error> {
    let mut doc = Html::parse_document(html);
    let title = page_title(&doc).unwrap_or_else(|| url.to_string());

    rewrite_document(&mut doc, site, assets, context);
    inject_stylesheet(&mut doc, &format!("{FILES_DIR}{STYLESHEET_FILE}"));

    // The parser creates <head> and <body> even when the source has neither.
    let head = doc.select(&HEAD_SELECTOR).next().ok_or(err_msg("page has no head"))?.xml()?;
    let body = doc.select(&BODY_SELECTOR).next().ok_or(err_msg("page has no body"))?.xml()?;

    Ok(RewrittenPage {
        key: identifier_of(url.as_str()),
        title,
        head,
        body,
    })
}

#[cfg(test)]
use crate::assets::testing::FakeFetcher;

#[cfg(test)]
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

#[cfg(test)]
fn wikiwiki_fixture() -> FakeFetcher {
    FakeFetcher::default()
        .with_html("http://wikiwiki.jp/mywiki/", "<html><head><title> My Wiki </title></head><body></body></html>")
        .with_html(
            "http://wikiwiki.jp/mywiki/?cmd=list",
            r#"<div id="body"><ul><li>A<ul>
                <li><a href="/mywiki/?Alpha">Alpha</a></li>
                <li><a href="/mywiki/?Beta">Beta</a></li>
                <li><a href="/mywiki/?Gone">Gone</a></li>
                <li><a href="/mywiki/?Alpha">Alpha</a></li>
            </ul></li></ul></div>"#,
        )
        .with_html(
            "http://wikiwiki.jp/mywiki/?Alpha",
            r#"<html><head><title>Alpha</title><link rel="stylesheet" href="/mywiki/skin.css"></head>
            <body><a href="/mywiki/?Beta">Beta</a><img src="/mywiki/logo.png"></body></html>"#,
        )
        .with_html(
            "http://wikiwiki.jp/mywiki/?Beta",
            r#"<html><head></head><body><a href="/mywiki/?Alpha">Alpha</a><img src="/mywiki/logo.png"></body></html>"#,
        )
        .with("http://wikiwiki.jp/mywiki/?Gone", 404, Some("text/html"), b"Not found")
        .with("http://wikiwiki.jp/mywiki/skin.css", 200, Some("text/css; charset=utf-8"), b"body {}")
        .with("http://wikiwiki.jp/mywiki/logo.png", 200, Some("image/png"), PNG)
}

#[test]
fn test_crawl_wikiwiki() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let mut fetcher = wikiwiki_fixture();

    let wiki = crawl(&site, &mut fetcher, false).expect("Crawl failed.");

    assert_eq!("My Wiki", wiki.title);
    let alpha_key = identifier_of("http://wikiwiki.jp/mywiki/?Alpha");
    let beta_key = identifier_of("http://wikiwiki.jp/mywiki/?Beta");
    assert_eq!(
        vec![alpha_key.as_str(), beta_key.as_str()],
        wiki.context.pages.iter().map(|page| page.key.as_str()).collect::<Vec<_>>()
    );

    let alpha = wiki.context.pages.get(&alpha_key).unwrap();
    assert_eq!("Alpha", alpha.title);
    assert!(alpha.head.starts_with("<head>"));
    assert!(alpha.head.contains(r#"<link rel="stylesheet" href="../files/style.css" type="text/css""#));
    assert!(alpha.body.contains(&format!(r#"href="{beta_key}.xhtml""#)));

    let beta = wiki.context.pages.get(&beta_key).unwrap();
    // No <title>, so the URL stands in.
    assert_eq!("http://wikiwiki.jp/mywiki/?Beta", beta.title);
    assert!(beta.body.contains(&format!(r#"href="{alpha_key}.xhtml""#)));

    let logo = format!("{}.png", identifier_of("http://wikiwiki.jp/mywiki/logo.png"));
    assert_eq!(1, fetcher.requests_for("http://wikiwiki.jp/mywiki/logo.png"));
    assert_eq!("image/png", wiki.context.assets.get(&logo).unwrap().media_type);
    assert_eq!(2, wiki.context.assets.len());

    assert_eq!(
        vec![Diagnostic::PageSkipped {
            url: "http://wikiwiki.jp/mywiki/?Gone".to_string(),
            status: 404,
        }],
        wiki.context.diagnostics
    );
}

#[test]
fn test_page_only_crawl_fetches_no_assets() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let mut fetcher = wikiwiki_fixture();

    let wiki = crawl(&site, &mut fetcher, true).expect("Crawl failed.");

    assert_eq!(2, wiki.context.pages.len());
    assert_eq!(0, wiki.context.assets.len());
    assert_eq!(0, fetcher.requests_for("http://wikiwiki.jp/mywiki/logo.png"));
    let alpha = wiki.context.pages.get(&identifier_of("http://wikiwiki.jp/mywiki/?Alpha")).unwrap();
    assert!(alpha.body.contains(&identifier_of("http://wikiwiki.jp/mywiki/logo.png")));
}

#[test]
fn test_crawl_is_reproducible() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let first = crawl(&site, &mut wikiwiki_fixture(), false).expect("Crawl failed.");
    let second = crawl(&site, &mut wikiwiki_fixture(), false).expect("Crawl failed.");

    assert_eq!(
        first.context.pages.iter().collect::<Vec<_>>(),
        second.context.pages.iter().collect::<Vec<_>>()
    );
}

#[test]
fn test_atwiki_title_from_site_name() {
    let site = WikiSite::new(Platform::Atwiki { server: 1 }, "mywiki").unwrap();
    let mut fetcher = FakeFetcher::default().with_html(
        "http://www1.atwiki.jp/mywiki/",
        r#"<html><head><title>Top - My atwiki</title><meta property="og:site_name" content="My atwiki"></head></html>"#,
    );

    // Discovery fails afterwards, the list is not served.
    assert!(crawl(&site, &mut fetcher, false).is_err());
    let top = Html::parse_document(&fetcher.responses["http://www1.atwiki.jp/mywiki/"].text());
    assert_eq!("My atwiki", book_title(site.platform(), &top).unwrap());
}

#[test]
fn test_unreachable_page_is_fatal() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let mut fetcher = wikiwiki_fixture();
    fetcher.responses.remove("http://wikiwiki.jp/mywiki/?Beta");

    assert!(crawl(&site, &mut fetcher, false).is_err());
}
