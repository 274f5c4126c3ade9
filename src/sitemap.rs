use crate::cached_client::Fetch;
use crate::platform::{Platform, WikiSite};
use easy_error::{err_msg, Error, ResultExt};
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, warn};

lazy_static! {
    static ref WIKIWIKI_LIST_LINK_SELECTOR: Selector = Selector::parse("#body > ul > li > ul > li > a").unwrap();
    static ref ATWIKI_PAGINATION_SELECTOR: Selector = Selector::parse("div.pagelist > p").unwrap();
    static ref ATWIKI_PAGINATION_ENTRY_SELECTOR: Selector = Selector::parse("span, a").unwrap();
    // html5ever inserts <tbody>, so no child combinator between table and tr.
    static ref ATWIKI_LIST_LINK_SELECTOR: Selector = Selector::parse("table.pagelist tr > td > a").unwrap();
}

/// Enumerates every page of a wiki, before any of them is processed.
pub trait SiteMapDiscovery {
    fn discover(&self, site: &WikiSite, fetcher: &mut dyn Fetch) -> Result<Vec<Url>, Error>;
}

pub fn for_platform(platform: Platform) -> Box<dyn SiteMapDiscovery> {
    match platform {
        Platform::Wikiwiki => Box::new(WikiwikiSiteMap),
        Platform::Atwiki { .. } => Box::new(AtwikiSiteMap),
    }
}

/// Fetches and parses a page that has to be there, anything but success is an error.
pub fn fetch_document(fetcher: &mut dyn Fetch, url: &Url) -> Result<Html, Error> {
    let res = fetcher.fetch(url)?;
    if res.is_cached() {
        debug!("Using {url} from cache");
    } else {
        debug!("Downloaded {url}");
    }
    let response = res.contents();
    if !response.is_success() {
        return Err(err_msg(format!("{url} answered with HTTP status {}", response.status)));
    }
    Ok(Html::parse_document(&response.text()))
}

fn collect_links(doc: &Html, selector: &Selector, site: &WikiSite) -> Vec<Url> {
    doc.select(selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| {
            let url = site.resolve(href);
            if url.is_none() {
                warn!("Ignoring unresolvable page link {href}");
            }
            url
        })
        .collect()
}

/// wikiwiki lists every page, nested by prefix, on a single page.
pub struct WikiwikiSiteMap;

impl SiteMapDiscovery for WikiwikiSiteMap {
    fn discover(&self, site: &WikiSite, fetcher: &mut dyn Fetch) -> Result<Vec<Url>, Error> {
        let list_url = site.base_url().join("?cmd=list").context("Could not create page list url")?;
        let doc = fetch_document(fetcher, &list_url)?;
        Ok(collect_links(&doc, &WIKIWIKI_LIST_LINK_SELECTOR, site))
    }
}

/// atwiki paginates its page list. The third paragraph of the pagination block
/// holds one entry per listing page, a `span` for the current one and `a` for the rest.
pub struct AtwikiSiteMap;

impl AtwikiSiteMap {
    fn listing_page_count(doc: &Html) -> Result<usize, Error> {
        let pagination = doc
            .select(&ATWIKI_PAGINATION_SELECTOR)
            .nth(2)
            .ok_or(err_msg("no pagination found on page list"))?;
        // The first listing page exists even when the pagination is empty.
        Ok(pagination.select(&ATWIKI_PAGINATION_ENTRY_SELECTOR).count().max(1))
    }
}

impl SiteMapDiscovery for AtwikiSiteMap {
    fn discover(&self, site: &WikiSite, fetcher: &mut dyn Fetch) -> Result<Vec<Url>, Error> {
        let list_url = site.base_url().join("list").context("Could not create page list url")?;
        let count = Self::listing_page_count(&fetch_document(fetcher, &list_url)?)?;
        debug!("Page list of {} has {} pages", site.site_id(), count);

        let mut urls = Vec::new();
        for index in 0..count {
            let listing_url = site
                .base_url()
                .join(&format!("list?sort=create&pp={index}"))
                .context("Could not create page list url")?;
            let doc = fetch_document(fetcher, &listing_url)?;
            urls.extend(collect_links(&doc, &ATWIKI_LIST_LINK_SELECTOR, site));
        }
        Ok(urls)
    }
}

#[cfg(test)]
use crate::assets::testing::FakeFetcher;

#[cfg(test)]
fn atwiki_listing(links: &[&str]) -> String {
    let rows: String = links
        .iter()
        .map(|link| format!(r#"<tr><td><a href="{link}">{link}</a></td><td>2020-01-01</td></tr>"#))
        .collect();
    format!(
        r#"<html><body><div class="pagelist"><p>Sort</p><p>Filter</p><p><span>1</span> <a href="list?pp=1">2</a> <a href="list?pp=2">3</a></p></div>
        <table class="pagelist"><tr><th>Page</th><th>Created</th></tr>{rows}</table></body></html>"#
    )
}

#[test]
fn test_wikiwiki_nested_list() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let mut fetcher = FakeFetcher::default().with_html(
        "http://wikiwiki.jp/mywiki/?cmd=list",
        r#"<html><body><div id="body"><ul>
            <li><a href="/mywiki/?cmd=list#A">A</a><ul>
                <li><a href="/mywiki/?Alpha">Alpha</a></li>
                <li><a href="http://wikiwiki.jp/mywiki/?Apple">Apple</a></li>
            </ul></li>
        </ul></div></body></html>"#,
    );

    let urls = WikiwikiSiteMap.discover(&site, &mut fetcher).expect("Discovery failed.");

    assert_eq!(
        vec!["http://wikiwiki.jp/mywiki/?Alpha", "http://wikiwiki.jp/mywiki/?Apple"],
        urls.iter().map(Url::as_str).collect::<Vec<_>>()
    );
}

#[test]
fn test_atwiki_paginated_list() {
    let site = WikiSite::new(Platform::Atwiki { server: 2 }, "mywiki").unwrap();
    let mut fetcher = FakeFetcher::default()
        .with_html("http://www2.atwiki.jp/mywiki/list", &atwiki_listing(&[]))
        .with_html(
            "http://www2.atwiki.jp/mywiki/list?sort=create&pp=0",
            &atwiki_listing(&["/mywiki/pages/1.html", "/mywiki/pages/2.html"]),
        )
        .with_html(
            "http://www2.atwiki.jp/mywiki/list?sort=create&pp=1",
            &atwiki_listing(&["//www2.atwiki.jp/mywiki/pages/3.html"]),
        )
        .with_html("http://www2.atwiki.jp/mywiki/list?sort=create&pp=2", &atwiki_listing(&[]));

    let urls = AtwikiSiteMap.discover(&site, &mut fetcher).expect("Discovery failed.");

    assert_eq!(
        vec![
            "http://www2.atwiki.jp/mywiki/pages/1.html",
            "http://www2.atwiki.jp/mywiki/pages/2.html",
            "http://www2.atwiki.jp/mywiki/pages/3.html",
        ],
        urls.iter().map(Url::as_str).collect::<Vec<_>>()
    );
    assert_eq!(4, fetcher.requests.len());
}

#[test]
fn test_atwiki_without_pagination_fails() {
    let site = WikiSite::new(Platform::Atwiki { server: 2 }, "mywiki").unwrap();
    let mut fetcher = FakeFetcher::default().with_html("http://www2.atwiki.jp/mywiki/list", "<html><body>Maintenance</body></html>");

    assert!(AtwikiSiteMap.discover(&site, &mut fetcher).is_err());
}

#[test]
fn test_missing_list_is_fatal() {
    let site = WikiSite::new(Platform::Wikiwiki, "mywiki").unwrap();
    let mut fetcher = FakeFetcher::default().with("http://wikiwiki.jp/mywiki/?cmd=list", 404, None, b"");

    assert!(for_platform(site.platform()).discover(&site, &mut fetcher).is_err());
}
