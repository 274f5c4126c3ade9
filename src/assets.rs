use crate::cached_client::Fetch;
use crate::media_type::MediaTypeSource;
use reqwest::Url;
use std::collections::btree_map::{BTreeMap, Values};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Fetched,
    SkippedPageOnly,
    NotFound,
    /// Transport failure or an unexpected status, with the reason.
    NetworkError(String),
}

/// One external file referenced by the wiki's pages.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    /// File name under `files/`, as written into page markup.
    pub name: String,
    pub source: Url,
    /// Absent unless the fetch succeeded.
    pub bytes: Option<Vec<u8>>,
    pub media_type: String,
    pub status: FetchStatus,
}

/// Assets of one run keyed by file name. Ordered, so archives come out identical between runs.
#[derive(Debug, Default)]
pub struct AssetSet {
    records: BTreeMap<String, AssetRecord>,
}

impl AssetSet {
    pub fn get(&self, name: &str) -> Option<&AssetRecord> {
        self.records.get(name)
    }

    pub fn insert(&mut self, record: AssetRecord) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> Values<'_, String, AssetRecord> {
        self.records.values()
    }
}

/// Downloads the assets pages refer to, at most once per file name.
pub struct AssetFetcher<'a> {
    fetcher: &'a mut dyn Fetch,
    page_only: bool,
}

impl<'a> AssetFetcher<'a> {
    pub fn new(fetcher: &'a mut dyn Fetch, page_only: bool) -> Self {
        Self { fetcher, page_only }
    }

    /// Gives access to the underlying fetcher, for the pages themselves.
    pub fn fetcher(&mut self) -> &mut dyn Fetch {
        &mut *self.fetcher
    }

    /// Makes sure `name` is in `assets`, fetching `url` if it is not.
    ///
    /// Deduplication is by name: two URLs with the same name are the same asset.
    /// In page-only mode nothing is fetched and nothing is stored.
    pub fn ensure_fetched(
        &mut self,
        assets: &mut AssetSet,
        url: &Url,
        name: &str,
        media_type: MediaTypeSource,
    ) -> FetchStatus {
        if let Some(record) = assets.get(name) {
            return record.status.clone();
        }

        if self.page_only {
            debug!("Page-only mode, not downloading {url}");
            return FetchStatus::SkippedPageOnly;
        }

        let mut record = AssetRecord {
            name: name.to_string(),
            source: url.clone(),
            bytes: None,
            media_type: String::new(),
            status: FetchStatus::Fetched,
        };

        match self.fetcher.fetch(url) {
            Ok(res) => {
                if res.is_cached() {
                    debug!("Found {name} in cache for {url}");
                } else {
                    debug!("Downloaded {name} from {url}");
                }
                let response = res.into_contents();
                if response.is_not_found() {
                    record.status = FetchStatus::NotFound;
                } else if !response.is_success() {
                    record.status = FetchStatus::NetworkError(format!("HTTP status {}", response.status));
                } else {
                    record.media_type = media_type.resolve(response.content_type.as_deref(), &response.body);
                    record.bytes = Some(response.body);
                }
            }
            Err(e) => record.status = FetchStatus::NetworkError(e.to_string()),
        }

        let status = record.status.clone();
        assets.insert(record);
        status
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::cached_client::{Fetch, Resource, Response};
    use easy_error::{err_msg, Error};
    use reqwest::Url;
    use std::collections::HashMap;

    /// Serves canned responses and counts requests. Unknown URLs are network errors.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub responses: HashMap<String, Response>,
        pub requests: Vec<String>,
    }

    impl FakeFetcher {
        pub fn with(mut self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) -> Self {
            self.responses.insert(
                url.to_string(),
                Response {
                    status,
                    content_type: content_type.map(String::from),
                    body: body.to_vec(),
                },
            );
            self
        }

        pub fn with_html(self, url: &str, html: &str) -> Self {
            self.with(url, 200, Some("text/html; charset=UTF-8"), html.as_bytes())
        }

        pub fn requests_for(&self, url: &str) -> usize {
            self.requests.iter().filter(|request| request.as_str() == url).count()
        }
    }

    impl Fetch for FakeFetcher {
        fn fetch(&mut self, url: &Url) -> Result<Resource<Response>, Error> {
            self.requests.push(url.to_string());
            self.responses
                .get(url.as_str())
                .cloned()
                .map(Resource::Fetched)
                .ok_or_else(|| err_msg(format!("connection refused: {url}")))
        }
    }
}

#[cfg(test)]
use self::testing::FakeFetcher;

#[cfg(test)]
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00];

#[test]
fn test_fetches_once_per_name() {
    let url = Url::parse("http://wikiwiki.jp/mywiki/logo.png").unwrap();
    let mut fetcher = FakeFetcher::default().with(url.as_str(), 200, Some("image/png"), PNG);
    let mut assets = AssetSet::default();

    {
        let mut adapter = AssetFetcher::new(&mut fetcher, false);
        assert_eq!(FetchStatus::Fetched, adapter.ensure_fetched(&mut assets, &url, "logo.png", MediaTypeSource::Declared));
        assert_eq!(FetchStatus::Fetched, adapter.ensure_fetched(&mut assets, &url, "logo.png", MediaTypeSource::Declared));
    }

    assert_eq!(1, fetcher.requests_for(url.as_str()));
    let record = assets.get("logo.png").expect("Asset not stored.");
    assert_eq!("image/png", record.media_type);
    assert_eq!(Some(PNG.to_vec()), record.bytes);
}

#[test]
fn test_not_found_is_recorded_without_bytes() {
    let url = Url::parse("http://wikiwiki.jp/mywiki/gone.png").unwrap();
    let mut fetcher = FakeFetcher::default().with(url.as_str(), 404, Some("text/html"), b"Not Found");
    let mut assets = AssetSet::default();

    let status = AssetFetcher::new(&mut fetcher, false).ensure_fetched(&mut assets, &url, "gone.png", MediaTypeSource::Sniffed);

    assert_eq!(FetchStatus::NotFound, status);
    let record = assets.get("gone.png").expect("Asset not recorded.");
    assert_eq!(None, record.bytes);
}

#[test]
fn test_network_error_is_not_retried() {
    let url = Url::parse("http://wikiwiki.jp/mywiki/offline.png").unwrap();
    let mut fetcher = FakeFetcher::default();
    let mut assets = AssetSet::default();

    {
        let mut adapter = AssetFetcher::new(&mut fetcher, false);
        for _ in 0..2 {
            match adapter.ensure_fetched(&mut assets, &url, "offline.png", MediaTypeSource::Sniffed) {
                FetchStatus::NetworkError(reason) => assert!(reason.contains("connection refused")),
                other => panic!("Unexpected status {other:?}"),
            }
        }
    }

    assert_eq!(1, fetcher.requests.len());
}

#[test]
fn test_page_only_mode_stores_nothing() {
    let url = Url::parse("http://wikiwiki.jp/mywiki/logo.png").unwrap();
    let mut fetcher = FakeFetcher::default().with(url.as_str(), 200, Some("image/png"), PNG);
    let mut assets = AssetSet::default();

    let status = AssetFetcher::new(&mut fetcher, true).ensure_fetched(&mut assets, &url, "logo.png", MediaTypeSource::Declared);

    assert_eq!(FetchStatus::SkippedPageOnly, status);
    assert_eq!(0, assets.len());
    assert!(fetcher.requests.is_empty());
}

#[test]
fn test_override_media_type() {
    let url = Url::parse("http://www1.atwiki.jp/common/atwiki.css").unwrap();
    let mut fetcher = FakeFetcher::default().with(url.as_str(), 200, Some("text/plain"), b"body {}");
    let mut assets = AssetSet::default();

    AssetFetcher::new(&mut fetcher, false).ensure_fetched(&mut assets, &url, "a.css", MediaTypeSource::Override("text/css"));

    assert_eq!("text/css", assets.get("a.css").unwrap().media_type);
}
