use easy_error::{err_msg, Error, ResultExt};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Status, declared type and body of an HTTP response, as live or as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.status == 410
    }

    /// Body decoded as UTF-8. Both wikis serve UTF-8, and when the header
    /// disagrees the document usually says so itself, so the header is not consulted.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Wraps the response from a `Fetch` implementation to allow the consumer
/// to find out whether the resource was fetched or replayed from the cassette.
#[derive(Debug)]
pub enum Resource<T> {
    Fetched(T),
    Cached(T),
}

impl<T> Resource<T> {
    pub fn contents(&self) -> &T {
        match self {
            Resource::Fetched(contents) => contents,
            Resource::Cached(contents) => contents,
        }
    }

    pub fn into_contents(self) -> T {
        match self {
            Resource::Fetched(contents) => contents,
            Resource::Cached(contents) => contents,
        }
    }

    pub fn is_cached(&self) -> bool {
        match self {
            Resource::Fetched(_) => false,
            Resource::Cached(_) => true,
        }
    }
}

/// Everything the scraper needs from the network and the local disk.
pub trait Fetch {
    fn fetch(&mut self, url: &Url) -> Result<Resource<Response>, Error>;

    fn fetch_local(&self, path: &Path) -> Result<Vec<u8>, Error> {
        std::fs::read(path).context(format!("Could not read local file {path:?}"))
    }
}

/// When the cassette is allowed to go to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Replay only. Unrecorded URIs are an error.
    None,
    /// Replay recorded URIs, fetch and record the others.
    NewEpisodes,
    /// Always fetch, re-recording everything.
    All,
}

impl FromStr for RecordMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "new-episodes" | "new_episodes" => Ok(Self::NewEpisodes),
            "all" => Ok(Self::All),
            other => Err(err_msg(format!(
                "Unknown record mode '{other}', expected one of none, new-episodes, all"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub record_mode: RecordMode,
    /// Waited before every request that goes to the network.
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            record_mode: RecordMode::NewEpisodes,
            delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
        }
    }
}

/// One line of the cassette file.
#[derive(Debug, Serialize, Deserialize)]
struct Recording {
    uri: String,
    status: u16,
    content_type: Option<String>,
    /// Hex-encoded body.
    body: String,
}

/// Recorded responses keyed by request URI, backed by a JSON-lines file.
///
/// Every new recording is appended immediately, so a run that dies halfway
/// replays everything it already downloaded when restarted.
struct Cassette {
    recordings: HashMap<String, Response>,
    writer: Option<File>,
}

impl Cassette {
    fn in_memory() -> Self {
        Self {
            recordings: HashMap::new(),
            writer: None,
        }
    }

    fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            create_dir_all(parent).context(format!("Could not create cassette directory {parent:?}"))?;
        }

        let mut recordings = HashMap::new();
        if path.exists() {
            let file = File::open(path).context(format!("Could not open cassette {path:?}"))?;
            for (number, line) in BufReader::new(file).lines().enumerate() {
                let line = line.context(format!("Could not read cassette {path:?}"))?;
                if line.trim().is_empty() {
                    continue;
                }
                match Self::decode(&line) {
                    // Later lines win, `RecordMode::All` appends fresh copies of old URIs.
                    Ok((uri, response)) => {
                        recordings.insert(uri, response);
                    }
                    // A run killed mid-write leaves a truncated last line behind.
                    Err(e) => warn!("Ignoring unreadable line {} of cassette {:?}: {}", number + 1, path, e),
                }
            }
            debug!("Loaded {} recordings from {:?}", recordings.len(), path);
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Could not open cassette {path:?} for writing"))?;

        Ok(Self {
            recordings,
            writer: Some(writer),
        })
    }

    fn decode(line: &str) -> Result<(String, Response), Error> {
        let recording: Recording = serde_json::from_str(line).context("Malformed recording")?;
        let body = hex::decode(&recording.body).context("Recorded body is not hex")?;
        Ok((
            recording.uri,
            Response {
                status: recording.status,
                content_type: recording.content_type,
                body,
            },
        ))
    }

    fn get(&self, uri: &str) -> Option<&Response> {
        self.recordings.get(uri)
    }

    fn record(&mut self, uri: &str, response: &Response) -> Result<(), Error> {
        if let Some(ref mut writer) = self.writer {
            let recording = Recording {
                uri: uri.to_string(),
                status: response.status,
                content_type: response.content_type.clone(),
                body: hex::encode(&response.body),
            };
            let line = serde_json::to_string(&recording).context(format!("Could not serialize recording of {uri}"))?;
            writeln!(writer, "{line}").context(format!("Could not record {uri}"))?;
        }
        self.recordings.insert(uri.to_string(), response.clone());
        Ok(())
    }
}

/// The live side of the client: one GET request, no caching.
pub trait Transport {
    fn download(&self, url: &Url) -> Result<Response, Error>;
}

impl Transport for Client {
    fn download(&self, url: &Url) -> Result<Response, Error> {
        let response = self.get(url.clone()).send().context(format!("Could not retrieve {url}"))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = response.bytes().context(format!("Could not read body of {url}"))?;

        Ok(Response {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Records the responses of a `Transport` in a cassette file
/// and replays them on later requests for the same URI.
pub struct CachedClient {
    transport: Box<dyn Transport>,
    config: ClientConfig,
    cassette: Cassette,
}

impl CachedClient {
    /// A client going to the network through `reqwest`.
    pub fn new(cassette_path: Option<PathBuf>, config: ClientConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Could not create HTTP client")?;
        Self::with_transport(cassette_path, config, Box::new(client))
    }

    pub fn with_transport(
        cassette_path: Option<PathBuf>,
        config: ClientConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, Error> {
        let cassette = match cassette_path {
            Some(ref path) => Cassette::open(path)?,
            None => Cassette::in_memory(),
        };

        Ok(Self {
            transport,
            config,
            cassette,
        })
    }
}

impl Fetch for CachedClient {
    fn fetch(&mut self, url: &Url) -> Result<Resource<Response>, Error> {
        if self.config.record_mode != RecordMode::All {
            if let Some(response) = self.cassette.get(url.as_str()) {
                return Ok(Resource::Cached(response.clone()));
            }
        }

        if self.config.record_mode == RecordMode::None {
            return Err(err_msg(format!("{url} is not in the cassette and record mode is 'none'")));
        }

        // Be polite, only requests that actually hit the wiki are delayed.
        thread::sleep(self.config.delay);

        let response = self.transport.download(url)?;
        self.cassette.record(url.as_str(), &response)?;
        Ok(Resource::Fetched(response))
    }
}

#[cfg(test)]
use std::cell::Cell;
#[cfg(test)]
use std::rc::Rc;
#[cfg(test)]
use std::time::Instant;

/// Answers every request with its own URL, counting the requests.
#[cfg(test)]
struct EchoTransport {
    requests: Rc<Cell<usize>>,
}

#[cfg(test)]
impl Transport for EchoTransport {
    fn download(&self, url: &Url) -> Result<Response, Error> {
        self.requests.set(self.requests.get() + 1);
        Ok(Response {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: url.as_str().as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
fn echo_client(path: &Path, record_mode: RecordMode, delay: Duration) -> (CachedClient, Rc<Cell<usize>>) {
    let requests = Rc::new(Cell::new(0));
    let config = ClientConfig {
        record_mode,
        delay,
        ..ClientConfig::default()
    };
    let transport = EchoTransport {
        requests: requests.clone(),
    };
    let client = CachedClient::with_transport(Some(path.to_path_buf()), config, Box::new(transport))
        .expect("Could not create client.");
    (client, requests)
}

#[cfg(test)]
fn recorded_lines(path: &Path) -> usize {
    std::fs::read_to_string(path).expect("Could not read cassette.").lines().count()
}

#[test]
fn test_cassette_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.jsonl");
    let response = Response {
        status: 200,
        content_type: Some("image/png".to_string()),
        body: vec![0x89, b'P', b'N', b'G', 0x00, 0xFF],
    };

    {
        let mut cassette = Cassette::open(&path).expect("Could not open cassette.");
        cassette.record("http://wikiwiki.jp/a.png", &response).expect("Could not record.");
    }

    let cassette = Cassette::open(&path).expect("Could not reopen cassette.");
    assert_eq!(Some(&response), cassette.get("http://wikiwiki.jp/a.png"));
    assert_eq!(None, cassette.get("http://wikiwiki.jp/b.png"));
}

#[test]
fn test_cassette_skips_truncated_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.jsonl");
    std::fs::write(
        &path,
        "{\"uri\":\"http://wikiwiki.jp/\",\"status\":404,\"content_type\":null,\"body\":\"6869\"}\n{\"uri\":\"http://wiki",
    )
    .expect("Could not write cassette.");

    let cassette = Cassette::open(&path).expect("Could not open cassette.");
    let response = cassette.get("http://wikiwiki.jp/").expect("Recording not found.");
    assert!(response.is_not_found());
    assert_eq!("hi", response.text());
}

#[test]
fn test_cassette_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache").join("wikiwiki-mywiki.cassette.jsonl");

    Cassette::open(&path).expect("Could not open cassette.");
    assert!(path.exists());
}

#[test]
fn test_replay_only_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.jsonl");
    {
        let mut cassette = Cassette::open(&path).expect("Could not open cassette.");
        cassette
            .record(
                "http://wikiwiki.jp/mywiki/",
                &Response {
                    status: 200,
                    content_type: Some("text/html".to_string()),
                    body: b"<title>My wiki</title>".to_vec(),
                },
            )
            .expect("Could not record.");
    }

    let (mut client, requests) = echo_client(&path, RecordMode::None, Duration::ZERO);

    let recorded = client
        .fetch(&Url::parse("http://wikiwiki.jp/mywiki/").unwrap())
        .expect("Recorded URI should replay.");
    assert!(recorded.is_cached());
    assert_eq!("<title>My wiki</title>", recorded.contents().text());

    assert!(client.fetch(&Url::parse("http://wikiwiki.jp/other/").unwrap()).is_err());
    assert_eq!(0, requests.get());
}

#[test]
fn test_new_episodes_records_misses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episodes.jsonl");
    let alpha = Url::parse("http://wikiwiki.jp/mywiki/?Alpha").unwrap();
    let beta = Url::parse("http://wikiwiki.jp/mywiki/?Beta").unwrap();

    {
        let (mut client, requests) = echo_client(&path, RecordMode::NewEpisodes, Duration::ZERO);

        assert!(!client.fetch(&alpha).unwrap().is_cached());
        assert_eq!(1, requests.get());
        assert_eq!(1, recorded_lines(&path));

        let replayed = client.fetch(&alpha).unwrap();
        assert!(replayed.is_cached());
        assert_eq!(alpha.as_str(), replayed.contents().text());
        assert_eq!(1, requests.get());

        client.fetch(&beta).unwrap();
        assert_eq!(2, requests.get());
        assert_eq!(2, recorded_lines(&path));
    }

    // A later run replays both without the network.
    let (mut client, requests) = echo_client(&path, RecordMode::None, Duration::ZERO);
    assert_eq!(beta.as_str(), client.fetch(&beta).unwrap().contents().text());
    assert_eq!(0, requests.get());
}

#[test]
fn test_all_mode_refetches_recorded_uris() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("all.jsonl");
    let alpha = Url::parse("http://wikiwiki.jp/mywiki/?Alpha").unwrap();
    echo_client(&path, RecordMode::NewEpisodes, Duration::ZERO).0.fetch(&alpha).unwrap();

    let (mut client, requests) = echo_client(&path, RecordMode::All, Duration::ZERO);
    assert!(!client.fetch(&alpha).unwrap().is_cached());
    assert_eq!(1, requests.get());
    assert_eq!(2, recorded_lines(&path));
}

#[test]
fn test_delay_applies_to_live_requests_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delay.jsonl");
    let delay = Duration::from_millis(300);
    let alpha = Url::parse("http://wikiwiki.jp/mywiki/?Alpha").unwrap();
    let (mut client, _) = echo_client(&path, RecordMode::NewEpisodes, delay);

    let started = Instant::now();
    client.fetch(&alpha).unwrap();
    assert!(started.elapsed() >= delay);

    let started = Instant::now();
    assert!(client.fetch(&alpha).unwrap().is_cached());
    assert!(started.elapsed() < delay);
}

#[test]
fn test_record_mode_from_str() {
    assert_eq!(RecordMode::None, "none".parse::<RecordMode>().unwrap());
    assert_eq!(RecordMode::NewEpisodes, "new-episodes".parse::<RecordMode>().unwrap());
    assert_eq!(RecordMode::All, "all".parse::<RecordMode>().unwrap());
    assert!("sometimes".parse::<RecordMode>().is_err());
}
