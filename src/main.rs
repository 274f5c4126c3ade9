extern crate structopt;
extern crate directories;
extern crate ego_tree;
extern crate epub_builder;
#[macro_use]
extern crate html5ever;
extern crate html_escape;
extern crate markup5ever;
extern crate regex;
extern crate reqwest;
extern crate scraper;
extern crate easy_error;
#[macro_use]
extern crate lazy_static;
extern crate xml5ever;

mod assets;
mod book;
mod cached_client;
mod context;
mod crawl;
mod dom_manipulation;
mod identifier;
mod media_type;
mod packager;
mod platform;
mod rewriter;
mod sitemap;
mod xml_utils;

use book::{BookAssembler, BookMetadata};
use cached_client::{CachedClient, ClientConfig, Fetch, RecordMode};
use directories::ProjectDirs;
use easy_error::{Error, ResultExt};
use packager::EpubPackager;
use platform::{Platform, WikiSite};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Scrapes a whole wiki from wikiwiki.jp or atwiki.jp and converts it to EPUB format.
#[derive(StructOpt)]
struct Args {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Scrape a wiki hosted on wikiwiki.jp
    Wikiwiki {
        /// Wiki name, the first path segment of its URL
        wiki_id: String,
        /// Where to write the EPUB
        #[structopt(parse(from_os_str))]
        output: PathBuf,
        #[structopt(flatten)]
        options: Options,
    },
    /// Scrape a wiki hosted on www<server>.atwiki.jp
    Atwiki {
        /// Server number, e.g. 7 for www7.atwiki.jp
        server: u32,
        /// Wiki name, the first path segment of its URL
        wiki_id: String,
        /// Where to write the EPUB
        #[structopt(parse(from_os_str))]
        output: PathBuf,
        #[structopt(flatten)]
        options: Options,
    },
}

#[derive(StructOpt)]
struct Options {
    /// Cassette file of recorded responses. Defaults to one per wiki in the cache directory
    #[structopt(long, parse(from_os_str))]
    cassette: Option<PathBuf>,
    /// Rebuild from the cassette only, without downloading assets
    #[structopt(long)]
    pages_only: bool,
    /// none, new-episodes or all
    #[structopt(long, default_value = "new-episodes")]
    record_mode: RecordMode,
    /// Wait before every request that goes to the network
    #[structopt(long, default_value = "1000")]
    delay_ms: u64,
    #[structopt(long, default_value = "60")]
    timeout_secs: u64,
    /// Book identifier. Defaults to <wiki-id>_<timestamp>
    #[structopt(long)]
    book_id: Option<String>,
    /// Culture code of the book's language
    #[structopt(long, default_value = "ja-JP")]
    lang: String,
    #[structopt(long, default_value = "unknown")]
    author: String,
    #[structopt(long, default_value = "unknown")]
    rights: String,
    #[structopt(long, default_value = "unknown")]
    publisher: String,
    /// Use this stylesheet instead of the built-in one
    #[structopt(long, parse(from_os_str))]
    stylesheet: Option<PathBuf>,
    /// More output, repeat for even more
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

fn main() -> Result<(), Error> {
    let args = Args::from_args();
    let (platform, wiki_id, output, options) = match args.command {
        Command::Wikiwiki { wiki_id, output, options } => (Platform::Wikiwiki, wiki_id, output, options),
        Command::Atwiki { server, wiki_id, output, options } => (Platform::Atwiki { server }, wiki_id, output, options),
    };

    init_logging(options.verbose)?;
    scrape(platform, &wiki_id, output, options)
}

fn init_logging(verbose: u8) -> Result<(), Error> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber).context("Could not set up logging")
}

fn default_cassette(platform: Platform, wiki_id: &str) -> Option<PathBuf> {
    let proj_dirs = ProjectDirs::from("net", "Demenses", "wiki-epub-scraper")?;
    Some(proj_dirs.cache_dir().join(format!("{platform}-{wiki_id}.cassette.jsonl")))
}

fn scrape(platform: Platform, wiki_id: &str, output: PathBuf, options: Options) -> Result<(), Error> {
    let site = WikiSite::new(platform, wiki_id)?;

    // Checked before anything is downloaded.
    let assembler = BookAssembler::new(BookMetadata {
        language: options.lang,
        author: options.author,
        rights: options.rights,
        publisher: options.publisher,
    })?;

    let cassette = options.cassette.or_else(|| default_cassette(platform, wiki_id));
    match &cassette {
        Some(path) => info!("Using cassette: {:?}", path),
        None => warn!("No cache directory, responses will not be recorded"),
    }

    let record_mode = if options.pages_only {
        info!("Rebuilding pages only, nothing will be downloaded");
        RecordMode::None
    } else {
        options.record_mode
    };
    let mut client = CachedClient::new(
        cassette,
        ClientConfig {
            record_mode,
            delay: Duration::from_millis(options.delay_ms),
            timeout: Duration::from_secs(options.timeout_secs),
        },
    )?;

    let stylesheet = match options.stylesheet {
        Some(path) => client.fetch_local(&path)?,
        None => platform.default_stylesheet().as_bytes().to_vec(),
    };

    let wiki = crawl::crawl(&site, &mut client, options.pages_only)?;
    let problems = wiki.context.diagnostics.len();

    let identifier = options.book_id.unwrap_or_else(|| BookAssembler::default_identifier(wiki_id));
    assembler.build(wiki, identifier, stylesheet, &EpubPackager, &output)?;

    if problems > 0 {
        warn!("{problems} problems encountered, see above");
    }
    info!("Done, written to {:?}", output);
    Ok(())
}
