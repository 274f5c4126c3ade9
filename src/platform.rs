//! The two supported wiki hosts and the rules that decide what each link or
//! embedded asset on their pages refers to.

use crate::identifier::identifier_of;
use crate::media_type::MediaTypeSource;
use easy_error::{Error, ResultExt};
use regex::Regex;
use reqwest::Url;
use std::fmt;

/// Directory of non-page files inside the archive, relative to a page.
pub const FILES_DIR: &str = "../files/";
pub const PAGE_EXTENSION: &str = ".xhtml";

lazy_static! {
    static ref WIKIWIKI_PAGE_WITH_ANCHOR: Regex = Regex::new(r"^(.+?/\?[^=?#]+)(#.*)$").unwrap();
    static ref WIKIWIKI_PAGE: Regex = Regex::new(r"^.+?/\?[^=?#]+$").unwrap();
    static ref ATWIKI_PAGE_WITH_ANCHOR: Regex = Regex::new(r"^(.+?/pages/\d+\.html)(#.*)$").unwrap();
    static ref ATWIKI_PAGE: Regex = Regex::new(r"^.+?/pages/\d+\.html$").unwrap();
    static ref ATWIKI_CDN_IMAGE: Regex = Regex::new(r"^(https?:)?//cdn\d+\.atwikiimg\.com/.+$").unwrap();
    static ref STYLESHEET: Regex = Regex::new(r"^.+?\.css(\?.+)?$").unwrap();
    static ref IMAGE: Regex = Regex::new(r"(?i)^.+?\.(jpg|jpeg|gif|png)(\?.+)?$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// wikiwiki.jp
    Wikiwiki,
    /// www<server>.atwiki.jp
    Atwiki { server: u32 },
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wikiwiki => "wikiwiki",
            Self::Atwiki { .. } => "atwiki",
        }
    }

    fn hostname(&self) -> String {
        match self {
            Self::Wikiwiki => "wikiwiki.jp".to_string(),
            Self::Atwiki { server } => format!("www{server}.atwiki.jp"),
        }
    }

    /// Media type handling for stylesheets. atwiki serves them with unreliable headers.
    pub fn stylesheet_media_type(&self) -> MediaTypeSource {
        match self {
            Self::Wikiwiki => MediaTypeSource::Declared,
            Self::Atwiki { .. } => MediaTypeSource::Override("text/css"),
        }
    }

    /// Media type handling for images. atwiki's CDN drops extensions, so the bytes decide.
    pub fn image_media_type(&self) -> MediaTypeSource {
        match self {
            Self::Wikiwiki => MediaTypeSource::Declared,
            Self::Atwiki { .. } => MediaTypeSource::Sniffed,
        }
    }

    /// Stylesheet every page of the book links to, unless one is given on the command line.
    pub fn default_stylesheet(&self) -> &'static str {
        match self {
            Self::Wikiwiki => include_str!("../stylesheets/wikiwiki.css"),
            Self::Atwiki { .. } => include_str!("../stylesheets/atwiki.css"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one `href`/`src` rule recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    /// Group 1 is the page, group 2 the `#fragment`.
    PageWithAnchor,
    Page,
    Stylesheet,
    /// Group 1, when present, is the file extension to keep.
    Image { keep_extension: bool },
}

struct Rule {
    pattern: Regex,
    kind: RuleKind,
}

impl Rule {
    fn new(pattern: &Regex, kind: RuleKind) -> Self {
        Self {
            pattern: pattern.clone(),
            kind,
        }
    }
}

/// The result of classifying one attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A page of the same wiki. `anchor` includes the leading `#`.
    Page { target: Url, anchor: Option<String> },
    Stylesheet { target: Url },
    Image { target: Url, extension: Option<String> },
    Unrecognized,
}

impl Reference {
    /// Name of the asset under `files/`, `None` for pages and unrecognized references.
    pub fn asset_name(&self) -> Option<String> {
        match self {
            Self::Stylesheet { target } => Some(identifier_of(target.as_str()) + ".css"),
            Self::Image { target, extension } => {
                let mut name = identifier_of(target.as_str());
                if let Some(extension) = extension {
                    name.push('.');
                    name.push_str(extension);
                }
                Some(name)
            }
            Self::Page { .. } | Self::Unrecognized => None,
        }
    }

    /// The value the attribute is rewritten to. Empty for unrecognized references.
    pub fn internal_path(&self) -> String {
        match self {
            Self::Page { target, anchor } => {
                let mut path = identifier_of(target.as_str()) + PAGE_EXTENSION;
                if let Some(anchor) = anchor {
                    path.push_str(anchor);
                }
                path
            }
            Self::Stylesheet { .. } | Self::Image { .. } => {
                self.asset_name().map(|name| FILES_DIR.to_string() + &name).unwrap_or_default()
            }
            Self::Unrecognized => String::new(),
        }
    }
}

/// One wiki on one platform, with the rule tables used to classify its references.
pub struct WikiSite {
    platform: Platform,
    site_id: String,
    base_url: Url,
    href_rules: Vec<Rule>,
    src_rules: Vec<Rule>,
}

impl WikiSite {
    pub fn new(platform: Platform, site_id: &str) -> Result<Self, Error> {
        let root = format!("http://{}/", platform.hostname());
        let root_url = Url::parse(&root).context(format!("Could not create url from '{root}'"))?;
        let base_url = root_url
            .join(&format!("{site_id}/"))
            .context(format!("Could not create base url for wiki '{site_id}'"))?;

        let (href_rules, src_rules) = match platform {
            Platform::Wikiwiki => (
                vec![
                    Rule::new(&WIKIWIKI_PAGE_WITH_ANCHOR, RuleKind::PageWithAnchor),
                    Rule::new(&WIKIWIKI_PAGE, RuleKind::Page),
                    Rule::new(&STYLESHEET, RuleKind::Stylesheet),
                ],
                vec![Rule::new(&IMAGE, RuleKind::Image { keep_extension: true })],
            ),
            Platform::Atwiki { .. } => {
                let site_root = format!(
                    "^({}|{})$",
                    regex::escape(&format!("/{site_id}/")),
                    regex::escape(base_url.as_str())
                );
                let site_root = Regex::new(&site_root).context("Could not compile site root pattern")?;
                (
                    vec![
                        Rule::new(&ATWIKI_PAGE_WITH_ANCHOR, RuleKind::PageWithAnchor),
                        Rule::new(&ATWIKI_PAGE, RuleKind::Page),
                        Rule::new(&site_root, RuleKind::Page),
                        Rule::new(&STYLESHEET, RuleKind::Stylesheet),
                    ],
                    vec![
                        Rule::new(&IMAGE, RuleKind::Image { keep_extension: false }),
                        Rule::new(&ATWIKI_CDN_IMAGE, RuleKind::Image { keep_extension: false }),
                    ],
                )
            }
        };

        Ok(Self {
            platform,
            site_id: site_id.to_string(),
            base_url,
            href_rules,
            src_rules,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a possibly relative reference found on one of the wiki's pages.
    pub fn resolve(&self, reference: &str) -> Option<Url> {
        self.base_url.join(reference).ok()
    }

    /// Classifies the value of an `href` attribute. The first matching rule wins.
    ///
    /// Fragment-only links are not classified at all, callers leave them untouched.
    pub fn classify_href(&self, href: &str) -> Option<Reference> {
        if href.starts_with('#') {
            return None;
        }
        Some(self.classify(&self.href_rules, href))
    }

    /// Classifies the value of a `src` attribute. The first matching rule wins.
    pub fn classify_src(&self, src: &str) -> Reference {
        self.classify(&self.src_rules, src)
    }

    fn classify(&self, rules: &[Rule], value: &str) -> Reference {
        for rule in rules {
            let captures = match rule.pattern.captures(value) {
                Some(captures) => captures,
                None => continue,
            };
            let reference = match rule.kind {
                RuleKind::PageWithAnchor => self.resolve(&captures[1]).map(|target| Reference::Page {
                    target,
                    anchor: Some(captures[2].to_string()),
                }),
                RuleKind::Page => self.resolve(value).map(|target| Reference::Page { target, anchor: None }),
                RuleKind::Stylesheet => self.resolve(value).map(|target| Reference::Stylesheet { target }),
                RuleKind::Image { keep_extension } => self.resolve(value).map(|target| Reference::Image {
                    target,
                    extension: captures
                        .get(1)
                        .filter(|_| keep_extension)
                        .map(|extension| extension.as_str().to_string()),
                }),
            };
            // A reference matching a rule but not parseable as a URL cannot be fetched or linked.
            return reference.unwrap_or(Reference::Unrecognized);
        }
        Reference::Unrecognized
    }
}

#[cfg(test)]
fn atwiki() -> WikiSite {
    WikiSite::new(Platform::Atwiki { server: 7 }, "mywiki").expect("Could not create site.")
}

#[cfg(test)]
fn wikiwiki() -> WikiSite {
    WikiSite::new(Platform::Wikiwiki, "mywiki").expect("Could not create site.")
}

#[test]
fn test_site_urls() {
    let site = atwiki();
    assert_eq!("http://www7.atwiki.jp/mywiki/", site.base_url().as_str());
    assert_eq!("http://wikiwiki.jp/mywiki/", wikiwiki().base_url().as_str());
}

#[test]
fn test_atwiki_page_with_anchor() {
    let reference = atwiki().classify_href("/mywiki/pages/42.html#section2").expect("Not classified.");
    assert!(matches!(reference, Reference::Page { anchor: Some(_), .. }));
    assert_eq!(
        identifier_of("http://www7.atwiki.jp/mywiki/pages/42.html") + ".xhtml#section2",
        reference.internal_path()
    );
}

#[test]
fn test_atwiki_page_and_site_root() {
    let site = atwiki();
    let page = site.classify_href("/mywiki/pages/42.html").expect("Not classified.");
    assert!(matches!(page, Reference::Page { anchor: None, .. }));
    assert_eq!(
        identifier_of("http://www7.atwiki.jp/mywiki/pages/42.html") + ".xhtml",
        page.internal_path()
    );

    for root in ["/mywiki/", "http://www7.atwiki.jp/mywiki/"] {
        let reference = site.classify_href(root).expect("Not classified.");
        assert!(matches!(reference, Reference::Page { anchor: None, .. }));
        assert_eq!(identifier_of("http://www7.atwiki.jp/mywiki/") + ".xhtml", reference.internal_path());
    }

    // Another wiki on the same host is not ours.
    assert!(matches!(site.classify_href("/otherwiki/").unwrap(), Reference::Unrecognized));
}

#[test]
fn test_stylesheet() {
    let reference = atwiki().classify_href("//www7.atwiki.jp/common/_css/atwiki.css?v=3").expect("Not classified.");
    assert!(matches!(reference, Reference::Stylesheet { .. }));
    assert_eq!(
        format!("../files/{}.css", identifier_of("http://www7.atwiki.jp/common/_css/atwiki.css?v=3")),
        reference.internal_path()
    );
}

#[test]
fn test_fragment_links_are_not_classified() {
    assert_eq!(None, atwiki().classify_href("#"));
    assert_eq!(None, wikiwiki().classify_href("#top"));
}

#[test]
fn test_javascript_is_unrecognized() {
    for site in [atwiki(), wikiwiki()] {
        let reference = site.classify_href("javascript:void(0)").expect("Not classified.");
        assert!(matches!(reference, Reference::Unrecognized));
        assert_eq!("", reference.internal_path());
    }
}

#[test]
fn test_atwiki_images_have_no_extension() {
    let site = atwiki();
    let photo = site.classify_src("http://host/img/photo.JPG?v=2");
    assert!(matches!(photo, Reference::Image { .. }));
    assert_eq!(format!("../files/{}", identifier_of("http://host/img/photo.JPG?v=2")), photo.internal_path());

    let cdn = site.classify_src("//cdn31.atwikiimg.com/mywiki/pub/abc?cache_check=1");
    assert!(matches!(cdn, Reference::Image { .. }));
    assert_eq!(
        format!("../files/{}", identifier_of("http://cdn31.atwikiimg.com/mywiki/pub/abc?cache_check=1")),
        cdn.internal_path()
    );

    assert!(matches!(site.classify_src("/common/_js/jquery.js"), Reference::Unrecognized));
}

#[test]
fn test_wikiwiki_rules() {
    let site = wikiwiki();
    let page = site.classify_href("/mywiki/?FrontPage").expect("Not classified.");
    assert!(matches!(page, Reference::Page { anchor: None, .. }));
    assert_eq!(identifier_of("http://wikiwiki.jp/mywiki/?FrontPage") + ".xhtml", page.internal_path());

    // The fragment stays out of the digest, like on atwiki.
    let anchored = site.classify_href("/mywiki/?FrontPage#news").expect("Not classified.");
    assert!(matches!(anchored, Reference::Page { anchor: Some(_), .. }));
    assert_eq!(identifier_of("http://wikiwiki.jp/mywiki/?FrontPage") + ".xhtml#news", anchored.internal_path());

    // Commands carry `=` and are not pages.
    assert!(matches!(site.classify_href("/mywiki/?cmd=edit").unwrap(), Reference::Unrecognized));

    let image = site.classify_src("/mywiki/attach/logo.png");
    assert_eq!(Some(format!("{}.png", identifier_of("http://wikiwiki.jp/mywiki/attach/logo.png"))), image.asset_name());
    assert_eq!(format!("../files/{}.png", identifier_of("http://wikiwiki.jp/mywiki/attach/logo.png")), image.internal_path());

    // No CDN rule on wikiwiki.
    assert!(matches!(site.classify_src("//cdn1.atwikiimg.com/x"), Reference::Unrecognized));
}

#[test]
fn test_default_stylesheets() {
    assert!(Platform::Wikiwiki.default_stylesheet().contains("img"));
    assert!(Platform::Atwiki { server: 1 }.default_stylesheet().contains("img"));
}
