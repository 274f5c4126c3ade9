use sha2::{Digest, Sha256};

/// Internal name of the resource behind `url`: the hex-encoded SHA-256 of the URL string.
///
/// Page file names and asset file names are both derived from this,
/// so links written into pages always match the names in the archive.
pub fn identifier_of(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

#[test]
fn test_identifier_is_stable() {
    assert_eq!(
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        identifier_of("")
    );
    assert_eq!(
        identifier_of("http://wikiwiki.jp/mywiki/?FrontPage"),
        identifier_of("http://wikiwiki.jp/mywiki/?FrontPage")
    );
}

#[test]
fn test_identifier_distinguishes_urls() {
    let a = identifier_of("http://www1.atwiki.jp/mywiki/pages/1.html");
    let b = identifier_of("http://www1.atwiki.jp/mywiki/pages/2.html");
    assert_ne!(a, b);
    assert_eq!(64, a.len());
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}
