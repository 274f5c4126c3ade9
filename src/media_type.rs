const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const BMP_MAGIC: &[u8] = b"BM";
const RIFF_MAGIC: &[u8] = b"RIFF";
const WEBP_MAGIC: &[u8] = b"WEBP";

/// How many leading bytes are inspected when looking for an SVG root element.
const SVG_SNIFF_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Svg,
    Unknown,
}

impl MediaType {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Svg => "image/svg+xml",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Detects the media type from the leading bytes of the content.
    ///
    /// Returns `Unknown` if no signature matches. Extensions and headers
    /// are not consulted, the CDN serves images without either being reliable.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&JPEG_MAGIC) {
            return Self::Jpeg;
        }
        if bytes.starts_with(&PNG_MAGIC) {
            return Self::Png;
        }
        if bytes.starts_with(GIF87_MAGIC) || bytes.starts_with(GIF89_MAGIC) {
            return Self::Gif;
        }
        if bytes.len() >= 12 && bytes.starts_with(RIFF_MAGIC) && &bytes[8..12] == WEBP_MAGIC {
            return Self::Webp;
        }
        if bytes.starts_with(BMP_MAGIC) {
            return Self::Bmp;
        }

        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(SVG_SNIFF_WINDOW)]);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
            return Self::Svg;
        }

        Self::Unknown
    }
}

/// Where the media type of a fetched asset comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTypeSource {
    /// The `Content-Type` header of the response, falling back to sniffing when absent.
    Declared,
    /// The content itself.
    Sniffed,
    /// A fixed type chosen by the caller.
    Override(&'static str),
}

impl MediaTypeSource {
    pub fn resolve(&self, declared: Option<&str>, body: &[u8]) -> String {
        match self {
            Self::Declared => match declared.map(essence).filter(|essence| !essence.is_empty()) {
                Some(essence) => essence,
                None => MediaType::sniff(body).content_type().to_string(),
            },
            Self::Sniffed => MediaType::sniff(body).content_type().to_string(),
            Self::Override(content_type) => content_type.to_string(),
        }
    }
}

/// `text/css; charset=utf-8` -> `text/css`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[test]
fn test_sniff_images() {
    assert_eq!(MediaType::Jpeg, MediaType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
    assert_eq!(MediaType::Png, MediaType::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00]));
    assert_eq!(MediaType::Gif, MediaType::sniff(b"GIF89a\x01\x00"));
    assert_eq!(MediaType::Webp, MediaType::sniff(b"RIFF\x10\x00\x00\x00WEBPVP8 "));
    assert_eq!(MediaType::Svg, MediaType::sniff(b"  <?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>"));
    assert_eq!(MediaType::Unknown, MediaType::sniff(b"body { color: red; }"));
    assert_eq!(MediaType::Unknown, MediaType::sniff(b""));
}

#[test]
fn test_declared_media_type() {
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    assert_eq!("text/css", MediaTypeSource::Declared.resolve(Some("Text/CSS; charset=UTF-8"), b""));
    assert_eq!("image/png", MediaTypeSource::Declared.resolve(None, &png));
    assert_eq!("image/png", MediaTypeSource::Declared.resolve(Some(" "), &png));
}

#[test]
fn test_sniffed_and_override_ignore_header() {
    let jpeg = [0xFF, 0xD8, 0xFF, 0xDB];
    assert_eq!("image/jpeg", MediaTypeSource::Sniffed.resolve(Some("text/html"), &jpeg));
    assert_eq!("text/css", MediaTypeSource::Override("text/css").resolve(Some("text/plain"), b"a{}"));
}
