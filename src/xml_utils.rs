use easy_error::{Error, ResultExt};
use markup5ever::{LocalName, QualName};
use scraper::ElementRef;
#[cfg(test)]
use scraper::{Html, Selector};
use xml5ever::serialize::{serialize, SerializeOpts, TraversalScope};

pub(crate) trait XmlSerializable {
    fn serialize_xml(&self, traversal_scope: TraversalScope) -> Result<String, Error>;

    /// Returns the XML of this element.
    fn xml(&self) -> Result<String, Error> {
        self.serialize_xml(TraversalScope::IncludeNode)
    }
}

impl<'a> XmlSerializable for ElementRef<'a> {
    fn serialize_xml(&self, traversal_scope: TraversalScope) -> Result<String, Error> {
        let opts = SerializeOpts { traversal_scope };
        let mut buf = Vec::new();
        serialize(&mut buf, self, opts).context("Could not serialize element as XML")?;
        Ok(String::from_utf8(buf)
            .context("Serialized XML is not UTF-8")?
            // The page template declares the namespace on <html>,
            // repeating it on <head> and <body> is redundant.
            .replace(r#" xmlns="http://www.w3.org/1999/xhtml""#, ""))
    }
}

/// Creates a qualified name for a HTML element.
pub fn html_elem_name(name: &str) -> QualName {
    QualName::new(None, ns!(html), LocalName::from(name))
}

/// Creates a qualified name for a HTML attribute, which live in no namespace.
pub fn html_attr_name(name: &str) -> QualName {
    QualName::new(None, ns!(), LocalName::from(name))
}

#[test]
fn test_serialize_escapes_text() {
    let doc = Html::parse_fragment(r#"<div><p class="lead">Fish &amp; chips</p></div>"#);
    let p = doc.select(&Selector::parse("p").unwrap()).next().expect("Paragraph not found.");
    assert_eq!(r#"<p class="lead">Fish &amp; chips</p>"#, p.xml().expect("Could not serialize."));
}

#[test]
fn test_attr_name_matches_parsed_attribute() {
    let doc = Html::parse_fragment(r#"<a href="/mywiki/">Top</a>"#);
    let a = doc.select(&Selector::parse("a").unwrap()).next().expect("Link not found.");
    assert!(a.value().attrs.contains_key(&html_attr_name("href")));
    assert_eq!(html_elem_name("a"), a.value().name);
}
