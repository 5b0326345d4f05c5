//! Lightweight HTML inspection for checks.
//!
//! This is not a spec-grade parser. Checks need a handful of read-only
//! views over a response body (meta tags, title, raw text for regex
//! scans), and those are extracted here with case-insensitive regexes so
//! the runtime context can memoize one [`ParsedHtml`] per request.

use once_cell::sync::Lazy;
use regex::Regex;

static META_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\s+[^>]*>"#).expect("meta tag regex is valid")
});
static META_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("meta attribute regex is valid")
});
static TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex is valid")
});

/// A `<meta>` element reduced to the attributes checks care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTag {
    pub http_equiv: Option<String>,
    pub name: Option<String>,
    pub content: Option<String>,
}

/// An immutable, memoizable view over an HTML response body.
#[derive(Debug)]
pub struct ParsedHtml {
    text: String,
    meta_tags: Vec<MetaTag>,
}

impl ParsedHtml {
    /// Parses a response body. Bytes that are not valid UTF-8 are decoded
    /// lossily.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body).into_owned();
        let meta_tags = META_TAG
            .find_iter(&text)
            .map(|tag| {
                let mut meta = MetaTag {
                    http_equiv: None,
                    name: None,
                    content: None,
                };
                for attr in META_ATTR.captures_iter(tag.as_str()) {
                    let value = attr
                        .get(2)
                        .or_else(|| attr.get(3))
                        .or_else(|| attr.get(4))
                        .map(|m| m.as_str().to_string());
                    match attr[1].to_ascii_lowercase().as_str() {
                        "http-equiv" => meta.http_equiv = value,
                        "name" => meta.name = value,
                        "content" => meta.content = value,
                        _ => {}
                    }
                }
                meta
            })
            .collect();
        Self { text, meta_tags }
    }

    /// The decoded document text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn meta_tags(&self) -> &[MetaTag] {
        &self.meta_tags
    }

    /// Content of the first `<meta http-equiv="...">` matching the given
    /// directive name, case-insensitively.
    #[must_use]
    pub fn meta_http_equiv(&self, directive: &str) -> Option<&str> {
        self.meta_tags
            .iter()
            .find(|tag| {
                tag.http_equiv
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(directive))
            })
            .and_then(|tag| tag.content.as_deref())
    }

    /// The document title, trimmed, when present.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        TITLE
            .captures(&self.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_meta_csp_regardless_of_case_and_quotes() {
        let html = ParsedHtml::parse(
            br#"<html><head>
                <META HTTP-EQUIV='Content-Security-Policy' CONTENT="default-src 'self'">
                <meta name="viewport" content="width=device-width">
            </head></html>"#,
        );
        assert_eq!(
            html.meta_http_equiv("content-security-policy"),
            Some("default-src 'self'")
        );
        assert!(html.meta_http_equiv("refresh").is_none());
        assert_eq!(html.meta_tags().len(), 2);
    }

    #[test]
    fn title_is_trimmed() {
        let html = ParsedHtml::parse(b"<html><title>\n  Login \n</title></html>");
        assert_eq!(html.title(), Some("Login"));
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let html = ParsedHtml::parse(b"<title>ok\xFF</title>");
        assert!(html.title().is_some());
    }
}
