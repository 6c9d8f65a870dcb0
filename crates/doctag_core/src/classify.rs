//! Pattern checks over raw page text.
//!
//! Both checks are plain pattern matches, not a markup parser. A marker or a
//! `#redirect` token inside `<!-- -->` or `<nowiki>` still counts.

use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_MARKER: &str = "{{documentation subpage}}";

static REDIRECT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)#redirect").expect("redirect token regex is valid"));

// `[^\]\n]*?` keeps the `{{` inside the link brackets; text after `]]` is ignored.
static TEMPLATED_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#redirect[ \t]*\[\[[^\]\n]*?\{\{.*?\}\}.*?\]\]")
        .expect("templated redirect regex is valid")
});

static DEFAULT_MARKER_PATTERN: LazyLock<MarkerPattern> =
    LazyLock::new(|| MarkerPattern::new(DEFAULT_MARKER));

/// True when `text` carries a `#redirect` token whose link target is not built
/// from a template call.
///
/// The token is not anchored to the start of the page, so a body that merely
/// mentions `#redirect` is treated as a redirect.
pub fn is_redirect(text: &str) -> bool {
    REDIRECT_TOKEN.is_match(text) && !TEMPLATED_REDIRECT.is_match(text)
}

/// True when `text` already contains the default marker template.
pub fn has_marker(text: &str) -> bool {
    DEFAULT_MARKER_PATTERN.is_present(text)
}

/// Case-insensitive literal match for a configured marker.
#[derive(Debug, Clone)]
pub struct MarkerPattern {
    marker: String,
    pattern: Regex,
}

impl MarkerPattern {
    pub fn new(marker: &str) -> Self {
        let pattern = Regex::new(&format!("(?is){}", regex::escape(marker)))
            .expect("escaped marker is always a valid regex");
        Self {
            marker: marker.to_string(),
            pattern,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_present(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Redirect samples whose classification is fixed: `(text, expected)`.
pub const REDIRECT_CORPUS: &[(&str, bool)] = &[
    ("#REDIRECT[[Help:Magic_words#Page_names]]", true),
    ("#redirect [[Help:Magic_words#URL_encoded_page_names]]", true),
    ("#Redirect [[Manual:$wgConf]]", true),
    ("#REDIRECT [[MediaWiki/fr]]", true),
    ("#REDIRECT [[{{ll|Help:Magic_words#Page_names}}]]", false),
];

/// Runs [`REDIRECT_CORPUS`] and returns the samples that classify wrongly.
pub fn redirect_corpus_failures() -> Vec<&'static str> {
    REDIRECT_CORPUS
        .iter()
        .filter(|(text, expected)| is_redirect(text) != *expected)
        .map(|(text, _)| *text)
        .collect()
}
