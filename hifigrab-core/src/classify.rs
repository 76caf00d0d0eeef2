use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// How a piece of user input should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// A link on an accepted host; goes straight to conversion.
    Direct,
    /// Anything else; treated as a free-text search query.
    Query,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Direct => f.write_str("direct"),
            InputKind::Query => f.write_str("query"),
        }
    }
}

fn accepted_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:https?://)(?i:www\.)?(?i:youtube\.com|youtu\.be|music\.youtube\.com)/.+$")
            .expect("accepted url pattern is valid")
    })
}

pub fn is_accepted_url(url: &str) -> bool {
    accepted_url_pattern().is_match(url.trim())
}

pub fn classify(input: &str) -> InputKind {
    if is_accepted_url(input) {
        InputKind::Direct
    } else {
        InputKind::Query
    }
}
