use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::convert::tools::{run_with_policy, ProcessRunner, ToolCommands};
use crate::retry::RetryPolicy;

pub const TITLE_MAX_CHARS: usize = 150;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("could not extract a media id from {url}")]
    InvalidUrl { url: String },
}

/// The 11-character identifier of a video on the accepted host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MediaId(String);

impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})").expect("valid regex"))
}

pub fn resolve_id(url: &str) -> Result<MediaId, IdentifierError> {
    id_pattern()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| MediaId::new(m.as_str()))
        .ok_or_else(|| IdentifierError::InvalidUrl {
            url: url.to_string(),
        })
}

/// Keeps ASCII letters, digits and dashes; each whitespace run becomes a
/// single underscore, leading and trailing runs included.
pub fn sanitize_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            in_space = false;
        }
    }
    out.chars().take(TITLE_MAX_CHARS).collect()
}

pub fn fallback_title(now: DateTime<Utc>) -> String {
    format!("converted_{}", now.timestamp_millis())
}

/// Looks up a human-readable title through the acquisition tool.
pub struct TitleResolver {
    runner: Arc<dyn ProcessRunner>,
    commands: Arc<ToolCommands>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TitleResolver {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        commands: Arc<ToolCommands>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            commands,
            policy,
            clock,
        }
    }

    /// Never fails and never returns an empty string.
    pub async fn resolve_title(&self, media: &MediaId) -> String {
        let invocation = self.commands.title_query(media);
        match run_with_policy(self.runner.as_ref(), &self.policy, "title", &invocation).await {
            Ok(output) => {
                let title = sanitize_title(output.stdout.trim());
                if !title.is_empty() {
                    debug!(media_id = %media, title = %title, "resolved title");
                    return title;
                }
                warn!(media_id = %media, "title query returned nothing usable");
            }
            Err(err) => {
                warn!(media_id = %media, error = %err, "title query failed");
            }
        }
        fallback_title(self.clock.now())
    }
}

impl fmt::Debug for TitleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TitleResolver")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn resolves_ids_from_common_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=10",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(resolve_id(url).unwrap().as_str(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn short_ids_are_rejected() {
        let err = resolve_id("https://youtu.be/abc").unwrap_err();
        assert_eq!(
            err,
            IdentifierError::InvalidUrl {
                url: "https://youtu.be/abc".into()
            }
        );
    }

    #[test]
    fn watch_url_round_trips_through_resolver() {
        let id = MediaId::new("dQw4w9WgXcQ");
        assert_eq!(resolve_id(&id.watch_url()).unwrap(), id);
    }

    #[test]
    fn sanitizes_titles() {
        assert_eq!(
            sanitize_title("Artist - Song (Official Video) [HD]!"),
            "Artist_-_Song_Official_Video_HD"
        );
        assert_eq!(sanitize_title("! Song"), "_Song");
        assert_eq!(sanitize_title("a ! b"), "a_b");
        assert_eq!(sanitize_title("Café   del  Mar"), "Caf_del_Mar");
        assert_eq!(sanitize_title("日本語"), "");
        assert_eq!(sanitize_title(&"a".repeat(400)).len(), TITLE_MAX_CHARS);
    }

    #[test]
    fn fallback_uses_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(fallback_title(at), "converted_1700000000123");
    }
}
