use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::classify::is_accepted_url;

pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// A record as the scraper returns it; nothing is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub thumbnail_url: String,
    pub channel: String,
}

impl From<CandidateRecord> for RawRecord {
    fn from(record: CandidateRecord) -> Self {
        Self {
            id: Some(record.id),
            title: Some(record.title),
            url: Some(record.url),
            thumbnail: Some(record.thumbnail_url),
            channel: Some(record.channel),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateValidator {
    placeholder_markers: Vec<String>,
}

impl Default for CandidateValidator {
    fn default() -> Self {
        Self::new(vec![
            "placehold.co".into(),
            "data:".into(),
            "/img/no_thumbnail".into(),
        ])
    }
}

impl CandidateValidator {
    pub fn new(placeholder_markers: Vec<String>) -> Self {
        let placeholder_markers = placeholder_markers
            .into_iter()
            .map(|marker| marker.trim().to_ascii_lowercase())
            .filter(|marker| !marker.is_empty())
            .collect();
        Self {
            placeholder_markers,
        }
    }

    pub fn is_placeholder(&self, thumbnail: &str) -> bool {
        let lowered = thumbnail.to_ascii_lowercase();
        self.placeholder_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    /// Keeps complete, well-formed records in input order. The first record
    /// carrying an id claims it, even when that record is itself rejected.
    pub fn validate(&self, raw: Vec<RawRecord>) -> Vec<CandidateRecord> {
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for record in raw {
            let id = non_empty(record.id.as_deref());
            if let Some(id) = id {
                if !seen.insert(id.to_string()) {
                    trace!(id, "duplicate id filtered");
                    continue;
                }
            }
            if let Some(candidate) = self.accept(&record) {
                accepted.push(candidate);
            }
        }
        accepted
    }

    pub fn validate_candidates(&self, candidates: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
        self.validate(candidates.into_iter().map(RawRecord::from).collect())
    }

    fn accept(&self, record: &RawRecord) -> Option<CandidateRecord> {
        let id = non_empty(record.id.as_deref())?;
        let title = non_empty(record.title.as_deref())?;
        let url = non_empty(record.url.as_deref())?;
        let thumbnail = non_empty(record.thumbnail.as_deref())?;
        if !is_accepted_url(url) {
            trace!(url, "invalid url filtered");
            return None;
        }
        if self.is_placeholder(thumbnail) {
            trace!(id, thumbnail, "placeholder thumbnail filtered");
            return None;
        }
        let channel = non_empty(record.channel.as_deref()).unwrap_or(UNKNOWN_CHANNEL);
        Some(CandidateRecord {
            id: id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            thumbnail_url: thumbnail.to_string(),
            channel: channel.to_string(),
        })
    }
}

pub fn validate(raw: Vec<RawRecord>) -> Vec<CandidateRecord> {
    CandidateValidator::default().validate(raw)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, title: &str) -> RawRecord {
        RawRecord {
            id: Some(id.into()),
            title: Some(title.into()),
            url: Some(format!("https://www.youtube.com/watch?v={id}")),
            thumbnail: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
            channel: Some("Channel".into()),
        }
    }

    #[test]
    fn first_occurrence_wins() {
        let out = validate(vec![
            raw("aaaaaaaaaaa", "first"),
            raw("bbbbbbbbbbb", "other"),
            raw("aaaaaaaaaaa", "second"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "first");
        assert_eq!(out[1].id, "bbbbbbbbbbb");
    }

    #[test]
    fn rejects_incomplete_and_foreign_records() {
        let mut missing_title = raw("ccccccccccc", "x");
        missing_title.title = Some("   ".into());
        let mut foreign = raw("ddddddddddd", "x");
        foreign.url = Some("https://vimeo.com/123".into());
        let mut placeholder = raw("eeeeeeeeeee", "x");
        placeholder.thumbnail = Some("https://placehold.co/120x90?text=Thumbnail".into());
        let mut inline = raw("fffffffffff", "x");
        inline.thumbnail = Some("data:image/gif;base64,R0lGOD".into());
        let no_thumb = RawRecord {
            thumbnail: None,
            ..raw("ggggggggggg", "x")
        };
        assert!(validate(vec![missing_title, foreign, placeholder, inline, no_thumb]).is_empty());
    }

    #[test]
    fn missing_channel_gets_fallback() {
        let mut record = raw("hhhhhhhhhhh", "x");
        record.channel = None;
        let out = validate(vec![record]);
        assert_eq!(out[0].channel, UNKNOWN_CHANNEL);
    }

    #[test]
    fn validation_is_idempotent() {
        let validator = CandidateValidator::default();
        let once = validator.validate(vec![
            raw("aaaaaaaaaaa", "a"),
            raw("aaaaaaaaaaa", "dup"),
            RawRecord::default(),
            raw("bbbbbbbbbbb", "b"),
        ]);
        let twice = validator.validate_candidates(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn serializes_thumbnail_in_camel_case() {
        let out = validate(vec![raw("aaaaaaaaaaa", "a")]);
        let json = serde_json::to_value(&out[0]).unwrap();
        assert!(json.get("thumbnailUrl").is_some());
    }
}
