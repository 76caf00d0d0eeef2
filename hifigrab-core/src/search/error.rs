use std::time::Duration;

use thiserror::Error;

use crate::error::FailureKind;
use crate::retry::RetryableError;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search input: {0}")]
    InvalidInput(String),
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {what} after {}s", limit.as_secs())]
    Timeout { what: String, limit: Duration },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to decode scraped records: {0}")]
    Decode(String),
    #[error("no results for \"{query}\" (page {page})")]
    Empty { query: String, page: usize },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        SearchError::Unexpected(err.to_string())
    }
}

impl SearchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SearchError::InvalidInput(_) => FailureKind::InvalidInput,
            SearchError::Empty { .. } => FailureKind::SearchTransientEmpty,
            _ => FailureKind::SearchFailure,
        }
    }
}

impl RetryableError for SearchError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SearchError::InvalidInput(_) | SearchError::Configuration(_)
        )
    }

    fn timed_out(stage: &str, limit: Duration) -> Self {
        SearchError::Timeout {
            what: stage.to_string(),
            limit,
        }
    }
}
