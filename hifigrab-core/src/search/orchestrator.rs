use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::config::SearchSection;
use crate::retry::{Backoff, RetryPolicy};

use super::cache::{CacheKey, SearchCache};
use super::error::{SearchError, SearchResult};
use super::session::{extraction_script, ScrapeSession, ScrapeSessionFactory};
use super::validate::{CandidateRecord, CandidateValidator, RawRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub query: String,
    pub page: usize,
    pub results: Vec<CandidateRecord>,
    pub from_cache: bool,
    /// Scraping attempts made; zero on a cache hit.
    pub attempts: usize,
}

pub struct SearchOrchestrator {
    settings: SearchSection,
    sessions: Arc<dyn ScrapeSessionFactory>,
    cache: Arc<SearchCache>,
    validator: CandidateValidator,
    policy: RetryPolicy,
    script: String,
}

impl fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SearchOrchestrator {
    pub fn new(settings: SearchSection, sessions: Arc<dyn ScrapeSessionFactory>) -> Self {
        let cache = Arc::new(SearchCache::new(settings.cache_ttl()));
        Self::with_cache(settings, sessions, cache)
    }

    pub fn with_cache(
        settings: SearchSection,
        sessions: Arc<dyn ScrapeSessionFactory>,
        cache: Arc<SearchCache>,
    ) -> Self {
        let policy = RetryPolicy::new(settings.max_retries + 1, Backoff::Fixed(settings.backoff()))
            .with_timeout(settings.attempt_timeout());
        let validator = CandidateValidator::new(settings.placeholder_thumbnails.clone());
        let script = extraction_script(&settings.result_selector);
        Self {
            settings,
            sessions,
            cache,
            validator,
            policy,
            script,
        }
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    pub fn build_query_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        format!("{}{encoded}", self.settings.results_url)
    }

    /// Returns the requested page of candidates, from cache when fresh.
    ///
    /// An empty page after every attempt is a successful, empty result and
    /// is not cached.
    pub async fn search(&self, query: &str, page: usize) -> SearchResult<SearchPage> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidInput("query must not be empty".into()));
        }
        if page == 0 {
            return Err(SearchError::InvalidInput("page must be at least 1".into()));
        }

        let key = CacheKey::new(query, page);
        if let Some(results) = self.cache.get(&key) {
            info!(query, page, results = results.len(), "search cache hit");
            return Ok(SearchPage {
                query: query.to_string(),
                page,
                results,
                from_cache: true,
                attempts: 0,
            });
        }

        let outcome = self
            .policy
            .run("search", move |attempt| self.attempt(query, page, attempt))
            .await;

        match outcome {
            Ok(outcome) => {
                info!(
                    query,
                    page,
                    results = outcome.result.len(),
                    attempts = outcome.attempts,
                    "search completed"
                );
                self.cache.put(key, outcome.result.clone());
                Ok(SearchPage {
                    query: query.to_string(),
                    page,
                    results: outcome.result,
                    from_cache: false,
                    attempts: outcome.attempts,
                })
            }
            Err(SearchError::Empty { .. }) => {
                warn!(query, page, attempts = self.policy.max_attempts(), "no valid search results");
                Ok(SearchPage {
                    query: query.to_string(),
                    page,
                    results: Vec::new(),
                    from_cache: false,
                    attempts: self.policy.max_attempts(),
                })
            }
            Err(err) => {
                warn!(query, page, error = %err, "search failed");
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        query: &str,
        page: usize,
        attempt: usize,
    ) -> SearchResult<Vec<CandidateRecord>> {
        debug!(query, page, attempt, "opening scrape session");
        let mut session = self.sessions.open().await?;
        let scraped = self.scrape(session.as_mut(), query, page).await;
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close scrape session");
        }
        let raw = scraped?;
        let scraped_count = raw.len();

        let validated = self.validator.validate(raw);
        let start = (page - 1).saturating_mul(self.settings.page_size);
        let window: Vec<CandidateRecord> = validated
            .into_iter()
            .skip(start)
            .take(self.settings.page_size)
            .collect();
        trace!(scraped = scraped_count, kept = window.len(), "validated search records");

        if window.is_empty() {
            return Err(SearchError::Empty {
                query: query.to_string(),
                page,
            });
        }
        Ok(window)
    }

    async fn scrape(
        &self,
        session: &mut dyn ScrapeSession,
        query: &str,
        page: usize,
    ) -> SearchResult<Vec<RawRecord>> {
        let url = self.build_query_url(query);
        trace!(url = %url, "opening search url");
        session
            .goto(&url, self.settings.navigation_timeout())
            .await?;

        let found = session
            .wait_for_selector(&self.settings.result_selector, self.settings.selector_timeout())
            .await?;
        if !found {
            warn!(
                selector = %self.settings.result_selector,
                "result elements did not appear, extracting anyway"
            );
        }

        let scroll_pause = Duration::from_millis(self.settings.scroll_pause_ms);
        for _ in 0..self.settings.scroll_iterations {
            session.scroll(self.settings.scroll_distance_px).await?;
            sleep(scroll_pause).await;
        }

        let click_pause = Duration::from_millis(self.settings.load_more_pause_ms);
        for click in 0..self.settings.load_more_clicks {
            if !session.click(&self.settings.load_more_selector).await? {
                break;
            }
            debug!(click = click + 1, "clicked load more");
            sleep(click_pause).await;
        }

        session.extract(&self.script).await
    }
}
