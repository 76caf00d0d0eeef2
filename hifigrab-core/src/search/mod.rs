pub mod cache;
mod error;
pub mod orchestrator;
pub mod session;
pub mod validate;

pub use cache::{CacheEntry, CacheKey, SearchCache};
pub use error::{SearchError, SearchResult};
pub use orchestrator::{SearchOrchestrator, SearchPage};
pub use session::{ChromiumSession, ChromiumSessionFactory, ScrapeSession, ScrapeSessionFactory};
pub use validate::{validate, CandidateRecord, CandidateValidator, RawRecord, UNKNOWN_CHANNEL};
