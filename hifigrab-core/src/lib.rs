pub mod classify;
pub mod clock;
pub mod config;
pub mod convert;
pub mod error;
pub mod identifier;
pub mod retry;
pub mod search;
pub mod testing;

pub use classify::{classify, is_accepted_url, InputKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, HifigrabConfig, DOWNLOADS_DIR_ENV};
pub use convert::{
    ConversionError, ConversionOutcome, ConversionPipeline, ConversionRequest, ConversionResult,
    EnhanceOptions, ProcessRunner, SystemProcessRunner, TargetFormat,
};
pub use error::{ConfigError, FailureKind, Result};
pub use identifier::{resolve_id, IdentifierError, MediaId};
pub use retry::{Backoff, RetryOutcome, RetryPolicy, RetryableError};
pub use search::{
    CandidateRecord, ChromiumSessionFactory, SearchCache, SearchError, SearchOrchestrator,
    SearchPage, SearchResult,
};
