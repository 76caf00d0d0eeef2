//! Scripted collaborators for exercising search and conversion without a
//! browser or media tools installed.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::convert::{ProcessRunner, ToolInvocation, ToolKind, ToolOutput};
use crate::search::{RawRecord, ScrapeSession, ScrapeSessionFactory, SearchError, SearchResult};

/// What a scripted scrape session does when opened.
#[derive(Debug, Clone)]
pub enum ScriptedAttempt {
    Records(Vec<RawRecord>),
    LaunchFailure(String),
    NavigationTimeout,
}

#[derive(Debug, Default)]
struct SessionCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    scrolls: AtomicUsize,
    clicks: AtomicUsize,
}

/// Hands out sessions that replay queued attempts in order. Once the queue
/// is drained every further session yields no records.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSessionFactory {
    attempts: Arc<Mutex<VecDeque<ScriptedAttempt>>>,
    counters: Arc<SessionCounters>,
    load_more_available: usize,
}

impl ScriptedSessionFactory {
    pub fn new(attempts: impl IntoIterator<Item = ScriptedAttempt>) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(attempts.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Number of times the "load more" control can be clicked per session.
    pub fn with_load_more(mut self, available: usize) -> Self {
        self.load_more_available = available;
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> usize {
        self.counters.scrolls.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> usize {
        self.counters.clicks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeSessionFactory for ScriptedSessionFactory {
    async fn open(&self) -> SearchResult<Box<dyn ScrapeSession>> {
        let next = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(ScriptedAttempt::Records(Vec::new()));
        if let ScriptedAttempt::LaunchFailure(message) = &next {
            return Err(SearchError::Launch(message.clone()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            attempt: next,
            counters: Arc::clone(&self.counters),
            load_more_left: self.load_more_available,
        }))
    }
}

struct ScriptedSession {
    attempt: ScriptedAttempt,
    counters: Arc<SessionCounters>,
    load_more_left: usize,
}

#[async_trait]
impl ScrapeSession for ScriptedSession {
    async fn goto(&mut self, _url: &str, limit: Duration) -> SearchResult<()> {
        if matches!(self.attempt, ScriptedAttempt::NavigationTimeout) {
            return Err(SearchError::Timeout {
                what: "navigation".into(),
                limit,
            });
        }
        Ok(())
    }

    async fn wait_for_selector(&mut self, _selector: &str, _limit: Duration) -> SearchResult<bool> {
        Ok(matches!(&self.attempt, ScriptedAttempt::Records(records) if !records.is_empty()))
    }

    async fn scroll(&mut self, _delta_y: f64) -> SearchResult<()> {
        self.counters.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> SearchResult<bool> {
        if self.load_more_left == 0 {
            return Ok(false);
        }
        self.load_more_left -= 1;
        self.counters.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn extract(&mut self, _script: &str) -> SearchResult<Vec<RawRecord>> {
        match &self.attempt {
            ScriptedAttempt::Records(records) => Ok(records.clone()),
            _ => Err(SearchError::Unexpected("no page loaded".into())),
        }
    }

    async fn close(self: Box<Self>) -> SearchResult<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A well-formed raw record for the given 11-character id.
pub fn raw_record(id: &str, title: &str) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        url: Some(format!("https://www.youtube.com/watch?v={id}")),
        thumbnail: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
        channel: Some("Test Channel".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBehavior {
    /// Exit 0 and write the invocation's output file.
    Succeed,
    /// Exit 1 with the given stderr; nothing written.
    Fail(String),
    /// Never finish.
    Hang,
    /// Exit 0 without writing anything.
    NoOutput,
    /// Write the output file, then exit 1.
    WriteThenFail(String),
}

pub const DEFAULT_PROBE_JSON: &str =
    r#"{"streams":[{"sample_rate":"384000","bits_per_sample":32,"bit_rate":"24576000"}]}"#;

/// Stand-in for yt-dlp, ffmpeg and ffprobe. Records every invocation.
#[derive(Debug)]
pub struct FakeToolchain {
    behaviors: HashMap<ToolKind, ToolBehavior>,
    title: Option<String>,
    probe_json: String,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self {
            behaviors: HashMap::new(),
            title: Some("Fake Artist - Fake Song".to_string()),
            probe_json: DEFAULT_PROBE_JSON.to_string(),
            invocations: Mutex::new(Vec::new()),
        }
    }
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, tool: ToolKind, behavior: ToolBehavior) -> Self {
        self.behaviors.insert(tool, behavior);
        self
    }

    /// `None` makes the title query fail.
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.title = title.map(str::to_string);
        self
    }

    pub fn with_probe_json(mut self, json: &str) -> Self {
        self.probe_json = json.to_string();
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, tool: ToolKind) -> usize {
        self.invocations()
            .iter()
            .filter(|invocation| invocation.tool == tool)
            .count()
    }

    fn behavior(&self, tool: ToolKind) -> ToolBehavior {
        self.behaviors
            .get(&tool)
            .cloned()
            .unwrap_or(ToolBehavior::Succeed)
    }
}

fn is_title_query(invocation: &ToolInvocation) -> bool {
    invocation.args.first().map(String::as_str) == Some("--get-title")
}

/// The file an invocation writes: the value after `-o` for the fetcher,
/// the last argument for the transcoder.
fn output_path(invocation: &ToolInvocation) -> Option<PathBuf> {
    match invocation.tool {
        ToolKind::Acquisition => invocation
            .args
            .iter()
            .position(|arg| arg == "-o")
            .and_then(|idx| invocation.args.get(idx + 1))
            .map(PathBuf::from),
        ToolKind::Transcoder => invocation.args.last().map(PathBuf::from),
        ToolKind::Prober => None,
    }
}

fn exit(code: i32, stdout: &str, stderr: &str) -> ToolOutput {
    ToolOutput {
        status: Some(code),
        success: code == 0,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ProcessRunner for FakeToolchain {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(invocation.clone());

        if is_title_query(invocation) {
            return Ok(match &self.title {
                Some(title) => exit(0, &format!("{title}\n"), ""),
                None => exit(1, "", "ERROR: unable to extract title"),
            });
        }

        let write_output = || match output_path(invocation) {
            Some(path) => std::fs::write(path, b"fake media"),
            None => Ok(()),
        };

        match self.behavior(invocation.tool) {
            ToolBehavior::Succeed => {
                write_output()?;
                let stdout = match invocation.tool {
                    ToolKind::Prober => self.probe_json.as_str(),
                    _ => "",
                };
                Ok(exit(0, stdout, ""))
            }
            ToolBehavior::Fail(stderr) => Ok(exit(1, "", &stderr)),
            ToolBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(exit(0, "", ""))
            }
            ToolBehavior::NoOutput => Ok(exit(0, "", "")),
            ToolBehavior::WriteThenFail(stderr) => {
                write_output()?;
                Ok(exit(1, "", &stderr))
            }
        }
    }
}
