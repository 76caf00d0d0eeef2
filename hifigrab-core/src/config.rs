use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Environment variable that overrides `paths.downloads_dir`.
pub const DOWNLOADS_DIR_ENV: &str = "HIFIGRAB_DOWNLOADS_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HifigrabConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub search: SearchSection,
    pub browser: BrowserSection,
    pub conversion: ConversionSection,
}

impl HifigrabConfig {
    /// Directory where final outputs and temp artifacts are written.
    ///
    /// Resolution order: `HIFIGRAB_DOWNLOADS_DIR`, `paths.downloads_dir`, the
    /// platform downloads directory, `~/Downloads`, `./Downloads`.
    pub fn downloads_dir(&self) -> PathBuf {
        if let Ok(value) = std::env::var(DOWNLOADS_DIR_ENV) {
            if !value.trim().is_empty() {
                return PathBuf::from(value.trim());
            }
        }
        if let Some(dir) = &self.paths.downloads_dir {
            return PathBuf::from(dir);
        }
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("Downloads"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.page_size == 0 {
            return Err(ConfigError::Invalid(
                "search.page_size must be greater than zero".into(),
            ));
        }
        if self.search.cache_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "search.cache_ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.conversion.acquire_timeout_seconds == 0
            || self.conversion.encode_timeout_seconds == 0
        {
            return Err(ConfigError::Invalid(
                "conversion timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub allowed_origin: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5050,
            allowed_origin: "http://localhost:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub downloads_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub yt_dlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".into(),
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub results_url: String,
    pub result_selector: String,
    pub load_more_selector: String,
    pub scroll_iterations: usize,
    pub scroll_distance_px: f64,
    pub scroll_pause_ms: u64,
    pub load_more_clicks: usize,
    pub load_more_pause_ms: u64,
    pub navigation_timeout_seconds: u64,
    pub selector_timeout_seconds: u64,
    pub attempt_timeout_seconds: u64,
    pub max_retries: usize,
    pub backoff_ms: u64,
    pub cache_ttl_seconds: u64,
    pub page_size: usize,
    pub placeholder_thumbnails: Vec<String>,
}

impl SearchSection {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_seconds)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_seconds > 0).then(|| Duration::from_secs(self.attempt_timeout_seconds))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            results_url: "https://www.youtube.com/results?search_query=".into(),
            result_selector: "ytd-video-renderer".into(),
            load_more_selector: r#"button[aria-label*="Load more"]"#.into(),
            scroll_iterations: 10,
            scroll_distance_px: 1000.0,
            scroll_pause_ms: 500,
            load_more_clicks: 3,
            load_more_pause_ms: 1000,
            navigation_timeout_seconds: 30,
            selector_timeout_seconds: 10,
            attempt_timeout_seconds: 120,
            max_retries: 2,
            backoff_ms: 1000,
            cache_ttl_seconds: 300,
            page_size: 20,
            placeholder_thumbnails: vec![
                "placehold.co".into(),
                "data:".into(),
                "/img/no_thumbnail".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            viewport_width: 1280,
            viewport_height: 720,
            user_agent: None,
            request_timeout_seconds: Some(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversionSection {
    pub acquire_timeout_seconds: u64,
    pub encode_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub user_agent: String,
    pub lossy_bitrate: String,
    pub mp3_bitrate: String,
}

impl ConversionSection {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds.max(1))
    }
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            acquire_timeout_seconds: 300,
            encode_timeout_seconds: 300,
            probe_timeout_seconds: 20,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".into(),
            lossy_bitrate: "4000k".into(),
            mp3_bitrate: "320k".into(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HifigrabConfig> {
    let config: HifigrabConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/hifigrab.toml");
        let config = load_config(path).expect("fixture config should parse");
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.search.max_retries, 2);
        assert_eq!(config.search.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.tools.yt_dlp, "yt-dlp");
        assert_eq!(config.conversion.acquire_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: HifigrabConfig = toml::from_str(
            r#"
[search]
scroll_iterations = 2

[paths]
downloads_dir = "/srv/media"
"#,
        )
        .unwrap();
        assert_eq!(config.search.scroll_iterations, 2);
        assert_eq!(config.search.load_more_clicks, 3);
        assert_eq!(config.server.allowed_origin, "http://localhost:3000");
        assert_eq!(config.paths.downloads_dir.as_deref(), Some("/srv/media"));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut config = HifigrabConfig::default();
        config.search.page_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
