use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{SearchError, SearchResult};
use super::validate::RawRecord;

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// One scraping session: a browser with a single page. Always closed by the
/// caller, whatever the outcome of the attempt.
#[async_trait]
pub trait ScrapeSession: Send {
    async fn goto(&mut self, url: &str, limit: Duration) -> SearchResult<()>;
    /// Waits for `selector` to appear. `Ok(false)` means it never did.
    async fn wait_for_selector(&mut self, selector: &str, limit: Duration) -> SearchResult<bool>;
    async fn scroll(&mut self, delta_y: f64) -> SearchResult<()>;
    /// Clicks the first match of `selector`; `Ok(false)` if nothing matched.
    async fn click(&mut self, selector: &str) -> SearchResult<bool>;
    async fn extract(&mut self, script: &str) -> SearchResult<Vec<RawRecord>>;
    async fn close(self: Box<Self>) -> SearchResult<()>;
}

#[async_trait]
pub trait ScrapeSessionFactory: Send + Sync {
    async fn open(&self) -> SearchResult<Box<dyn ScrapeSession>>;
}

/// Launches a fresh headless Chromium for every session.
#[derive(Debug, Clone)]
pub struct ChromiumSessionFactory {
    config: BrowserSection,
}

impl ChromiumSessionFactory {
    pub fn new(config: BrowserSection) -> Self {
        Self { config }
    }

    fn build_chromium_config(&self) -> SearchResult<ChromiumConfig> {
        let width = self.config.viewport_width;
        let height = self.config.viewport_height;
        let mut builder = ChromiumConfig::builder()
            .window_size(width, height)
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            });

        if let Some(path) = &self.config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(seconds) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(seconds));
        }

        let mut args = vec![format!("--window-size={width},{height}")];
        if !self.config.sandbox {
            args.push("--disable-setuid-sandbox".into());
        }
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        builder = builder.args(args);

        builder.build().map_err(SearchError::Configuration)
    }
}

#[async_trait]
impl ScrapeSessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> SearchResult<Box<dyn ScrapeSession>> {
        let chromium_config = self.build_chromium_config()?;
        debug!(
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            headless = self.config.headless,
            "launching chromium"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SearchError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let mut session = ChromiumSession {
            browser,
            page: None,
            handler_task: Some(handler_task),
        };
        let created = session
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await;
        let page = match created {
            Ok(page) => page,
            Err(err) => {
                let _ = Box::new(session).close().await;
                return Err(err.into());
            }
        };
        if let Some(user_agent) = &self.config.user_agent {
            let params = SetUserAgentOverrideParams::builder()
                .user_agent(user_agent.clone())
                .build()
                .map_err(SearchError::Configuration)?;
            page.set_user_agent(params).await?;
        }
        session.page = Some(page);
        Ok(Box::new(session))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    fn page(&self) -> SearchResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| SearchError::Unexpected("page not initialised".into()))
    }
}

#[async_trait]
impl ScrapeSession for ChromiumSession {
    async fn goto(&mut self, url: &str, limit: Duration) -> SearchResult<()> {
        let page = self.page()?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SearchError::Configuration)?;
        let navigation = async {
            page.goto(params).await?;
            page.wait_for_navigation().await?;
            Ok::<_, SearchError>(())
        };
        match timeout(limit, navigation).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout {
                what: "navigation".into(),
                limit,
            }),
        }
    }

    async fn wait_for_selector(&mut self, selector: &str, limit: Duration) -> SearchResult<bool> {
        let page = self.page()?;
        let deadline = Instant::now() + limit;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL).await;
        }
    }

    async fn scroll(&mut self, delta_y: f64) -> SearchResult<()> {
        let script = format!("window.scrollBy(0, {delta_y});");
        self.page()?
            .evaluate(script.as_str())
            .await
            .map_err(|err| SearchError::Unexpected(format!("failed to execute scroll script: {err}")))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> SearchResult<bool> {
        let page = self.page()?;
        match page.find_element(selector).await {
            Ok(element) => {
                element.click().await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn extract(&mut self, script: &str) -> SearchResult<Vec<RawRecord>> {
        let value = self
            .page()?
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| SearchError::Decode(err.to_string()))?;
        let records: Vec<RawRecord> =
            serde_json::from_value(value).map_err(|err| SearchError::Decode(err.to_string()))?;
        Ok(records)
    }

    async fn close(mut self: Box<Self>) -> SearchResult<()> {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.await?;
        }
        info!("chromium session closed");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("chromium session dropped without explicit close");
                handle.abort();
            }
        }
    }
}

/// Script evaluated on the results page; returns one raw record per result
/// element. Validation happens on the Rust side.
pub fn extraction_script(result_selector: &str) -> String {
    let selector = serde_json::to_string(result_selector).unwrap_or_else(|_| "\"\"".into());
    format!(
        r#"
(() => {{
    const nodes = Array.from(document.querySelectorAll({selector}));
    return nodes.map((node) => {{
        const link = node.querySelector('#video-title')
            || node.querySelector('a[title]')
            || node.querySelector("a[href*='/watch?v=']");
        const url = link && link.href ? String(link.href) : null;
        const match = url ? url.match(/v=([^&]+)/) : null;
        const id = match ? match[1] : null;
        const image = node.querySelector('yt-image img')
            || node.querySelector("img[src*='ytimg.com']")
            || node.querySelector('ytd-thumbnail img');
        const meta = node.querySelector('ytd-thumbnail #img');
        let thumbnail = (image && image.src) || (meta && meta.getAttribute('src')) || null;
        if (!thumbnail && id) {{
            thumbnail = `https://img.youtube.com/vi/${{id}}/hqdefault.jpg`;
        }}
        const channel = node.querySelector('ytd-channel-name a');
        return {{
            id,
            title: link ? link.textContent.trim() : null,
            url,
            thumbnail,
            channel: channel ? channel.textContent.trim() : null,
        }};
    }});
}})()
"#
    )
}
