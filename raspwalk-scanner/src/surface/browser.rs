//! Chromium-backed page surface driven over CDP.

use crate::error::{Result, ScanError, SurfaceError, SurfaceResult};
use crate::result::NavigationOutcome;
use crate::surface::{PageSurface, PageView};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub insecure: bool,
    pub request_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            insecure: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct BrowserPage {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl BrowserPage {
    /// Starts Chromium and opens the single tab the traversal drives.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(options.request_timeout)
            .arg("--no-sandbox");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = options.executable {
            builder = builder.chrome_executable(path);
        }
        if options.insecure {
            builder = builder.arg("--ignore-certificate-errors");
        }
        let config = builder.build().map_err(ScanError::Bootstrap)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScanError::Bootstrap(format!("could not launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler loop finished");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScanError::Bootstrap(format!("could not open tab: {}", e)))?;

        info!("Browser started (headless: {})", options.headless);
        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        self.handler_task.abort();
    }

    /// Must be opened before the action that navigates.
    async fn load_events(&self) -> SurfaceResult<EventStream<EventLoadEventFired>> {
        Ok(self.page.event_listener::<EventLoadEventFired>().await?)
    }

    async fn evaluate_bool(&self, script: String) -> SurfaceResult<bool> {
        let value = self.page.evaluate(script).await?;
        Ok(value.into_value::<bool>().unwrap_or(false))
    }
}

/// Resolves on the first event of a listener opened before the action.
async fn settle<S: Stream + Unpin>(mut loads: S, limit: Duration) -> NavigationOutcome {
    match timeout(limit, loads.next()).await {
        Ok(Some(_)) => NavigationOutcome::Completed,
        Ok(None) => {
            debug!("Load event stream closed before a navigation finished");
            NavigationOutcome::TimedOutButContinuing
        }
        Err(_) => NavigationOutcome::TimedOutButContinuing,
    }
}

fn js_string(s: &str) -> SurfaceResult<String> {
    serde_json::to_string(s).map_err(|e| SurfaceError::Script(e.to_string()))
}

#[async_trait]
impl PageView for BrowserPage {
    async fn current_url(&self) -> SurfaceResult<String> {
        Ok(self
            .page
            .url()
            .await?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&self) -> SurfaceResult<String> {
        Ok(self.page.content().await?)
    }

    async fn element_exists(&self, selector: &str) -> SurfaceResult<bool> {
        let script = format!("document.querySelector({}) !== null", js_string(selector)?);
        self.evaluate_bool(script).await
    }

    async fn wait_for_selector(&self, selector: &str, limit: Duration) -> SurfaceResult<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if self.element_exists(selector).await.unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(SELECTOR_POLL).await;
        }
    }

    async fn escape_identifier(&self, id: &str) -> Option<String> {
        let literal = js_string(id).ok()?;
        let script = format!(
            "(typeof CSS !== 'undefined' && typeof CSS.escape === 'function') ? CSS.escape({}) : null",
            literal
        );
        let value = self.page.evaluate(script).await.ok()?;
        value.into_value::<Option<String>>().ok().flatten()
    }
}

#[async_trait]
impl PageSurface for BrowserPage {
    async fn click(&mut self, selector: &str, limit: Duration) -> SurfaceResult<NavigationOutcome> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SurfaceError::ElementNotFound(selector.to_string()))?;
        let loads = self.load_events().await?;
        element.click().await?;
        Ok(settle(loads, limit).await)
    }

    async fn go_back(&mut self, limit: Duration) -> SurfaceResult<NavigationOutcome> {
        if !self.evaluate_bool("window.history.length > 1".to_string()).await? {
            return Err(SurfaceError::NoHistory);
        }
        let loads = self.load_events().await?;
        self.page.evaluate("window.history.back()").await?;
        Ok(settle(loads, limit).await)
    }

    async fn reload(&mut self, limit: Duration) -> SurfaceResult<NavigationOutcome> {
        match timeout(limit, self.page.reload()).await {
            Ok(result) => {
                result?;
                Ok(NavigationOutcome::Completed)
            }
            Err(_) => Ok(NavigationOutcome::TimedOutButContinuing),
        }
    }

    async fn navigate(&mut self, url: &str, limit: Duration) -> SurfaceResult<NavigationOutcome> {
        url::Url::parse(url).map_err(|e| SurfaceError::InvalidUrl(format!("{}: {}", url, e)))?;
        match timeout(limit, self.page.goto(url)).await {
            Ok(result) => {
                result?;
                Ok(NavigationOutcome::Completed)
            }
            Err(_) => Ok(NavigationOutcome::TimedOutButContinuing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_load_buffered_before_waiting_completes() {
        // The load fired while the click was still being dispatched.
        let loads = stream::iter(vec![()]);
        assert_eq!(settle(loads, Duration::from_millis(50)).await, NavigationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_no_load_times_out_but_continues() {
        let loads = stream::pending::<()>();
        assert_eq!(
            settle(loads, Duration::from_millis(50)).await,
            NavigationOutcome::TimedOutButContinuing
        );
    }

    #[tokio::test]
    async fn test_closed_listener_is_not_a_completed_navigation() {
        let loads = stream::empty::<()>();
        assert_eq!(
            settle(loads, Duration::from_secs(1)).await,
            NavigationOutcome::TimedOutButContinuing
        );
    }
}
