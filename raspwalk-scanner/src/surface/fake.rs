//! Scripted in-memory site for exercising the engine without a network.

use crate::error::{SurfaceError, SurfaceResult};
use crate::result::NavigationOutcome;
use crate::surface::{PageSurface, PageView};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Listing page with one postback anchor per `(id, label)`.
pub(crate) fn listing(links: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body><form id=\"aspnetForm\">");
    for (id, label) in links {
        if id.is_empty() {
            html.push_str(&format!(
                "<a href=\"javascript:__doPostBack('anon','')\">{}</a>",
                label
            ));
        } else {
            html.push_str(&format!(
                "<a id=\"{id}\" href=\"javascript:__doPostBack('{id}','')\">{label}</a>"
            ));
        }
    }
    html.push_str("</form></body></html>");
    html
}

pub(crate) struct FakePage {
    pages: HashMap<String, String>,
    /// element id -> url the click lands on
    targets: HashMap<String, String>,
    current: String,
    history: Vec<String>,
    /// ids whose click never produces a navigation event
    pub stalled_clicks: HashSet<String>,
    /// ids whose element cannot be found, reload or not
    pub vanished: HashSet<String>,
    /// ids hidden until the next reload
    pub hidden_until_reload: HashSet<String>,
    /// number of upcoming go_back calls that throw
    pub failing_backs: usize,
    /// every mutating call, in order
    pub ops: Vec<String>,
    /// stands in for a platform CSS escaping primitive
    pub native_escape: Option<fn(&str) -> String>,
}

impl FakePage {
    pub(crate) fn new(start: &str) -> Self {
        Self {
            pages: HashMap::new(),
            targets: HashMap::new(),
            current: start.to_string(),
            history: Vec::new(),
            stalled_clicks: HashSet::new(),
            vanished: HashSet::new(),
            hidden_until_reload: HashSet::new(),
            failing_backs: 0,
            ops: Vec::new(),
            native_escape: None,
        }
    }

    pub(crate) fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    pub(crate) fn link(mut self, id: &str, target: &str) -> Self {
        self.targets.insert(id.to_string(), target.to_string());
        self
    }

    pub(crate) fn url(&self) -> &str {
        &self.current
    }

    fn id_of(selector: &str) -> &str {
        selector.trim_start_matches('#')
    }

    fn present(&self, selector: &str) -> bool {
        let id = Self::id_of(selector);
        if self.vanished.contains(id) || self.hidden_until_reload.contains(id) {
            return false;
        }
        let Some(html) = self.pages.get(&self.current) else {
            return false;
        };
        let Ok(css) = Selector::parse(selector) else {
            return false;
        };
        Html::parse_document(html).select(&css).next().is_some()
    }
}

#[async_trait]
impl PageView for FakePage {
    async fn current_url(&self) -> SurfaceResult<String> {
        Ok(self.current.clone())
    }

    async fn content(&self) -> SurfaceResult<String> {
        Ok(self.pages.get(&self.current).cloned().unwrap_or_default())
    }

    async fn element_exists(&self, selector: &str) -> SurfaceResult<bool> {
        Ok(self.present(selector))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> SurfaceResult<bool> {
        Ok(self.present(selector))
    }

    async fn escape_identifier(&self, id: &str) -> Option<String> {
        self.native_escape.map(|escape| escape(id))
    }
}

#[async_trait]
impl PageSurface for FakePage {
    async fn click(&mut self, selector: &str, _timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        let id = Self::id_of(selector).to_string();
        self.ops.push(format!("click:{}", id));
        if self.stalled_clicks.contains(&id) {
            return Ok(NavigationOutcome::TimedOutButContinuing);
        }
        let target = self
            .targets
            .get(&id)
            .cloned()
            .ok_or_else(|| SurfaceError::ElementNotFound(selector.to_string()))?;
        self.history.push(std::mem::replace(&mut self.current, target));
        Ok(NavigationOutcome::Completed)
    }

    async fn go_back(&mut self, _timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        self.ops.push("back".to_string());
        if self.failing_backs > 0 {
            self.failing_backs -= 1;
            return Err(SurfaceError::Script("view state out of sync".to_string()));
        }
        self.current = self.history.pop().ok_or(SurfaceError::NoHistory)?;
        Ok(NavigationOutcome::Completed)
    }

    async fn reload(&mut self, _timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        self.ops.push("reload".to_string());
        self.hidden_until_reload.clear();
        Ok(NavigationOutcome::Completed)
    }

    async fn navigate(&mut self, url: &str, _timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        self.ops.push(format!("goto:{}", url));
        if !self.pages.contains_key(url) {
            return Err(SurfaceError::InvalidUrl(url.to_string()));
        }
        self.history.clear();
        self.current = url.to_string();
        Ok(NavigationOutcome::Completed)
    }
}
