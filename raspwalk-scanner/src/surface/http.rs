//! Browser-free page surface for WebForms-style sites.
//!
//! A postback click is replayed the way the page script would submit it: the
//! first form is serialized, `__EVENTTARGET`/`__EVENTARGUMENT` are set from
//! the anchor's `__doPostBack` call, and the result is POSTed to the form
//! action. History is a stack of cached snapshots.

use crate::error::{SurfaceError, SurfaceResult};
use crate::links::parse_postback_href;
use crate::result::NavigationOutcome;
use crate::surface::{PageSurface, PageView};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const EVENT_TARGET: &str = "__EVENTTARGET";
const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    /// Accept self-signed or expired certificates.
    pub insecure: bool,
    pub max_redirects: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "raspwalk/{} (https://github.com/trapdoorsec/raspwalk)",
                env!("CARGO_PKG_VERSION")
            ),
            insecure: false,
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PageRequest {
    Get(String),
    Post {
        url: String,
        form: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone)]
struct Snapshot {
    url: String,
    html: String,
    request: PageRequest,
}

pub struct HttpPage {
    client: Client,
    current: Option<Snapshot>,
    history: Vec<Snapshot>,
}

impl HttpPage {
    pub fn new() -> SurfaceResult<Self> {
        Self::with_options(&HttpOptions::default())
    }

    pub fn with_options(options: &HttpOptions) -> SurfaceResult<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .cookie_store(true)
            .danger_accept_invalid_certs(options.insecure)
            .redirect(reqwest::redirect::Policy::limited(options.max_redirects))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            current: None,
            history: Vec::new(),
        })
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn snapshot(&self) -> SurfaceResult<&Snapshot> {
        self.current.as_ref().ok_or(SurfaceError::Blank)
    }

    fn commit(&mut self, snapshot: Snapshot) {
        if let Some(previous) = self.current.take() {
            self.history.push(previous);
        }
        self.current = Some(snapshot);
    }

    /// `Ok(None)` when the request outlived `timeout`.
    async fn fetch(&self, request: PageRequest, timeout: Duration) -> SurfaceResult<Option<Snapshot>> {
        let builder = match &request {
            PageRequest::Get(url) => self.client.get(url),
            PageRequest::Post { url, form } => self.client.post(url).form(form),
        };

        let exchange = async {
            let response = builder.send().await?.error_for_status()?;
            let url = response.url().to_string();
            let html = response.text().await?;
            Ok::<_, reqwest::Error>((url, html))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok((url, html))) => {
                debug!("Loaded {} ({} bytes)", url, html.len());
                Ok(Some(Snapshot { url, html, request }))
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!("Request timed out: {}", e);
                Ok(None)
            }
            Ok(Err(e)) => Err(SurfaceError::Http(e)),
            Err(_) => {
                warn!("No response within {:?}", timeout);
                Ok(None)
            }
        }
    }
}

fn compile(css: &str) -> SurfaceResult<Selector> {
    Selector::parse(css).map_err(|e| SurfaceError::InvalidSelector(format!("{}: {}", css, e)))
}

fn resolve(base: &str, href: &str) -> SurfaceResult<String> {
    let base = Url::parse(base).map_err(|e| SurfaceError::InvalidUrl(format!("{}: {}", base, e)))?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|e| SurfaceError::InvalidUrl(format!("{}: {}", href, e)))
}

fn html_matches(html: &str, selector: &str) -> SurfaceResult<bool> {
    let selector = compile(selector)?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}

/// Works out the request a click on `selector` would produce.
fn request_for_click(snapshot: &Snapshot, selector: &str) -> SurfaceResult<PageRequest> {
    let css = compile(selector)?;
    let document = Html::parse_document(&snapshot.html);
    let element = document
        .select(&css)
        .next()
        .ok_or_else(|| SurfaceError::ElementNotFound(selector.to_string()))?;
    let href = element.value().attr("href").unwrap_or("").trim();

    if let Some((target, argument)) = parse_postback_href(href) {
        let (action, mut form) = serialize_form(&document, &snapshot.url)?;
        form.retain(|(name, _)| name != EVENT_TARGET && name != EVENT_ARGUMENT);
        form.push((EVENT_TARGET.to_string(), target));
        form.push((EVENT_ARGUMENT.to_string(), argument));
        return Ok(PageRequest::Post { url: action, form });
    }

    if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
        return Err(SurfaceError::Script(format!(
            "{} has no navigable target",
            selector
        )));
    }

    Ok(PageRequest::Get(resolve(&snapshot.url, href)?))
}

/// Action URL and name/value pairs the browser would submit for the first form.
fn serialize_form(document: &Html, page_url: &str) -> SurfaceResult<(String, Vec<(String, String)>)> {
    let form_selector = compile("form")?;
    let field_selector = compile("input[name], select[name], textarea[name]")?;
    let option_selector = compile("option")?;

    let form = document.select(&form_selector).next();
    let action = match form.and_then(|f| f.value().attr("action")).map(str::trim) {
        Some(action) if !action.is_empty() => resolve(page_url, action)?,
        _ => page_url.to_string(),
    };
    let scope: ElementRef = form.unwrap_or_else(|| document.root_element());

    let mut fields = Vec::new();
    for field in scope.select(&field_selector) {
        let element = field.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        if element.attr("disabled").is_some() {
            continue;
        }

        match element.name() {
            "input" => {
                let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if element.attr("checked").is_some() {
                            fields.push((name.to_string(), element.attr("value").unwrap_or("on").to_string()));
                        }
                    }
                    _ => fields.push((name.to_string(), element.attr("value").unwrap_or("").to_string())),
                }
            }
            "select" => {
                let options: Vec<ElementRef> = field.select(&option_selector).collect();
                let chosen = options
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| options.first());
                if let Some(option) = chosen {
                    let value = match option.value().attr("value") {
                        Some(value) => value.to_string(),
                        None => option.text().collect::<String>().trim().to_string(),
                    };
                    fields.push((name.to_string(), value));
                }
            }
            "textarea" => fields.push((name.to_string(), field.text().collect())),
            _ => {}
        }
    }

    Ok((action, fields))
}

#[async_trait]
impl PageView for HttpPage {
    async fn current_url(&self) -> SurfaceResult<String> {
        Ok(self
            .current
            .as_ref()
            .map(|s| s.url.clone())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&self) -> SurfaceResult<String> {
        Ok(self.current.as_ref().map(|s| s.html.clone()).unwrap_or_default())
    }

    async fn element_exists(&self, selector: &str) -> SurfaceResult<bool> {
        match &self.current {
            Some(snapshot) => html_matches(&snapshot.html, selector),
            None => Ok(false),
        }
    }

    // Snapshots never change after they load, so there is nothing to wait for.
    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> SurfaceResult<bool> {
        self.element_exists(selector).await
    }
}

#[async_trait]
impl PageSurface for HttpPage {
    async fn click(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        let request = request_for_click(self.snapshot()?, selector)?;
        debug!("Click on {} -> {:?}", selector, request);
        match self.fetch(request, timeout).await? {
            Some(snapshot) => {
                self.commit(snapshot);
                Ok(NavigationOutcome::Completed)
            }
            None => Ok(NavigationOutcome::TimedOutButContinuing),
        }
    }

    async fn go_back(&mut self, _timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        let previous = self.history.pop().ok_or(SurfaceError::NoHistory)?;
        debug!("Back to {}", previous.url);
        self.current = Some(previous);
        Ok(NavigationOutcome::Completed)
    }

    async fn reload(&mut self, timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        let request = self.snapshot()?.request.clone();
        match self.fetch(request, timeout).await? {
            Some(snapshot) => {
                self.current = Some(snapshot);
                Ok(NavigationOutcome::Completed)
            }
            None => Ok(NavigationOutcome::TimedOutButContinuing),
        }
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> SurfaceResult<NavigationOutcome> {
        Url::parse(url).map_err(|e| SurfaceError::InvalidUrl(format!("{}: {}", url, e)))?;
        match self.fetch(PageRequest::Get(url.to_string()), timeout).await? {
            Some(snapshot) => {
                // A direct load starts a new history.
                self.history.clear();
                self.current = Some(snapshot);
                Ok(NavigationOutcome::Completed)
            }
            None => Ok(NavigationOutcome::TimedOutButContinuing),
        }
    }
}
