use anyhow::bail;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use raspwalk_scanner::event::{EventCallback, TraversalEvent};
use raspwalk_scanner::result::NavigationNode;
use raspwalk_scanner::schedule::{LayoutMode, RecordExtractor};
use raspwalk_scanner::surface::PageSurface;
use raspwalk_scanner::{Crawler, TraversalConfig};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Options for configuring a crawl operation
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub urls: Vec<String>,
    pub max_depth: usize,
    pub extraction_depth: usize,
    pub layout: LayoutMode,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    /// Overall bound per start URL.
    pub deadline: Option<Duration>,
    pub show_progress_bars: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            max_depth: 4,
            extraction_depth: 4,
            layout: LayoutMode::Single,
            navigation_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_millis(500),
            deadline: None,
            show_progress_bars: true,
        }
    }
}

/// Everything collected from one start URL
#[derive(Debug, Clone, Serialize)]
pub struct SiteResult {
    pub start_url: String,
    /// Whether the start URL qualified for descending below the first level.
    pub descended: bool,
    pub nodes: Vec<NavigationNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message("Starting crawl...");
    pb
}

/// Walks every start URL in turn on the same page.
///
/// A start URL that cannot be loaded is recorded in its [`SiteResult`] and
/// the next one is processed.
pub async fn execute_crawl(
    options: CrawlOptions,
    page: &mut dyn PageSurface,
    progress_callback: Option<CrawlProgressCallback>,
    event_callback: Option<EventCallback>,
) -> anyhow::Result<Vec<SiteResult>> {
    let CrawlOptions {
        urls,
        max_depth,
        extraction_depth,
        layout,
        navigation_timeout,
        settle_delay,
        deadline,
        show_progress_bars,
    } = options;

    if urls.is_empty() {
        bail!("No start URLs to crawl");
    }

    let progress_bar = show_progress_bars.then(|| Arc::new(spinner()));
    let visited = Arc::new(AtomicUsize::new(0));

    let events: EventCallback = {
        let pb = progress_bar.clone();
        let visited = visited.clone();
        let downstream = event_callback.clone();
        Arc::new(move |event: &TraversalEvent| {
            if let Some(ref pb) = pb {
                match event {
                    TraversalEvent::BranchEntered { depth, links, .. } => {
                        pb.set_message(format!("Level {}: {} links", depth, links));
                    }
                    TraversalEvent::ScheduleExtracted { label, lessons, .. } => {
                        let count = visited.fetch_add(1, Ordering::Relaxed) + 1;
                        pb.set_message(format!("{} schedules read, last: {} ({} lessons)", count, label, lessons));
                    }
                    _ => {}
                }
                pb.tick();
            }
            if let Some(ref cb) = downstream {
                cb(event);
            }
        })
    };

    let extractor = RecordExtractor::default().with_layout(layout);
    let mut all_results = Vec::new();

    for (idx, url) in urls.iter().enumerate() {
        if let Some(ref callback) = progress_callback
            && urls.len() > 1
        {
            callback(format!("Crawling site {}/{}: {}", idx + 1, urls.len(), url));
        }

        let mut config = TraversalConfig::new(url.clone())
            .with_max_depth(max_depth)
            .with_extraction_depth(extraction_depth)
            .with_navigation_timeout(navigation_timeout)
            .with_settle_delay(settle_delay);
        if let Some(limit) = deadline {
            config = config.with_deadline(limit);
        }
        let descended = config.descends_from(url);

        let crawler = Crawler::new(config)
            .with_extractor(extractor.clone())
            .with_event_callback(events.clone());

        let started_at = Utc::now();
        let (nodes, error) = match crawler.run(page).await {
            Ok(nodes) => (nodes, None),
            Err(e) => {
                warn!("Failed to crawl {}: {}", url, e);
                if let Some(ref callback) = progress_callback {
                    callback(format!("[!]  Failed to crawl {}: {}", url, e));
                }
                (Vec::new(), Some(e.to_string()))
            }
        };
        info!("Finished {} with {} top-level nodes", url, nodes.len());

        all_results.push(SiteResult {
            start_url: url.clone(),
            descended,
            nodes,
            error,
            started_at,
            finished_at: Utc::now(),
        });
    }

    if let Some(ref pb) = progress_bar {
        let total = visited.load(Ordering::Relaxed);
        pb.finish_with_message(format!("Crawl complete! {} schedules read", total));
    }

    Ok(all_results)
}
