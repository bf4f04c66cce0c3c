use crate::error::{Result, ScanError};
use crate::event::{EventCallback, TraversalEvent};
use crate::links::{discover_links, LinkDescriptor};
use crate::recovery::RecoveryPolicy;
use crate::result::{LinkOutcome, NavigationNode, RecoveryOutcome, SkipReason};
use crate::schedule::RecordExtractor;
use crate::surface::{id_selector, PageSurface};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub type DescendPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Query markers of the listings that lead down to group schedules.
pub const DEFAULT_DESCEND_MARKERS: &[&str] = &["tr=1", "tr=s", "tr=k"];

pub fn descend_on_markers(url: &str) -> bool {
    DEFAULT_DESCEND_MARKERS.iter().any(|marker| url.contains(marker))
}

#[derive(Clone)]
pub struct TraversalConfig {
    pub start_url: String,
    pub max_depth: usize,
    pub extraction_depth: usize,
    pub should_descend: DescendPredicate,
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    pub deadline: Option<Duration>,
}

impl TraversalConfig {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_depth: 4,
            extraction_depth: 4,
            should_descend: Arc::new(descend_on_markers),
            navigation_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_millis(500),
            deadline: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_extraction_depth(mut self, depth: usize) -> Self {
        self.extraction_depth = depth;
        self
    }

    pub fn with_descend_predicate(mut self, predicate: DescendPredicate) -> Self {
        self.should_descend = predicate;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn descends_from(&self, url: &str) -> bool {
        (self.should_descend)(url)
    }
}

impl fmt::Debug for TraversalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraversalConfig")
            .field("start_url", &self.start_url)
            .field("max_depth", &self.max_depth)
            .field("extraction_depth", &self.extraction_depth)
            .field("navigation_timeout", &self.navigation_timeout)
            .field("settle_delay", &self.settle_delay)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Depth-first walker over postback listings.
///
/// The crawler never owns the page; it borrows it mutably for the whole run
/// and leaves it on the start listing when it is done.
pub struct Crawler {
    config: TraversalConfig,
    extractor: RecordExtractor,
    recovery: RecoveryPolicy,
    event_callback: Option<EventCallback>,
}

impl Crawler {
    pub fn new(config: TraversalConfig) -> Self {
        let recovery = RecoveryPolicy::default()
            .with_back_timeout(config.navigation_timeout)
            .with_fallback_timeout(config.navigation_timeout);
        Self {
            config,
            extractor: RecordExtractor::default(),
            recovery,
            event_callback: None,
        }
    }

    pub fn with_extractor(mut self, extractor: RecordExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Loads the start URL and walks everything reachable from it.
    ///
    /// Only a failure to load the start URL is an error; everything below it
    /// ends up in the returned tree.
    pub async fn run(&self, page: &mut dyn PageSurface) -> Result<Vec<NavigationNode>> {
        let start_url = self.config.start_url.clone();
        Url::parse(&start_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", start_url, e)))?;
        info!("Starting traversal of {}", start_url);

        let outcome = page.navigate(&start_url, self.config.navigation_timeout).await?;
        if outcome.timed_out() {
            warn!("Start page {} did not finish loading, continuing", start_url);
        }

        let deadline = self.config.deadline.map(|limit| Instant::now() + limit);
        let nodes = self.traverse_until(page, &start_url, 0, deadline).await;

        if expired(deadline) {
            self.emit(TraversalEvent::DeadlineReached { depth: 0 });
            self.recovery.fall_back(page, &start_url).await;
        }

        info!("Traversal of {} produced {} top-level nodes", start_url, nodes.len());
        Ok(nodes)
    }

    /// Walks the links of the page currently loaded, treating `start_url` as
    /// the root this branch falls back to.
    pub fn traverse<'a>(
        &'a self,
        page: &'a mut dyn PageSurface,
        start_url: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Vec<NavigationNode>> {
        self.traverse_until(page, start_url, depth, None)
    }

    fn traverse_until<'a>(
        &'a self,
        page: &'a mut dyn PageSurface,
        start_url: &'a str,
        depth: usize,
        deadline: Option<Instant>,
    ) -> BoxFuture<'a, Vec<NavigationNode>> {
        async move {
            let links = match discover_links(&*page).await {
                Ok(links) => links,
                Err(e) => {
                    warn!("Could not read links at level {}: {}", depth, e);
                    Vec::new()
                }
            };
            self.emit(TraversalEvent::BranchEntered {
                depth,
                url: start_url.to_string(),
                links: links.len(),
            });

            let mut nodes = Vec::new();
            for (index, link) in links.iter().enumerate() {
                if expired(deadline) {
                    debug!("Deadline passed at level {}, stopping", depth);
                    break;
                }
                debug!("Link {}/{} at level {}: {:?}", index + 1, links.len(), depth, link.label);

                match self.visit(page, link, start_url, depth, deadline).await {
                    LinkOutcome::Visited(node) => nodes.push(node),
                    LinkOutcome::Skipped(reason) => self.emit(TraversalEvent::LinkSkipped {
                        depth,
                        label: link.label.clone(),
                        reason,
                    }),
                    LinkOutcome::Failed(reason) => {
                        debug!("Link {:?} failed: {}", link.label, reason);
                    }
                }
            }

            self.emit(TraversalEvent::BranchExited {
                depth,
                nodes: nodes.len(),
            });
            nodes
        }
        .boxed()
    }

    async fn visit(
        &self,
        page: &mut dyn PageSurface,
        link: &LinkDescriptor,
        start_url: &str,
        depth: usize,
        deadline: Option<Instant>,
    ) -> LinkOutcome {
        if link.id.is_empty() {
            return LinkOutcome::Skipped(SkipReason::EmptyIdentifier);
        }

        let selector = id_selector(&*page, &link.id).await;
        if !self.locate(page, &selector).await {
            return LinkOutcome::Skipped(SkipReason::ElementMissing);
        }

        let source_url = page
            .current_url()
            .await
            .unwrap_or_else(|_| start_url.to_string());

        let navigation = match page.click(&selector, self.config.navigation_timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                self.emit(TraversalEvent::LinkFailed {
                    depth,
                    label: link.label.clone(),
                    reason: reason.clone(),
                });
                let recovery = self.recovery.fall_back(page, start_url).await;
                self.report_recovery(recovery, depth, start_url);
                return LinkOutcome::Failed(reason);
            }
        };

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let landed_url = page
            .current_url()
            .await
            .unwrap_or_else(|_| source_url.clone());
        if navigation.timed_out() {
            self.emit(TraversalEvent::NavigationTimedOut {
                depth,
                label: link.label.clone(),
                url: landed_url.clone(),
            });
        }

        let schedule = if depth == self.config.extraction_depth {
            let result = self.extractor.extract(&*page).await;
            self.emit(TraversalEvent::ScheduleExtracted {
                depth,
                label: link.label.clone(),
                status: result.message(),
                lessons: result.records().len(),
            });
            Some(result)
        } else {
            None
        };

        let children = if depth < self.config.max_depth && self.config.descends_from(start_url) {
            self.traverse_until(page, &landed_url, depth + 1, deadline).await
        } else {
            Vec::new()
        };

        let recovery = if expired(deadline) {
            // the run loads the start URL once the deadline has passed
            RecoveryOutcome::FellBackToRoot
        } else {
            let recovery = self.recovery.restore(page, start_url, &selector).await;
            self.report_recovery(recovery, depth, start_url);
            recovery
        };

        LinkOutcome::Visited(NavigationNode {
            depth,
            source_url,
            clicked_label: link.label.clone(),
            landed_url,
            navigation,
            recovery,
            schedule,
            children,
        })
    }

    /// Finds `selector` on the page, reloading once if it is missing.
    async fn locate(&self, page: &mut dyn PageSurface, selector: &str) -> bool {
        if page.element_exists(selector).await.unwrap_or(false) {
            return true;
        }

        debug!("{} not found, reloading", selector);
        if let Err(e) = page.reload(self.config.navigation_timeout).await {
            warn!("Reload failed: {}", e);
        }
        page.element_exists(selector).await.unwrap_or(false)
    }

    fn report_recovery(&self, outcome: RecoveryOutcome, depth: usize, url: &str) {
        match outcome {
            RecoveryOutcome::Restored => {}
            RecoveryOutcome::FellBackToRoot => self.emit(TraversalEvent::RecoveryFellBack {
                depth,
                url: url.to_string(),
            }),
            RecoveryOutcome::Failed => self.emit(TraversalEvent::RecoveryFailed {
                depth,
                url: url.to_string(),
            }),
        }
    }

    fn emit(&self, event: TraversalEvent) {
        match &event {
            TraversalEvent::BranchEntered { depth, url, links } => {
                info!("Level {}: {} links on {}", depth, links, url)
            }
            TraversalEvent::BranchExited { depth, nodes } => {
                info!("Level {} done, {} nodes", depth, nodes)
            }
            TraversalEvent::LinkSkipped { label, reason, .. } => {
                warn!("Skipping {:?}: {:?}", label, reason)
            }
            TraversalEvent::LinkFailed { label, reason, .. } => {
                warn!("Link {:?} failed: {}", label, reason)
            }
            TraversalEvent::NavigationTimedOut { label, url, .. } => {
                warn!("Navigation for {:?} timed out, reading {} as is", label, url)
            }
            TraversalEvent::ScheduleExtracted { label, status, lessons, .. } => {
                info!("Schedule for {:?}: {:?}, {} lessons", label, status, lessons)
            }
            TraversalEvent::RecoveryFellBack { url, .. } => {
                warn!("History back failed, reloaded {}", url)
            }
            TraversalEvent::RecoveryFailed { url, .. } => {
                warn!("Could not return to {}", url)
            }
            TraversalEvent::DeadlineReached { .. } => warn!("Traversal deadline reached"),
        }

        if let Some(ref callback) = self.event_callback {
            callback(&event);
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{flatten, NavigationOutcome, ScheduleStatus};
    use crate::surface::fake::{listing, FakePage};
    use std::sync::Mutex;

    const ROOT: &str = "http://site/?tr=1";

    fn config() -> TraversalConfig {
        TraversalConfig::new(ROOT)
            .with_settle_delay(Duration::ZERO)
            .with_navigation_timeout(Duration::from_secs(1))
    }

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<TraversalEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: EventCallback = Arc::new(move |event: &TraversalEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        (callback, events)
    }

    const SCHEDULE: &str = r#"<table class="tbl_day">
        <tr class="day"><td>Понедельник</td></tr>
        <tr><td class="num_para">1</td><td class="para"><span>Algebra<br>Lecture 204</span></td></tr>
    </table>"#;

    /// ROOT -> a -> p1 -> b -> p2 -> c -> leaf
    fn chain() -> FakePage {
        FakePage::new(ROOT)
            .page(ROOT, listing(&[("a", "Faculty")]))
            .page("http://site/?tr=1&p=1", listing(&[("b", "Course")]))
            .page("http://site/?tr=1&p=2", listing(&[("c", "Group")]))
            .page("http://site/?tr=1&p=3", SCHEDULE)
            .link("a", "http://site/?tr=1&p=1")
            .link("b", "http://site/?tr=1&p=2")
            .link("c", "http://site/?tr=1&p=3")
    }

    #[tokio::test]
    async fn test_depth_never_exceeds_max() {
        let mut page = chain();
        let crawler = Crawler::new(config().with_max_depth(1));
        let nodes = crawler.run(&mut page).await.unwrap();

        let all = flatten(&nodes);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|n| n.depth <= 1));
        assert_eq!(all[1].clicked_label, "Course");
        assert_eq!(page.url(), ROOT);
    }

    #[tokio::test]
    async fn test_schedule_is_read_at_extraction_depth() {
        let mut page = chain();
        let crawler = Crawler::new(config().with_max_depth(2).with_extraction_depth(2));
        let nodes = crawler.run(&mut page).await.unwrap();

        let all = flatten(&nodes);
        assert_eq!(all.len(), 3);
        assert!(all[0].schedule.is_none());
        assert!(all[1].schedule.is_none());
        let leaf = all[2].schedule.as_ref().unwrap();
        assert_eq!(leaf.message(), ScheduleStatus::Found);
        assert_eq!(all[2].lesson_count(), 1);
        assert!(all.iter().all(|n| n.recovery == RecoveryOutcome::Restored));
    }

    #[tokio::test]
    async fn test_non_descending_start_stays_on_first_level() {
        let start = "http://site/?tr=2";
        let mut page = FakePage::new(start)
            .page(start, listing(&[("a", "A"), ("b", "B")]))
            .page("http://site/?tr=2&p=a", listing(&[("c", "C")]))
            .page("http://site/?tr=2&p=b", listing(&[("c", "C")]))
            .link("a", "http://site/?tr=2&p=a")
            .link("b", "http://site/?tr=2&p=b");
        let crawler = Crawler::new(
            TraversalConfig::new(start)
                .with_max_depth(4)
                .with_settle_delay(Duration::ZERO),
        );
        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.children.is_empty()));
    }

    #[tokio::test]
    async fn test_timed_out_click_still_yields_node() {
        let mut page = FakePage::new(ROOT).page(ROOT, listing(&[("a", "Stuck")]));
        page.stalled_clicks.insert("a".to_string());
        let (callback, events) = recorder();
        let crawler = Crawler::new(config().with_max_depth(0)).with_event_callback(callback);

        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].navigation, NavigationOutcome::TimedOutButContinuing);
        assert_eq!(nodes[0].landed_url, ROOT);
        assert_eq!(nodes[0].source_url, ROOT);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TraversalEvent::NavigationTimedOut { .. })));
    }

    #[tokio::test]
    async fn test_repeated_back_failure_falls_back_and_continues() {
        let mut page = FakePage::new(ROOT)
            .page(ROOT, listing(&[("a", "A"), ("b", "B")]))
            .page("http://site/a", "<html></html>")
            .page("http://site/b", "<html></html>")
            .link("a", "http://site/a")
            .link("b", "http://site/b");
        page.failing_backs = 2;
        let crawler = Crawler::new(config().with_max_depth(0))
            .with_recovery(RecoveryPolicy::default().with_back_attempts(2));

        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].recovery, RecoveryOutcome::FellBackToRoot);
        assert_eq!(nodes[1].recovery, RecoveryOutcome::Restored);
        let goto_root = format!("goto:{}", ROOT);
        assert_eq!(
            page.ops,
            vec![goto_root.as_str(), "click:a", "back", "back", goto_root.as_str(), "click:b", "back"]
        );
    }

    #[tokio::test]
    async fn test_links_without_id_are_skipped() {
        let mut page = FakePage::new(ROOT)
            .page(ROOT, listing(&[("", "Anonymous"), ("a", "A")]))
            .page("http://site/a", "<html></html>")
            .link("a", "http://site/a");
        let (callback, events) = recorder();
        let crawler = Crawler::new(config().with_max_depth(0)).with_event_callback(callback);

        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].clicked_label, "A");
        assert!(events.lock().unwrap().contains(&TraversalEvent::LinkSkipped {
            depth: 0,
            label: "Anonymous".to_string(),
            reason: SkipReason::EmptyIdentifier,
        }));
    }

    #[tokio::test]
    async fn test_missing_element_is_reloaded_then_skipped() {
        let mut page = FakePage::new(ROOT)
            .page(ROOT, listing(&[("a", "Late"), ("b", "Gone")]))
            .page("http://site/a", "<html></html>")
            .link("a", "http://site/a")
            .link("b", "http://site/a");
        page.hidden_until_reload.insert("a".to_string());
        page.vanished.insert("b".to_string());
        let crawler = Crawler::new(config().with_max_depth(0));

        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].clicked_label, "Late");
        assert_eq!(page.ops[1], "reload");
        assert_eq!(page.ops[2], "click:a");
        assert_eq!(page.ops.last().map(String::as_str), Some("reload"));
        assert!(!page.ops.contains(&"click:b".to_string()));
    }

    #[tokio::test]
    async fn test_click_error_fails_link_and_falls_back() {
        let mut page = FakePage::new(ROOT)
            .page(ROOT, listing(&[("broken", "Broken"), ("a", "A")]))
            .page("http://site/a", "<html></html>")
            .link("a", "http://site/a");
        let (callback, events) = recorder();
        let crawler = Crawler::new(config().with_max_depth(0)).with_event_callback(callback);

        let nodes = crawler.run(&mut page).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].clicked_label, "A");
        assert_eq!(page.ops[2], format!("goto:{}", ROOT));
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, TraversalEvent::LinkFailed { label, .. } if label == "Broken")));
        assert!(events.iter().any(|e| matches!(e, TraversalEvent::RecoveryFellBack { .. })));
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_to_start() {
        let mut page = chain();
        let (callback, events) = recorder();
        let crawler = Crawler::new(config().with_deadline(Duration::ZERO)).with_event_callback(callback);

        let nodes = crawler.run(&mut page).await.unwrap();

        assert!(nodes.is_empty());
        let goto_root = format!("goto:{}", ROOT);
        assert_eq!(page.ops, vec![goto_root.clone(), goto_root]);
        assert!(events.lock().unwrap().contains(&TraversalEvent::DeadlineReached { depth: 0 }));
    }

    #[tokio::test]
    async fn test_unreachable_start_is_an_error() {
        let mut page = FakePage::new("about:blank");
        let crawler = Crawler::new(config());
        assert!(crawler.run(&mut page).await.is_err());
    }

    #[tokio::test]
    async fn test_unparsable_start_url_is_rejected_before_navigating() {
        let mut page = FakePage::new(ROOT).page(ROOT, listing(&[("a", "A")]));
        let crawler = Crawler::new(TraversalConfig::new("not a url").with_settle_delay(Duration::ZERO));

        let result = crawler.run(&mut page).await;

        assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
        assert!(page.ops.is_empty());
    }

    #[test]
    fn test_default_descend_markers() {
        assert!(descend_on_markers("https://rasp.example/?tr=1"));
        assert!(descend_on_markers("https://rasp.example/?tr=k&x=1"));
        assert!(!descend_on_markers("https://rasp.example/?tr=2"));
    }
}
