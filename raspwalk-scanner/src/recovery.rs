use crate::result::{NavigationOutcome, RecoveryOutcome};
use crate::surface::PageSurface;
use std::time::Duration;
use tracing::{debug, warn};

/// Returns the tab to the listing a link was clicked from.
///
/// History-back is tried first; if it throws, times out, or the originating
/// link does not show up again, the branch root is loaded instead.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub back_timeout: Duration,
    pub reappear_timeout: Duration,
    pub fallback_timeout: Duration,
    /// Attempts at history-back before falling back. Only thrown errors are
    /// retried; a timed-out back step falls back straight away.
    pub back_attempts: usize,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            back_timeout: Duration::from_secs(20),
            reappear_timeout: Duration::from_secs(10),
            fallback_timeout: Duration::from_secs(20),
            back_attempts: 1,
        }
    }
}

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_back_timeout(mut self, timeout: Duration) -> Self {
        self.back_timeout = timeout;
        self
    }

    pub fn with_reappear_timeout(mut self, timeout: Duration) -> Self {
        self.reappear_timeout = timeout;
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    pub fn with_back_attempts(mut self, attempts: usize) -> Self {
        self.back_attempts = attempts.max(1);
        self
    }

    pub async fn restore(
        &self,
        page: &mut dyn PageSurface,
        fallback_url: &str,
        link_selector: &str,
    ) -> RecoveryOutcome {
        if self.step_back(page).await && self.link_reappears(page, link_selector).await {
            debug!("Restored listing via history for {}", link_selector);
            return RecoveryOutcome::Restored;
        }
        self.fall_back(page, fallback_url).await
    }

    /// Loads `fallback_url`, discarding whatever state the tab was in.
    pub async fn fall_back(&self, page: &mut dyn PageSurface, fallback_url: &str) -> RecoveryOutcome {
        debug!("Falling back to {}", fallback_url);
        match page.navigate(fallback_url, self.fallback_timeout).await {
            Ok(NavigationOutcome::Completed) => RecoveryOutcome::FellBackToRoot,
            Ok(NavigationOutcome::TimedOutButContinuing) => {
                warn!("Fallback navigation to {} timed out", fallback_url);
                RecoveryOutcome::Failed
            }
            Err(e) => {
                warn!("Fallback navigation to {} failed: {}", fallback_url, e);
                RecoveryOutcome::Failed
            }
        }
    }

    async fn step_back(&self, page: &mut dyn PageSurface) -> bool {
        for attempt in 1..=self.back_attempts.max(1) {
            match page.go_back(self.back_timeout).await {
                Ok(NavigationOutcome::Completed) => return true,
                Ok(NavigationOutcome::TimedOutButContinuing) => {
                    warn!("History back timed out after {:?}", self.back_timeout);
                    return false;
                }
                Err(e) => {
                    warn!("History back attempt {} failed: {}", attempt, e);
                }
            }
        }
        false
    }

    async fn link_reappears(&self, page: &mut dyn PageSurface, link_selector: &str) -> bool {
        match page.wait_for_selector(link_selector, self.reappear_timeout).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("{} did not reappear after going back", link_selector);
                false
            }
            Err(e) => {
                warn!("Could not check for {}: {}", link_selector, e);
                false
            }
        }
    }
}
