//! Capabilities over the single live page a traversal drives.
//!
//! [`PageView`] is the read side handed to link discovery and record
//! extraction. [`PageSurface`] adds the mutating operations; they take
//! `&mut self`, so only whoever owns the handle (the traversal engine) can
//! move the tab.

use crate::error::SurfaceResult;
use crate::result::NavigationOutcome;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "browser")]
pub mod browser;
#[cfg(test)]
pub(crate) mod fake;
pub mod http;

#[cfg(feature = "browser")]
pub use browser::{BrowserOptions, BrowserPage};
pub use http::{HttpOptions, HttpPage};

#[async_trait]
pub trait PageView: Send + Sync {
    async fn current_url(&self) -> SurfaceResult<String>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> SurfaceResult<String>;

    async fn element_exists(&self, selector: &str) -> SurfaceResult<bool>;

    /// Resolves `true` once `selector` matches, `false` when `timeout`
    /// elapses first.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> SurfaceResult<bool>;

    /// Platform escaping primitive for CSS identifiers, if the backend has one.
    async fn escape_identifier(&self, _id: &str) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait PageSurface: PageView {
    /// Activates the first element matching `selector` and waits for the
    /// resulting navigation. The wait is registered before the click.
    async fn click(&mut self, selector: &str, timeout: Duration)
    -> SurfaceResult<NavigationOutcome>;

    async fn go_back(&mut self, timeout: Duration) -> SurfaceResult<NavigationOutcome>;

    async fn reload(&mut self, timeout: Duration) -> SurfaceResult<NavigationOutcome>;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> SurfaceResult<NavigationOutcome>;
}

const CSS_SPECIAL: &str = "!\"#$%&'()*+,./:;<=>?@[\\]^`{|}~";

/// Manual CSS identifier escaping, used when the surface has no primitive.
pub fn escape_css_identifier(id: &str) -> String {
    let mut out = String::with_capacity(id.len() + 8);
    for (i, c) in id.chars().enumerate() {
        if c.is_control() || (i == 0 && c.is_ascii_digit()) {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if c.is_whitespace() || CSS_SPECIAL.contains(c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Builds an `#id` selector, preferring the surface's own escaping.
pub async fn id_selector<V: PageView + ?Sized>(page: &V, id: &str) -> String {
    let escaped = match page.escape_identifier(id).await {
        Some(escaped) if !escaped.is_empty() => escaped,
        _ => escape_css_identifier(id),
    };
    format!("#{}", escaped)
}
