//! Discovery of postback anchors on the current page.

use crate::error::SurfaceResult;
use crate::surface::PageView;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

/// Anchors whose activation triggers a server round-trip.
pub const POSTBACK_LINK_SELECTOR: &str = "a[href^='javascript:__doPostBack(']";

static POSTBACK_CALL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"__doPostBack\(\s*['"]([^'"]*)['"]\s*,\s*['"]([^'"]*)['"]\s*\)"#).ok()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDescriptor {
    /// DOM id; empty when the anchor has none.
    pub id: String,
    pub label: String,
    pub raw_target: String,
}

impl LinkDescriptor {
    /// `(event target, event argument)` of the postback call, if any.
    pub fn postback(&self) -> Option<(String, String)> {
        parse_postback_href(&self.raw_target)
    }
}

/// Parses `javascript:__doPostBack('target','argument')`.
pub fn parse_postback_href(href: &str) -> Option<(String, String)> {
    let re = POSTBACK_CALL.as_ref()?;
    let caps = re.captures(href)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Every postback anchor in document order, including ones without an id.
pub fn links_in_html(html: &str) -> Vec<LinkDescriptor> {
    let Ok(selector) = Selector::parse(POSTBACK_LINK_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .map(|anchor| LinkDescriptor {
            id: anchor.value().attr("id").unwrap_or("").to_string(),
            label: anchor.text().collect::<String>().trim().to_string(),
            raw_target: anchor.value().attr("href").unwrap_or("").to_string(),
        })
        .collect()
}

pub async fn discover_links<V: PageView + ?Sized>(page: &V) -> SurfaceResult<Vec<LinkDescriptor>> {
    let html = page.content().await?;
    let links = links_in_html(&html);
    debug!("Discovered {} postback links", links.len());
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><form id="aspnetForm">
        <a id="lnk1" href="javascript:__doPostBack('ctl00$head$lnk1','')"> Экономический </a>
        <a href="/about">About</a>
        <a href="javascript:__doPostBack('ctl00$head$lnk2','')">No id</a>
        <a id="lnk3" href="javascript:__doPostBack(&#39;ctl00$head$lnk3&#39;,&#39;sel$3&#39;)">Юридический</a>
        <a id="other" href="javascript:void(0)">Script</a>
    </form></body></html>"#;

    #[test]
    fn test_links_are_returned_in_document_order() {
        let links = links_in_html(LISTING);
        let labels: Vec<&str> = links.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["Экономический", "No id", "Юридический"]);
    }

    #[test]
    fn test_links_without_id_are_kept() {
        let links = links_in_html(LISTING);
        assert_eq!(links[1].id, "");
        assert_eq!(links[0].id, "lnk1");
    }

    #[test]
    fn test_postback_arguments_are_decoded() {
        let links = links_in_html(LISTING);
        assert_eq!(
            links[2].postback(),
            Some(("ctl00$head$lnk3".to_string(), "sel$3".to_string()))
        );
        assert_eq!(links[0].postback(), Some(("ctl00$head$lnk1".to_string(), String::new())));
    }

    #[test]
    fn test_page_without_postbacks_yields_nothing() {
        assert!(links_in_html("<html><body><a href='/x'>x</a></body></html>").is_empty());
        assert!(links_in_html("").is_empty());
    }

    #[test]
    fn test_parse_postback_href_rejects_plain_links() {
        assert_eq!(parse_postback_href("https://example.com/"), None);
        assert_eq!(
            parse_postback_href(r#"javascript:__doPostBack("a","b")"#),
            Some(("a".to_string(), "b".to_string()))
        );
    }
}
