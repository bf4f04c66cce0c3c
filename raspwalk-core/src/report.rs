// Result sink: file naming, serialization and the textual summary

use crate::crawl::SiteResult;
use raspwalk_scanner::result::{RecoveryOutcome, ScheduleStatus, flatten};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
        }
    }
}

/// Totals across a set of site results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub sites: usize,
    pub failed_sites: usize,
    pub nodes: usize,
    pub schedules_found: usize,
    pub schedules_absent: usize,
    pub parse_errors: usize,
    pub lessons: usize,
    pub timed_out_navigations: usize,
    pub fallbacks: usize,
    pub failed_recoveries: usize,
}

pub fn summarize(results: &[SiteResult]) -> CrawlSummary {
    let mut summary = CrawlSummary {
        sites: results.len(),
        failed_sites: results.iter().filter(|r| r.error.is_some()).count(),
        ..CrawlSummary::default()
    };

    for node in results.iter().flat_map(|r| flatten(&r.nodes)) {
        summary.nodes += 1;
        summary.lessons += node.lesson_count();
        if node.navigation.timed_out() {
            summary.timed_out_navigations += 1;
        }
        match node.recovery {
            RecoveryOutcome::Restored => {}
            RecoveryOutcome::FellBackToRoot => summary.fallbacks += 1,
            RecoveryOutcome::Failed => summary.failed_recoveries += 1,
        }
        match node.schedule.as_ref().map(|s| s.message()) {
            Some(ScheduleStatus::Found) => summary.schedules_found += 1,
            Some(ScheduleStatus::Absent) => summary.schedules_absent += 1,
            Some(ScheduleStatus::ParseError) => summary.parse_errors += 1,
            None => {}
        }
    }

    summary
}

/// Default output file for a start URL: `parsed_data_tr1.json` for
/// `...?tr=1`, otherwise named after the host.
pub fn output_file_name(start_url: &str, format: ReportFormat) -> String {
    let ext = format.extension();
    let Ok(url) = Url::parse(start_url) else {
        return format!("parsed_data.{}", ext);
    };

    let tr = url
        .query_pairs()
        .find(|(key, _)| key == "tr")
        .map(|(_, value)| sanitize_component(&value))
        .filter(|value| !value.is_empty());
    if let Some(tr) = tr {
        return format!("parsed_data_tr{}.{}", tr, ext);
    }

    match url.host_str() {
        Some(host) => format!("parsed_data_{}.{}", sanitize_component(host), ext),
        None => format!("parsed_data.{}", ext),
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

pub fn render_site(result: &SiteResult, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(result),
        ReportFormat::Text => Ok(generate_crawl_report(std::slice::from_ref(result))),
    }
}

/// Writes one site's result to `path`, or to its default name under `dir`.
pub fn save_site_result(
    result: &SiteResult,
    dir: &Path,
    path: Option<&Path>,
    format: ReportFormat,
) -> std::io::Result<PathBuf> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => dir.join(output_file_name(&result.start_url, format)),
    };
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let content = render_site(result, format).map_err(std::io::Error::other)?;
    save_report(&content, &target)?;
    Ok(target)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Generate a crawl report from results
pub fn generate_crawl_report(results: &[SiteResult]) -> String {
    let summary = summarize(results);

    let mut report = String::new();
    report.push_str(RULE);
    report.push('\n');
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Sites crawled: {}\n", summary.sites));
    if summary.failed_sites > 0 {
        report.push_str(&format!("  Sites failed: {}\n", summary.failed_sites));
    }
    report.push_str(&format!("  Pages visited: {}\n", summary.nodes));
    report.push_str(&format!("  Schedules found: {}\n", summary.schedules_found));
    report.push_str(&format!("  Schedules absent: {}\n", summary.schedules_absent));
    report.push_str(&format!("  Parse errors: {}\n", summary.parse_errors));
    report.push_str(&format!("  Total lessons: {}\n", summary.lessons));
    report.push_str(&format!("  Timed-out navigations: {}\n", summary.timed_out_navigations));
    report.push_str(&format!(
        "  Recovery fallbacks: {} ({} failed)\n",
        summary.fallbacks, summary.failed_recoveries
    ));
    report.push('\n');
    report.push_str(RULE);
    report.push('\n');

    for result in results {
        report.push_str(&format!("## {}\n", result.start_url));
        if let Some(ref error) = result.error {
            report.push_str(&format!("  [!] {}\n\n", error));
            continue;
        }
        let duration = result.finished_at - result.started_at;
        report.push_str(&format!(
            "  {} pages in {}s\n\n",
            flatten(&result.nodes).len(),
            duration.num_seconds()
        ));

        for (index, node) in flatten(&result.nodes).iter().enumerate() {
            let mut line = format!(
                "  {}. [Level {}] {} -> {}",
                index + 1,
                node.depth,
                node.clicked_label,
                node.landed_url
            );
            match node.schedule.as_ref().map(|s| s.message()) {
                Some(ScheduleStatus::Found) => {
                    line.push_str(&format!(" ({} lessons)", node.lesson_count()))
                }
                Some(ScheduleStatus::Absent) => line.push_str(" (no schedule)"),
                Some(ScheduleStatus::ParseError) => line.push_str(" (parse error)"),
                None => {}
            }
            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
    }

    report
}
