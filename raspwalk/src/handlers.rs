use anyhow::{Context, bail};
use clap::ArgMatches;
use colored::Colorize;
use raspwalk_core::crawl::{CrawlOptions, CrawlProgressCallback, SiteResult, execute_crawl};
use raspwalk_core::report::{ReportFormat, generate_crawl_report, save_site_result};
use raspwalk_scanner::result::ScheduleResult;
use raspwalk_scanner::schedule::{LayoutMode, RecordExtractor};
use raspwalk_scanner::surface::{HttpOptions, HttpPage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

// Helper functions for crawl handler

/// Load URLs from either a file or the `--url` arguments
pub fn load_urls_from_source(
    urls: &[Url],
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(&expand_path(hosts_file_path))
    } else if !urls.is_empty() {
        Ok(urls.iter().map(|url| url.as_str().to_string()).collect())
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file, ignoring blank lines and `#` comments
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if Url::parse(line).is_ok() {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Expands a leading `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

/// `--out` names one file, so it only applies to a single start URL.
pub fn resolve_output_override(
    out: Option<&PathBuf>,
    site_count: usize,
) -> Result<Option<PathBuf>, String> {
    match out {
        Some(_) if site_count > 1 => Err(format!(
            "--out can only be used with a single start URL ({} given); use --output-dir instead",
            site_count
        )),
        Some(path) => Ok(Some(expand_path(path))),
        None => Ok(None),
    }
}

pub fn layout_from_matches(matches: &ArgMatches) -> anyhow::Result<LayoutMode> {
    match matches.get_one::<String>("layout") {
        Some(raw) => raw.parse().map_err(anyhow::Error::msg),
        None => Ok(LayoutMode::default()),
    }
}

/// Runs the record extractor over a saved page
pub fn extract_schedule(path: &Path, layout: LayoutMode) -> anyhow::Result<ScheduleResult> {
    let html = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(RecordExtractor::default().with_layout(layout).extract_html(&html))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Http,
    Browser,
}

impl Backend {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Backend::Http),
            "browser" => Some(Backend::Browser),
            _ => None,
        }
    }
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub async fn handle_crawl(sub_matches: &ArgMatches, quiet: bool) -> anyhow::Result<()> {
    let urls: Vec<Url> = sub_matches
        .get_many::<Url>("url")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let hosts_file = sub_matches.get_one::<PathBuf>("hosts-file");
    let urls = load_urls_from_source(&urls, hosts_file).map_err(anyhow::Error::msg)?;

    let out = resolve_output_override(sub_matches.get_one::<PathBuf>("out"), urls.len())
        .map_err(anyhow::Error::msg)?;
    let output_dir = expand_path(
        sub_matches
            .get_one::<PathBuf>("output-dir")
            .map(PathBuf::as_path)
            .unwrap_or(Path::new(".")),
    );
    let format = sub_matches
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Json);
    let backend = sub_matches
        .get_one::<String>("backend")
        .and_then(|b| Backend::from_str(b))
        .unwrap_or(Backend::Http);
    let insecure = sub_matches.get_flag("insecure");

    let options = CrawlOptions {
        urls,
        max_depth: *sub_matches.get_one::<usize>("max-depth").unwrap_or(&4),
        extraction_depth: *sub_matches.get_one::<usize>("extraction-depth").unwrap_or(&4),
        layout: layout_from_matches(sub_matches)?,
        navigation_timeout: Duration::from_secs(*sub_matches.get_one::<u64>("timeout").unwrap_or(&20)),
        settle_delay: Duration::from_millis(*sub_matches.get_one::<u64>("settle-ms").unwrap_or(&500)),
        deadline: sub_matches.get_one::<u64>("deadline").map(|s| Duration::from_secs(*s)),
        show_progress_bars: !quiet,
    };

    if !quiet {
        print_divider();
        println!("{} Crawling {} start URL(s)", "→".blue(), options.urls.len());
        println!("  Backend: {:?}", backend);
        println!(
            "  Depth: {} (schedules read at level {})",
            options.max_depth, options.extraction_depth
        );
        println!("  Layout: {:?}", options.layout);
        println!("  Navigation timeout: {}s", options.navigation_timeout.as_secs());
        if let Some(deadline) = options.deadline {
            println!("  Deadline: {}s per site", deadline.as_secs());
        }
        print_divider();
        println!();
    }

    let progress_callback: Option<CrawlProgressCallback> = if quiet {
        None
    } else {
        Some(Arc::new(|msg: String| {
            println!("{}", msg);
        }))
    };

    let all_results: Vec<SiteResult> = match backend {
        Backend::Http => {
            let http_options = HttpOptions {
                insecure,
                ..HttpOptions::default()
            };
            let mut page = HttpPage::with_options(&http_options)?;
            execute_crawl(options, &mut page, progress_callback, None).await?
        }
        #[cfg(feature = "browser")]
        Backend::Browser => {
            use raspwalk_scanner::surface::{BrowserOptions, BrowserPage};

            let browser_options = BrowserOptions {
                headless: !sub_matches.get_flag("headful"),
                executable: sub_matches.get_one::<PathBuf>("chrome").map(|p| expand_path(p)),
                insecure,
                ..BrowserOptions::default()
            };
            let mut page = BrowserPage::launch(&browser_options).await?;
            let results = execute_crawl(options, &mut page, progress_callback, None).await;
            page.close().await;
            results?
        }
        #[cfg(not(feature = "browser"))]
        Backend::Browser => {
            bail!("The browser backend is not available: rebuild raspwalk with `--features browser`")
        }
    };

    if !quiet {
        println!("\n{} Crawl complete!\n", "✓".green().bold());
    }

    for result in &all_results {
        if result.error.is_some() {
            continue;
        }
        let path = save_site_result(result, &output_dir, out.as_deref(), format)
            .with_context(|| format!("Failed to save result for {}", result.start_url))?;
        println!(
            "{} Saved {}",
            "✓".green().bold(),
            path.display().to_string().bright_white()
        );
    }

    print!("{}", generate_crawl_report(&all_results));

    if all_results.iter().all(|r| r.error.is_some()) {
        bail!("Every start URL failed to load");
    }
    Ok(())
}

pub fn handle_extract(sub_matches: &ArgMatches) -> anyhow::Result<()> {
    let Some(file) = sub_matches.get_one::<PathBuf>("FILE") else {
        bail!("A saved page must be provided");
    };
    let layout = layout_from_matches(sub_matches)?;
    let result = extract_schedule(&expand_path(file), layout)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
