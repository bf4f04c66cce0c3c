// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    expand_path, extract_schedule, load_urls_from_file, load_urls_from_source, parse_url_line,
    resolve_output_override,
};

// Re-export crawl functionality from raspwalk-core
pub use raspwalk_core::crawl::{CrawlOptions, CrawlProgressCallback, SiteResult, execute_crawl};
pub use raspwalk_core::report::generate_crawl_report;
