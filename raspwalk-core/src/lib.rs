pub mod crawl;
pub mod report;

pub use crawl::{CrawlOptions, SiteResult, execute_crawl};
pub use report::{ReportFormat, generate_crawl_report, output_file_name, save_site_result};
