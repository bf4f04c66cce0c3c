use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

fn layout_arg() -> clap::Arg {
    arg!(-l --"layout" <LAYOUT>)
        .required(false)
        .help("Table layout: 'single' keeps groups inline, 'multi-group' lifts them into a list")
        .value_parser(["single", "multi-group"])
        .default_value("single")
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("raspwalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("raspwalk")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress progress and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log every DOM step")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("crawl")
                .about(
                    "Walk a timetable site through its postback links and collect every \
                schedule found along the way.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("A start URL to crawl (repeatable)")
                        .value_parser(clap::value_parser!(Url))
                        .action(clap::ArgAction::Append)
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of start URLs")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(-d --"max-depth" <DEPTH>)
                        .required(false)
                        .help("Deepest level to descend into, counted from 0")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(-e --"extraction-depth" <DEPTH>)
                        .required(false)
                        .help("Level at which pages are parsed as schedules")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                )
                .arg(layout_arg())
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Navigation timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("20"),
                )
                .arg(
                    arg!(--"settle-ms" <MILLIS>)
                        .required(false)
                        .help("Pause after each click before reading the page")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("500"),
                )
                .arg(
                    arg!(--"deadline" <SECONDS>)
                        .required(false)
                        .help("Stop each site's traversal after this many seconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-b --"backend" <BACKEND>)
                        .required(false)
                        .help("Page backend: 'http' posts back directly, 'browser' drives Chromium")
                        .value_parser(["http", "browser"])
                        .default_value("http"),
                )
                .arg(
                    arg!(--"headful")
                        .required(false)
                        .help("Show the browser window (browser backend only)")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"chrome" <PATH>)
                        .required(false)
                        .help("Chrome/Chromium executable (browser backend only)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-k --"insecure")
                        .required(false)
                        .help("Accept invalid TLS certificates")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-O --"output-dir" <DIR>)
                        .required(false)
                        .help("Directory for per-site result files")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .default_value("."),
                )
                .arg(
                    arg!(-o --"out" <PATH>)
                        .required(false)
                        .help("Explicit result file (single start URL only)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Result file format: json, text")
                        .value_parser(["json", "text"])
                        .default_value("json"),
                ),
        )
        .subcommand(
            command!("extract")
                .about("Parse a saved schedule page and print its records as JSON")
                .arg(
                    arg!(<FILE>)
                        .required(true)
                        .help("Saved HTML page")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(layout_arg()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_accepts_repeated_urls() {
        let matches = command_argument_builder()
            .try_get_matches_from([
                "raspwalk",
                "crawl",
                "-u",
                "http://rasp.test/?tr=1",
                "-u",
                "http://rasp.test/?tr=2",
            ])
            .unwrap();
        let (_, crawl) = matches.subcommand().unwrap();
        let urls: Vec<&Url> = crawl.get_many::<Url>("url").unwrap().collect();
        assert_eq!(urls.len(), 2);
        assert_eq!(crawl.get_one::<usize>("max-depth"), Some(&4));
        assert_eq!(crawl.get_one::<String>("backend").map(String::as_str), Some("http"));
    }

    #[test]
    fn test_url_conflicts_with_hosts_file() {
        let result = command_argument_builder().try_get_matches_from([
            "raspwalk",
            "crawl",
            "-u",
            "http://rasp.test/",
            "-H",
            "hosts.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_rejects_unknown_layout() {
        let result = command_argument_builder().try_get_matches_from([
            "raspwalk", "extract", "page.html", "--layout", "grid",
        ]);
        assert!(result.is_err());
    }
}
