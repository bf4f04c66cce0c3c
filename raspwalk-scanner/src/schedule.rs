//! Conversion of a leaf page's schedule tables into [`ScheduleRecord`]s.

use crate::result::{ScheduleRecord, ScheduleResult, WeekParity, WeekScope};
use crate::surface::PageView;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, warn};

static LEADING_NUMERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)").ok());
static START_TIME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}:\d{2})\b").ok());
static TRAILING_ROOM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+)\s+(\d{1,3})$").ok());
static GROUP_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"[А-Яа-яЁёA-Za-z]+\s*-\s*[А-Яа-яЁёA-Za-z0-9]+").ok()
});

/// Whether lesson text embeds audience groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// One audience per table; group names, if any, stay in the text.
    #[default]
    Single,
    /// Several groups per row. Group tokens are lifted into
    /// [`ScheduleRecord::groups`] and a second `span` carries the room.
    MultiGroup,
}

impl std::str::FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(LayoutMode::Single),
            "multi-group" | "multi" => Ok(LayoutMode::MultiGroup),
            _ => Err(format!("Unknown layout: {}", s)),
        }
    }
}

/// Markup conventions of the target site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    pub absence_selector: String,
    pub absence_marker: String,
    pub table_selector: String,
    pub row_selector: String,
    pub day_row_class: String,
    pub slot_cell_selector: String,
    pub content_cell_selector: String,
    pub instructor_selector: String,
    pub numerator_marker: String,
    pub denominator_marker: String,
    pub special_venue: String,
    /// Containers splitting the page into this week's and next week's tables.
    pub current_week_selector: String,
    pub next_week_selector: String,
    pub layout: LayoutMode,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            absence_selector: "#ctl00_head_Label1".to_string(),
            absence_marker: "Расписание отсутствует".to_string(),
            table_selector: "table.tbl_day".to_string(),
            row_selector: "tr".to_string(),
            day_row_class: "day".to_string(),
            slot_cell_selector: "td.num_para".to_string(),
            content_cell_selector: "td.para".to_string(),
            instructor_selector: "input.fioprep, input.fioprep_hight".to_string(),
            numerator_marker: "Числ.".to_string(),
            denominator_marker: "Знам.".to_string(),
            special_venue: "ДСП \"Спартак\"".to_string(),
            current_week_selector: "#tbl_page1".to_string(),
            next_week_selector: "#tbl_page2".to_string(),
            layout: LayoutMode::Single,
        }
    }
}

struct Selectors {
    absence: Selector,
    current_week: Selector,
    next_week: Selector,
    table: Selector,
    row: Selector,
    first_cell: Selector,
    slot: Selector,
    content: Selector,
    span: Selector,
    instructor: Selector,
}

impl Selectors {
    fn compile(config: &ExtractorConfig) -> Option<Self> {
        let parse = |css: &str| match Selector::parse(css) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!("Invalid extractor selector {:?}: {}", css, e);
                None
            }
        };
        Some(Self {
            absence: parse(&config.absence_selector)?,
            current_week: parse(&config.current_week_selector)?,
            next_week: parse(&config.next_week_selector)?,
            table: parse(&config.table_selector)?,
            row: parse(&config.row_selector)?,
            first_cell: parse("td")?,
            slot: parse(&config.slot_cell_selector)?,
            content: parse(&config.content_cell_selector)?,
            span: parse("span")?,
            instructor: parse(&config.instructor_selector)?,
        })
    }
}

/// Line structure of a content cell.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContentShape {
    Empty,
    Single(String),
    Multi { subject: String, remainder: String },
}

impl ContentShape {
    fn from_lines(mut lines: Vec<String>) -> Self {
        match lines.len() {
            0 => ContentShape::Empty,
            1 => ContentShape::Single(lines.remove(0)),
            _ => {
                let subject = lines.remove(0);
                ContentShape::Multi {
                    subject,
                    remainder: lines.join(" "),
                }
            }
        }
    }
}

/// How the venue is expressed at the end of the remainder text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VenueShape {
    Special { before: String },
    TrailingNumeral { before: String, room: String },
    Plain,
}

impl VenueShape {
    fn classify(remainder: &str, special_venue: &str) -> Self {
        if !special_venue.is_empty() {
            if let Some(idx) = remainder.find(special_venue) {
                return VenueShape::Special {
                    before: remainder[..idx].to_string(),
                };
            }
        }
        let Some(re) = TRAILING_ROOM.as_ref() else {
            return VenueShape::Plain;
        };
        match re.captures(remainder) {
            Some(caps) => VenueShape::TrailingNumeral {
                before: caps[1].to_string(),
                room: caps[2].to_string(),
            },
            None => VenueShape::Plain,
        }
    }
}

/// Fields decided by the content cell alone.
#[derive(Debug, Default, PartialEq, Eq)]
struct Decomposed {
    subject: String,
    session_type: String,
    room: String,
    groups: Vec<String>,
}

/// Keeps letters and whitespace, collapsing runs of whitespace.
pub fn sanitize_session_type(raw: &str) -> String {
    let letters: String = raw
        .chars()
        .map(|c| if c.is_alphabetic() || c.is_whitespace() { c } else { ' ' })
        .collect();
    collapse_whitespace(&letters)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lifts group tokens out of `text`, returning them deduplicated in
/// first-seen order along with the text with the tokens removed.
pub fn extract_groups(text: &str) -> (Vec<String>, String) {
    let Some(re) = GROUP_TOKEN.as_ref() else {
        return (Vec::new(), text.to_string());
    };

    let mut groups: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let token = m.as_str().trim().to_string();
        if !groups.contains(&token) {
            groups.push(token);
        }
    }

    let mut rest = text.to_string();
    for group in &groups {
        let pattern = format!(r"\s*,?\s*{}\s*,?", regex::escape(group));
        if let Ok(strip) = RegexBuilder::new(&pattern).case_insensitive(true).build() {
            rest = strip.replace_all(&rest, " ").trim().to_string();
        }
    }

    (groups, collapse_whitespace(&rest))
}

/// Visible text of `cell` split on `<br>` boundaries, whitespace collapsed,
/// blank lines dropped.
fn cell_lines(cell: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for node in cell.descendants() {
        match node.value() {
            Node::Text(text) => current.push_str(text),
            Node::Element(el) if el.name().eq_ignore_ascii_case("br") => {
                lines.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }
    lines.push(current);

    lines
        .iter()
        .map(|line| collapse_whitespace(line))
        .filter(|line| !line.is_empty())
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn week_parity(slot_text: &str, config: &ExtractorConfig) -> WeekParity {
    if slot_text.contains(&config.numerator_marker) {
        WeekParity::Numerator
    } else if slot_text.contains(&config.denominator_marker) {
        WeekParity::Denominator
    } else {
        WeekParity::Both
    }
}

fn capture_first(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    let re = re.as_ref()?;
    re.captures(text).map(|caps| caps[1].to_string())
}

/// Reads schedule records off a leaf page.
#[derive(Debug, Clone, Default)]
pub struct RecordExtractor {
    config: ExtractorConfig,
}

impl RecordExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn with_layout(mut self, layout: LayoutMode) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub async fn extract<V: PageView + ?Sized>(&self, page: &V) -> ScheduleResult {
        match page.content().await {
            Ok(html) => self.extract_html(&html),
            Err(e) => {
                warn!("Could not read page content for extraction: {}", e);
                ScheduleResult::parse_error()
            }
        }
    }

    pub fn extract_html(&self, html: &str) -> ScheduleResult {
        let Some(selectors) = Selectors::compile(&self.config) else {
            return ScheduleResult::parse_error();
        };
        let document = Html::parse_document(html);

        let absent = document
            .select(&selectors.absence)
            .next()
            .map(|label| element_text(label).contains(&self.config.absence_marker))
            .unwrap_or(false);
        if absent {
            debug!("Absence marker present");
            return ScheduleResult::absent();
        }

        let current = document.select(&selectors.current_week).next();
        let next = document.select(&selectors.next_week).next();

        let mut records = Vec::new();
        if current.is_none() && next.is_none() {
            for table in document.select(&selectors.table) {
                self.read_table(table, None, &selectors, &mut records);
            }
        } else {
            // Only tables inside a week container are read.
            let weeks = [(WeekScope::Current, current), (WeekScope::Next, next)];
            for (week, container) in weeks {
                let Some(container) = container else {
                    continue;
                };
                for table in container.select(&selectors.table) {
                    self.read_table(table, Some(week), &selectors, &mut records);
                }
            }
        }

        debug!("Extracted {} lessons", records.len());
        ScheduleResult::found(records)
    }

    /// The day header resets per table.
    fn read_table(
        &self,
        table: ElementRef<'_>,
        week: Option<WeekScope>,
        selectors: &Selectors,
        records: &mut Vec<ScheduleRecord>,
    ) {
        let mut current_day = String::new();
        for row in table.select(&selectors.row) {
            if row.value().classes().any(|c| c == self.config.day_row_class) {
                current_day = row
                    .select(&selectors.first_cell)
                    .next()
                    .map(element_text)
                    .unwrap_or_else(|| element_text(row));
                continue;
            }
            if let Some(mut record) = self.lesson_row(row, &current_day, selectors) {
                record.week = week;
                records.push(record);
            }
        }
    }

    fn lesson_row(
        &self,
        row: ElementRef<'_>,
        day: &str,
        selectors: &Selectors,
    ) -> Option<ScheduleRecord> {
        let slot = row.select(&selectors.slot).next()?;
        let content = row.select(&selectors.content).next()?;

        let slot_text = cell_lines(slot).join(" ");
        let mut spans = content.select(&selectors.span);
        let primary = spans.next();
        let secondary_room = spans.next().map(element_text).unwrap_or_default();

        let lines = cell_lines(primary.unwrap_or(content));
        let decomposed = self.decompose(ContentShape::from_lines(lines), secondary_room)?;

        let instructor = row
            .select(&selectors.instructor)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        Some(ScheduleRecord {
            day: day.to_string(),
            week_parity: week_parity(&slot_text, &self.config),
            slot_index: capture_first(&LEADING_NUMERAL, &slot_text).unwrap_or_default(),
            start_time: capture_first(&START_TIME, &slot_text),
            subject: decomposed.subject,
            session_type: decomposed.session_type,
            room: decomposed.room,
            instructor,
            groups: decomposed.groups,
            week: None,
        })
    }

    /// One rule per `ContentShape` x `VenueShape` combination. `None` means
    /// the row carries no lesson.
    fn decompose(&self, shape: ContentShape, secondary_room: String) -> Option<Decomposed> {
        let multi_group = self.config.layout == LayoutMode::MultiGroup;

        let mut out = match shape {
            ContentShape::Empty => return None,
            ContentShape::Single(subject) => Decomposed {
                subject,
                ..Decomposed::default()
            },
            ContentShape::Multi { subject, remainder } => {
                let (groups, remainder) = if multi_group {
                    extract_groups(&remainder)
                } else {
                    (Vec::new(), collapse_whitespace(&remainder))
                };

                let (session_type, room) =
                    match VenueShape::classify(&remainder, &self.config.special_venue) {
                        VenueShape::Special { before } => {
                            (sanitize_session_type(&before), self.config.special_venue.clone())
                        }
                        VenueShape::TrailingNumeral { before, room } => {
                            (sanitize_session_type(&before), room)
                        }
                        VenueShape::Plain => (sanitize_session_type(&remainder), String::new()),
                    };

                Decomposed {
                    subject,
                    session_type,
                    room,
                    groups,
                }
            }
        };

        if multi_group && !secondary_room.is_empty() {
            out.room = secondary_room;
        }
        Some(out)
    }
}
