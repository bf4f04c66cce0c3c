use serde::Serialize;

/// How a click, back-step, reload or navigate resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    Completed,
    /// The wait expired; the caller reads whatever state the tab is in.
    /// Partial postbacks often finish without a navigation event.
    TimedOutButContinuing,
}

impl NavigationOutcome {
    pub fn timed_out(&self) -> bool {
        matches!(self, NavigationOutcome::TimedOutButContinuing)
    }
}

/// What the recovery policy managed after a link was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// History-back worked and the originating link is present again.
    Restored,
    /// History-back failed; the branch root was loaded instead.
    FellBackToRoot,
    /// Even the fallback navigation failed. Traversal continues regardless.
    Failed,
}

impl RecoveryOutcome {
    pub fn is_healthy(&self) -> bool {
        !matches!(self, RecoveryOutcome::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekParity {
    Numerator,
    Denominator,
    Both,
}

/// Which week tab a record was read from, on pages that split them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekScope {
    Current,
    Next,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub day: String,
    pub week_parity: WeekParity,
    /// Bare ordinal of the time slot ("1", "4"), never the suffix text.
    pub slot_index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    pub subject: String,
    pub session_type: String,
    pub room: String,
    pub instructor: String,
    /// Unique, in first-seen order. Empty unless the layout embeds groups.
    pub groups: Vec<String>,
    /// `None` when the page has a single undivided timetable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<WeekScope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Found,
    Absent,
    ParseError,
}

/// Outcome of reading one leaf page.
///
/// Fields are private so that a result without a schedule can never carry
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResult {
    has_schedule: bool,
    message: ScheduleStatus,
    records: Vec<ScheduleRecord>,
}

impl ScheduleResult {
    pub fn found(records: Vec<ScheduleRecord>) -> Self {
        Self {
            has_schedule: true,
            message: ScheduleStatus::Found,
            records,
        }
    }

    pub fn absent() -> Self {
        Self {
            has_schedule: false,
            message: ScheduleStatus::Absent,
            records: Vec::new(),
        }
    }

    pub fn parse_error() -> Self {
        Self {
            has_schedule: false,
            message: ScheduleStatus::ParseError,
            records: Vec::new(),
        }
    }

    pub fn has_schedule(&self) -> bool {
        self.has_schedule
    }

    pub fn message(&self) -> ScheduleStatus {
        self.message
    }

    pub fn records(&self) -> &[ScheduleRecord] {
        &self.records
    }

    pub fn week_records(&self, week: WeekScope) -> impl Iterator<Item = &ScheduleRecord> {
        self.records.iter().filter(move |r| r.week == Some(week))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationNode {
    pub depth: usize,
    pub source_url: String,
    pub clicked_label: String,
    pub landed_url: String,
    pub navigation: NavigationOutcome,
    pub recovery: RecoveryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavigationNode>,
}

impl NavigationNode {
    pub fn lesson_count(&self) -> usize {
        self.schedule.as_ref().map(|s| s.records().len()).unwrap_or(0)
    }
}

/// Pre-order view of a result tree: each node followed by its descendants.
pub fn flatten(nodes: &[NavigationNode]) -> Vec<&NavigationNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&NavigationNode> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Without an id the element cannot be found again after navigating.
    EmptyIdentifier,
    /// The element was absent before and after a reload.
    ElementMissing,
}

/// Per-link result of one engine step.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Visited(NavigationNode),
    Skipped(SkipReason),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(depth: usize, label: &str, children: Vec<NavigationNode>) -> NavigationNode {
        NavigationNode {
            depth,
            source_url: "http://site/".to_string(),
            clicked_label: label.to_string(),
            landed_url: "http://site/".to_string(),
            navigation: NavigationOutcome::Completed,
            recovery: RecoveryOutcome::Restored,
            schedule: None,
            children,
        }
    }

    #[test]
    fn test_empty_results_carry_no_records() {
        assert!(ScheduleResult::absent().records().is_empty());
        assert!(ScheduleResult::parse_error().records().is_empty());
        assert!(!ScheduleResult::absent().has_schedule());
        assert_eq!(ScheduleResult::parse_error().message(), ScheduleStatus::ParseError);
    }

    #[test]
    fn test_flatten_is_pre_order() {
        let tree = vec![
            node(0, "a", vec![node(1, "a1", vec![node(2, "a1x", vec![])]), node(1, "a2", vec![])]),
            node(0, "b", vec![]),
        ];
        let labels: Vec<&str> = flatten(&tree).iter().map(|n| n.clicked_label.as_str()).collect();
        assert_eq!(labels, vec!["a", "a1", "a1x", "a2", "b"]);
    }

    #[test]
    fn test_node_serializes_camel_case_and_hides_empty_children() {
        let json = serde_json::to_value(node(3, "group", vec![])).unwrap();
        assert_eq!(json["clickedLabel"], "group");
        assert_eq!(json["navigation"], "completed");
        assert!(json.get("children").is_none());
        assert!(json.get("schedule").is_none());
    }

    #[test]
    fn test_recovery_health() {
        assert!(RecoveryOutcome::Restored.is_healthy());
        assert!(RecoveryOutcome::FellBackToRoot.is_healthy());
        assert!(!RecoveryOutcome::Failed.is_healthy());
    }
}
