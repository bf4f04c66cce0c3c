use crate::result::{ScheduleStatus, SkipReason};
use serde::Serialize;
use std::sync::Arc;

/// Progress notifications emitted while a traversal runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraversalEvent {
    BranchEntered { depth: usize, url: String, links: usize },
    BranchExited { depth: usize, nodes: usize },
    LinkSkipped { depth: usize, label: String, reason: SkipReason },
    LinkFailed { depth: usize, label: String, reason: String },
    NavigationTimedOut { depth: usize, label: String, url: String },
    ScheduleExtracted { depth: usize, label: String, status: ScheduleStatus, lessons: usize },
    RecoveryFellBack { depth: usize, url: String },
    RecoveryFailed { depth: usize, url: String },
    DeadlineReached { depth: usize },
}

pub type EventCallback = Arc<dyn Fn(&TraversalEvent) + Send + Sync>;
