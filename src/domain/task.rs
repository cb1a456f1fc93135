//! Per-task lifecycle for a batch run.
//!
//! A task is one (indicator, entity) pair. It moves forward through
//! `Pending -> DataResolved -> Evaluated -> PostProcessed -> Sunk` and may
//! stop early as `Skipped`, `Failed` or `Cancelled`.

use crate::domain::definition::IndicatorDefinition;
use crate::domain::entity::EntityType;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    DataResolved,
    Evaluated,
    PostProcessed,
    Sunk,
    Skipped,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Sunk | TaskState::Skipped | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Where in the pipeline a task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Evaluate,
    PostProcess,
    Sink,
    /// The task panicked; the stage it was in is unknown.
    Worker,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Evaluate => "evaluate",
            Stage::PostProcess => "post_process",
            Stage::Sink => "sink",
            Stage::Worker => "worker",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub definition: Arc<IndicatorDefinition>,
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl Task {
    pub fn indicator(&self) -> &str {
        &self.definition.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Failure {
    pub indicator: String,
    pub entity: String,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] at {}: {}",
            self.indicator, self.entity, self.stage, self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Rows produced (and written, unless the run is a dry run).
    Succeeded { rows: usize },
    Skipped { stage: Stage, reason: String },
    Failed(Failure),
    Cancelled,
}

/// What a worker sends back for every dequeued task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub indicator: String,
    pub entity: String,
    /// Last state reached before the outcome was decided.
    pub state: TaskState,
    pub outcome: TaskOutcome,
}

/// Tracks the state of one executing task.
#[derive(Debug)]
pub struct TaskProgress<'a> {
    task: &'a Task,
    state: TaskState,
}

impl<'a> TaskProgress<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self {
            task,
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn advance(&mut self, next: TaskState) {
        debug_assert!(!self.state.is_terminal());
        self.state = next;
    }

    pub fn failure(&self, stage: Stage, message: impl Into<String>) -> Failure {
        Failure {
            indicator: self.task.indicator().to_string(),
            entity: self.task.entity_id.clone(),
            stage,
            message: message.into(),
        }
    }

    pub fn finish(self, outcome: TaskOutcome) -> TaskReport {
        TaskReport {
            indicator: self.task.indicator().to_string(),
            entity: self.task.entity_id.clone(),
            state: self.state,
            outcome,
        }
    }
}
