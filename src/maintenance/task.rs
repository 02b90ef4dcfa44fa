//! Maintenance tasks

use std::fmt;
use std::time::Duration;

use crate::config::MaintenanceConfig;
use crate::engine::{CompactionStats, Engine};
use crate::error::Result;

/// One of the four periodic maintenance jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceTask {
    FlushNew,
    FlushEdits,
    PersistIndex,
    Compact,
}

/// What a single run accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskReport {
    Flushed(usize),
    IndexPersisted(bool),
    Compacted(CompactionStats),
}

impl MaintenanceTask {
    pub const ALL: [MaintenanceTask; 4] = [
        MaintenanceTask::FlushNew,
        MaintenanceTask::FlushEdits,
        MaintenanceTask::PersistIndex,
        MaintenanceTask::Compact,
    ];

    /// Task name for logging and thread names
    pub fn name(self) -> &'static str {
        match self {
            MaintenanceTask::FlushNew => "flush-new",
            MaintenanceTask::FlushEdits => "flush-edits",
            MaintenanceTask::PersistIndex => "persist-index",
            MaintenanceTask::Compact => "compact",
        }
    }

    /// How often this task runs
    pub fn interval(self, config: &MaintenanceConfig) -> Duration {
        match self {
            MaintenanceTask::FlushNew => config.flush_new_interval,
            MaintenanceTask::FlushEdits => config.flush_edits_interval,
            MaintenanceTask::PersistIndex => config.persist_index_interval,
            MaintenanceTask::Compact => config.compaction_interval,
        }
    }

    /// Run the task once against `engine`
    pub fn run(self, engine: &Engine) -> Result<TaskReport> {
        match self {
            MaintenanceTask::FlushNew => engine.flush_new().map(TaskReport::Flushed),
            MaintenanceTask::FlushEdits => engine.flush_edits().map(TaskReport::Flushed),
            MaintenanceTask::PersistIndex => engine.persist_index().map(TaskReport::IndexPersisted),
            MaintenanceTask::Compact => engine.compact().map(TaskReport::Compacted),
        }
    }
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
