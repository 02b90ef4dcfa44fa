//! Maintenance Module
//!
//! Periodic background work that moves data from memory to disk and
//! reclaims space:
//!
//! | Task          | Default interval | Effect                                   |
//! |---------------|------------------|------------------------------------------|
//! | flush-new     | 5s               | write buffer → active segment + index    |
//! | flush-edits   | 10s              | edit buffer → active segment, mark dirty |
//! | persist-index | 15s              | index snapshot → `index.idx`             |
//! | compact       | 30s              | rewrite dirty segments                   |
//!
//! Each task runs on its own thread and interval. There is no ordering
//! between tasks beyond the engine's exclusive section.

mod scheduler;
mod task;

pub use scheduler::MaintenanceScheduler;
pub use task::{MaintenanceTask, TaskReport};
