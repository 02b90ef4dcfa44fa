//! Maintenance scheduler
//!
//! One OS thread per task, each waiting on its own tick channel and a shared
//! shutdown channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;

use crate::config::MaintenanceConfig;
use crate::engine::Engine;
use crate::error::{AllyError, Result};

use super::{MaintenanceTask, TaskReport};

/// Runs the maintenance tasks until shut down
pub struct MaintenanceScheduler {
    /// Dropping this sender disconnects every task's shutdown receiver
    shutdown_tx: Option<Sender<()>>,
    handles: Vec<(MaintenanceTask, JoinHandle<()>)>,
    /// Completed runs per task, in `MaintenanceTask::ALL` order
    runs: Arc<[AtomicU64; 4]>,
}

impl MaintenanceScheduler {
    /// Spawn every maintenance task against `engine`
    pub fn start(engine: Arc<Engine>, config: MaintenanceConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let runs: Arc<[AtomicU64; 4]> = Arc::new(Default::default());

        let mut scheduler = Self {
            shutdown_tx: Some(shutdown_tx),
            handles: Vec::with_capacity(MaintenanceTask::ALL.len()),
            runs,
        };

        for (slot, task) in MaintenanceTask::ALL.into_iter().enumerate() {
            let handle = spawn_timer_loop(
                task,
                slot,
                task.interval(&config),
                Arc::clone(&engine),
                shutdown_rx.clone(),
                Arc::clone(&scheduler.runs),
            )?;
            scheduler.handles.push((task, handle));
        }

        tracing::info!(?config, "Maintenance scheduler started");
        Ok(scheduler)
    }

    /// Number of completed runs (successful or not) of `task`
    pub fn run_count(&self, task: MaintenanceTask) -> u64 {
        let slot = MaintenanceTask::ALL
            .iter()
            .position(|t| *t == task)
            .unwrap_or_default();
        self.runs[slot].load(Ordering::SeqCst)
    }

    /// Stop every task and wait for in-flight runs to finish
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        // Disconnect: every select! sees the shutdown arm fire
        if self.shutdown_tx.take().is_none() {
            return Ok(());
        }

        let mut panicked = Vec::new();
        for (task, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked.push(task.name());
            }
        }

        if !panicked.is_empty() {
            return Err(AllyError::Storage(format!(
                "maintenance tasks panicked: {}",
                panicked.join(", ")
            )));
        }

        tracing::info!("Maintenance scheduler stopped");
        Ok(())
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "Maintenance shutdown failed");
        }
    }
}

fn spawn_timer_loop(
    task: MaintenanceTask,
    slot: usize,
    interval: std::time::Duration,
    engine: Arc<Engine>,
    shutdown_rx: Receiver<()>,
    runs: Arc<[AtomicU64; 4]>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("allykv-{}", task.name()))
        .spawn(move || {
            let ticker = channel::tick(interval);

            loop {
                select! {
                    recv(ticker) -> _ => {
                        match task.run(&engine) {
                            Ok(report) => log_report(task, report),
                            Err(e) => tracing::error!(task = task.name(), error = %e, "Task execution failed"),
                        }
                        runs[slot].fetch_add(1, Ordering::SeqCst);
                    }
                    recv(shutdown_rx) -> _ => {
                        tracing::debug!(task = task.name(), "Task shutting down");
                        break;
                    }
                }
            }
        })?;

    Ok(handle)
}

fn log_report(task: MaintenanceTask, report: TaskReport) {
    match report {
        TaskReport::Flushed(0) | TaskReport::IndexPersisted(false) => {
            tracing::trace!(task = task.name(), "Nothing to do");
        }
        TaskReport::Compacted(stats) if stats.segments_compacted == 0 => {
            tracing::trace!(task = task.name(), "Nothing to do");
        }
        report => tracing::debug!(task = task.name(), ?report, "Task finished"),
    }
}
