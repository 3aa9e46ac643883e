//! The project inventory worker.
//!
//! A worker drains the shared [`WorkQueue`], lists each project's instances,
//! converts them to [`InventoryRow`]s and commits one [`RowBatch`] per project.
//! Failed projects are dropped, requeued at the tail, or abandoned once they
//! have failed `max_retries` times.

use std::collections::HashMap;
use std::sync::Arc;
use crate::compute::InstanceSource;
use crate::error::ProcessError;
use crate::events::{EventReporter, RequeueCause, WorkerEvent};
use crate::models::{InventoryRow, Project, RowBatch, convert_to_row};
use crate::sink::RowSink;
use crate::work_queue::WorkQueue;

pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
  /// Failures without a status code a project may accumulate before it is abandoned.
  pub max_retries: u32,
  /// Ceiling for status-coded service errors. `None` requeues them forever.
  pub status_retry_limit: Option<u32>,
}

impl Default for WorkerSettings {
  fn default() -> Self {
    Self {
      max_retries: MAX_RETRIES,
      status_retry_limit: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  NotFound,
  Forbidden,
  OtherStatus(u16),
  Unstructured,
}

pub fn classify(error: &ProcessError) -> FailureClass {
  match error.status() {
    Some(404) => FailureClass::NotFound,
    Some(403) => FailureClass::Forbidden,
    Some(code) => FailureClass::OtherStatus(code),
    None => FailureClass::Unstructured,
  }
}

/// Failure counts keyed by project id. Only grows for the lifetime of a worker.
#[derive(Debug, Default)]
pub struct RetryLedger {
  counts: HashMap<String, u32>,
}

impl RetryLedger {
  pub fn record(&mut self, project_id: &str) -> u32 {
    let count = self.counts.entry(project_id.to_string()).or_insert(0);
    *count += 1;
    *count
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub completed: usize,
  pub rows: usize,
  pub missing: usize,
  pub api_disabled: usize,
  pub requeued: usize,
  pub abandoned: usize,
}

impl RunSummary {
  pub fn merge(&mut self, other: RunSummary) {
    self.completed += other.completed;
    self.rows += other.rows;
    self.missing += other.missing;
    self.api_disabled += other.api_disabled;
    self.requeued += other.requeued;
    self.abandoned += other.abandoned;
  }
}

pub struct InventoryWorker {
  queue: Arc<WorkQueue>,
  source: Arc<dyn InstanceSource>,
  sink: Arc<dyn RowSink>,
  reporter: Arc<dyn EventReporter>,
  settings: WorkerSettings,
  retries: RetryLedger,
  status_retries: RetryLedger,
}

impl InventoryWorker {
  pub fn new(
    queue: Arc<WorkQueue>,
    source: Arc<dyn InstanceSource>,
    sink: Arc<dyn RowSink>,
    reporter: Arc<dyn EventReporter>,
    settings: WorkerSettings,
  ) -> Self {
    Self {
      queue,
      source,
      sink,
      reporter,
      settings,
      retries: RetryLedger::default(),
      status_retries: RetryLedger::default(),
    }
  }

  /// Runs until the queue is observed empty. Never fails; every outcome is reported as an event.
  pub async fn run(mut self) -> RunSummary {
    let mut summary = RunSummary::default();

    while let Some((project, remaining)) = self.queue.poll().await {
      self.reporter.report(&WorkerEvent::Started {
        project_id: project.project_id.clone(),
        remaining,
      });

      match self.process(&project).await {
        Ok(rows) => {
          summary.completed += 1;
          summary.rows += rows;
          self.reporter.report(&WorkerEvent::Completed {
            project_id: project.project_id.clone(),
            rows,
          });
        }
        Err(error) => self.handle_failure(project, error, &mut summary).await,
      }
    }

    summary
  }

  async fn process(&self, project: &Project) -> Result<usize, ProcessError> {
    let instances = self.source.list_instances(project).await?;
    let rows = instances
      .iter()
      .map(convert_to_row)
      .collect::<Result<Vec<InventoryRow>, _>>()?;
    let count = rows.len();

    self
      .sink
      .commit(RowBatch {
        project_id: project.project_id.clone(),
        rows,
      })
      .await?;
    Ok(count)
  }

  async fn handle_failure(&mut self, project: Project, error: ProcessError, summary: &mut RunSummary) {
    let project_id = project.project_id.clone();

    match classify(&error) {
      FailureClass::NotFound => {
        summary.missing += 1;
        self.reporter.report(&WorkerEvent::ProjectMissing { project_id });
      }
      FailureClass::Forbidden => {
        summary.api_disabled += 1;
        self.reporter.report(&WorkerEvent::ApiDisabled { project_id });
      }
      FailureClass::OtherStatus(code) => {
        let attempt = self.status_retries.record(&project_id);
        match self.settings.status_retry_limit {
          Some(limit) if attempt >= limit => self.abandon(project_id, attempt, &error, summary),
          _ => self.requeue(project, RequeueCause::ServiceStatus(code), attempt, &error, summary).await,
        }
      }
      FailureClass::Unstructured => {
        let attempt = self.retries.record(&project_id);
        if attempt < self.settings.max_retries {
          self.requeue(project, RequeueCause::Unstructured, attempt, &error, summary).await;
        } else {
          self.abandon(project_id, attempt, &error, summary);
        }
      }
    }
  }

  async fn requeue(
    &self,
    project: Project,
    cause: RequeueCause,
    attempt: u32,
    error: &ProcessError,
    summary: &mut RunSummary,
  ) {
    summary.requeued += 1;
    self.reporter.report(&WorkerEvent::Requeued {
      project_id: project.project_id.clone(),
      cause,
      attempt,
      error: error.to_string(),
    });
    self.queue.push(project).await;
  }

  fn abandon(&self, project_id: String, attempts: u32, error: &ProcessError, summary: &mut RunSummary) {
    summary.abandoned += 1;
    self.reporter.report(&WorkerEvent::Abandoned {
      project_id,
      attempts,
      error: error.to_string(),
    });
  }
}
