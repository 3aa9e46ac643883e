//! Worker events and the reporters that consume them.

use std::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
  Started { project_id: String, remaining: usize },
  Completed { project_id: String, rows: usize },
  /// 404: the project is pending deletion.
  ProjectMissing { project_id: String },
  /// 403: the compute API is not enabled for the project.
  ApiDisabled { project_id: String },
  Requeued { project_id: String, cause: RequeueCause, attempt: u32, error: String },
  Abandoned { project_id: String, attempts: u32, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueCause {
  /// Status-coded service error other than 403/404.
  ServiceStatus(u16),
  Unstructured,
}

impl WorkerEvent {
  pub fn project_id(&self) -> &str {
    match self {
      WorkerEvent::Started { project_id, .. }
      | WorkerEvent::Completed { project_id, .. }
      | WorkerEvent::ProjectMissing { project_id }
      | WorkerEvent::ApiDisabled { project_id }
      | WorkerEvent::Requeued { project_id, .. }
      | WorkerEvent::Abandoned { project_id, .. } => project_id,
    }
  }
}

pub trait EventReporter: Send + Sync {
  fn report(&self, event: &WorkerEvent);
}

/// Emits events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
  fn report(&self, event: &WorkerEvent) {
    match event {
      WorkerEvent::Started { project_id, remaining } => {
        info!(project_id = %project_id, remaining, "Processing initial vm inventory for project");
      }
      WorkerEvent::Completed { project_id, rows } => {
        info!(project_id = %project_id, rows, "Project inventory committed");
      }
      WorkerEvent::ProjectMissing { project_id } => {
        debug!(project_id = %project_id, "Project does not exist. Ignoring project");
      }
      WorkerEvent::ApiDisabled { project_id } => {
        debug!(project_id = %project_id, "Compute API not activated for project. Ignoring project");
      }
      WorkerEvent::Requeued { project_id, cause: RequeueCause::ServiceStatus(code), attempt, error } => {
        error!(project_id = %project_id, status = code, attempt, error = %error, "Error while processing project. Putting project back in queue");
      }
      WorkerEvent::Requeued { project_id, cause: RequeueCause::Unstructured, attempt, error } => {
        warn!(project_id = %project_id, attempt, error = %error, "Error while processing project. Putting project back in queue");
      }
      WorkerEvent::Abandoned { project_id, attempts, error } => {
        error!(project_id = %project_id, attempts, error = %error, "Error while processing project. Ignoring project");
      }
    }
  }
}

/// Keeps every event in memory. Meant for tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
  events: Mutex<Vec<WorkerEvent>>,
}

impl MemoryReporter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<WorkerEvent> {
    self.events.lock().map(|events| events.clone()).unwrap_or_default()
  }

  pub fn events_for(&self, project_id: &str) -> Vec<WorkerEvent> {
    self
      .events()
      .into_iter()
      .filter(|event| event.project_id() == project_id)
      .collect()
  }
}

impl EventReporter for MemoryReporter {
  fn report(&self, event: &WorkerEvent) {
    if let Ok(mut events) = self.events.lock() {
      events.push(event.clone());
    }
  }
}
