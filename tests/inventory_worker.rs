use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use vm_inventory::compute::InstanceSource;
use vm_inventory::error::ServiceError;
use vm_inventory::events::{MemoryReporter, RequeueCause, WorkerEvent};
use vm_inventory::models::{Instance, Project, RowBatch};
use vm_inventory::producer::{InventoryWorker, RunSummary, WorkerSettings};
use vm_inventory::sink::ChannelSink;
use vm_inventory::work_queue::WorkQueue;

enum Reply {
  Instances(Vec<Instance>),
  Status(u16),
  Broken,
}

/// Answers each project's calls from a script, in order. An exhausted script answers with no instances.
#[derive(Default)]
struct ScriptedSource {
  script: Mutex<HashMap<String, VecDeque<Reply>>>,
  calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
  fn with(mut self, project_id: &str, replies: Vec<Reply>) -> Self {
    self.script.get_mut().unwrap().insert(project_id.to_string(), replies.into());
    self
  }

  fn calls(&self, project_id: &str) -> usize {
    self.calls.lock().unwrap().get(project_id).copied().unwrap_or(0)
  }
}

#[async_trait]
impl InstanceSource for ScriptedSource {
  async fn list_instances(&self, project: &Project) -> Result<Vec<Instance>, ServiceError> {
    *self.calls.lock().unwrap().entry(project.project_id.clone()).or_insert(0) += 1;
    let reply = self
      .script
      .lock()
      .unwrap()
      .get_mut(&project.project_id)
      .and_then(|replies| replies.pop_front());

    match reply {
      Some(Reply::Instances(instances)) => Ok(instances),
      Some(Reply::Status(code)) => Err(ServiceError::Status { code, message: format!("HTTP {}", code) }),
      Some(Reply::Broken) => {
        // A malformed URL yields a real reqwest error without touching the network.
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        Err(ServiceError::Transport(err))
      }
      None => Ok(vec![]),
    }
  }
}

fn instance(id: u64, preemptible: bool) -> Instance {
  serde_json::from_value(json!({
    "id": id.to_string(),
    "creationTimestamp": "2018-06-04T09:12:44.031-07:00",
    "zone": "https://www.googleapis.com/compute/v1/projects/p1/zones/us-central1-a",
    "machineType": "https://www.googleapis.com/compute/v1/projects/p1/zones/us-central1-a/machineTypes/n1-standard-4",
    "scheduling": { "preemptible": preemptible },
    "tags": { "items": ["ssh"] },
    "labels": { "team": "capacity" }
  }))
  .unwrap()
}

struct Harness {
  queue: Arc<WorkQueue>,
  source: Arc<ScriptedSource>,
  reporter: Arc<MemoryReporter>,
  receiver: mpsc::Receiver<RowBatch>,
  summary: RunSummary,
}

impl Harness {
  fn batches(&mut self) -> Vec<RowBatch> {
    let mut batches = Vec::new();
    while let Ok(batch) = self.receiver.try_recv() {
      batches.push(batch);
    }
    batches
  }
}

async fn run(projects: &[&str], source: ScriptedSource, settings: WorkerSettings) -> Harness {
  let queue = Arc::new(WorkQueue::from_projects(projects.iter().map(|id| Project::new(*id))));
  let source = Arc::new(source);
  let reporter = Arc::new(MemoryReporter::new());
  let (sink, receiver) = ChannelSink::bounded(16);

  let worker = InventoryWorker::new(queue.clone(), source.clone(), Arc::new(sink), reporter.clone(), settings);
  let summary = worker.run().await;

  Harness { queue, source, reporter, receiver, summary }
}

fn requeues(events: &[WorkerEvent]) -> usize {
  events.iter().filter(|e| matches!(e, WorkerEvent::Requeued { .. })).count()
}

#[tokio::test]
async fn not_found_project_is_dropped() {
  let source = ScriptedSource::default().with("p1", vec![Reply::Status(404)]);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  assert!(harness.queue.is_empty().await);
  assert!(harness.batches().is_empty());
  assert_eq!(harness.source.calls("p1"), 1);
  assert_eq!(harness.summary.missing, 1);
  assert!(harness.reporter.events().contains(&WorkerEvent::ProjectMissing { project_id: "p1".into() }));
}

#[tokio::test]
async fn forbidden_project_is_dropped() {
  let source = ScriptedSource::default().with("p1", vec![Reply::Status(403)]);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  assert!(harness.batches().is_empty());
  assert_eq!(harness.source.calls("p1"), 1);
  assert_eq!(harness.summary.api_disabled, 1);
  assert!(harness.reporter.events().contains(&WorkerEvent::ApiDisabled { project_id: "p1".into() }));
}

#[tokio::test]
async fn every_instance_becomes_one_row() {
  let i1 = instance(8224377329712040271, false);
  let i2 = instance(17, true);
  let source = ScriptedSource::default().with("p1", vec![Reply::Instances(vec![i1.clone(), i2.clone()])]);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  let batches = harness.batches();
  assert_eq!(batches.len(), 1);
  let rows = &batches[0].rows;
  assert_eq!(batches[0].project_id, "p1");
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0].instance_id, "8224377329712040271");
  assert_eq!(rows[1].instance_id, "17");
  assert_eq!(rows[0].preemptible, Some(false));
  assert_eq!(rows[1].preemptible, Some(true));
  assert_eq!(rows[0].timestamp, i1.creation_timestamp);
  assert_eq!(rows[0].zone, i1.zone);
  assert_eq!(rows[0].machine_type, i1.machine_type);
  assert_eq!(rows[1].tags, i2.tags);
  assert_eq!(rows[1].labels, i2.labels);

  assert!(harness.queue.is_empty().await);
  assert_eq!(harness.summary, RunSummary { completed: 1, rows: 2, ..RunSummary::default() });
}

#[tokio::test]
async fn unstructured_failures_are_retried_twice_then_dropped() {
  let source = ScriptedSource::default().with("p1", vec![Reply::Broken, Reply::Broken, Reply::Broken, Reply::Instances(vec![instance(1, false)])]);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  assert!(harness.queue.is_empty().await);
  assert!(harness.batches().is_empty());
  assert_eq!(harness.source.calls("p1"), 3);

  let events = harness.reporter.events_for("p1");
  assert_eq!(requeues(&events), 2);
  assert!(matches!(events.last(), Some(WorkerEvent::Abandoned { attempts: 3, .. })));
  assert_eq!(harness.summary.abandoned, 1);
}

#[tokio::test]
async fn unstructured_failure_recovers_before_limit() {
  let source = ScriptedSource::default().with("p1", vec![Reply::Broken, Reply::Instances(vec![instance(1, false)])]);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  assert_eq!(harness.batches().len(), 1);
  assert_eq!(harness.summary.requeued, 1);
  assert_eq!(harness.summary.completed, 1);
}

#[tokio::test]
async fn status_errors_requeue_without_limit() {
  let mut replies: Vec<Reply> = (0..10).map(|_| Reply::Status(500)).collect();
  replies.push(Reply::Instances(vec![instance(1, false)]));
  let source = ScriptedSource::default().with("p1", replies);
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  // Well past the unstructured limit, and still retried.
  assert_eq!(harness.source.calls("p1"), 11);
  let events = harness.reporter.events_for("p1");
  assert_eq!(requeues(&events), 10);
  assert!(events.iter().all(|e| !matches!(e, WorkerEvent::Abandoned { .. })));
  assert!(events.contains(&WorkerEvent::Requeued {
    project_id: "p1".into(),
    cause: RequeueCause::ServiceStatus(500),
    attempt: 10,
    error: "service returned 500: HTTP 500".into(),
  }));
  assert_eq!(harness.batches().len(), 1);
}

#[tokio::test]
async fn status_ceiling_abandons_when_configured() {
  let replies: Vec<Reply> = (0..10).map(|_| Reply::Status(503)).collect();
  let source = ScriptedSource::default().with("p1", replies);
  let settings = WorkerSettings { status_retry_limit: Some(4), ..WorkerSettings::default() };
  let mut harness = run(&["p1"], source, settings).await;

  assert_eq!(harness.source.calls("p1"), 4);
  assert_eq!(harness.summary.requeued, 3);
  assert_eq!(harness.summary.abandoned, 1);
  assert!(harness.batches().is_empty());
}

#[tokio::test]
async fn conversion_failure_commits_no_partial_batch() {
  let mut broken = instance(2, false);
  broken.scheduling = None;
  let source = ScriptedSource::default().with(
    "p1",
    vec![
      Reply::Instances(vec![instance(1, false), broken]),
      Reply::Instances(vec![instance(1, false), instance(2, false)]),
    ],
  );
  let mut harness = run(&["p1"], source, WorkerSettings::default()).await;

  let batches = harness.batches();
  assert_eq!(batches.len(), 1);
  assert_eq!(batches[0].rows.len(), 2);
  assert_eq!(harness.summary.requeued, 1);
}

#[tokio::test]
async fn requeued_project_goes_to_the_tail() {
  let source = ScriptedSource::default()
    .with("p1", vec![Reply::Status(500), Reply::Instances(vec![instance(1, false)])])
    .with("p2", vec![Reply::Instances(vec![instance(2, false)])]);
  let mut harness = run(&["p1", "p2"], source, WorkerSettings::default()).await;

  let order: Vec<String> = harness.batches().into_iter().map(|b| b.project_id).collect();
  assert_eq!(order, vec!["p2", "p1"]);
}

#[tokio::test]
async fn closed_sink_counts_as_unstructured_failure() {
  let queue = Arc::new(WorkQueue::from_projects(vec![Project::new("p1")]));
  let source = Arc::new(ScriptedSource::default().with("p1", vec![Reply::Instances(vec![instance(1, false)])]));
  let reporter = Arc::new(MemoryReporter::new());
  let (sink, receiver) = ChannelSink::bounded(1);
  drop(receiver);

  let summary = InventoryWorker::new(queue.clone(), source.clone(), Arc::new(sink), reporter.clone(), WorkerSettings::default())
    .run()
    .await;

  assert_eq!(source.calls("p1"), 3);
  assert_eq!(summary.abandoned, 1);
  assert!(queue.is_empty().await);
}

#[tokio::test]
async fn concurrent_workers_share_the_queue() {
  let ids: Vec<String> = (0..20).map(|i| format!("project-{}", i)).collect();
  let queue = Arc::new(WorkQueue::from_projects(ids.iter().map(Project::new)));
  let source = Arc::new(ScriptedSource::default());
  let reporter = Arc::new(MemoryReporter::new());
  let (sink, mut receiver) = ChannelSink::bounded(4);
  let sink = Arc::new(sink);

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let worker = InventoryWorker::new(queue.clone(), source.clone(), sink.clone(), reporter.clone(), WorkerSettings::default());
      tokio::spawn(worker.run())
    })
    .collect();
  drop(sink);

  let mut seen = Vec::new();
  while let Some(batch) = receiver.recv().await {
    seen.push(batch.project_id);
  }

  let mut completed = 0;
  for handle in handles {
    completed += assert_ok!(handle.await).completed;
  }
  seen.sort();
  let mut expected = ids.clone();
  expected.sort();
  assert_eq!(seen, expected);
  assert_eq!(completed, 20);
}
