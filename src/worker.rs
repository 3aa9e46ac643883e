use std::sync::Arc;
use anyhow::Result;
use futures::future::join_all;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;
use vm_inventory::compute::{ComputeClient, InstanceSource};
use vm_inventory::config::Config;
use vm_inventory::database::setup_database;
use vm_inventory::events::{EventReporter, TracingReporter};
use vm_inventory::loader::{PgBatchStore, run_loader};
use vm_inventory::models::Project;
use vm_inventory::producer::{InventoryWorker, RunSummary};
use vm_inventory::resource_manager::{ResourceManagerClient, filter_projects};
use vm_inventory::sink::{ChannelSink, RowSink};
use vm_inventory::work_queue::WorkQueue;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env()?;
  let run_id = Uuid::new_v4();

  run(config).instrument(info_span!("inventory_run", %run_id)).await
}

async fn run(config: Config) -> Result<()> {
  let http = reqwest::Client::new();
  let db_pool = setup_database(&config.database_url).await?;

  let projects: Vec<Project> = match &config.project_ids {
    Some(ids) => ids.iter().map(Project::new).collect(),
    None => {
      ResourceManagerClient::new(http.clone(), &config.resource_manager_url, &config.access_token)
        .list_projects()
        .await?
    }
  };
  let projects = filter_projects(projects, config.project_filter.as_ref());
  info!(projects = projects.len(), workers = config.worker_count, "Starting initial vm inventory");

  let queue = Arc::new(WorkQueue::from_projects(projects));
  let (sink, receiver) = ChannelSink::bounded(config.batch_buffer);
  let sink: Arc<dyn RowSink> = Arc::new(sink);
  let source: Arc<dyn InstanceSource> =
    Arc::new(ComputeClient::new(http, &config.compute_api_url, &config.access_token));
  let reporter: Arc<dyn EventReporter> = Arc::new(TracingReporter);

  let store = PgBatchStore::new(db_pool);
  let loader = tokio::spawn(async move { run_loader(&store, receiver).await }.in_current_span());

  let workers = (0..config.worker_count).map(|worker| {
    let producer = InventoryWorker::new(
      queue.clone(),
      source.clone(),
      sink.clone(),
      reporter.clone(),
      config.worker,
    );
    tokio::spawn(producer.run().instrument(info_span!("producer", worker)))
  });

  let mut total = RunSummary::default();
  for result in join_all(workers).await {
    match result {
      Ok(summary) => total.merge(summary),
      Err(e) => error!("Worker task failed: {:?}", e),
    }
  }
  // Last sender goes away here, which lets the loader finish.
  drop(sink);

  let loaded = loader.await?;
  info!(
    completed = total.completed,
    rows = total.rows,
    missing = total.missing,
    api_disabled = total.api_disabled,
    requeued = total.requeued,
    abandoned = total.abandoned,
    loaded_batches = loaded.batches,
    loaded_rows = loaded.rows,
    failed_batches = loaded.failed_batches,
    "Initial vm inventory finished"
  );
  Ok(())
}
