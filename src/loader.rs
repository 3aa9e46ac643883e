use std::collections::BTreeMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::mpsc;
use tracing::{error, info};
use crate::models::{InventoryRow, RowBatch, Tags};

// Eight binds per row keeps a statement well under the Postgres parameter limit.
pub const ROWS_PER_STATEMENT: usize = 1000;

#[async_trait]
pub trait BatchStore: Send + Sync {
  async fn store(&self, batch: &RowBatch) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
  pub batches: usize,
  pub rows: usize,
  pub failed_batches: usize,
}

/// Drains the row channel until every sender is gone.
pub async fn run_loader<S: BatchStore>(store: &S, mut receiver: mpsc::Receiver<RowBatch>) -> LoadSummary {
  let mut summary = LoadSummary::default();
  while let Some(batch) = receiver.recv().await {
    match store.store(&batch).await {
      Ok(()) => {
        summary.batches += 1;
        summary.rows += batch.rows.len();
        info!(project_id = %batch.project_id, rows = batch.rows.len(), "Loaded inventory batch");
      }
      Err(e) => {
        summary.failed_batches += 1;
        error!(project_id = %batch.project_id, rows = batch.rows.len(), "Failed to load inventory batch: {:?}", e);
      }
    }
  }
  summary
}

#[derive(Debug, Clone)]
pub struct PgBatchStore {
  pool: PgPool,
}

impl PgBatchStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

struct LoadRecord {
  project_id: String,
  instance_id: String,
  creation_timestamp: Option<DateTime<Utc>>,
  zone: Option<String>,
  machine_type: Option<String>,
  preemptible: Option<bool>,
  tags: Option<Json<Tags>>,
  labels: Option<Json<BTreeMap<String, String>>>,
}

impl LoadRecord {
  fn from_row(project_id: &str, row: &InventoryRow) -> Result<Self> {
    Ok(Self {
      project_id: project_id.to_string(),
      instance_id: row.instance_id.clone(),
      creation_timestamp: row.timestamp.as_deref().map(parse_timestamp).transpose()?,
      zone: row.zone.clone(),
      machine_type: row.machine_type.clone(),
      preemptible: row.preemptible,
      tags: row.tags.clone().map(Json),
      labels: row.labels.clone().map(Json),
    })
  }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw)
    .map(|ts| ts.with_timezone(&Utc))
    .with_context(|| format!("invalid creation timestamp `{}`", raw))
}

#[async_trait]
impl BatchStore for PgBatchStore {
  async fn store(&self, batch: &RowBatch) -> Result<()> {
    let mut records = batch
      .rows
      .iter()
      .map(|row| LoadRecord::from_row(&batch.project_id, row))
      .collect::<Result<Vec<_>>>()?;

    let mut tx = self.pool.begin().await?;
    while !records.is_empty() {
      let take = records.len().min(ROWS_PER_STATEMENT);
      let chunk: Vec<LoadRecord> = records.drain(..take).collect();
      let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO vm_inventory (project_id, instance_id, creation_timestamp, zone, machine_type, preemptible, tags, labels) ",
      );
      builder.push_values(chunk, |mut b, record| {
        b.push_bind(record.project_id)
          .push_bind(record.instance_id)
          .push_bind(record.creation_timestamp)
          .push_bind(record.zone)
          .push_bind(record.machine_type)
          .push_bind(record.preemptible)
          .push_bind(record.tags)
          .push_bind(record.labels);
      });
      builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
  }
}
