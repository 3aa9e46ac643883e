use std::env;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use crate::compute::DEFAULT_COMPUTE_API_URL;
use crate::producer::WorkerSettings;
use crate::resource_manager::DEFAULT_RESOURCE_MANAGER_URL;

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub access_token: String,
  pub compute_api_url: String,
  pub resource_manager_url: String,
  pub project_ids: Option<Vec<String>>,
  pub project_filter: Option<Regex>,
  pub worker_count: usize,
  pub batch_buffer: usize,
  pub worker: WorkerSettings,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{} must be set", key));
    let defaults = WorkerSettings::default();

    // An empty list falls back to discovery rather than running on nothing.
    let project_ids = lookup("PROJECT_IDS")
      .map(|raw| {
        raw
          .split(',')
          .map(str::trim)
          .filter(|id| !id.is_empty())
          .map(String::from)
          .collect::<Vec<_>>()
      })
      .filter(|ids| !ids.is_empty());
    let project_filter = lookup("PROJECT_FILTER")
      .map(|pattern| Regex::new(&pattern).with_context(|| format!("invalid PROJECT_FILTER `{}`", pattern)))
      .transpose()?;

    let config = Self {
      database_url: required("DATABASE_URL")?,
      access_token: required("GCP_ACCESS_TOKEN")?,
      compute_api_url: lookup("COMPUTE_API_URL").unwrap_or_else(|| DEFAULT_COMPUTE_API_URL.into()),
      resource_manager_url: lookup("RESOURCE_MANAGER_URL").unwrap_or_else(|| DEFAULT_RESOURCE_MANAGER_URL.into()),
      project_ids,
      project_filter,
      worker_count: parse_or(&lookup, "WORKER_COUNT", 4)?,
      batch_buffer: parse_or(&lookup, "BATCH_BUFFER", 64)?,
      worker: WorkerSettings {
        max_retries: parse_or(&lookup, "MAX_RETRIES", defaults.max_retries)?,
        status_retry_limit: lookup("STATUS_RETRY_LIMIT")
          .map(|raw| raw.parse::<u32>().with_context(|| format!("invalid STATUS_RETRY_LIMIT `{}`", raw)))
          .transpose()?,
      },
    };

    if config.worker_count == 0 {
      return Err(anyhow!("WORKER_COUNT must be at least 1"));
    }
    if config.batch_buffer == 0 {
      return Err(anyhow!("BATCH_BUFFER must be at least 1"));
    }
    if config.worker.max_retries == 0 {
      return Err(anyhow!("MAX_RETRIES must be at least 1"));
    }
    if config.worker.status_retry_limit == Some(0) {
      return Err(anyhow!("STATUS_RETRY_LIMIT must be at least 1"));
    }
    Ok(config)
  }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
  F: Fn(&str) -> Option<String>,
  T: std::str::FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match lookup(key) {
    Some(raw) => raw.parse().with_context(|| format!("invalid {} `{}`", key, raw)),
    None => Ok(default),
  }
}
