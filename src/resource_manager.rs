use std::time::Duration;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::info;
use anyhow::{Result, anyhow};
use crate::compute::{error_message, next_page};
use crate::models::Project;

pub const DEFAULT_RESOURCE_MANAGER_URL: &str = "https://cloudresourcemanager.googleapis.com/v1";

static MAX_RETRIES: usize = 5;
// Delays of 100ms, 200ms, 400ms, ... capped at MAX_DELAY.
static BACKOFF_BASE: u64 = 2;
static BACKOFF_FACTOR: u64 = 50;
static MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ResourceManagerClient {
  http: Client,
  base_url: String,
  access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectList {
  #[serde(default)]
  projects: Vec<Project>,
  #[serde(default)]
  next_page_token: Option<String>,
}

impl ResourceManagerClient {
  pub fn new(http: Client, base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
    Self {
      http,
      base_url: base_url.into().trim_end_matches('/').to_string(),
      access_token: access_token.into(),
    }
  }

  async fn fetch_page(&self, page_token: Option<&str>) -> Result<ProjectList> {
    let mut request = self
      .http
      .get(format!("{}/projects", self.base_url))
      .bearer_auth(&self.access_token);
    if let Some(token) = page_token {
      request = request.query(&[("pageToken", token)]);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(anyhow!("project listing failed with {}: {}", status, error_message(&body, status.canonical_reason())));
    }
    Ok(response.json().await?)
  }

  /// Lists every visible project, retrying each page with exponential backoff.
  pub async fn list_projects(&self) -> Result<Vec<Project>> {
    let mut projects = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
      let backoff = ExponentialBackoff::from_millis(BACKOFF_BASE)
        .factor(BACKOFF_FACTOR)
        .max_delay(MAX_DELAY)
        .take(MAX_RETRIES);
      let page = Retry::spawn(backoff, || {
        self.fetch_page(page_token.as_deref())
      })
        .await?;
      projects.extend(page.projects);
      match next_page(page_token.as_deref(), page.next_page_token) {
        Some(token) => page_token = Some(token),
        None => break,
      }
    }
    info!(count = projects.len(), "Listed projects");
    Ok(projects)
  }
}

pub fn filter_projects(projects: Vec<Project>, filter: Option<&Regex>) -> Vec<Project> {
  match filter {
    Some(re) => projects.into_iter().filter(|p| re.is_match(&p.project_id)).collect(),
    None => projects,
  }
}
