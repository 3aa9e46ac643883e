use std::collections::HashMap;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use crate::error::ServiceError;
use crate::models::{Instance, Project};

pub const DEFAULT_COMPUTE_API_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Anything that can list the VM instances of a project.
#[async_trait]
pub trait InstanceSource: Send + Sync {
  async fn list_instances(&self, project: &Project) -> Result<Vec<Instance>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ComputeClient {
  http: Client,
  base_url: String,
  access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedInstanceList {
  #[serde(default)]
  items: HashMap<String, InstancesScopedList>,
  #[serde(default)]
  next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InstancesScopedList {
  #[serde(default)]
  instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  #[serde(default)]
  message: String,
}

impl ComputeClient {
  pub fn new(http: Client, base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
    Self {
      http,
      base_url: base_url.into().trim_end_matches('/').to_string(),
      access_token: access_token.into(),
    }
  }

  async fn fetch_page(&self, project_id: &str, page_token: Option<&str>) -> Result<AggregatedInstanceList, ServiceError> {
    let url = format!("{}/projects/{}/aggregated/instances", self.base_url, project_id);
    let mut request = self.http.get(&url).bearer_auth(&self.access_token);
    if let Some(token) = page_token {
      request = request.query(&[("pageToken", token)]);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ServiceError::Status {
        code: status.as_u16(),
        message: error_message(&body, status.canonical_reason()),
      });
    }
    Ok(response.json().await?)
  }
}

#[async_trait]
impl InstanceSource for ComputeClient {
  async fn list_instances(&self, project: &Project) -> Result<Vec<Instance>, ServiceError> {
    let mut instances = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
      let page = self.fetch_page(&project.project_id, page_token.as_deref()).await?;
      instances.extend(page.items.into_values().flat_map(|scoped| scoped.instances));
      match next_page(page_token.as_deref(), page.next_page_token) {
        Some(token) => page_token = Some(token),
        None => break,
      }
    }
    debug!(project_id = %project.project_id, count = instances.len(), "Listed instances");
    Ok(instances)
  }
}

/// Token for the next request, or `None` once listing is done. A server that hands
/// back the token it was just given would otherwise keep the loop going forever.
pub(crate) fn next_page(current: Option<&str>, next: Option<String>) -> Option<String> {
  match next {
    Some(token) if token.is_empty() => None,
    Some(token) if Some(token.as_str()) == current => {
      warn!(page_token = %token, "Server repeated the page token, stopping pagination");
      None
    }
    next => next,
  }
}

pub(crate) fn error_message(body: &str, fallback: Option<&str>) -> String {
  match serde_json::from_str::<ErrorEnvelope>(body) {
    Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
    _ if !body.trim().is_empty() => body.trim().to_string(),
    _ => fallback.unwrap_or("unknown error").to_string(),
  }
}
