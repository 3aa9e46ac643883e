use std::collections::BTreeMap;
use serde::{Serialize, Deserialize, Deserializer};
use crate::error::ConversionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub project_id: String,
  #[serde(default)]
  pub project_number: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub lifecycle_state: Option<String>,
  #[serde(default)]
  pub labels: Option<BTreeMap<String, String>>,
}

impl Project {
  pub fn new(project_id: impl Into<String>) -> Self {
    Self {
      project_id: project_id.into(),
      project_number: None,
      name: None,
      lifecycle_state: None,
      labels: None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduling {
  #[serde(default)]
  pub preemptible: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
  #[serde(default)]
  pub items: Vec<String>,
  #[serde(default)]
  pub fingerprint: Option<String>,
}

/// Compute Engine instance, as much of it as the inventory needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: Option<u64>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub creation_timestamp: Option<String>,
  #[serde(default)]
  pub zone: Option<String>,
  #[serde(default)]
  pub machine_type: Option<String>,
  #[serde(default)]
  pub scheduling: Option<Scheduling>,
  #[serde(default)]
  pub tags: Option<Tags>,
  #[serde(default)]
  pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
  pub timestamp: Option<String>,
  pub instance_id: String,
  pub zone: Option<String>,
  pub machine_type: Option<String>,
  pub preemptible: Option<bool>,
  pub tags: Option<Tags>,
  pub labels: Option<BTreeMap<String, String>>,
}

/// All rows produced for one project. Committed to the sink as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
  pub project_id: String,
  pub rows: Vec<InventoryRow>,
}

pub fn convert_to_row(instance: &Instance) -> Result<InventoryRow, ConversionError> {
  let id = instance.id.ok_or(ConversionError::MissingField("id"))?;
  let scheduling = instance
    .scheduling
    .as_ref()
    .ok_or(ConversionError::MissingField("scheduling"))?;

  Ok(InventoryRow {
    timestamp: instance.creation_timestamp.clone(),
    instance_id: id.to_string(),
    zone: instance.zone.clone(),
    machine_type: instance.machine_type.clone(),
    preemptible: scheduling.preemptible,
    tags: instance.tags.clone(),
    labels: instance.labels.clone(),
  })
}

// The compute API encodes uint64 ids as JSON strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum NumberOrString {
    Number(u64),
    Text(String),
  }

  match Option::<NumberOrString>::deserialize(deserializer)? {
    None => Ok(None),
    Some(NumberOrString::Number(n)) => Ok(Some(n)),
    Some(NumberOrString::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
  }
}
