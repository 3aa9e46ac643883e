use thiserror::Error;

/// Failure reported by the inventory service.
#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("service returned {code}: {message}")]
  Status { code: u16, message: String },
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
}

impl ServiceError {
  pub fn status(&self) -> Option<u16> {
    match self {
      ServiceError::Status { code, .. } => Some(*code),
      ServiceError::Transport(_) => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
  #[error("instance is missing `{0}`")]
  MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
  #[error("output sink is closed")]
  Closed,
}

/// Anything that can go wrong while processing a single project.
#[derive(Debug, Error)]
pub enum ProcessError {
  #[error(transparent)]
  Service(#[from] ServiceError),
  #[error(transparent)]
  Conversion(#[from] ConversionError),
  #[error(transparent)]
  Sink(#[from] SinkError),
}

impl ProcessError {
  pub fn status(&self) -> Option<u16> {
    match self {
      ProcessError::Service(e) => e.status(),
      _ => None,
    }
  }
}
