use async_trait::async_trait;
use tokio::sync::mpsc;
use crate::error::SinkError;
use crate::models::RowBatch;

/// Destination for converted rows. A batch is either committed whole or not at all.
#[async_trait]
pub trait RowSink: Send + Sync {
  async fn commit(&self, batch: RowBatch) -> Result<(), SinkError>;
}

/// Bounded channel sink. `commit` waits while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  sender: mpsc::Sender<RowBatch>,
}

impl ChannelSink {
  pub fn new(sender: mpsc::Sender<RowBatch>) -> Self {
    Self { sender }
  }

  pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<RowBatch>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Self::new(sender), receiver)
  }
}

#[async_trait]
impl RowSink for ChannelSink {
  async fn commit(&self, batch: RowBatch) -> Result<(), SinkError> {
    self.sender.send(batch).await.map_err(|_| SinkError::Closed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn commit_fails_once_receiver_is_gone() {
    let (sink, mut receiver) = ChannelSink::bounded(1);
    let batch = RowBatch { project_id: "p1".into(), rows: vec![] };

    sink.commit(batch.clone()).await.unwrap();
    assert_eq!(receiver.recv().await, Some(batch.clone()));

    drop(receiver);
    assert_eq!(sink.commit(batch).await, Err(SinkError::Closed));
  }
}
