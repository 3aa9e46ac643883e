use std::collections::VecDeque;
use tokio::sync::Mutex;
use crate::models::Project;

/// FIFO of projects waiting to be inventoried, shared by all workers.
#[derive(Debug, Default)]
pub struct WorkQueue {
  queue: Mutex<VecDeque<Project>>,
}

impl WorkQueue {
  pub fn from_projects(projects: impl IntoIterator<Item = Project>) -> Self {
    Self {
      queue: Mutex::new(projects.into_iter().collect()),
    }
  }

  pub async fn push(&self, project: Project) {
    self.queue.lock().await.push_back(project);
  }

  /// Takes the head of the queue together with how many projects remain behind it.
  pub async fn poll(&self) -> Option<(Project, usize)> {
    let mut queue = self.queue.lock().await;
    let project = queue.pop_front()?;
    Some((project, queue.len()))
  }

  pub async fn is_empty(&self) -> bool {
    self.queue.lock().await.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn polls_in_insertion_order_and_requeues_at_tail() {
    let queue = WorkQueue::from_projects(vec![Project::new("a"), Project::new("b")]);

    let (first, remaining) = queue.poll().await.unwrap();
    assert_eq!(first.project_id, "a");
    assert_eq!(remaining, 1);

    queue.push(first).await;
    let (second, _) = queue.poll().await.unwrap();
    let (third, remaining) = queue.poll().await.unwrap();
    assert_eq!(second.project_id, "b");
    assert_eq!(third.project_id, "a");
    assert_eq!(remaining, 0);
    assert!(queue.poll().await.is_none());
    assert!(queue.is_empty().await);
  }
}
