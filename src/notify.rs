//! Catalog lifecycle notifications.

use std::sync::Mutex;
use tokio::sync::mpsc;

/// Detail attached to a `Changed` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDetail {
  /// How the change was observed; currently always "fetched"
  pub reason: &'static str,
  pub validator_tag: Option<String>,
  pub validator_timestamp: Option<String>,
  pub fetched_at: i64,
}

/// Events emitted by the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
  /// The current catalog value is safe to read. Fired exactly once per run,
  /// on every path including total failure.
  Ready,
  /// The served catalog content changed. Fired at most once per run,
  /// always after `Ready`.
  Changed(ChangeDetail),
}

/// Subscription registry owned by the orchestrator.
///
/// Delivery is fire-and-forget over unbounded channels; a subscriber that
/// went away can never push an error back into orchestration.
#[derive(Default)]
pub struct CatalogEvents {
  subscribers: Mutex<Vec<mpsc::UnboundedSender<CatalogEvent>>>,
}

impl CatalogEvents {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a subscriber and return its receiving end.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CatalogEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Ok(mut subscribers) = self.subscribers.lock() {
      subscribers.push(tx);
    }
    rx
  }

  /// Deliver an event to every live subscriber, pruning the ones whose
  /// receivers have been dropped.
  pub fn emit(&self, event: CatalogEvent) {
    let Ok(mut subscribers) = self.subscribers.lock() else {
      return;
    };
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_emit_reaches_every_subscriber() {
    let events = CatalogEvents::new();
    let mut first = events.subscribe();
    let mut second = events.subscribe();

    events.emit(CatalogEvent::Ready);

    assert_eq!(first.recv().await, Some(CatalogEvent::Ready));
    assert_eq!(second.recv().await, Some(CatalogEvent::Ready));
  }

  #[tokio::test]
  async fn test_dropped_subscriber_is_pruned() {
    let events = CatalogEvents::new();
    let gone = events.subscribe();
    drop(gone);

    // Must not error out or panic
    events.emit(CatalogEvent::Ready);

    let mut live = events.subscribe();
    events.emit(CatalogEvent::Ready);
    assert_eq!(live.recv().await, Some(CatalogEvent::Ready));
  }
}
