//! The sync orchestrator: decides between serving cache, blocking fetch,
//! offline mode, and background revalidation.

use chrono::Duration;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{fingerprint, now_ms, CacheRecord, Catalog};
use crate::fetch::{FetchOutcome, Fetcher, Validators};
use crate::notify::{CatalogEvent, CatalogEvents, ChangeDetail};
use crate::store::CatalogStore;

/// Default freshness window for a cached catalog.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Keeps the served catalog value settled and fresh.
///
/// Each `load` run reads the stored record, picks a strategy from the
/// environment and the record's age, drives the fetcher when needed, writes
/// results back through the store, and emits `Ready` exactly once. `Changed`
/// fires only when served content actually changed, and always after the
/// run's `Ready`.
pub struct SyncOrchestrator<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  events: Arc<CatalogEvents>,
  /// The catalog value consumers observe
  current: Arc<RwLock<Catalog>>,
  /// How long before a cached record must be revalidated
  ttl: Duration,
  /// Whether a networked transport is available at all
  online: bool,
  /// Serializes runs and background revalidation: a second concurrent
  /// caller waits here, then finds the first run's record fresh and serves
  /// it instead of duplicating the fetch.
  in_flight: Arc<Mutex<()>>,
  /// Most recent background revalidation, so short-lived embedders can let
  /// it land before exiting
  revalidation: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl<S, F> SyncOrchestrator<S, F>
where
  S: CatalogStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(store: Arc<S>, fetcher: Arc<F>) -> Self {
    Self {
      store,
      fetcher,
      events: Arc::new(CatalogEvents::new()),
      current: Arc::new(RwLock::new(Catalog::new())),
      ttl: Duration::hours(DEFAULT_TTL_HOURS),
      online: true,
      in_flight: Arc::new(Mutex::new(())),
      revalidation: Arc::new(StdMutex::new(None)),
    }
  }

  /// Set the freshness window.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Mark the environment as having no networked transport. The
  /// orchestrator then serves whatever the store holds and never fetches.
  pub fn with_offline(mut self, offline: bool) -> Self {
    self.online = !offline;
    self
  }

  /// Subscribe to catalog lifecycle events.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CatalogEvent> {
    self.events.subscribe()
  }

  /// The currently served catalog.
  pub fn current(&self) -> Catalog {
    self.current.read().map(|c| c.clone()).unwrap_or_default()
  }

  /// Run one orchestration: settle a servable catalog value and emit
  /// `Ready`, fetching first only when the record is absent or stale.
  pub async fn load(&self) {
    let guard = self.in_flight.lock().await;
    let record = self.store.read();

    if !self.online {
      debug!("offline: serving stored catalog without fetching");
      let payload = record.map(|r| r.payload).unwrap_or_default();
      self.serve(payload);
      self.events.emit(CatalogEvent::Ready);
      return;
    }

    match record {
      Some(record) if self.is_fresh(&record) => {
        // Serve immediately, revalidate behind the caller's back.
        self.serve(record.payload.clone());
        self.events.emit(CatalogEvent::Ready);
        drop(guard);
        self.spawn_revalidation(record);
      }
      record => {
        // Absent or stale: the caller waits for the origin's verdict.
        let validators = record
          .as_ref()
          .map(Validators::from_record)
          .unwrap_or_default();
        let outcome = self.fetcher.fetch(validators).await;
        let change = self.apply_outcome(record, outcome);

        self.events.emit(CatalogEvent::Ready);
        if let Some(detail) = change {
          self.events.emit(CatalogEvent::Changed(detail));
        }
      }
    }
  }

  fn is_fresh(&self, record: &CacheRecord) -> bool {
    now_ms() - record.fetched_at < self.ttl.num_milliseconds()
  }

  /// Revalidate a served record without blocking the caller. The task may
  /// outlive the triggering run; it still writes the cache and notifies.
  fn spawn_revalidation(&self, record: CacheRecord) {
    let this = self.clone();
    let handle = tokio::spawn(async move {
      let _guard = this.in_flight.lock().await;
      // The record may have been rewritten while we waited for the guard
      let record = this.store.read().unwrap_or(record);
      let validators = Validators::from_record(&record);

      debug!("revalidating catalog in the background");
      let outcome = this.fetcher.fetch(validators).await;
      if let Some(detail) = this.apply_outcome(Some(record), outcome) {
        this.events.emit(CatalogEvent::Changed(detail));
      }
    });

    if let Ok(mut slot) = self.revalidation.lock() {
      *slot = Some(handle);
    }
  }

  /// Wait for an in-flight background revalidation to finish. Callers that
  /// exit right after a run use this so the refresh can still land; the
  /// fetcher's own deadline bounds the wait.
  pub async fn settle(&self) {
    let handle = self
      .revalidation
      .lock()
      .ok()
      .and_then(|mut slot| slot.take());
    if let Some(handle) = handle {
      let _ = handle.await;
    }
  }

  /// Shared outcome handling for blocking and background fetches: settles
  /// the served value, persists what the outcome allows, and returns the
  /// change detail when served content actually changed.
  fn apply_outcome(
    &self,
    prior: Option<CacheRecord>,
    outcome: FetchOutcome,
  ) -> Option<ChangeDetail> {
    match outcome {
      FetchOutcome::Fresh {
        payload,
        validator_tag,
        validator_timestamp,
      } => {
        let record = CacheRecord {
          validator_tag: validator_tag.clone(),
          validator_timestamp: validator_timestamp.clone(),
          fetched_at: next_fetched_at(prior.as_ref()),
          payload,
        };
        self.store.write(&record);

        // Change detection is content-based: identical content under a new
        // validator tag must stay silent.
        let prior_print = prior.as_ref().map(|r| fingerprint(&r.payload));
        let new_print = fingerprint(&record.payload);
        let fetched_at = record.fetched_at;
        self.serve(record.payload);

        match prior_print {
          Some(prior_print) if prior_print != new_print => {
            info!("catalog content changed");
            Some(ChangeDetail {
              reason: "fetched",
              validator_tag,
              validator_timestamp,
              fetched_at,
            })
          }
          // Identical content, or nothing served before: no prior state
          // for consumers to reconcile against
          _ => None,
        }
      }
      FetchOutcome::NotModified => {
        match prior {
          Some(mut record) => {
            // Freshness window resets without a body transfer
            let fetched_at = next_fetched_at(Some(&record));
            record.fetched_at = fetched_at;
            self.store.write(&record);
            self.serve(record.payload);
            debug!("origin confirmed cached catalog");
          }
          None => {
            // A 304 with nothing cached is a protocol anomaly; same
            // recovery as a failed fetch
            warn!("origin returned Not Modified but no record is cached");
          }
        }
        None
      }
      FetchOutcome::Failed(cause) => {
        warn!("catalog fetch failed: {}", cause);
        if let Some(record) = prior {
          self.serve(record.payload);
        }
        None
      }
    }
  }

  fn serve(&self, payload: Catalog) {
    if let Ok(mut current) = self.current.write() {
      *current = payload;
    }
  }
}

/// Next `fetched_at` for a record write; never moves backwards.
fn next_fetched_at(prior: Option<&CacheRecord>) -> i64 {
  let now = now_ms();
  match prior {
    Some(record) => now.max(record.fetched_at),
    None => now,
  }
}

impl<S, F> Clone for SyncOrchestrator<S, F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      events: Arc::clone(&self.events),
      current: Arc::clone(&self.current),
      ttl: self.ttl,
      online: self.online,
      in_flight: Arc::clone(&self.in_flight),
      revalidation: Arc::clone(&self.revalidation),
    }
  }
}
