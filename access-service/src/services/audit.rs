//! Asynchronous audit recording.
//!
//! Requests hand events to [`AuditRecorder::record`], which never blocks and
//! never fails. A bounded queue feeds a small pool of workers that persist
//! with exponential backoff. When the queue is full the oldest event is
//! dropped and counted.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::AuditStore;
use crate::config::AuditConfig;
use crate::models::NewAuditEvent;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "password_hash",
    "passwordhash",
    "new_password",
    "current_password",
    "token",
    "secret",
];

struct Inner {
    queue: Mutex<VecDeque<NewAuditEvent>>,
    capacity: usize,
    workers: usize,
    /// Queued plus in-flight events.
    pending: AtomicUsize,
    dropped: AtomicU64,
    work: Notify,
    idle: Notify,
    store: Arc<dyn AuditStore>,
    max_retry: Duration,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct AuditRecorder {
    inner: Arc<Inner>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>, config: &AuditConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
                capacity: config.queue_capacity.max(1),
                workers: config.workers.max(1),
                pending: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
                work: Notify::new(),
                idle: Notify::new(),
                store,
                max_retry: Duration::from_secs(config.max_retry_seconds),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the persistence workers.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        tracing::info!(
            workers = self.inner.workers,
            capacity = self.inner.capacity,
            "Starting audit workers"
        );
        (0..self.inner.workers)
            .map(|worker_id| {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run(worker_id).await })
            })
            .collect()
    }

    /// Enqueue an event. Evicts the oldest queued event when full.
    pub fn record(&self, event: NewAuditEvent) {
        let event = event.fit_to_columns();
        let evicted = match self.inner.queue.lock() {
            Ok(mut queue) => {
                let evicted = if queue.len() >= self.inner.capacity {
                    queue.pop_front()
                } else {
                    None
                };
                // An eviction leaves the pending count unchanged. Counting
                // before the push keeps a worker from decrementing first.
                if evicted.is_none() {
                    self.inner.pending.fetch_add(1, Ordering::SeqCst);
                }
                queue.push_back(event);
                evicted
            }
            Err(_) => {
                tracing::error!("Audit queue lock poisoned, dropping event");
                self.inner.count_drop("queue_full");
                return;
            }
        };

        if let Some(old) = evicted {
            self.inner.count_drop("queue_full");
            tracing::warn!(
                capacity = self.inner.capacity,
                path = %old.path,
                "Audit queue full, dropped oldest event"
            );
        }

        metrics::counter!("audit_events_enqueued_total").increment(1);
        self.inner.work.notify_one();
    }

    /// Events lost to overflow or persistent storage failure.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Wait until every event recorded so far is persisted or dropped.
    /// Needs running workers.
    pub async fn flush(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting work, drain the queue and join the workers.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        tracing::info!(pending = self.pending(), "Draining audit queue");
        self.inner.shutdown.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Audit worker panicked");
            }
        }
        tracing::info!(dropped = self.dropped(), "Audit workers stopped");
    }
}

impl Inner {
    async fn run(&self, worker_id: usize) {
        loop {
            let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
            match next {
                Some(event) => {
                    self.persist(worker_id, event).await;
                    if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.idle.notify_waiters();
                    }
                }
                None if self.shutdown.is_cancelled() => break,
                None => {
                    tokio::select! {
                        _ = self.work.notified() => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, "Audit worker exiting");
    }

    async fn persist(&self, worker_id: usize, event: NewAuditEvent) {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        let result = retry(policy, || async {
            self.store
                .insert_audit_event(&event)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("audit_events_persisted_total").increment(1);
            }
            Err(e) => {
                self.count_drop("persist_failed");
                tracing::error!(
                    worker_id,
                    error = %e,
                    action = event.action.as_str(),
                    path = %event.path,
                    "Audit event dropped after retries"
                );
            }
        }
    }

    fn count_drop(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("audit_events_dropped_total", "reason" => reason).increment(1);
    }
}

/// Mask credential-like fields anywhere in a JSON document.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}
