//! In-memory log of recent admission decisions, exposed through the admin
//! API. A fixed-capacity ring buffer: once full, the oldest entry is
//! evicted to make room for the newest, so memory stays bounded regardless
//! of request volume.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`DecisionEntry`] records.
///
/// Safe to share across tasks via `Arc<DecisionLog>`. [`push`][Self::push]
/// uses a non-blocking `try_lock` so it never delays the admission path; in
/// the unlikely event of lock contention the entry is silently dropped.
pub struct DecisionLog {
    capacity: usize,
    entries: Mutex<VecDeque<DecisionEntry>>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed admission decision. Best-effort: dropped under
    /// lock contention rather than blocking the request path.
    pub fn push(&self, entry: DecisionEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<DecisionEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }
}

/// A single admission decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub role: String,
    /// The backend ultimately chosen, if admission succeeded.
    pub backend: Option<String>,
    pub outcome: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl DecisionEntry {
    pub fn new(model: &str, role: &str, outcome: &str, latency_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            model: model.to_string(),
            role: role.to_string(),
            backend: None,
            outcome: outcome.to_string(),
            latency_ms,
            error: None,
        }
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self
    }
}
