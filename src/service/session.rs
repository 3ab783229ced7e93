//! Session progress map polled by clients.
//!
//! The map is owned by the caller and shared by the queue runner and the
//! executor. Writers only ever merge: fields an update does not set are
//! kept, including fields this crate does not know about.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub progress: u8,
    pub message: Option<String>,
    pub current_url: Option<String>,
    pub phase: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Fields written by other parts of the system.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial update; `None` fields leave the record untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub current_url: Option<String>,
    pub phase: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub extra: Map<String, Value>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl SessionRecord {
    fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            self.status = Some(status);
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        if update.current_url.is_some() {
            self.current_url = update.current_url;
        }
        if update.phase.is_some() {
            self.phase = update.phase;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.extra.extend(update.extra);
        self.timestamp = Some(Utc::now());
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `update` into the record for `session_id` under the entry lock,
    /// creating the record if needed. Returns the merged record.
    pub fn merge(&self, session_id: &str, update: SessionUpdate) -> SessionRecord {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        entry.apply(update);
        entry.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|r| r.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.remove(session_id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
