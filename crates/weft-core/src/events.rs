// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Blackboard: shared state between agents plus the typed runtime event bus.
//!
//! Events fan out over a broadcast channel; each subscriber gets its own
//! receiver and slow subscribers only lose their *own* backlog.  The event
//! family is closed, and every record carries a process-monotonic `seq`, a
//! wall-clock `ts`, and the originating agent/task, so consumers (the UI
//! board, log sinks) can order and attribute events without extra context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use weft_plan::AgentId;

/// The closed runtime event family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RuntimeEvent {
    #[serde(rename = "agent.task.started")]
    TaskStarted,
    #[serde(rename = "agent.task.progress")]
    TaskProgress { detail: String },
    #[serde(rename = "agent.task.completed")]
    TaskCompleted { success: bool },
    #[serde(rename = "agent.task.blocked")]
    TaskBlocked { reason: String },
    #[serde(rename = "wave.started")]
    WaveStarted { wave: u32 },
    #[serde(rename = "wave.completed")]
    WaveCompleted { wave: u32 },
    #[serde(rename = "plan.replanned")]
    PlanReplanned { depth: u32 },
}

/// One published event with its bookkeeping envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number, unique per blackboard.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub event: RuntimeEvent,
}

impl EventRecord {
    /// Serialise as one JSON line for the event-stream egress.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Process-wide publish/subscribe plus a shared key-value store.
pub struct Blackboard {
    seq: AtomicU64,
    tx: broadcast::Sender<EventRecord>,
    state: Mutex<HashMap<String, serde_json::Value>>,
}

impl Blackboard {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { seq: AtomicU64::new(0), tx, state: Mutex::new(HashMap::new()) }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// Publish an event; returns the stamped record.  Publishing without
    /// subscribers is not an error.
    pub fn publish(
        &self,
        agent_id: Option<AgentId>,
        task_id: Option<&str>,
        event: RuntimeEvent,
    ) -> EventRecord {
        let record = EventRecord {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            ts: Utc::now(),
            agent_id,
            task_id: task_id.map(|s| s.to_string()),
            event,
        };
        let _ = self.tx.send(record.clone());
        record
    }

    // ── Shared state ──────────────────────────────────────────────────────────

    /// Write a shared value (single writer per key by convention).
    pub fn set_state(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.lock().unwrap().insert(key.into(), value);
    }

    pub fn get_state(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().get(key).cloned()
    }

    pub fn remove_state(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().remove(key)
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new(256)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
