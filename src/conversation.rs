//! Per-user conversation memory.
//!
//! DESIGN
//! ======
//! A bounded, in-memory history per user. State is created on the first
//! message, expires after `timeout` of inactivity (checked lazily on read
//! and by a periodic sweep), and is capped at `max_messages` turns.
//!
//! When the cap is exceeded, system turns are kept and only the most recent
//! `max_messages - system_count` non-system turns survive, in order.
//!
//! Readers get copies; nothing outside this module holds a reference into
//! the map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::env_parse;
use crate::llm::types::{Role, Turn};

const DEFAULT_MAX_MESSAGES: usize = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

/// Conversations touched within this window count as active in stats.
const ACTIVE_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct ConversationConfig {
    pub max_messages: usize,
    pub timeout: Duration,
    pub sweep_interval: Duration,
}

impl ConversationConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_messages: env_parse("CONVERSATION_MAX_MESSAGES", DEFAULT_MAX_MESSAGES).max(1),
            timeout: Duration::from_secs(env_parse("CONVERSATION_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            sweep_interval: Duration::from_secs(env_parse("CONVERSATION_SWEEP_SECS", DEFAULT_SWEEP_INTERVAL_SECS)),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub total_conversations: usize,
    pub active_conversations: usize,
    pub total_messages: usize,
    pub avg_messages_per_conversation: f64,
}

struct ConversationState {
    messages: Vec<Turn>,
    last_activity: Instant,
    turn_count: u64,
}

impl ConversationState {
    fn new(now: Instant) -> Self {
        Self { messages: Vec::new(), last_activity: now, turn_count: 0 }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<HashMap<String, ConversationState>>>,
    config: ConversationConfig,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ConversationConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: ConversationConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), config }
    }

    #[must_use]
    pub fn config(&self) -> ConversationConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConversationState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored turns for `user_id`, oldest first. Expired state is evicted and
    /// yields an empty context.
    #[must_use]
    pub fn get_context(&self, user_id: &str) -> Vec<Turn> {
        self.get_context_at(user_id, Instant::now())
    }

    fn get_context_at(&self, user_id: &str, now: Instant) -> Vec<Turn> {
        let mut map = self.lock();
        let Some(state) = map.get_mut(user_id) else {
            return Vec::new();
        };
        if state.is_expired(now, self.config.timeout) {
            map.remove(user_id);
            return Vec::new();
        }
        state.last_activity = now;
        state.messages.clone()
    }

    /// Append one turn, trimming the history to `max_messages`.
    pub fn add_message(&self, user_id: &str, role: Role, content: impl Into<String>) {
        self.add_message_at(user_id, role, content.into(), Instant::now());
    }

    fn add_message_at(&self, user_id: &str, role: Role, content: String, now: Instant) {
        let max = self.config.max_messages;
        let mut map = self.lock();
        let state = map
            .entry(user_id.to_string())
            .or_insert_with(|| ConversationState::new(now));
        state.messages.push(Turn::new(role, content));
        state.turn_count += 1;
        state.last_activity = now;
        if state.messages.len() > max {
            state.messages = cap_messages(std::mem::take(&mut state.messages), max);
        }
    }

    /// Drop a user's history. Returns whether anything was removed.
    pub fn clear_context(&self, user_id: &str) -> bool {
        self.lock().remove(user_id).is_some()
    }

    /// Drop every conversation. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let mut map = self.lock();
        let count = map.len();
        map.clear();
        count
    }

    /// Turns appended for `user_id` since its state was created.
    #[must_use]
    pub fn turn_count(&self, user_id: &str) -> Option<u64> {
        self.lock().get(user_id).map(|s| s.turn_count)
    }

    /// Evict every conversation idle longer than the timeout.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let timeout = self.config.timeout;
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, s| !s.is_expired(now, timeout));
        before - map.len()
    }

    #[must_use]
    pub fn stats(&self) -> ConversationStats {
        self.stats_at(Instant::now())
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats_at(&self, now: Instant) -> ConversationStats {
        let map = self.lock();
        let total_conversations = map.len();
        let active_conversations = map
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) <= ACTIVE_WINDOW)
            .count();
        let total_messages: usize = map.values().map(|s| s.messages.len()).sum();
        let avg = if total_conversations == 0 {
            0.0
        } else {
            let raw = total_messages as f64 / total_conversations as f64;
            (raw * 100.0).round() / 100.0
        };
        ConversationStats {
            total_conversations,
            active_conversations,
            total_messages,
            avg_messages_per_conversation: avg,
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep all system turns plus the newest `max - system_count` others.
fn cap_messages(messages: Vec<Turn>, max: usize) -> Vec<Turn> {
    let system_count = messages.iter().filter(|t| t.is_system()).count();
    let keep_other = max.saturating_sub(system_count);
    let other_count = messages.len() - system_count;
    let mut skip = other_count.saturating_sub(keep_other);

    messages
        .into_iter()
        .filter(|t| {
            if t.is_system() {
                return true;
            }
            if skip > 0 {
                skip -= 1;
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;
