//! Incrementally maintained, non-negative counters.

use crate::types::CounterKey;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default)]
pub struct Counters {
    values: HashMap<CounterKey, u32>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CounterKey) -> u32 {
        self.values.get(key).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, key: &CounterKey) -> u32 {
        let value = self.values.entry(key.clone()).or_insert(0);
        *value = value.saturating_add(1);
        *value
    }

    /// Decrement, clamping at zero.
    pub fn decrement(&mut self, key: &CounterKey) -> u32 {
        match self.values.get_mut(key) {
            Some(value) if *value > 0 => {
                *value -= 1;
                *value
            }
            _ => {
                warn!(counter = ?key, "counter decrement below zero clamped");
                0
            }
        }
    }

    pub fn set(&mut self, key: &CounterKey, value: u32) {
        self.values.insert(key.clone(), value);
    }

    pub fn remove(&mut self, key: &CounterKey) -> Option<u32> {
        self.values.remove(key)
    }

    /// Sum of all per-conversation unread counters.
    pub fn total_unread_messages(&self) -> u32 {
        self.values
            .iter()
            .filter(|(key, _)| matches!(key, CounterKey::ConversationUnread(_)))
            .map(|(_, value)| *value)
            .fold(0u32, u32::saturating_add)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
