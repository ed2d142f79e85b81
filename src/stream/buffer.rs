//! Replay buffer for pull clients

use crate::types::stream::StreamItem;
use std::collections::VecDeque;

/// Bounded FIFO of the most recently delivered items
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    items: VecDeque<StreamItem>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entries past capacity
    pub fn push(&mut self, item: StreamItem) {
        if self.capacity == 0 {
            return;
        }
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items with id strictly greater than `since_id` (all items when `None`),
    /// ascending, truncated to the newest `limit`
    pub fn since(&self, since_id: Option<u64>, limit: usize) -> Vec<StreamItem> {
        let matching: Vec<&StreamItem> = self
            .items
            .iter()
            .filter(|item| since_id.map_or(true, |since| item.id > since))
            .collect();

        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }
}
