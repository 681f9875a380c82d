use std::collections::{BTreeMap, VecDeque};

use crate::models::outbound::{OutboundRequest, Priority};

/// Pending requests for one target: priority first, FIFO within a priority.
#[derive(Debug, Default)]
pub struct TargetQueue {
    levels: BTreeMap<Priority, VecDeque<OutboundRequest>>,
    len: usize,
}

impl TargetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queue `request`; if that puts the queue over `limit`, evict and return
    /// the oldest request of the lowest non-empty priority.
    pub fn push(&mut self, request: OutboundRequest, limit: usize) -> Option<OutboundRequest> {
        self.levels
            .entry(request.priority)
            .or_default()
            .push_back(request);
        self.len += 1;
        if self.len > limit.max(1) {
            return self.evict();
        }
        None
    }

    fn evict(&mut self) -> Option<OutboundRequest> {
        let victim = self
            .levels
            .values_mut()
            .find(|level| !level.is_empty())
            .and_then(VecDeque::pop_front);
        if victim.is_some() {
            self.len -= 1;
        }
        victim
    }

    pub fn pop(&mut self) -> Option<OutboundRequest> {
        let next = self
            .levels
            .values_mut()
            .rev()
            .find(|level| !level.is_empty())
            .and_then(VecDeque::pop_front);
        if next.is_some() {
            self.len -= 1;
        }
        next
    }

    pub fn drain(&mut self) -> Vec<OutboundRequest> {
        self.len = 0;
        std::mem::take(&mut self.levels)
            .into_values()
            .rev()
            .flatten()
            .collect()
    }
}
