//! Topic subscriptions
//!
//! A `SubscriptionSet` holds the literal topic strings one session subscribed
//! to. Matching is exact string equality: `+` and `#` have no special meaning
//! and only ever match a publish to the identical topic string. Duplicate
//! subscriptions are a no-op.
//!
//! Concurrency note: callers must synchronize access (the owning
//! `ClientSession` keeps it behind a mutex).

use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    topics: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self {
            topics: HashSet::new(),
        }
    }

    /// Add a topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, topic: impl Into<String>) {
        self.topics.insert(topic.into());
    }

    /// Drop every subscription. UNSUBSCRIBE is not tracked per filter.
    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
