#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types expose their domain in the name for clarity"
)]

use std::collections::HashSet;

/// Set of topics the client is subscribed to; replayed after every reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionTracker {
    topics: HashSet<String>,
}

impl SubscriptionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
    }

    pub fn remove<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.topics.remove(topic.as_ref());
        }
    }

    #[must_use]
    pub fn has(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// All tracked topics, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_deduplicates() {
        let mut tracker = SubscriptionTracker::new();
        tracker.add(["a", "a", "b"]);

        assert_eq!(tracker.len(), 2);
        assert!(tracker.has("a"));
        assert!(tracker.has("b"));
    }

    #[test]
    fn remove_is_set_difference() {
        let mut tracker = SubscriptionTracker::new();
        tracker.add(["a", "b", "c"]);
        tracker.remove(["b", "missing"]);

        assert_eq!(tracker.len(), 2);
        assert!(!tracker.has("b"));

        let mut all = tracker.all();
        all.sort();
        assert_eq!(all, vec!["a".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut tracker = SubscriptionTracker::new();
        tracker.add(vec!["instrument:1001".to_owned(), "private".to_owned()]);
        tracker.clear();

        assert!(tracker.is_empty());
        assert!(tracker.all().is_empty());
    }
}
