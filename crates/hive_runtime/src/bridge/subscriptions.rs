// Subscription interest
//
// The handlers themselves live inside each context. The router only tracks
// which contexts care about a key, so a publish is sent only where someone
// is listening.

use std::collections::BTreeMap;

use hive_types::ContextId;
use parking_lot::Mutex;

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    keys: Mutex<BTreeMap<String, Vec<ContextId>>>,
}

impl SubscriptionTable {
    /// Record interest. Returns false if it was already recorded.
    pub fn add(&self, context: ContextId, key: &str) -> bool {
        let mut keys = self.keys.lock();
        let contexts = keys.entry(key.to_string()).or_default();
        if contexts.contains(&context) {
            return false;
        }
        contexts.push(context);
        true
    }

    pub fn remove(&self, context: ContextId, key: &str) -> bool {
        let mut keys = self.keys.lock();
        let Some(contexts) = keys.get_mut(key) else {
            return false;
        };
        let before = contexts.len();
        contexts.retain(|c| *c != context);
        let removed = contexts.len() != before;
        if contexts.is_empty() {
            keys.remove(key);
        }
        removed
    }

    /// Drop every interest held by `context`. Returns how many keys it had.
    pub fn remove_context(&self, context: ContextId) -> usize {
        let mut keys = self.keys.lock();
        let mut removed = 0;
        keys.retain(|_, contexts| {
            let before = contexts.len();
            contexts.retain(|c| *c != context);
            removed += before - contexts.len();
            !contexts.is_empty()
        });
        removed
    }

    /// Contexts subscribed to `key`, in the order they subscribed.
    pub fn subscribers(&self, key: &str) -> Vec<ContextId> {
        self.keys.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn keys_for(&self, context: ContextId) -> Vec<String> {
        self.keys
            .lock()
            .iter()
            .filter(|(_, contexts)| contexts.contains(&context))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_is_a_set() {
        let table = SubscriptionTable::default();
        assert!(table.add(ContextId(1), "cart"));
        assert!(!table.add(ContextId(1), "cart"));
        assert!(table.add(ContextId(2), "cart"));
        assert_eq!(table.subscribers("cart"), vec![ContextId(1), ContextId(2)]);

        assert!(table.remove(ContextId(1), "cart"));
        assert!(!table.remove(ContextId(1), "cart"));
        assert_eq!(table.subscribers("cart"), vec![ContextId(2)]);
    }

    #[test]
    fn test_remove_context_clears_every_key() {
        let table = SubscriptionTable::default();
        table.add(ContextId(3), "a");
        table.add(ContextId(3), "b");
        table.add(ContextId(4), "b");

        assert_eq!(table.remove_context(ContextId(3)), 2);
        assert!(table.subscribers("a").is_empty());
        assert_eq!(table.subscribers("b"), vec![ContextId(4)]);
        assert!(table.keys_for(ContextId(3)).is_empty());
    }
}
