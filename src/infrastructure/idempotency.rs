use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::info;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded record of message ids already handled by this node.
///
/// Not a ledger: once more than `capacity` ids are held the whole set is
/// cleared, so a redelivery of a very old message can be processed again.
pub struct IdempotencyGuard {
    seen: Mutex<HashSet<String>>,
    capacity: usize,
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IdempotencyGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    /// Records `message_id`. Returns `false` if it was already recorded.
    pub fn first_sighting(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(message_id) {
            return false;
        }
        seen.insert(message_id.to_string());
        if seen.len() > self.capacity {
            info!(
                "Processed message id set exceeded {} entries, clearing",
                self.capacity
            );
            seen.clear();
            seen.insert(message_id.to_string());
        }
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(message_id)
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sighting_is_rejected() {
        let guard = IdempotencyGuard::default();
        assert!(guard.first_sighting("m-1"));
        assert!(!guard.first_sighting("m-1"));
        assert!(guard.first_sighting("m-2"));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_set_is_cleared_past_capacity() {
        let guard = IdempotencyGuard::new(3);
        for id in ["a", "b", "c"] {
            assert!(guard.first_sighting(id));
        }
        assert_eq!(guard.len(), 3);

        assert!(guard.first_sighting("d"));
        assert_eq!(guard.len(), 1);
        // Old history is gone, the id that triggered the clear is kept.
        assert!(guard.first_sighting("a"));
        assert!(!guard.first_sighting("d"));
    }
}
