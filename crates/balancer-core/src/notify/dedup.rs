use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::types::Notification;

/// Number of recent notifications remembered for duplicate suppression.
pub const DEDUP_WINDOW_CAPACITY: usize = 32;

/// Fixed-size window of recently relayed notifications, oldest evicted first.
///
/// The membership scan and the insert happen under one lock, so two identical
/// notifications racing in from different backends cannot both be judged new.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    recent: Mutex<VecDeque<Notification>>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW_CAPACITY)
    }
}

impl DedupWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, recent: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Records `notification` and returns `true` if it was not already in the
    /// window.
    pub fn insert_if_new(&self, notification: &Notification) -> bool {
        let mut recent = self.recent.lock();
        if recent.contains(notification) {
            return false;
        }

        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(notification.clone());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent.lock().is_empty()
    }
}
