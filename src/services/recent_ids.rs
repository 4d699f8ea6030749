use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Fixed-capacity set that remembers insertion order and evicts the oldest
/// entries once the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct RecentIds<T> {
    capacity: usize,
    order: VecDeque<T>,
    members: HashSet<T>,
}

impl<T> RecentIds<T>
where
    T: Eq + Hash + Clone,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
        }
    }

    pub fn contains(&self, id: &T) -> bool {
        self.members.contains(id)
    }

    /// Returns false if the id was already present. Re-inserting does not
    /// refresh its position.
    pub fn insert(&mut self, id: T) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
