//! Post records - where each known post currently sits on the timeline

use std::collections::HashMap;
use std::sync::Arc;

use tickroom_core::{Post, PostName, Tick};

/// A post and the tick it was placed at
#[derive(Debug)]
pub struct Placement<D> {
    pub post: Arc<Post<D>>,
    pub tick: Tick,
}

impl<D> Clone for Placement<D> {
    fn clone(&self) -> Self {
        Placement {
            post: Arc::clone(&self.post),
            tick: self.tick,
        }
    }
}

/// Confirmed posts by server index
///
/// Detects redelivery of a known index and finds its previous tick.
#[derive(Debug)]
pub struct ConfirmedPosts<D> {
    by_index: HashMap<u64, Placement<D>>,
}

impl<D> Default for ConfirmedPosts<D> {
    fn default() -> Self {
        ConfirmedPosts {
            by_index: HashMap::new(),
        }
    }
}

impl<D> ConfirmedPosts<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u64) -> Option<&Placement<D>> {
        self.by_index.get(&index)
    }

    /// Record a placement, returning the one it replaces
    pub fn insert(&mut self, index: u64, placement: Placement<D>) -> Option<Placement<D>> {
        self.by_index.insert(index, placement)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn prune_before(&mut self, tick: Tick) {
        self.by_index.retain(|_, placement| placement.tick >= tick);
    }
}

/// Local posts awaiting confirmation, by name
#[derive(Debug)]
pub struct LocalPostTracker<D> {
    pending: HashMap<PostName, Placement<D>>,
}

impl<D> Default for LocalPostTracker<D> {
    fn default() -> Self {
        LocalPostTracker {
            pending: HashMap::new(),
        }
    }
}

impl<D> LocalPostTracker<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &PostName) -> bool {
        self.pending.contains_key(name)
    }

    pub fn get(&self, name: &PostName) -> Option<&Placement<D>> {
        self.pending.get(name)
    }

    /// Track a pending post; a stale entry under the same name is returned
    pub fn insert(&mut self, name: PostName, placement: Placement<D>) -> Option<Placement<D>> {
        self.pending.insert(name, placement)
    }

    pub fn remove(&mut self, name: &PostName) -> Option<Placement<D>> {
        self.pending.remove(name)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn prune_before(&mut self, tick: Tick) {
        self.pending.retain(|_, placement| placement.tick >= tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickroom_core::RoomId;

    fn placement(name: &str, tick: Tick) -> Placement<()> {
        Placement {
            post: Arc::new(Post::local(RoomId::new("r"), 0, PostName::new(name), ())),
            tick,
        }
    }

    #[test]
    fn test_local_tracker_replace_returns_stale() {
        let mut tracker = LocalPostTracker::new();
        let name = PostName::new("abcdefgh");

        assert!(tracker.insert(name.clone(), placement("abcdefgh", 3)).is_none());
        let stale = tracker.insert(name.clone(), placement("abcdefgh", 5)).unwrap();
        assert_eq!(stale.tick, 3);
        assert_eq!(tracker.get(&name).unwrap().tick, 5);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_prune_before_keeps_window() {
        let mut tracker = LocalPostTracker::new();
        let mut confirmed = ConfirmedPosts::new();
        for tick in 0..6 {
            tracker.insert(PostName::new(format!("n{tick}")), placement("x", tick));
            confirmed.insert(tick as u64, placement("x", tick));
        }

        tracker.prune_before(4);
        confirmed.prune_before(4);

        assert_eq!(tracker.len(), 2);
        assert!(tracker.contains(&PostName::new("n4")));
        assert_eq!(confirmed.len(), 2);
        assert!(confirmed.get(3).is_none());
        assert!(confirmed.get(5).is_some());
    }
}
