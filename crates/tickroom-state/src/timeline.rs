//! Timeline - posts bucketed by official tick

use std::collections::BTreeMap;
use std::sync::Arc;

use tickroom_core::{Post, Tick};

/// Posts placed at one tick
#[derive(Debug)]
pub struct Bucket<D> {
    /// Confirmed posts, ascending by index
    room: Vec<Arc<Post<D>>>,
    /// Local predictions, in submission order
    local: Vec<Arc<Post<D>>>,
}

impl<D> Bucket<D> {
    fn new() -> Self {
        Bucket {
            room: Vec::new(),
            local: Vec::new(),
        }
    }

    pub fn room(&self) -> &[Arc<Post<D>>] {
        &self.room
    }

    pub fn local(&self) -> &[Arc<Post<D>>] {
        &self.local
    }

    pub fn is_empty(&self) -> bool {
        self.room.is_empty() && self.local.is_empty()
    }

    /// Posts in application order: confirmed, then local
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Post<D>>> {
        self.room.iter().chain(self.local.iter())
    }
}

/// Tick-indexed store of room and local posts
///
/// INVARIANT: no bucket is ever empty, and every `room` sequence is
/// sorted by index regardless of arrival order.
#[derive(Debug)]
pub struct Timeline<D> {
    buckets: BTreeMap<Tick, Bucket<D>>,
}

impl<D> Default for Timeline<D> {
    fn default() -> Self {
        Timeline {
            buckets: BTreeMap::new(),
        }
    }
}

impl<D> Timeline<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts at `tick`, if any
    pub fn bucket(&self, tick: Tick) -> Option<&Bucket<D>> {
        self.buckets.get(&tick)
    }

    /// Number of non-empty ticks
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Ticks holding at least one post, ascending
    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.buckets.keys().copied()
    }

    /// Place a confirmed post, keeping its bucket sorted by index
    ///
    /// Equal indices land after the existing ones.
    pub fn insert(&mut self, post: Arc<Post<D>>, tick: Tick) {
        let room = &mut self.buckets.entry(tick).or_insert_with(Bucket::new).room;
        let append = room.last().map_or(true, |last| last.index <= post.index);
        if append {
            room.push(post);
        } else {
            let at = room.partition_point(|p| p.index <= post.index);
            room.insert(at, post);
        }
    }

    /// Append a local post to its bucket
    pub fn insert_local(&mut self, post: Arc<Post<D>>, tick: Tick) {
        self.buckets
            .entry(tick)
            .or_insert_with(Bucket::new)
            .local
            .push(post);
    }

    /// Remove a confirmed post, by identity or else by index
    pub fn remove(&mut self, post: &Arc<Post<D>>, tick: Tick) -> bool {
        let Some(bucket) = self.buckets.get_mut(&tick) else {
            return false;
        };
        let position = bucket
            .room
            .iter()
            .position(|p| Arc::ptr_eq(p, post))
            .or_else(|| bucket.room.iter().position(|p| p.index == post.index));
        let removed = position.map(|at| bucket.room.remove(at)).is_some();
        self.drop_if_empty(tick);
        removed
    }

    /// Remove a local post, by identity or else by name
    pub fn remove_local(&mut self, post: &Arc<Post<D>>, tick: Tick) -> bool {
        let Some(bucket) = self.buckets.get_mut(&tick) else {
            return false;
        };
        let position = bucket
            .local
            .iter()
            .position(|p| Arc::ptr_eq(p, post))
            .or_else(|| bucket.local.iter().position(|p| p.name == post.name));
        let removed = position.map(|at| bucket.local.remove(at)).is_some();
        self.drop_if_empty(tick);
        removed
    }

    /// Move a confirmed post to a new tick, replacing its previous copy
    pub fn relocate(
        &mut self,
        previous: &Arc<Post<D>>,
        old_tick: Tick,
        post: Arc<Post<D>>,
        new_tick: Tick,
    ) {
        self.remove(previous, old_tick);
        self.insert(post, new_tick);
    }

    /// Forget every post strictly before `tick`
    pub fn prune_before(&mut self, tick: Tick) {
        self.buckets = self.buckets.split_off(&tick);
    }

    fn drop_if_empty(&mut self, tick: Tick) {
        if self.buckets.get(&tick).is_some_and(Bucket::is_empty) {
            self.buckets.remove(&tick);
        }
    }
}
