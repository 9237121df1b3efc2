//! SortedSet - members ordered by score, with an O(1) member index.

use core::ops::{Add, RangeBounds};

use log::debug;
use rand_core::RngCore;
use rustc_hash::FxHashMap;

use crate::skiplist::{Iter, SkipList, SkipNode};
use crate::storage::{BoundedSlab, BoundedStorage, Full, Storage, UnboundedStorage};
use crate::Index;

/// A set of unique members, each carrying a score, ordered by
/// `(score, member)`.
///
/// Pairs a [`SkipList`] and its storage with a member→score map. The map
/// answers "what is X's score" in O(1) and provides the current score every
/// skip list operation needs to find a member's node. Every mutation edits
/// both, so they never disagree.
///
/// # Example
///
/// ```
/// use nexus_sorted_set::SlabSortedSet;
/// use rand::rngs::SmallRng;
/// use rand::SeedableRng;
///
/// let mut board: SlabSortedSet<i64, SmallRng> = SlabSortedSet::new(SmallRng::seed_from_u64(1));
///
/// board.add(300, "carol");
/// board.add(100, "alice");
/// board.add(200, "bob");
///
/// assert_eq!(board.rank("bob"), Some(1));
/// assert_eq!(board.rev_rank("carol"), Some(0));
///
/// // Re-adding moves the member; cardinality is unchanged.
/// assert!(!board.add(50, "carol"));
/// assert_eq!(board.rank("carol"), Some(0));
/// assert_eq!(board.len(), 3);
///
/// let top: Vec<_> = board.range_by_score(150..).map(|(s, _)| *s).collect();
/// assert_eq!(top, vec![200]);
/// ```
#[derive(Debug)]
pub struct SortedSet<Sc, S, R, Idx = usize, const MAX_LEVEL: usize = 16>
where
    Idx: Index,
{
    storage: S,
    list: SkipList<Sc, S, Idx, R, MAX_LEVEL>,
    scores: FxHashMap<Box<[u8]>, Sc>,
}

impl<Sc, S, R, Idx, const MAX_LEVEL: usize> SortedSet<Sc, S, R, Idx, MAX_LEVEL>
where
    Sc: Ord + Copy,
    Idx: Index,
    R: RngCore,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Creates an empty set over the given storage.
    ///
    /// # Panics
    ///
    /// Panics if `storage` already holds nodes.
    pub fn with_storage(storage: S, rng: R) -> Self {
        Self::with_storage_and_ratio(storage, rng, 2)
    }

    /// Creates an empty set over the given storage with a custom level ratio.
    ///
    /// See [`SkipList::with_level_ratio`].
    ///
    /// # Panics
    ///
    /// Panics if `storage` already holds nodes.
    pub fn with_storage_and_ratio(storage: S, rng: R, level_ratio: u32) -> Self {
        assert!(storage.is_empty(), "storage must be empty");
        Self {
            storage,
            list: SkipList::with_level_ratio(rng, level_ratio),
            scores: FxHashMap::default(),
        }
    }

    /// Creates an empty set with default-constructed storage.
    pub fn new(rng: R) -> Self
    where
        S: Default,
    {
        Self::with_storage(S::default(), rng)
    }

    /// Returns the number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if the set has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Returns `true` if `member` is in the set.
    #[inline]
    pub fn contains(&self, member: impl AsRef<[u8]>) -> bool {
        self.scores.contains_key(member.as_ref())
    }

    /// Returns the score of `member`. O(1).
    #[inline]
    pub fn score(&self, member: impl AsRef<[u8]>) -> Option<Sc> {
        self.scores.get(member.as_ref()).copied()
    }

    // ========================================================================
    // Rank queries
    // ========================================================================

    /// Returns the 0-based position of `member` in ascending order.
    pub fn rank(&self, member: impl AsRef<[u8]>) -> Option<usize> {
        let member = member.as_ref();
        let score = self.scores.get(member)?;
        self.list.rank(&self.storage, score, member)
    }

    /// Returns the 0-based position of `member` in descending order.
    pub fn rev_rank(&self, member: impl AsRef<[u8]>) -> Option<usize> {
        self.rank(member).map(|rank| self.len() - 1 - rank)
    }

    /// Returns the member at 0-based `rank`.
    #[inline]
    pub fn get_by_rank(&self, rank: usize) -> Option<(&Sc, &[u8])> {
        self.list.get_by_rank(&self.storage, rank)
    }

    /// Members whose rank falls in `range`, ascending. Malformed or
    /// out-of-range bounds yield nothing.
    #[inline]
    pub fn range_by_rank(&self, range: impl RangeBounds<usize>) -> Iter<'_, Sc, S, Idx, MAX_LEVEL> {
        self.list.range_by_rank(&self.storage, range)
    }

    // ========================================================================
    // Score queries
    // ========================================================================

    /// Members whose score falls in `range`, ascending.
    #[inline]
    pub fn range_by_score(&self, range: impl RangeBounds<Sc>) -> Iter<'_, Sc, S, Idx, MAX_LEVEL> {
        self.list.range_by_score(&self.storage, range)
    }

    /// Number of members whose score falls in `range`. O(log n).
    #[inline]
    pub fn count_by_score(&self, range: impl RangeBounds<Sc>) -> usize {
        self.list.count_by_score(&self.storage, range)
    }

    /// All members, ascending. Use `.rev()` for descending.
    #[inline]
    pub fn iter(&self) -> Iter<'_, Sc, S, Idx, MAX_LEVEL> {
        self.list.iter(&self.storage)
    }

    /// The lowest-scored member.
    #[inline]
    pub fn first(&self) -> Option<(&Sc, &[u8])> {
        self.list.first(&self.storage)
    }

    /// The highest-scored member.
    #[inline]
    pub fn last(&self) -> Option<(&Sc, &[u8])> {
        self.list.last(&self.storage)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes `member`. Returns `false` if it was not present.
    pub fn remove(&mut self, member: impl AsRef<[u8]>) -> bool {
        let member = member.as_ref();
        let Some(score) = self.scores.remove(member) else {
            return false;
        };
        let removed = self.list.delete(&mut self.storage, &score, member);
        debug_assert!(removed, "member missing from skip list");
        true
    }

    /// Removes every member whose score falls in `range`, returning the count.
    pub fn remove_range_by_score(&mut self, range: impl RangeBounds<Sc>) -> usize {
        let scores = &mut self.scores;
        let removed = self
            .list
            .delete_range_by_score(&mut self.storage, range, |_, member| {
                scores.remove(&member);
            });
        debug!("removed {removed} members by score range, {} left", self.list.len());
        removed
    }

    /// Removes every member whose rank falls in `range`, returning the count.
    ///
    /// Malformed or out-of-range bounds remove nothing.
    pub fn remove_range_by_rank(&mut self, range: impl RangeBounds<usize>) -> usize {
        let scores = &mut self.scores;
        let removed = self
            .list
            .delete_range_by_rank(&mut self.storage, range, |_, member| {
                scores.remove(&member);
            });
        debug!("removed {removed} members by rank range, {} left", self.list.len());
        removed
    }

    /// Removes and returns the lowest-scored member.
    pub fn pop_min(&mut self) -> Option<(Sc, Box<[u8]>)> {
        let (score, member) = self.list.pop_first(&mut self.storage)?;
        self.scores.remove(&member);
        Some((score, member))
    }

    /// Removes and returns the highest-scored member.
    pub fn pop_max(&mut self) -> Option<(Sc, Box<[u8]>)> {
        let (score, member) = self.list.pop_last(&mut self.storage)?;
        self.scores.remove(&member);
        Some((score, member))
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        debug!("clearing sorted set of {} members", self.list.len());
        self.list.clear(&mut self.storage);
        self.scores.clear();
    }

    /// Moves an existing member to `score`. Returns `false` if absent.
    ///
    /// Re-scoring reuses the node's slot, so it succeeds even when bounded
    /// storage is full.
    fn rescore(&mut self, score: Sc, member: &[u8]) -> bool {
        let Some(current) = self.scores.get_mut(member) else {
            return false;
        };
        if *current != score {
            self.list
                .update_score(&mut self.storage, current, member, score)
                .expect("member missing from skip list");
            *current = score;
        }
        true
    }

    #[cfg(test)]
    fn assert_consistent(&self)
    where
        Sc: core::fmt::Debug,
    {
        self.list.assert_invariants(&self.storage);
        assert_eq!(self.scores.len(), self.list.len());
        assert_eq!(self.storage.len(), self.list.len());
        for (score, member) in self.iter() {
            assert_eq!(self.scores.get(member), Some(score));
        }
    }
}

// ============================================================================
// Unbounded storage impl
// ============================================================================

impl<Sc, S, R, Idx, const MAX_LEVEL: usize> SortedSet<Sc, S, R, Idx, MAX_LEVEL>
where
    Sc: Ord + Copy,
    Idx: Index,
    R: RngCore,
    S: UnboundedStorage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Adds `member` with `score`, or moves it to `score` if already present.
    ///
    /// Returns `true` if the member is new.
    pub fn add(&mut self, score: Sc, member: impl AsRef<[u8]>) -> bool {
        let member = member.as_ref();
        if self.rescore(score, member) {
            return false;
        }
        self.list.insert(&mut self.storage, score, member);
        self.scores.insert(Box::from(member), score);
        true
    }

    /// Adds `delta` to the score of `member` and returns the new score.
    ///
    /// An absent member is added with score `delta`.
    pub fn incr_by(&mut self, member: impl AsRef<[u8]>, delta: Sc) -> Sc
    where
        Sc: Add<Output = Sc>,
    {
        let member = member.as_ref();
        let score = match self.scores.get(member) {
            Some(&current) => current + delta,
            None => delta,
        };
        self.add(score, member);
        score
    }
}

// ============================================================================
// Bounded storage impl
// ============================================================================

impl<Sc, S, R, Idx, const MAX_LEVEL: usize> SortedSet<Sc, S, R, Idx, MAX_LEVEL>
where
    Sc: Ord + Copy,
    Idx: Index,
    R: RngCore,
    S: BoundedStorage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Adds `member` with `score`, or moves it to `score` if already present.
    ///
    /// Returns `Ok(true)` if the member is new. Fails only when the member is
    /// new and storage is full; moving an existing member always succeeds.
    pub fn try_add(
        &mut self,
        score: Sc,
        member: impl AsRef<[u8]>,
    ) -> Result<bool, Full<(Sc, Box<[u8]>)>> {
        let member = member.as_ref();
        if self.rescore(score, member) {
            return Ok(false);
        }
        self.list.try_insert(&mut self.storage, score, member)?;
        self.scores.insert(Box::from(member), score);
        Ok(true)
    }

    /// Adds `delta` to the score of `member` and returns the new score.
    pub fn try_incr_by(
        &mut self,
        member: impl AsRef<[u8]>,
        delta: Sc,
    ) -> Result<Sc, Full<(Sc, Box<[u8]>)>>
    where
        Sc: Add<Output = Sc>,
    {
        let member = member.as_ref();
        let score = match self.scores.get(member) {
            Some(&current) => current + delta,
            None => delta,
        };
        self.try_add(score, member)?;
        Ok(score)
    }

    /// Maximum number of members.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }
}

impl<Sc, R, Idx, const MAX_LEVEL: usize>
    SortedSet<Sc, BoundedSlab<SkipNode<Sc, Idx, MAX_LEVEL>, Idx>, R, Idx, MAX_LEVEL>
where
    Sc: Ord + Copy,
    Idx: Index,
    R: RngCore,
{
    /// Creates an empty set holding at most `capacity` members.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or does not fit the `Idx` handle type.
    pub fn with_capacity(rng: R, capacity: usize) -> Self {
        Self::with_storage(BoundedSlab::with_capacity(capacity), rng)
    }

    /// Creates an empty bounded set with a custom level ratio.
    ///
    /// `level_ratio` controls memory vs search speed tradeoff:
    /// - 2: Standard (p=0.5), ~2 links per node average
    /// - 4: Redis-style (p=0.25), ~1.33 links per node average
    pub fn with_capacity_and_ratio(rng: R, capacity: usize, level_ratio: u32) -> Self {
        Self::with_storage_and_ratio(BoundedSlab::with_capacity(capacity), rng, level_ratio)
    }
}

/// A sorted set over growable slab storage.
pub type SlabSortedSet<Sc, R, const MAX_LEVEL: usize = 16> =
    SortedSet<Sc, crate::SlabSkipStorage<Sc, MAX_LEVEL>, R, usize, MAX_LEVEL>;

/// A sorted set over fixed-capacity storage with `Idx` node handles.
pub type BoundedSortedSet<Sc, R, const MAX_LEVEL: usize = 16, Idx = usize> =
    SortedSet<Sc, crate::BoundedSkipStorage<Sc, MAX_LEVEL, Idx>, R, Idx, MAX_LEVEL>;
