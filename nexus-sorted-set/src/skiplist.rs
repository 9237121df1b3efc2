//! Skip list ordered by `(score, member)` with rank support.
//!
//! A skip list provides O(log n) expected time for insert, lookup and
//! removal with no rebalancing step. This one is *augmented*: every link
//! records its **span**, the number of level-0 positions it jumps. Summing
//! spans on the way down gives the rank of whatever node the search stops at,
//! which is what makes rank queries and rank-range deletes logarithmic.
//!
//! # Design
//!
//! Nodes live in external [`Storage`] and are linked by handle. The list
//! itself only owns the header lanes (`head`), the tail handle, the lane count
//! and the length. A predecessor handle of [`Index::NONE`] means "the header".
//!
//! ```text
//! Level 2:  HEAD ──────────────4────────────► E ──────1──────► NIL
//! Level 1:  HEAD ──────2──────► B ─────2─────► E ──────1──────► NIL
//! Level 0:  HEAD ──1──► A ──1──► B ──1──► C ──1──► D ──1──► E ──0──► NIL
//!                         ◄──────  ◄──────  ◄──────  ◄──────   (backward)
//! ```
//!
//! The header is position 0 and the i-th node is position i. A link into
//! `NIL` spans to the end of the list (`len - position(origin)`), so at every
//! lane the spans reachable from the header add up to `len`.
//!
//! # Example
//!
//! ```rust
//! use nexus_sorted_set::{SkipList, SlabSkipStorage};
//! use rand::SeedableRng;
//! use rand::rngs::SmallRng;
//!
//! let mut storage: SlabSkipStorage<i64> = SlabSkipStorage::new();
//! let mut list: SkipList<i64, SlabSkipStorage<i64>, usize, SmallRng> =
//!     SkipList::new(SmallRng::seed_from_u64(7));
//!
//! list.insert(&mut storage, 30, "carol");
//! list.insert(&mut storage, 10, "alice");
//! list.insert(&mut storage, 20, "bob");
//!
//! assert_eq!(list.rank(&storage, &20, b"bob"), Some(1));
//! assert_eq!(list.get_by_rank(&storage, 0), Some((&10, &b"alice"[..])));
//!
//! let top: Vec<_> = list.range_by_score(&storage, 15..).map(|(_, m)| m).collect();
//! assert_eq!(top, vec![&b"bob"[..], &b"carol"[..]]);
//! ```

use core::cmp::Ordering;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ops::{Bound, RangeBounds};

use log::trace;
use rand_core::RngCore;

use crate::index::Index;
use crate::storage::{BoundedStorage, Full, Storage, UnboundedStorage};

// ============================================================================
// SkipNode
// ============================================================================

/// One lane of a node (or of the header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link<Idx> {
    forward: Idx,
    /// Level-0 positions from the origin to `forward`, or to the end of the
    /// list when `forward` is `NONE`.
    span: usize,
}

impl<Idx: Index> Link<Idx> {
    const EMPTY: Self = Self {
        forward: Idx::NONE,
        span: 0,
    };
}

/// A `(score, member)` entry of the skip list.
///
/// Nodes participate in lanes `0..height`. Only those lanes are meaningful;
/// the rest of the fixed-size link array stays empty.
#[derive(Debug, Clone)]
pub struct SkipNode<Sc, Idx, const MAX_LEVEL: usize> {
    score: Sc,
    member: Box<[u8]>,
    links: [Link<Idx>; MAX_LEVEL],
    /// Preceding level-0 node, `NONE` for the first node.
    backward: Idx,
    height: u8,
}

impl<Sc, Idx: Index, const MAX_LEVEL: usize> SkipNode<Sc, Idx, MAX_LEVEL> {
    #[inline]
    fn new(score: Sc, member: Box<[u8]>, height: usize) -> Self {
        Self {
            score,
            member,
            links: [Link::EMPTY; MAX_LEVEL],
            backward: Idx::NONE,
            height: height as u8,
        }
    }

    /// The score this node is ordered by.
    #[inline]
    pub fn score(&self) -> &Sc {
        &self.score
    }

    /// The member bytes.
    #[inline]
    pub fn member(&self) -> &[u8] {
        &self.member
    }

    /// Number of lanes this node participates in.
    #[inline]
    pub fn height(&self) -> usize {
        self.height as usize
    }

    /// Consumes the node, returning its score and member.
    #[inline]
    pub fn into_parts(self) -> (Sc, Box<[u8]>) {
        (self.score, self.member)
    }
}

impl<Sc: Ord, Idx, const MAX_LEVEL: usize> SkipNode<Sc, Idx, MAX_LEVEL> {
    /// Orders by score, then by member bytes.
    #[inline]
    fn cmp_key(&self, score: &Sc, member: &[u8]) -> Ordering {
        self.score
            .cmp(score)
            .then_with(|| (*self.member).cmp(member))
    }
}

// ============================================================================
// SkipList
// ============================================================================

/// A skip list of `(score, member)` entries backed by external storage.
///
/// Entries are ordered by score, ties broken by comparing members bytewise.
/// The list never checks for duplicate members; that is the job of the
/// caller (see [`SortedSet`](crate::SortedSet)).
///
/// # Type Parameters
///
/// - `Sc`: Score type, must implement `Ord`
/// - `S`: Storage type implementing [`Storage`]
/// - `Idx`: Handle type of the storage, defaults to `usize`
/// - `R`: Random number generator implementing [`RngCore`]
/// - `MAX_LEVEL`: Maximum number of lanes, defaults to 16 (~65K elements efficient)
#[derive(Debug)]
pub struct SkipList<Sc, S, Idx = usize, R = (), const MAX_LEVEL: usize = 16>
where
    Idx: Index,
{
    /// Header lanes. Only `head[..level]` is maintained.
    head: [Link<Idx>; MAX_LEVEL],
    /// Last node at level 0.
    tail: Idx,
    rng: R,
    /// Lanes in use, `1..=MAX_LEVEL`.
    level: usize,
    len: usize,
    /// log2(level_ratio). Scales the geometric height distribution.
    level_divisor: u8,
    _marker: PhantomData<(Sc, S)>,
}

impl<Sc, S, Idx, R, const MAX_LEVEL: usize> SkipList<Sc, S, Idx, R, MAX_LEVEL>
where
    Sc: Ord,
    Idx: Index,
    R: RngCore,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Creates a new empty skip list.
    ///
    /// Uses the default level ratio of 2 (p=0.5): each lane holds on
    /// average half of the nodes of the lane below.
    pub fn new(rng: R) -> Self {
        Self::with_level_ratio(rng, 2)
    }

    /// Creates a new empty skip list with a custom level ratio.
    ///
    /// - 2: Standard (p=0.5), ~2 links per node average
    /// - 4: Redis-style (p=0.25), ~1.33 links per node average
    ///
    /// Must be a power of 2 and >= 2. Invalid values are rounded up.
    ///
    /// # Panics
    ///
    /// Panics if `MAX_LEVEL` is 0 or does not fit in a `u8`.
    pub fn with_level_ratio(rng: R, level_ratio: u32) -> Self {
        assert!(
            MAX_LEVEL > 0 && MAX_LEVEL <= u8::MAX as usize,
            "MAX_LEVEL must be in 1..=255"
        );
        let level_ratio = level_ratio.max(2).next_power_of_two();
        Self {
            head: [Link::EMPTY; MAX_LEVEL],
            tail: Idx::NONE,
            rng,
            level: 1,
            len: 0,
            level_divisor: level_ratio.trailing_zeros() as u8,
            _marker: PhantomData,
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of lanes currently in use.
    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Resolves a handle returned by an insert.
    #[inline]
    pub fn get<'a>(&self, storage: &'a S, idx: Idx) -> Option<(&'a Sc, &'a [u8])>
    where
        Sc: 'a,
        Idx: 'a,
    {
        storage.get(idx).map(|node| (&node.score, &node.member[..]))
    }

    /// Returns the lowest entry. O(1).
    #[inline]
    pub fn first<'a>(&self, storage: &'a S) -> Option<(&'a Sc, &'a [u8])>
    where
        Sc: 'a,
        Idx: 'a,
    {
        self.get(storage, self.head[0].forward)
    }

    /// Returns the highest entry. O(1) thanks to the tail handle.
    #[inline]
    pub fn last<'a>(&self, storage: &'a S) -> Option<(&'a Sc, &'a [u8])>
    where
        Sc: 'a,
        Idx: 'a,
    {
        self.get(storage, self.tail)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes the entry matching both `score` and `member`.
    ///
    /// Returns `false` and leaves the list untouched if there is no such entry.
    pub fn delete(&mut self, storage: &mut S, score: &Sc, member: &[u8]) -> bool {
        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut rank = [0; MAX_LEVEL];
        self.search(storage, score, member, &mut update, &mut rank);

        let candidate = self.link(storage, update[0], 0).forward;
        if candidate.is_none()
            || Self::node(storage, candidate).cmp_key(score, member) != Ordering::Equal
        {
            return false;
        }

        self.remove_node(storage, candidate, &update);
        true
    }

    /// Removes the lowest entry and returns it.
    pub fn pop_first(&mut self, storage: &mut S) -> Option<(Sc, Box<[u8]>)> {
        let first = self.head[0].forward;
        if first.is_none() {
            return None;
        }
        // The header precedes the first node on every lane.
        let update = [Idx::NONE; MAX_LEVEL];
        Some(self.remove_node(storage, first, &update).into_parts())
    }

    /// Removes the highest entry and returns it.
    ///
    /// O(log n): the predecessors on every lane have to be searched.
    pub fn pop_last(&mut self, storage: &mut S) -> Option<(Sc, Box<[u8]>)> {
        let last = self.tail;
        if last.is_none() {
            return None;
        }

        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut rank = [0; MAX_LEVEL];
        {
            let view: &S = storage;
            let node = Self::node(view, last);
            self.search(view, &node.score, &node.member, &mut update, &mut rank);
        }
        Some(self.remove_node(storage, last, &update).into_parts())
    }

    /// Removes every entry whose score falls in `range`.
    ///
    /// `on_remove` receives each removed entry exactly once, right after it
    /// has been unlinked, in ascending order. Returns the number removed.
    ///
    /// ```rust
    /// use nexus_sorted_set::{SkipList, SlabSkipStorage};
    /// use rand::SeedableRng;
    /// use rand::rngs::SmallRng;
    ///
    /// let mut storage: SlabSkipStorage<i64> = SlabSkipStorage::new();
    /// let mut list: SkipList<i64, SlabSkipStorage<i64>, usize, SmallRng> =
    ///     SkipList::new(SmallRng::seed_from_u64(1));
    /// for (score, member) in [(1, "a"), (2, "b"), (3, "c")] {
    ///     list.insert(&mut storage, score, member);
    /// }
    ///
    /// let mut gone = Vec::new();
    /// let removed = list.delete_range_by_score(&mut storage, 2.., |_, m| gone.push(m));
    /// assert_eq!(removed, 2);
    /// assert_eq!(gone, vec![Box::from(&b"b"[..]), Box::from(&b"c"[..])]);
    /// ```
    pub fn delete_range_by_score<F>(
        &mut self,
        storage: &mut S,
        range: impl RangeBounds<Sc>,
        mut on_remove: F,
    ) -> usize
    where
        F: FnMut(Sc, Box<[u8]>),
    {
        let mut update = [Idx::NONE; MAX_LEVEL];
        self.seek_score_start(storage, range.start_bound(), &mut update);

        let mut next = self.link(storage, update[0], 0).forward;
        let mut removed = 0;
        while next.is_some() && within_end(&Self::node(storage, next).score, range.end_bound()) {
            let following = Self::node(storage, next).links[0].forward;
            let (score, member) = self.remove_node(storage, next, &update).into_parts();
            on_remove(score, member);
            removed += 1;
            next = following;
        }
        removed
    }

    /// Removes every entry whose 0-based rank falls in `range`.
    ///
    /// Malformed ranges (start after end, end past the last rank, empty
    /// list) remove nothing. `on_remove` is called as in
    /// [`delete_range_by_score`](Self::delete_range_by_score).
    pub fn delete_range_by_rank<F>(
        &mut self,
        storage: &mut S,
        range: impl RangeBounds<usize>,
        mut on_remove: F,
    ) -> usize
    where
        F: FnMut(Sc, Box<[u8]>),
    {
        let Some((start, end)) = self.rank_bounds(&range) else {
            return 0;
        };

        // Stop on every lane at the node holding position `start`, which is
        // the predecessor of rank `start`.
        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none() || traversed + link.span > start {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }
            update[i] = current;
        }

        let count = end - start + 1;
        let mut next = self.link(storage, current, 0).forward;
        let mut removed = 0;
        while removed < count && next.is_some() {
            let following = Self::node(storage, next).links[0].forward;
            let (score, member) = self.remove_node(storage, next, &update).into_parts();
            on_remove(score, member);
            removed += 1;
            next = following;
        }
        removed
    }

    /// Removes all entries from the skip list and frees their slots.
    pub fn clear(&mut self, storage: &mut S) {
        let mut current = self.head[0].forward;
        while current.is_some() {
            let next = Self::node(storage, current).links[0].forward;
            storage.remove(current);
            current = next;
        }

        self.head = [Link::EMPTY; MAX_LEVEL];
        self.tail = Idx::NONE;
        self.level = 1;
        self.len = 0;
    }

    // ========================================================================
    // Re-scoring
    // ========================================================================

    /// Moves the entry `(score, member)` to `new_score`.
    ///
    /// The node is unlinked, re-scored while detached, and linked again at
    /// its new position. Its storage slot (and therefore its handle) is kept,
    /// so this never needs a free slot. Returns `None` if the entry is absent.
    ///
    /// The node keeps the height it was drawn with at insert; no new height
    /// is drawn. Lane distribution is unaffected since heights are independent
    /// of scores.
    pub fn update_score(
        &mut self,
        storage: &mut S,
        score: &Sc,
        member: &[u8],
        new_score: Sc,
    ) -> Option<Idx> {
        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut rank = [0; MAX_LEVEL];
        self.search(storage, score, member, &mut update, &mut rank);

        let idx = self.link(storage, update[0], 0).forward;
        if idx.is_none() || Self::node(storage, idx).cmp_key(score, member) != Ordering::Equal {
            return None;
        }

        self.detach(storage, idx, &update);

        let height = {
            let node = storage.get_mut(idx).expect("invalid index");
            node.score = new_score;
            node.height()
        };
        {
            let view: &S = storage;
            let node = Self::node(view, idx);
            self.search(view, &node.score, &node.member, &mut update, &mut rank);
        }
        self.attach(storage, idx, height, &mut update, &mut rank);
        Some(idx)
    }

    // ========================================================================
    // Rank queries
    // ========================================================================

    /// Returns the 0-based rank of `(score, member)`, or `None` if absent.
    pub fn rank(&self, storage: &S, score: &Sc, member: &[u8]) -> Option<usize> {
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none()
                    || Self::node(storage, link.forward).cmp_key(score, member) == Ordering::Greater
                {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }

            // `current` is the last node <= the key; it may be the key itself.
            if current.is_some()
                && Self::node(storage, current).cmp_key(score, member) == Ordering::Equal
            {
                return Some(traversed - 1);
            }
        }
        None
    }

    /// Returns the entry at 0-based `rank`, or `None` if `rank >= len`.
    #[inline]
    pub fn get_by_rank<'a>(&self, storage: &'a S, rank: usize) -> Option<(&'a Sc, &'a [u8])>
    where
        Sc: 'a,
        Idx: 'a,
    {
        if rank >= self.len {
            return None;
        }
        self.get(storage, self.locate(storage, rank))
    }

    /// Returns the entries whose 0-based rank falls in `range`, in order.
    ///
    /// Malformed ranges (start after end, end past the last rank, empty
    /// list) yield nothing; bounds are never clamped.
    pub fn range_by_rank<'a>(
        &self,
        storage: &'a S,
        range: impl RangeBounds<usize>,
    ) -> Iter<'a, Sc, S, Idx, MAX_LEVEL> {
        match self.rank_bounds(&range) {
            Some((start, end)) => Iter {
                storage,
                front: self.locate(storage, start),
                back: self.locate(storage, end),
                remaining: end - start + 1,
                _marker: PhantomData,
            },
            None => Iter::empty(storage),
        }
    }

    // ========================================================================
    // Score queries
    // ========================================================================

    /// Returns the entries whose score falls in `range`, in order.
    ///
    /// Use `..` for an unbounded side and `Bound::Excluded` for an exclusive
    /// minimum. The iterator is double-ended; `.rev()` walks the backward
    /// links from the top of the range.
    pub fn range_by_score<'a>(
        &self,
        storage: &'a S,
        range: impl RangeBounds<Sc>,
    ) -> Iter<'a, Sc, S, Idx, MAX_LEVEL> {
        match self.score_window(storage, &range) {
            Some((front, back, remaining)) => Iter {
                storage,
                front,
                back,
                remaining,
                _marker: PhantomData,
            },
            None => Iter::empty(storage),
        }
    }

    /// Counts the entries whose score falls in `range` without visiting them.
    #[inline]
    pub fn count_by_score(&self, storage: &S, range: impl RangeBounds<Sc>) -> usize {
        self.score_window(storage, &range)
            .map_or(0, |(_, _, count)| count)
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Returns a double-ended iterator over all entries in order.
    #[inline]
    pub fn iter<'a>(&self, storage: &'a S) -> Iter<'a, Sc, S, Idx, MAX_LEVEL> {
        Iter {
            storage,
            front: self.head[0].forward,
            back: self.tail,
            remaining: self.len,
            _marker: PhantomData,
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    #[inline]
    fn node(storage: &S, idx: Idx) -> &SkipNode<Sc, Idx, MAX_LEVEL> {
        debug_assert!(storage.get(idx).is_some(), "invalid index");
        // Safety: every handle reachable from a link is occupied.
        unsafe { storage.get_unchecked(idx) }
    }

    #[inline]
    fn node_mut(storage: &mut S, idx: Idx) -> &mut SkipNode<Sc, Idx, MAX_LEVEL> {
        debug_assert!(storage.get(idx).is_some(), "invalid index");
        // Safety: every handle reachable from a link is occupied.
        unsafe { storage.get_unchecked_mut(idx) }
    }

    /// Lane `level` of `at`, where `NONE` is the header.
    #[inline]
    fn link(&self, storage: &S, at: Idx, level: usize) -> Link<Idx> {
        if at.is_none() {
            self.head[level]
        } else {
            Self::node(storage, at).links[level]
        }
    }

    /// Mutable lane `level` of `at`. Takes the header array rather than
    /// `self` so the caller keeps access to the other fields.
    #[inline]
    fn link_mut<'a>(
        head: &'a mut [Link<Idx>; MAX_LEVEL],
        storage: &'a mut S,
        at: Idx,
        level: usize,
    ) -> &'a mut Link<Idx>
    where
        Sc: 'a,
        Idx: 'a,
    {
        if at.is_none() {
            &mut head[level]
        } else {
            &mut Self::node_mut(storage, at).links[level]
        }
    }

    /// Finds, on every lane in use, the last node strictly before
    /// `(score, member)` and the position it sits at.
    fn search(
        &self,
        storage: &S,
        score: &Sc,
        member: &[u8],
        update: &mut [Idx; MAX_LEVEL],
        rank: &mut [usize; MAX_LEVEL],
    ) {
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none()
                    || Self::node(storage, link.forward).cmp_key(score, member) != Ordering::Less
                {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }
            update[i] = current;
            rank[i] = traversed;
        }
    }

    /// Fills `update` with the last node before `start` on every lane and
    /// returns how many nodes sit before `start`.
    fn seek_score_start(
        &self,
        storage: &S,
        start: Bound<&Sc>,
        update: &mut [Idx; MAX_LEVEL],
    ) -> usize {
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none()
                    || !before_start(&Self::node(storage, link.forward).score, start)
                {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }
            update[i] = current;
        }
        traversed
    }

    /// Returns the last node within `end` and its position (0 if none).
    fn seek_score_end(&self, storage: &S, end: Bound<&Sc>) -> (Idx, usize) {
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none()
                    || !within_end(&Self::node(storage, link.forward).score, end)
                {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }
        }
        (current, traversed)
    }

    /// First node, last node and entry count of a score range.
    fn score_window<B: RangeBounds<Sc>>(&self, storage: &S, range: &B) -> Option<(Idx, Idx, usize)> {
        let mut update = [Idx::NONE; MAX_LEVEL];
        let before = self.seek_score_start(storage, range.start_bound(), &mut update);
        let (last, through) = self.seek_score_end(storage, range.end_bound());
        if through <= before {
            return None;
        }
        let first = self.link(storage, update[0], 0).forward;
        Some((first, last, through - before))
    }

    /// Normalizes a rank range to inclusive `(start, end)`, or `None` if it
    /// selects nothing valid.
    fn rank_bounds<B: RangeBounds<usize>>(&self, range: &B) -> Option<(usize, usize)> {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.checked_add(1)?,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end,
            Bound::Excluded(&end) => end.checked_sub(1)?,
            Bound::Unbounded => self.len.checked_sub(1)?,
        };
        if start > end || end >= self.len {
            return None;
        }
        Some((start, end))
    }

    /// Node at 0-based `rank`. Caller checks `rank < len`.
    fn locate(&self, storage: &S, rank: usize) -> Idx {
        let target = rank + 1;
        let mut current = Idx::NONE;
        let mut traversed = 0;
        for i in (0..self.level).rev() {
            loop {
                let link = self.link(storage, current, i);
                if link.forward.is_none() || traversed + link.span > target {
                    break;
                }
                traversed += link.span;
                current = link.forward;
            }
            if traversed == target {
                return current;
            }
        }
        Idx::NONE
    }

    /// Generates a height in `1..=MAX_LEVEL`.
    ///
    /// Counts trailing ones of a random word: each extra lane is a coin
    /// flip (or `level_divisor` flips for sparser ratios).
    #[inline]
    fn random_height(&mut self) -> usize {
        let r = self.rng.next_u32();
        let extra = (r.trailing_ones() as usize) / (self.level_divisor as usize);
        (extra + 1).min(MAX_LEVEL)
    }

    /// Splices a detached node in after the predecessors found by
    /// [`search`](Self::search), fixing spans on every lane in use.
    fn attach(
        &mut self,
        storage: &mut S,
        idx: Idx,
        height: usize,
        update: &mut [Idx; MAX_LEVEL],
        rank: &mut [usize; MAX_LEVEL],
    ) {
        if height > self.level {
            for i in self.level..height {
                update[i] = Idx::NONE;
                rank[i] = 0;
                // Every existing node is skipped by the new header lane.
                self.head[i] = Link {
                    forward: Idx::NONE,
                    span: self.len,
                };
            }
            trace!("skip list grew from {} to {} lanes", self.level, height);
            self.level = height;
        }

        for i in 0..height {
            let prev = self.link(storage, update[i], i);
            let skipped = rank[0] - rank[i];
            Self::node_mut(storage, idx).links[i] = Link {
                forward: prev.forward,
                span: prev.span - skipped,
            };
            *Self::link_mut(&mut self.head, storage, update[i], i) = Link {
                forward: idx,
                span: skipped + 1,
            };
        }

        // Lanes the node does not reach now jump over one more node.
        for i in height..self.level {
            Self::link_mut(&mut self.head, storage, update[i], i).span += 1;
        }

        let next = {
            let node = Self::node_mut(storage, idx);
            node.backward = update[0];
            node.links[0].forward
        };
        if next.is_some() {
            Self::node_mut(storage, next).backward = idx;
        } else {
            self.tail = idx;
        }

        self.len += 1;
    }

    /// Unlinks `idx` given its predecessor on every lane in use.
    ///
    /// This is the only place spans are adjusted for a removal; every delete
    /// path goes through here. The node stays in storage.
    fn detach(&mut self, storage: &mut S, idx: Idx, update: &[Idx; MAX_LEVEL]) {
        let (links, backward) = {
            let node = Self::node(storage, idx);
            (node.links, node.backward)
        };

        for i in 0..self.level {
            let prev = Self::link_mut(&mut self.head, storage, update[i], i);
            if prev.forward == idx {
                prev.span = prev.span + links[i].span - 1;
                prev.forward = links[i].forward;
            } else {
                prev.span -= 1;
            }
        }

        let next = links[0].forward;
        if next.is_some() {
            Self::node_mut(storage, next).backward = backward;
        } else {
            self.tail = backward;
        }

        let before = self.level;
        while self.level > 1 && self.head[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        if self.level != before {
            trace!("skip list shrank from {} to {} lanes", before, self.level);
        }

        self.len -= 1;
    }

    /// Unlinks `idx` and releases its slot.
    #[inline]
    fn remove_node(
        &mut self,
        storage: &mut S,
        idx: Idx,
        update: &[Idx; MAX_LEVEL],
    ) -> SkipNode<Sc, Idx, MAX_LEVEL> {
        self.detach(storage, idx, update);
        storage.remove(idx).expect("invalid index")
    }

    /// Walks the whole structure and panics on any broken invariant:
    /// level-0 order, backward links, tail, length, lane count, and the span
    /// of every link on every lane.
    #[doc(hidden)]
    pub fn assert_invariants(&self, storage: &S) {
        assert!(self.level >= 1 && self.level <= MAX_LEVEL, "lane count out of range");

        let mut position = rustc_hash::FxHashMap::default();
        let mut prev = Idx::NONE;
        let mut current = self.head[0].forward;
        let mut max_height = 1;
        while current.is_some() {
            let node = storage.get(current).expect("dangling level-0 link");
            assert_eq!(node.backward, prev, "backward link broken at position {}", position.len() + 1);
            if prev.is_some() {
                let before = storage.get(prev).expect("dangling backward link");
                assert_eq!(
                    before.cmp_key(&node.score, &node.member),
                    Ordering::Less,
                    "level 0 out of order at position {}",
                    position.len() + 1
                );
            }
            max_height = max_height.max(node.height());
            position.insert(current.slot(), position.len() + 1);
            prev = current;
            current = node.links[0].forward;
        }
        assert_eq!(position.len(), self.len, "length does not match level 0");
        assert_eq!(self.tail, prev, "tail is not the last level-0 node");
        assert_eq!(max_height, self.level, "lane count is not the tallest node");

        for i in 0..self.level {
            let mut at = Idx::NONE;
            let mut at_position = 0;
            let mut total = 0;
            loop {
                let link = self.link(storage, at, i);
                total += link.span;
                if link.forward.is_none() {
                    assert_eq!(link.span, self.len - at_position, "end span wrong on lane {i}");
                    break;
                }
                let dest = *position
                    .get(&link.forward.slot())
                    .expect("lane links a node missing from level 0");
                assert_eq!(link.span, dest - at_position, "span wrong on lane {i}");
                at = link.forward;
                at_position = dest;
            }
            assert_eq!(total, self.len, "spans on lane {i} do not sum to len");
        }
    }
}

#[inline]
fn before_start<Sc: Ord>(score: &Sc, start: Bound<&Sc>) -> bool {
    match start {
        Bound::Included(min) => score < min,
        Bound::Excluded(min) => score <= min,
        Bound::Unbounded => false,
    }
}

#[inline]
fn within_end<Sc: Ord>(score: &Sc, end: Bound<&Sc>) -> bool {
    match end {
        Bound::Included(max) => score <= max,
        Bound::Excluded(max) => score < max,
        Bound::Unbounded => true,
    }
}

// ============================================================================
// Bounded storage impl
// ============================================================================

impl<Sc, S, Idx, R, const MAX_LEVEL: usize> SkipList<Sc, S, Idx, R, MAX_LEVEL>
where
    Sc: Ord,
    Idx: Index,
    R: RngCore,
    S: BoundedStorage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Tries to insert `(score, member)`, returning it back if storage is full.
    ///
    /// The caller must make sure `member` is not already present.
    pub fn try_insert(
        &mut self,
        storage: &mut S,
        score: Sc,
        member: impl AsRef<[u8]>,
    ) -> Result<Idx, Full<(Sc, Box<[u8]>)>> {
        let member: Box<[u8]> = Box::from(member.as_ref());
        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut rank = [0; MAX_LEVEL];
        self.search(storage, &score, &member, &mut update, &mut rank);

        let height = self.random_height();
        let idx = match storage.try_insert(SkipNode::new(score, member, height)) {
            Ok(idx) => idx,
            Err(Full(node)) => return Err(Full(node.into_parts())),
        };

        self.attach(storage, idx, height, &mut update, &mut rank);
        Ok(idx)
    }
}

// ============================================================================
// Unbounded storage impl
// ============================================================================

impl<Sc, S, Idx, R, const MAX_LEVEL: usize> SkipList<Sc, S, Idx, R, MAX_LEVEL>
where
    Sc: Ord,
    Idx: Index,
    R: RngCore,
    S: UnboundedStorage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    /// Inserts `(score, member)` and returns the node's handle.
    ///
    /// The caller must make sure `member` is not already present; inserting
    /// the same pair twice leaves two adjacent equal entries.
    pub fn insert(&mut self, storage: &mut S, score: Sc, member: impl AsRef<[u8]>) -> Idx {
        let member: Box<[u8]> = Box::from(member.as_ref());
        let mut update = [Idx::NONE; MAX_LEVEL];
        let mut rank = [0; MAX_LEVEL];
        self.search(storage, &score, &member, &mut update, &mut rank);

        let height = self.random_height();
        let idx = storage.insert(SkipNode::new(score, member, height));

        self.attach(storage, idx, height, &mut update, &mut rank);
        idx
    }
}

// ============================================================================
// Iterator
// ============================================================================

/// A double-ended iterator over a contiguous run of entries.
pub struct Iter<'a, Sc, S, Idx, const MAX_LEVEL: usize>
where
    Idx: Index,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    storage: &'a S,
    front: Idx,
    back: Idx,
    remaining: usize,
    _marker: PhantomData<Sc>,
}

impl<'a, Sc, S, Idx, const MAX_LEVEL: usize> Iter<'a, Sc, S, Idx, MAX_LEVEL>
where
    Idx: Index,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    #[inline]
    fn empty(storage: &'a S) -> Self {
        Self {
            storage,
            front: Idx::NONE,
            back: Idx::NONE,
            remaining: 0,
            _marker: PhantomData,
        }
    }
}

impl<'a, Sc: 'a, S, Idx, const MAX_LEVEL: usize> Iterator for Iter<'a, Sc, S, Idx, MAX_LEVEL>
where
    Idx: Index + 'a,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    type Item = (&'a Sc, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.storage.get(self.front).expect("invalid index");
        self.front = node.links[0].forward;
        self.remaining -= 1;
        Some((&node.score, &node.member[..]))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, Sc: 'a, S, Idx, const MAX_LEVEL: usize> DoubleEndedIterator
    for Iter<'a, Sc, S, Idx, MAX_LEVEL>
where
    Idx: Index + 'a,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.storage.get(self.back).expect("invalid index");
        self.back = node.backward;
        self.remaining -= 1;
        Some((&node.score, &node.member[..]))
    }
}

impl<'a, Sc: 'a, S, Idx, const MAX_LEVEL: usize> ExactSizeIterator
    for Iter<'a, Sc, S, Idx, MAX_LEVEL>
where
    Idx: Index + 'a,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
}

impl<'a, Sc: 'a, S, Idx, const MAX_LEVEL: usize> FusedIterator for Iter<'a, Sc, S, Idx, MAX_LEVEL>
where
    Idx: Index + 'a,
    S: Storage<SkipNode<Sc, Idx, MAX_LEVEL>, Index = Idx>,
{
}

// ============================================================================
// Type aliases
// ============================================================================

/// Growable storage for skip list nodes.
pub type SlabSkipStorage<Sc, const MAX_LEVEL: usize = 16> =
    slab::Slab<SkipNode<Sc, usize, MAX_LEVEL>>;

/// Fixed-capacity storage for skip list nodes, addressed by `Idx` handles.
pub type BoundedSkipStorage<Sc, const MAX_LEVEL: usize = 16, Idx = usize> =
    crate::BoundedSlab<SkipNode<Sc, Idx, MAX_LEVEL>, Idx>;


#[cfg(test)]
mod bench_skiplist {
    use super::*;
    use hdrhistogram::Histogram;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[inline]
    fn rdtscp() -> u64 {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::x86_64::__rdtscp(&mut 0)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            std::time::Instant::now().elapsed().as_nanos() as u64
        }
    }

    fn print_histogram(name: &str, hist: &Histogram<u64>) {
        println!(
            "{:24} p50: {:4} cycles | p99: {:4} cycles | p999: {:5} cycles | min: {:4} | max: {:5}",
            name,
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.min(),
            hist.max(),
        );
    }

    type BenchStorage = SlabSkipStorage<u64, 16>;
    type BenchSkipList = SkipList<u64, BenchStorage, usize, SmallRng, 16>;

    const SIZE: usize = 10_000;
    const ITERATIONS: usize = 100_000;

    fn filled(seed: u64) -> (BenchStorage, BenchSkipList, Vec<(u64, [u8; 8])>) {
        let mut storage = BenchStorage::with_capacity(SIZE + 1);
        let mut list = BenchSkipList::new(SmallRng::seed_from_u64(seed));
        let mut rng = SmallRng::seed_from_u64(seed ^ 0xdead_beef);
        let mut entries = Vec::with_capacity(SIZE);
        for i in 0..SIZE as u64 {
            let score = rng.random_range(0..1_000_000);
            let member = i.to_be_bytes();
            list.insert(&mut storage, score, member);
            entries.push((score, member));
        }
        (storage, list, entries)
    }

    #[test]
    #[ignore]
    fn bench_insert_delete_churn() {
        let (mut storage, mut list, _) = filled(1);
        let mut rng = SmallRng::seed_from_u64(2);
        let mut hist = Histogram::<u64>::new(3).unwrap();

        for i in 0..ITERATIONS as u64 {
            let score = rng.random_range(0..1_000_000);
            let member = (SIZE as u64 + i).to_be_bytes();
            let start = rdtscp();
            list.insert(&mut storage, score, member);
            let elapsed = rdtscp() - start;
            let _ = hist.record(elapsed);
            list.delete(&mut storage, &score, &member);
        }

        print_histogram("insert (10K resident)", &hist);
    }

    #[test]
    #[ignore]
    fn bench_rank() {
        let (storage, list, entries) = filled(3);
        let mut rng = SmallRng::seed_from_u64(4);
        let mut hist = Histogram::<u64>::new(3).unwrap();

        for _ in 0..ITERATIONS {
            let (score, member) = &entries[rng.random_range(0..entries.len())];
            let start = rdtscp();
            let rank = list.rank(&storage, score, member);
            let elapsed = rdtscp() - start;
            std::hint::black_box(rank);
            let _ = hist.record(elapsed);
        }

        print_histogram("rank (10K resident)", &hist);
    }

    #[test]
    #[ignore]
    fn bench_get_by_rank() {
        let (storage, list, _) = filled(5);
        let mut rng = SmallRng::seed_from_u64(6);
        let mut hist = Histogram::<u64>::new(3).unwrap();

        for _ in 0..ITERATIONS {
            let rank = rng.random_range(0..SIZE);
            let start = rdtscp();
            let entry = list.get_by_rank(&storage, rank);
            let elapsed = rdtscp() - start;
            std::hint::black_box(entry);
            let _ = hist.record(elapsed);
        }

        print_histogram("get_by_rank (10K)", &hist);
    }
}
