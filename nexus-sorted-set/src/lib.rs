//! Score-ordered sets with rank queries, backed by external storage.
//!
//! This crate provides the sorted-set primitive behind leaderboards, priority
//! indices and range-indexed caches: unique byte-string members, each with a
//! score, kept in `(score, member)` order with O(log n) expected insert,
//! remove, re-score and **rank** queries.
//!
//! # Design Philosophy
//!
//! Storage is separated from structure:
//!
//! ```text
//! Storage (Slab)     - owns nodes, provides stable handles
//! SkipList           - links handles, owns no nodes
//! SortedSet          - SkipList + storage + member -> score map
//! ```
//!
//! The skip list is *augmented*: every link records how many level-0 nodes
//! it jumps over (its span). Summing spans during a descent yields positions,
//! so "what is the rank of X" and "remove ranks 10..=20" cost the same as a
//! lookup instead of a scan.
//!
//! # Quick Start
//!
//! ```
//! use nexus_sorted_set::SlabSortedSet;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let mut set: SlabSortedSet<i64, SmallRng> = SlabSortedSet::new(SmallRng::seed_from_u64(42));
//!
//! for (i, name) in ["m1", "m2", "m3", "m4", "m5"].iter().enumerate() {
//!     set.add(i as i64 + 1, name);
//! }
//!
//! assert_eq!(set.score("m3"), Some(3));
//! assert_eq!(set.rank("m3"), Some(2));
//!
//! let mid: Vec<_> = set.range_by_score(2..=4).map(|(_, m)| m).collect();
//! assert_eq!(mid, vec![&b"m2"[..], &b"m3"[..], &b"m4"[..]]);
//!
//! assert_eq!(set.remove_range_by_rank(2..=4), 3);
//! assert_eq!(set.len(), 2);
//! ```
//!
//! # Ranges
//!
//! Score ranges are any `RangeBounds<Sc>`: `a..=b`, `a..b`, `..`, or a
//! `(Bound, Bound)` pair for an exclusive minimum. Rank ranges are
//! `RangeBounds<usize>` of 0-based ranks. A rank range that starts after it
//! ends, or ends past the last rank, selects nothing; bounds are never
//! clamped.
//!
//! # Critical Invariant: Same Storage Instance
//!
//! When using [`SkipList`] directly, every call must pass the same storage
//! instance. This is the caller's responsibility (same discipline as the
//! `slab` crate). [`SortedSet`] owns its storage and cannot be misused this
//! way.
//!
//! # Storage Options
//!
//! | Storage | Capacity | Insert | Use Case |
//! |---------|----------|--------|----------|
//! | [`SlabSkipStorage`] | Growable | `insert` | Default choice |
//! | [`BoundedSkipStorage`] | Fixed (runtime) | `try_insert` -> [`Full`] | No reallocation after startup, `u16`/`u32` handles |
//!
//! ```text
//! Storage<T>           - base trait: get, remove, len
//!     │
//!     ├── BoundedStorage<T>   - fixed capacity, try_insert -> Result
//!     │
//!     └── UnboundedStorage<T> - growable, insert -> Index (infallible)
//! ```
//!
//! Re-scoring an existing member reuses its slot, so it never fails on a
//! full bounded storage.
//!
//! # Logging
//!
//! Structural events go through the [`log`](https://docs.rs/log) facade:
//! lane growth and shrinkage at `trace`, bulk removals at `debug`. No logger
//! is installed by this crate.

#![warn(missing_docs)]

pub mod index;
pub mod skiplist;
pub mod sorted_set;
pub mod storage;

pub use index::Index;
pub use skiplist::{BoundedSkipStorage, Iter, SkipList, SkipNode, SlabSkipStorage};
pub use sorted_set::{BoundedSortedSet, SlabSortedSet, SortedSet};
pub use storage::{BoundedSlab, BoundedStorage, Full, Storage, UnboundedStorage};
