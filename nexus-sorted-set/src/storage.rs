//! Slab-like storage with stable handles.
//!
//! The skip list never allocates nodes itself. Nodes are placed in a
//! [`Storage`] and linked by handle; a handle stays valid until the node is
//! removed, and freed slots are reused by later inserts.
//!
//! ```text
//! Storage<T>                 get / get_mut / remove / len
//!     │
//!     ├── BoundedStorage<T>   try_insert -> Result<Index, Full<T>>
//!     │
//!     └── UnboundedStorage<T> insert -> Index
//! ```

use core::marker::PhantomData;

use crate::Index;

/// Slab-like storage with stable handles.
///
/// # Requirements
///
/// - **Stable handles**: a handle stays valid until explicitly removed
/// - **O(1)** insert, remove and get
/// - **Slot reuse**: removed slots are handed out again
///
/// # Implementations
///
/// - `slab::Slab<T>` - growable ([`UnboundedStorage`])
/// - [`BoundedSlab<T>`] - fixed capacity ([`BoundedStorage`])
pub trait Storage<T> {
    /// Handle type for this storage.
    type Index: Index;

    /// Removes and returns the value at `index`, if present.
    fn remove(&mut self, index: Self::Index) -> Option<T>;

    /// Returns a reference to the value at `index`, if present.
    fn get(&self, index: Self::Index) -> Option<&T>;

    /// Returns a mutable reference to the value at `index`, if present.
    fn get_mut(&mut self, index: Self::Index) -> Option<&mut T>;

    /// Returns a reference without checking occupancy.
    ///
    /// # Safety
    ///
    /// `index` must be occupied.
    unsafe fn get_unchecked(&self, index: Self::Index) -> &T;

    /// Returns a mutable reference without checking occupancy.
    ///
    /// # Safety
    ///
    /// `index` must be occupied.
    unsafe fn get_unchecked_mut(&mut self, index: Self::Index) -> &mut T;

    /// Number of occupied slots.
    fn len(&self) -> usize;

    /// Returns `true` if no slot is occupied.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage with a fixed number of slots.
pub trait BoundedStorage<T>: Storage<T> {
    /// Inserts a value, handing it back inside [`Full`] if no slot is free.
    fn try_insert(&mut self, value: T) -> Result<Self::Index, Full<T>>;

    /// Maximum number of occupied slots.
    fn capacity(&self) -> usize;
}

/// Storage that grows on demand.
pub trait UnboundedStorage<T>: Storage<T> {
    /// Inserts a value, returning its handle.
    fn insert(&mut self, value: T) -> Self::Index;
}

/// Error returned when fixed-capacity storage is full.
///
/// Carries the rejected value so the caller keeps ownership of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be inserted.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> core::fmt::Display for Full<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "storage is full")
    }
}

impl<T: core::fmt::Debug> std::error::Error for Full<T> {}

// =============================================================================
// slab::Slab - growable
// =============================================================================

impl<T> Storage<T> for slab::Slab<T> {
    type Index = usize;

    #[inline]
    fn remove(&mut self, index: usize) -> Option<T> {
        self.try_remove(index)
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&T> {
        slab::Slab::get(self, index)
    }

    #[inline]
    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        slab::Slab::get_mut(self, index)
    }

    #[inline]
    unsafe fn get_unchecked(&self, index: usize) -> &T {
        unsafe { slab::Slab::get_unchecked(self, index) }
    }

    #[inline]
    unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        unsafe { slab::Slab::get_unchecked_mut(self, index) }
    }

    #[inline]
    fn len(&self) -> usize {
        slab::Slab::len(self)
    }
}

impl<T> UnboundedStorage<T> for slab::Slab<T> {
    #[inline]
    fn insert(&mut self, value: T) -> usize {
        slab::Slab::insert(self, value)
    }
}

// =============================================================================
// BoundedSlab - fixed capacity, allocated once
// =============================================================================

/// Fixed-capacity storage.
///
/// All slots are allocated up front; inserts past `capacity` fail with
/// [`Full`] instead of reallocating, so handles and node addresses stay put
/// for the lifetime of the storage.
///
/// Handles are `Idx`, so a set of at most 65 534 members can link its nodes
/// with `u16` handles.
///
/// # Example
///
/// ```
/// use nexus_sorted_set::{BoundedSlab, BoundedStorage, Storage};
///
/// let mut storage: BoundedSlab<u64, u32> = BoundedSlab::with_capacity(2);
/// let a: u32 = storage.try_insert(1).unwrap();
/// storage.try_insert(2).unwrap();
/// assert_eq!(storage.try_insert(3).unwrap_err().into_inner(), 3);
///
/// storage.remove(a);
/// assert!(storage.try_insert(3).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BoundedSlab<T, Idx = usize> {
    slots: slab::Slab<T>,
    capacity: usize,
    _marker: PhantomData<Idx>,
}

impl<T, Idx: Index> BoundedSlab<T, Idx> {
    /// Creates storage holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or if slot `capacity - 1` has no `Idx`
    /// handle.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(
            Idx::try_from_slot(capacity - 1).is_some(),
            "capacity exceeds handle range"
        );
        Self {
            slots: slab::Slab::with_capacity(capacity),
            capacity,
            _marker: PhantomData,
        }
    }

    /// Returns `true` if every slot is occupied.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }
}

impl<T, Idx: Index> Storage<T> for BoundedSlab<T, Idx> {
    type Index = Idx;

    #[inline]
    fn remove(&mut self, index: Idx) -> Option<T> {
        self.slots.try_remove(index.slot())
    }

    #[inline]
    fn get(&self, index: Idx) -> Option<&T> {
        self.slots.get(index.slot())
    }

    #[inline]
    fn get_mut(&mut self, index: Idx) -> Option<&mut T> {
        self.slots.get_mut(index.slot())
    }

    #[inline]
    unsafe fn get_unchecked(&self, index: Idx) -> &T {
        unsafe { self.slots.get_unchecked(index.slot()) }
    }

    #[inline]
    unsafe fn get_unchecked_mut(&mut self, index: Idx) -> &mut T {
        unsafe { self.slots.get_unchecked_mut(index.slot()) }
    }

    #[inline]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<T, Idx: Index> BoundedStorage<T> for BoundedSlab<T, Idx> {
    fn try_insert(&mut self, value: T) -> Result<Idx, Full<T>> {
        if self.is_full() {
            return Err(Full(value));
        }
        // Below capacity the next slot is always < capacity, which
        // with_capacity checked to be representable.
        match Idx::try_from_slot(self.slots.vacant_key()) {
            Some(idx) => {
                self.slots.insert(value);
                Ok(idx)
            }
            None => Err(Full(value)),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }
}
