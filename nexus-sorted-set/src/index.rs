//! Node handles for the skip list.
//!
//! Links are stored as bare handles, so a narrow handle type shrinks every
//! node: with `u16` handles a 16-lane node spends 32 bytes on forward
//! pointers instead of 128. The all-ones value of each type is reserved to
//! mean "no node" (end of lane, no predecessor, or the header).

/// A storage slot handle with a reserved "no node" value.
///
/// # Example
///
/// ```
/// use nexus_sorted_set::Index;
///
/// assert_eq!(u16::try_from_slot(300), Some(300));
/// assert_eq!(u16::try_from_slot(70_000), None);
///
/// // The sentinel is never handed out as a slot.
/// assert_eq!(u16::try_from_slot(u16::MAX as usize), None);
/// assert!(u16::NONE.is_none());
/// ```
pub trait Index: Copy + Eq + core::fmt::Debug {
    /// Reserved handle meaning "no node".
    const NONE: Self;

    /// Returns `true` for [`NONE`](Self::NONE).
    #[inline]
    fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Returns `true` for a real slot.
    #[inline]
    fn is_some(self) -> bool {
        self != Self::NONE
    }

    /// Slot number this handle addresses.
    fn slot(self) -> usize;

    /// Handle for slot number `slot`, or `None` if the slot is not
    /// representable (too wide, or equal to the reserved value).
    fn try_from_slot(slot: usize) -> Option<Self>;
}

impl Index for usize {
    const NONE: Self = usize::MAX;

    #[inline]
    fn slot(self) -> usize {
        self
    }

    #[inline]
    fn try_from_slot(slot: usize) -> Option<Self> {
        (slot != Self::NONE).then_some(slot)
    }
}

macro_rules! narrow_index {
    ($($ty:ty),*) => {
        $(
            impl Index for $ty {
                const NONE: Self = <$ty>::MAX;

                #[inline]
                fn slot(self) -> usize {
                    self as usize
                }

                #[inline]
                fn try_from_slot(slot: usize) -> Option<Self> {
                    <$ty>::try_from(slot).ok().filter(|&idx| idx != Self::NONE)
                }
            }
        )*
    };
}

narrow_index!(u16, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usize_slots() {
        assert_eq!(usize::try_from_slot(0), Some(0));
        assert_eq!(usize::try_from_slot(usize::MAX - 1), Some(usize::MAX - 1));
        assert_eq!(usize::try_from_slot(usize::MAX), None);
        assert_eq!(17usize.slot(), 17);
    }

    #[test]
    fn u16_slots() {
        assert_eq!(u16::try_from_slot(65_534), Some(65_534));
        assert_eq!(u16::try_from_slot(65_535), None);
        assert_eq!(u16::try_from_slot(65_536), None);
        assert_eq!(u16::NONE.slot(), 65_535);
        assert!(0u16.is_some());
    }

    #[test]
    fn u32_slots() {
        assert_eq!(u32::try_from_slot(1 << 20).map(Index::slot), Some(1 << 20));
        assert_eq!(u32::try_from_slot(u32::MAX as usize), None);
        assert!(u32::NONE.is_none());
        assert!(!u32::NONE.is_some());
    }
}
