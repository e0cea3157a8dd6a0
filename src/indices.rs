use std::num::NonZeroUsize;

/// The position of an item in the solver's item table.
///
/// Index 0 is the sentinel that anchors the circular list of active primary
/// items; see the `items` arena in the [`Solver`] structure for details.
///
/// [`Solver`]: `crate::dl::Solver`
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(transparent)]
pub struct ItemIndex(usize);

impl ItemIndex {
    /// Creates a new index.
    #[must_use]
    pub const fn new(ix: usize) -> Self {
        Self(ix)
    }

    /// Returns the index value as a primitive type.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Returns the position of the previous item in the table.
    ///
    /// The result is meaningful only if `self` is positive.
    #[must_use]
    pub fn decrement(self) -> Self {
        Self(self.0 - 1)
    }

    /// Returns the position of the next item in the table, if any.
    ///
    /// The result is meaningful only if `self` is less than [`usize::MAX`].
    #[must_use]
    pub fn increment(self) -> Self {
        Self(self.0 + 1)
    }
}

/// The position of a node of any kind in the solver's node arena.
///
/// See the `nodes` arena in the [`Solver`] structure for an example of this
/// construction.
///
/// [`Solver`]: `crate::dl::Solver`
pub type NodeIndex = usize;

/// The position of a cell node in the solver's node arena, whose first record
/// with index 0 cannot be referenced.
///
/// The zeroth node is always a spacer, so no cell ever lives there and the
/// niche of [`NonZeroUsize`] comes for free: an `Option<InstIndex>` link end
/// is exactly one word. [`InstIndex::get`] stays a plain getter with no
/// offset arithmetic on the hot row and column walks.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(transparent)]
pub struct InstIndex(NonZeroUsize);

impl InstIndex {
    /// Creates a new index.
    ///
    /// # Panics
    ///
    /// This function panics if `ix` is zero.
    #[must_use]
    pub const fn new(ix: usize) -> Self {
        // Workaround for `Option::expect` not being `const fn` in stable Rust.
        Self(if let Some(ix) = NonZeroUsize::new(ix) {
            ix
        } else {
            panic!("cell index must be positive")
        })
    }

    /// Returns the index value as a primitive type.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// Returns the position of the previous node in the arena, or `None` if
    /// this index refers to the second record (that is, whenever
    /// `self.get() == 1`).
    #[must_use]
    pub const fn decrement(self) -> Option<Self> {
        // Workaround for `Option::map` not being `const fn` in stable Rust.
        if let Some(ix) = NonZeroUsize::new(self.0.get() - 1) {
            Some(Self(ix))
        } else {
            None
        }
    }

    /// Returns the position of the next record in the arena, if any.
    ///
    /// To avoid overflow, the caller must make sure that the current index is
    /// less than [`usize::MAX`]. This function is not marked `unsafe` because
    /// that condition is almost always true in practice: a node arena can
    /// usually hold at most [`isize::MAX`] elements.
    #[must_use]
    pub const fn increment(self) -> Self {
        Self(unsafe { NonZeroUsize::new_unchecked(self.0.get() + 1) })
    }
}

/// The record of one branching decision in the search state.
///
/// At each depth the solver either selects a concrete cell of the chosen
/// item's column, or makes a *null choice* once the column is exhausted but
/// the item's bound still permits fewer selections, selecting the item itself
/// and no cell at all. Backtracking needs to tell the two apart, and in the
/// latter case to know which item to reactivate.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum Choice {
    /// A cell node in the option arena.
    Cell(InstIndex),
    /// The given item's own header: no cell is selected at this depth.
    Header(ItemIndex),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_get() {
        assert_eq!(ItemIndex::new(0).get(), 0);
        assert_eq!(ItemIndex::new(57).get(), 57);
        assert_eq!(ItemIndex::new(130981).get(), 130981);

        assert_eq!(InstIndex::new(1).get(), 1);
        assert_eq!(InstIndex::new(92).get(), 92);
        assert_eq!(InstIndex::new(45871).get(), 45871);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_cell_index() {
        let _ = InstIndex::new(0);
    }

    #[test]
    fn index_decrement() {
        assert_eq!(ItemIndex::new(1).decrement(), ItemIndex::new(0));
        assert_eq!(ItemIndex::new(31).decrement(), ItemIndex::new(30));

        assert!(InstIndex::new(1).decrement().is_none());
        assert_eq!(InstIndex::new(2).decrement(), Some(InstIndex::new(1)));
        assert_eq!(InstIndex::new(800).decrement(), Some(InstIndex::new(799)));
    }

    #[test]
    fn index_increment() {
        assert_eq!(ItemIndex::new(0).increment(), ItemIndex::new(1));
        assert_eq!(ItemIndex::new(7).increment(), ItemIndex::new(8));

        assert_eq!(InstIndex::new(1).increment(), InstIndex::new(2));
        assert_eq!(InstIndex::new(399).increment(), InstIndex::new(400));
    }

    #[test]
    fn choice_distinguishes_cells_from_headers() {
        let cell = Choice::Cell(InstIndex::new(4));
        let header = Choice::Header(ItemIndex::new(4));
        assert_ne!(cell, header);
        assert_eq!(cell, Choice::Cell(InstIndex::new(4)));
    }
}
