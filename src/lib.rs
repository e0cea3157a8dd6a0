// The following doc comment is kept in sync with the README.md file. Please
// run the `cargo sync-readme` command after modifying the comment contents.
//! This crate provides an implementation of D. E. Knuth's algorithm for
//! solving the exact cover problem with multiplicities and colors.
//!
//! Suppose we're given a collection of _rows_, each of which selects a set of
//! _items_; the classic _exact cover_ problem is to find a subcollection of
//! rows such that each item occurs in exactly one of them. Knuth's method of
//! choice for this task is a backtracking scheme he calls _dancing links_, a
//! clever yet simple technique for deleting and restoring the nodes of a
//! doubly linked list, described in [arXiv:cs/0011047][dl] \[cs.DS\] (2000).
//!
//! Two generalizations of the problem turn this method into a versatile
//! combinatorial solver. First, items fall into one of two categories:
//! _primary_ items, which carry a _multiplicity range_ `lower..=upper` and
//! must be selected by at least `lower` and at most `upper` of the chosen
//! rows; and _secondary_ items, which constrain the chosen rows by _color_
//! instead. A row may assign a color to a secondary item it touches, in which
//! case all chosen rows touching that item must agree on its color; a row may
//! instead claim a secondary item without a color, making it incompatible
//! with every other row that touches the same item. Knuth calls this the
//! _MCC problem_ (multiple covering with colors), and solves it with
//! Algorithm M of Section 7.2.2.1 in [_The Art of Computer Programming_
//! **4B** (2022)][taocp4b], Part 2. The multiplicity bookkeeping rests on a
//! delicate pair of operations, `tweak` and `untweak`, that prune a single
//! candidate row from an item's list without covering the item outright.
//!
//! The library has two layers:
//! - [`Solver`] is the engine. It owns the toroidal link table together with
//!   the covering, purification and tweaking primitives, and drives the
//!   labeled steps of Algorithm M as an explicit state machine. Solutions
//!   can be collected eagerly with [`Solver::all_solutions`] or streamed one
//!   at a time with [`Solver::next_solution`], which suspends the search at
//!   each solution and resumes it on the next call without revisiting
//!   explored branches.
//! - [`Model`] is a convenience layer on top of the engine that mints item
//!   handles on demand. It groups items into _variables_ addressed by an
//!   arbitrary hashable key, which saves the client from managing handles
//!   when the item set is only known implicitly (one item per cell of a
//!   grid, say).
//!
//! Solutions are reported as lists of [`RowId`]s in search order;
//! [`Solver::row_contents`] translates them back into the client's handles.
//!
//! # Example
//!
//! Cover the primary items `p`, `q` and `r` exactly once each, subject to
//! color constraints on the secondary items `x` and `y`:
//!
//! ```
//! use multicovers::Solver;
//!
//! let primary = [('p', 1, 1), ('q', 1, 1), ('r', 1, 1)];
//! let mut solver = Solver::new(&primary, &['x', 'y']).unwrap();
//! solver.add_row(['p', 'q'], [('x', None), ('y', Some(1))]).unwrap();
//! solver.add_row(['p', 'r'], [('x', Some(1)), ('y', None)]).unwrap();
//! solver.add_row(['p'], [('x', Some(2))]).unwrap();
//! solver.add_row(['q'], [('x', Some(1))]).unwrap();
//! solver.add_row(['r'], [('y', Some(1))]).unwrap();
//!
//! let mut solutions = solver.all_solutions(false).unwrap();
//! for solution in &mut solutions {
//!     solution.sort();
//! }
//! solutions.sort();
//! assert_eq!(solutions, [vec![0, 4], vec![1, 3]]);
//! ```
//!
//! Rows 0 and 4 can appear together because both assign color 1 to `y`,
//! while row 0 claims `x` for itself alone. The other cover pairs rows 1
//! and 3, which agree that `x` has color 1.
//!
//! [dl]: https://arxiv.org/pdf/cs/0011047.pdf
//! [taocp4b]: https://www-cs-faculty.stanford.edu/~knuth/taocp.html#vol4

mod dl;
mod indices;
mod model;

pub use crate::dl::Solver;
pub use crate::indices::ItemIndex;
pub use crate::model::{ItemId, Model, Variable};

/// The position of a row in a solver's row list, in insertion order.
/// Solutions are reported as lists of these identifiers.
pub type RowId = usize;

/// The ways in which declaring an MCC problem can go wrong. All of these
/// indicate caller misuse and are reported at the offending call; the search
/// itself cannot fail, it can only run out of solutions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// A row referenced an item that was never declared.
    #[error("row references an item that is not in the problem's item list")]
    UnknownItem,
    /// A primary item was declared with an inverted multiplicity range.
    #[error("primary item has lower bound {lower} greater than upper bound {upper}")]
    InvalidBounds {
        /// The declared lower bound.
        lower: usize,
        /// The declared upper bound.
        upper: usize,
    },
    /// The same handle was used for two items of one problem.
    #[error("item is declared more than once")]
    DuplicateItem,
    /// A row must reference at least one item.
    #[error("row has no items")]
    EmptyRow,
    /// The link table's structural invariants assume no row is added while
    /// search state exists.
    #[error("rows cannot be added once a search has started")]
    RowsFrozen,
    /// Exhaustive enumeration would clobber the state of a suspended
    /// resumable search.
    #[error("a resumable search is in progress")]
    SearchInProgress,
}
