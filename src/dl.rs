use crate::indices::{Choice, InstIndex, ItemIndex, NodeIndex};
use crate::{Error, RowId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::iter;
use tracing::{debug, info, trace};

/// An item in an MCC problem.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Item<I> {
    /// The handle the client declared this item under, used to reconstruct
    /// row contents and to resolve handles in [`Solver::add_row`].
    ///
    /// # Invariant
    ///
    /// This variable is [`None`] if and only if this item is the special
    /// header node of a horizontal list of a [`Solver`].
    label: Option<I>,
    /// Possibly the previous item in a (horizontal) list of active items,
    /// in cyclic order. The contents of this variable are preserved when
    /// the item is removed from such linked list. This property makes it
    /// possible to apply the dancing links technique on a list of active
    /// items.
    ///
    /// This field corresponds to the `LLINK` pointer in Knuth's data structure.
    left: ItemIndex,
    /// Possibly the next item in a (horizontal) list of active items,
    /// in cyclic order. The contents of this variable are preserved
    /// when the item is removed from such linked list. (See `self.left`
    /// for details.)
    ///
    /// This field corresponds to the `RLINK` pointer in Knuth's data structure.
    right: ItemIndex,
    /// The node of the first active row that contains this item, if any.
    /// In other words, the first node in the vertical list for this item.
    ///
    /// This field corresponds to the `DLINK` pointer in Knuth's data structure.
    ///
    /// # Invariant
    ///
    /// `first_option` is [`None`] if and only if `last_option` is [`None`].
    first_option: Option<InstIndex>,
    /// The node of the last active row that contains this item, if any.
    /// In other words, the last node in the vertical list for this item.
    ///
    /// This field corresponds to the `ULINK` pointer in Knuth's data structure.
    last_option: Option<InstIndex>,
    /// The number of elements in the vertical list for this item.
    ///
    /// # Invariants
    ///
    /// - `len == 0` if and only if `first_option` and `last_option` are [`None`].
    /// - `len == 1` if and only if `first_option == last_option`.
    len: usize,
    /// How far the selection count for this item may still fall short of its
    /// remaining allowance; fixed at `upper - lower` when the item is
    /// declared.
    ///
    /// This field corresponds to the `SLACK` member in Knuth's Algorithm M,
    /// and is meaningful only for primary items.
    slack: usize,
    /// The number of further rows that may select this item. Starts at the
    /// declared upper bound, decreases as the search commits rows containing
    /// the item, and is restored on backtracking.
    ///
    /// This field corresponds to the `BOUND` member in Knuth's Algorithm M,
    /// and is meaningful only for primary items.
    bound: usize,
    /// Whether this item is currently covered: its bound reached zero and all
    /// rows containing it were hidden. An item declared with upper bound 0 is
    /// born covered.
    covered: bool,
}

impl<I> Item<I> {
    /// Creates the head for an active list of items.
    fn header(left: ItemIndex, right: ItemIndex) -> Self {
        Self {
            label: None,
            left,
            right,
            first_option: None,
            last_option: None,
            len: 0,
            slack: 0,
            bound: 0,
            covered: false,
        }
    }

    /// Creates a primary item with the given multiplicity range, pointing to
    /// its predecessor and successor in a horizontal list, and whose vertical
    /// list is empty.
    fn primary(label: I, left: ItemIndex, right: ItemIndex, lower: usize, upper: usize) -> Self {
        Self {
            label: Some(label),
            left,
            right,
            first_option: None,
            last_option: None,
            len: 0,
            slack: upper - lower,
            bound: upper,
            covered: false,
        }
    }

    /// Creates a secondary item pointing to its predecessor and successor
    /// in a horizontal list, and whose vertical list is empty.
    fn secondary(label: I, left: ItemIndex, right: ItemIndex) -> Self {
        Self {
            label: Some(label),
            left,
            right,
            first_option: None,
            last_option: None,
            len: 0,
            slack: 0,
            bound: 0,
            covered: false,
        }
    }
}

/// The position of the special node in the `items` table of a [`Solver`]
/// that serves as the head of the list of active _primary_ items; Knuth
/// called this the _root_ in the paper "Dancing links", [arXiv:cs/0011047][dl]
/// [cs.DS] (2000).
///
/// The list of secondary items has its own header node, namely the last
/// element in `items`. Its position thus depends on the number of items in
/// the problem, so this constant has no secondary counterpart.
///
/// [dl]: https://arxiv.org/pdf/cs/0011047.pdf
pub(crate) const PRIMARY_HEADER: ItemIndex = ItemIndex::new(0);

/// An instance of some [item](`Item`) in a row, represented as an internal
/// node in the toroidal data structures of [`Solver`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Instance<C> {
    /// The item associated with this node.
    ///
    /// This field corresponds to the `TOP` pointer in Knuth's data structure.
    item: ItemIndex,
    /// The previous node in the vertical list for `item`, if any.
    ///
    /// This field corresponds to the `ULINK` pointer in Knuth's data structure,
    /// except that it equals [`None`] instead of `item` when a node belongs
    /// to the first row that contains `item`.
    above: Option<InstIndex>,
    /// The next node in the vertical list for `item`, if any.
    ///
    /// This field corresponds to the `DLINK` pointer in Knuth's data structure,
    /// except that it equals [`None`] instead of `item` when a node belongs
    /// to the last row that contains `item`.
    below: Option<InstIndex>,
    /// The color assigned to `item` by this row, if any. Otherwise the solver
    /// implicitly assigns a unique color to this instance that is
    /// incompatible with the colors of any other row, provided that `item`
    /// is secondary.
    ///
    /// This field corresponds to the `COLOR` member in Knuth's data structure.
    ///
    /// # Invariant
    ///
    /// If `item` is a primary item, then this variable is [`None`].
    color: Option<C>,
    /// If this instance appears in the vertical list of a purified secondary
    /// item, this field indicates whether the instance wants the color chosen
    /// for the item or not. The purpose of this field, which is true if and
    /// only if `COLOR(x) = -1` in Knuth's description, is to avoid repeatedly
    /// purifying an item; see methods [`purify`] and [`unpurify`] for details.
    ///
    /// It also keeps the declared color of the cell intact while the item is
    /// purified, so [`row_contents`] is exact at any point of the search.
    ///
    /// [`purify`]: Solver::purify
    /// [`unpurify`]: Solver::unpurify
    /// [`row_contents`]: Solver::row_contents
    wants_color: bool,
    /// The row this cell belongs to, used to report solutions.
    row: RowId,
}

/// A node in the sequential table of a [`Solver`] that either is a separator
/// between the cells of two rows, or it refers to one item instance of a row.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Node<C> {
    /// A spacer node between rows.
    Spacer {
        /// The first node in the preceding row, or [`None`] if this is
        /// the spacer that comes before the first row.
        ///
        /// This field is an aid to traversing such row in cyclic order,
        /// from left to right. It corresponds to the `ULINK` pointer in
        /// Knuth's data structure.
        first_in_prev: Option<InstIndex>,
        /// The last node in the succeeding row, or [`None`] if this is
        /// the spacer that comes after the last row.
        ///
        /// This field is an aid to traversing such row in cyclic order,
        /// from right to left.
        last_in_next: Option<InstIndex>,
    },
    /// An instance of an item in some row.
    Instance(Instance<C>),
}

/// The labeled steps of the search, made explicit so that the driver can
/// suspend after reporting a solution and continue backtracking on the next
/// call. Each variant corresponds to one of steps M2 through M9 of Knuth's
/// Algorithm M, as noted in [`Solver::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// M2: accept a solution if no primary item awaits selection, otherwise
    /// descend.
    ChooseOrAccept,
    /// M3 and M4: pick the branch item and prepare its first candidate.
    SelectItem,
    /// M5: decide what to do with the current candidate.
    TryOption,
    /// M6: commit the chosen row and enter the next level.
    Advance,
    /// M7: undo a committed row and move to the candidate below it.
    Retreat,
    /// M8: restore the branch item of the current level.
    RestoreItem,
    /// M9: leave the current level.
    Backtrack,
    /// The search tree is exhausted.
    Done,
}

/// Where the solver stands between search calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// No search state exists and the table is pristine; rows may be added.
    Fresh,
    /// A resumable enumeration has yielded a solution and owns the table.
    Suspended,
    /// A resumable enumeration ran out of solutions. The table is restored,
    /// but [`Solver::next_solution`] keeps reporting exhaustion.
    Exhausted,
}

/// Visits all solutions to an exact cover problem with multiplicities and
/// colors (an MCC problem) by means of dancing links.
///
/// More precisely, this structure embodies an implementation of Algorithm M,
/// as presented by D. E. Knuth in Section 7.2.2.1 of [_TAOCP_ **4B**][taocp4b],
/// part 2. Every primary item carries a multiplicity range `lower..=upper`
/// rather than Algorithm C's implicit "exactly once", and the search may
/// therefore select an item several times, or deliberately stop short of its
/// upper bound, through the `tweak` family of operations.
///
/// `I` is the client's item handle type and `C` the color type; both are
/// small copyable values compared for equality only.
///
/// [taocp4b]: https://www-cs-faculty.stanford.edu/~knuth/taocp.html#vol4
pub struct Solver<I, C> {
    /// The items, some of which are uncovered and consequently appear in the
    /// currently active lists. Primary items sit at positions `1..=n_primary`
    /// between the two list headers.
    items: Vec<Item<I>>,
    /// The cell nodes within the vertical lists, with spacers between them.
    nodes: Vec<Node<C>>,
    /// The number of primary items; positions `n_primary+1..` in `items`
    /// hold the secondary items and their trailing header.
    n_primary: usize,
    /// Resolves a client handle to its position in `items`.
    item_lookup: HashMap<I, ItemIndex>,
    /// Every row exactly as the client declared it, indexed by [`RowId`].
    rows: Vec<(Vec<I>, Vec<(I, Option<C>)>)>,
    /// The branching strategy consulted at step M3.
    choose: Box<dyn Fn(&Solver<I, C>) -> ItemIndex>,
    /// The choice made at each level of the search, up to `level`. Entries
    /// above `level` are stale.
    x: Vec<Choice>,
    /// The first cell tweaked out of the branch item's column at each level,
    /// recorded at M4 whenever the item stays partially active and consumed
    /// by the `untweak` operations at M8. `None` where M4 recorded nothing.
    ft: Vec<Option<Choice>>,
    /// The current search depth.
    level: usize,
    /// The item being branched on.
    ///
    /// # Invariant
    ///
    /// Meaningful only while [`Solver::run`] is between steps M3 and M9.
    cur_item: ItemIndex,
    /// The lifecycle position of the solver.
    phase: Phase,
}

impl<I: Copy + Eq + Hash + 'static, C: Copy + Eq + 'static> Solver<I, C> {
    // Problem setup routines.

    /// Creates a solver for the problem on the given items, without any rows.
    ///
    /// Each primary item carries a multiplicity range: a solution must select
    /// it at least `lower` and at most `upper` times. Secondary items carry
    /// color constraints instead, imposed row by row through
    /// [`add_row`](Self::add_row).
    ///
    /// An item declared with `upper == 0` is born satisfied: it never enters
    /// the active list, and rows that reference it can never be selected.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidBounds`] if some `lower > upper`, and with
    /// [`Error::DuplicateItem`] if the same handle is declared twice.
    pub fn new(primary: &[(I, usize, usize)], secondary: &[I]) -> Result<Self, Error> {
        // Construct the horizontal lists.
        let n_1 = primary.len();
        let n = n_1 + secondary.len();
        let last_primary_ix = ItemIndex::new(n_1);
        let primary_head = Item::header(last_primary_ix, ItemIndex::new(1));
        let first_secondary_ix = last_primary_ix.increment();
        let last_secondary_ix = ItemIndex::new(if secondary.is_empty() { n + 1 } else { n });
        let secondary_head = Item::header(last_secondary_ix, first_secondary_ix);

        let mut item_lookup = HashMap::with_capacity(n);
        let mut items = Vec::with_capacity(n + 2);
        items.push(primary_head);
        for (prev_ix, &(label, lower, upper)) in primary.iter().enumerate() {
            if lower > upper {
                return Err(Error::InvalidBounds { lower, upper });
            }
            let cur_ix = ItemIndex::new(prev_ix + 1);
            if item_lookup.insert(label, cur_ix).is_some() {
                return Err(Error::DuplicateItem);
            }
            items.push(Item::primary(
                label,
                cur_ix.decrement(),
                cur_ix.increment(),
                lower,
                upper,
            ));
        }
        for (prev_ix, &label) in secondary.iter().enumerate() {
            let cur_ix = ItemIndex::new(n_1 + prev_ix + 1);
            if item_lookup.insert(label, cur_ix).is_some() {
                return Err(Error::DuplicateItem);
            }
            items.push(Item::secondary(label, cur_ix.decrement(), cur_ix.increment()));
        }
        items.push(secondary_head);
        // Only the primary items appear in the active list:
        if !secondary.is_empty() {
            // 1. Link the first secondary item to the secondary header.
            items[n_1 + 1].left = ItemIndex::new(n + 1);
            // `items[n].right` is already `n_1 + 1` by construction.
        }
        // 2. Link the last primary item to the primary header.
        items[n_1].right = PRIMARY_HEADER;

        let mut solver = Self {
            items,
            // Create the node arena, and insert the first spacer.
            nodes: vec![Node::Spacer {
                first_in_prev: None,
                last_in_next: None,
            }],
            n_primary: n_1,
            item_lookup,
            rows: Vec::new(),
            choose: Box::new(Self::min_length_item),
            x: Vec::new(),
            ft: Vec::new(),
            level: 0,
            cur_item: PRIMARY_HEADER,
            phase: Phase::Fresh,
        };
        // Items that must be selected zero times are satisfied from the
        // start; withdraw them so the search never branches on them.
        for pos in 1..=n_1 {
            let ix = ItemIndex::new(pos);
            if solver.item(ix).bound == 0 {
                solver.deactivate(ix);
                solver.item_mut(ix).covered = true;
            }
        }
        Ok(solver)
    }

    /// Appends a row to the problem and returns its identifier.
    ///
    /// `primary` lists the primary items the row selects; `secondary` lists
    /// `(item, color)` pairs, where a color of `None` claims the secondary
    /// item exclusively (no other selected row may touch it) and `Some(c)`
    /// requires every selected row touching the item to agree on `c`.
    ///
    /// A row that references a primary item with upper bound 0 is recorded
    /// but can never be selected.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RowsFrozen`] once a search has started, with
    /// [`Error::EmptyRow`] if the row references no items at all, and with
    /// [`Error::UnknownItem`] if a handle was never declared; in the latter
    /// case the table is left unchanged.
    pub fn add_row<P, S>(&mut self, primary: P, secondary: S) -> Result<RowId, Error>
    where
        P: AsRef<[I]>,
        S: AsRef<[(I, Option<C>)]>,
    {
        let primary = primary.as_ref();
        let secondary = secondary.as_ref();
        if self.phase != Phase::Fresh {
            return Err(Error::RowsFrozen);
        }
        if primary.is_empty() && secondary.is_empty() {
            return Err(Error::EmptyRow);
        }
        let row = self.rows.len();
        // Resolve every handle before touching the node arena, so that a
        // failed lookup leaves the table unchanged.
        let mut primary_ixs = Vec::with_capacity(primary.len());
        for (ix, label) in primary.iter().enumerate() {
            debug_assert!(
                !primary[..ix].contains(label),
                "primary item at index {ix} can only appear once in the row"
            );
            let item_ix = self.lookup(label)?;
            debug_assert!(
                self.is_primary(item_ix),
                "item at index {ix} of the primary list must be a primary item"
            );
            primary_ixs.push(item_ix);
        }
        let mut secondary_ixs = Vec::with_capacity(secondary.len());
        for (ix, (label, _)) in secondary.iter().enumerate() {
            debug_assert!(
                !primary.contains(label) && !secondary[..ix].iter().any(|(o, _)| o == label),
                "secondary item at index {ix} can only appear once in the row"
            );
            let item_ix = self.lookup(label)?;
            debug_assert!(
                !self.is_primary(item_ix),
                "item at index {ix} of the secondary list must be a secondary item"
            );
            secondary_ixs.push(item_ix);
        }
        // While no search has run, `bound` still equals the declared upper
        // bound; a row touching a zero-bound item is mirrored by no cells.
        if primary_ixs.iter().any(|&ix| self.item(ix).bound == 0) {
            trace!(row, "row references an item with upper bound 0 and can never be selected");
        } else {
            // We will create one cell per referenced item, followed by a
            // trailing spacer node.
            self.nodes.reserve(primary.len() + secondary.len() + 1);
            let first_inst_ix = InstIndex::new(self.nodes.len());
            let mut inst_ix = first_inst_ix;
            for &item_ix in &primary_ixs {
                self.append_inst(item_ix, inst_ix, None, row);
                inst_ix = inst_ix.increment();
            }
            for (&item_ix, (_, color)) in secondary_ixs.iter().zip(secondary) {
                self.append_inst(item_ix, inst_ix, *color, row);
                inst_ix = inst_ix.increment();
            }
            // Link the previous spacer to the last node in the row.
            // The first spacer cannot be referenced directly; see `InstIndex`.
            let prev_spacer = &mut self.nodes[first_inst_ix.get() - 1];
            if let Node::Spacer { last_in_next, .. } = prev_spacer {
                *last_in_next = inst_ix.decrement();
            } else {
                panic!("the record before the first cell should be a spacer");
            }
            // Create the next spacer, and link it to the first node in the row.
            self.nodes.push(Node::Spacer {
                first_in_prev: Some(first_inst_ix),
                last_in_next: None,
            });
        }
        self.rows.push((primary.to_vec(), secondary.to_vec()));
        Ok(row)
    }

    /// Appends a new node to the vertical list of the specified item.
    ///
    /// If the item is secondary, `color` may specify the color assigned to
    /// the item by the row. Otherwise `color` must be [`None`].
    fn append_inst(&mut self, item_ix: ItemIndex, ix: InstIndex, color: Option<C>, row: RowId) {
        let item = self.item_mut(item_ix);
        item.len += 1;
        let above = if let Some(prev_last_ix) = item.last_option.replace(ix) {
            // Update the `below` link of the new node's predecessor
            // in the vertical list of `item`.
            let prev = self.instance_mut(prev_last_ix);
            prev.below = Some(ix);
            Some(prev_last_ix)
        } else {
            // This is the first row that involves `item`.
            item.first_option = Some(ix);
            None
        };
        self.nodes.push(Node::Instance(Instance {
            item: item_ix,
            above,
            below: None,
            color,
            wants_color: false,
            row,
        }));
    }

    /// Resolves a client handle, failing if it was never declared.
    fn lookup(&self, label: &I) -> Result<ItemIndex, Error> {
        self.item_lookup.get(label).copied().ok_or(Error::UnknownItem)
    }

    // Algorithm M routines.

    /// Deletes an item from the horizontal list of active primary items.
    fn deactivate(&mut self, ix: ItemIndex) {
        let item = self.item(ix);
        let (left_ix, right_ix) = (item.left, item.right);
        self.item_mut(left_ix).right = right_ix;
        self.item_mut(right_ix).left = left_ix;
    }

    /// Puts an item back into the horizontal list of active primary items,
    /// relying on its own links having been preserved by
    /// [`deactivate`](Self::deactivate).
    fn reactivate(&mut self, ix: ItemIndex) {
        let item = self.item(ix);
        let (left_ix, right_ix) = (item.left, item.right);
        self.item_mut(left_ix).right = ix;
        self.item_mut(right_ix).left = ix;
    }

    /// Marks an item as covered by deleting it from the list of items that
    /// still await selections, and by deleting all of the rows that contain
    /// the item from the database of currently active rows.
    fn cover(&mut self, ix: ItemIndex) {
        self.deactivate(ix);
        let item = self.item_mut(ix);
        item.covered = true;
        let mut inst_ix = item.first_option;
        // Hide all rows containing `item`, from top to bottom.
        while let Some(cur) = inst_ix {
            self.hide(cur);
            inst_ix = self.instance(cur).below;
        }
    }

    /// Undoes the updates made by the matching [covering](`Self::cover`)
    /// operation: puts the item back into the horizontal list and reinserts
    /// all of the rows that contain it into the database of active rows.
    fn uncover(&mut self, ix: ItemIndex) {
        self.reactivate(ix);
        let item = self.item_mut(ix);
        item.covered = false;
        let mut inst_ix = item.first_option;
        // Unhide all rows containing `item`, from top to bottom. This order
        // may appear to be incorrect at first glance, because covering is also
        // done from top to bottom. But the answer to exercise 7.2.2.1–2 of
        // TAOCP shows that it is completely trustworthy.
        while let Some(cur) = inst_ix {
            self.unhide(cur);
            inst_ix = self.instance(cur).below;
        }
    }

    /// Hides a row that cannot appear in a solution for the items remaining
    /// in the horizontal list. This step traverses the siblings both to the
    /// left and to the right of the node with index `ix`, and deletes them
    /// from their corresponding vertical lists.
    fn hide(&mut self, ix: InstIndex) {
        // Proceed cyclically through the nodes of the row associated with
        // the given node, from left to right. We store the cells of a row
        // contiguously in the `self.nodes` arena, so their indices form a
        // sequence of consecutive integers delimited by a spacer, whose
        // `first_in_prev` link returns us to the first cell of the row.
        let mut cur_ix = ix.increment();
        while cur_ix != ix {
            cur_ix = match *self.node(cur_ix.get()) {
                Node::Spacer { first_in_prev, .. } => {
                    // Return to the first item in the row.
                    first_in_prev.expect("spacer should have a first_in_prev link")
                }
                Node::Instance(Instance {
                    item,
                    above,
                    below,
                    wants_color,
                    ..
                }) => {
                    // Ignore the node if it already has the "correct" color.
                    if !wants_color {
                        if let Some(above) = above {
                            self.instance_mut(above).below = below;
                        } else {
                            self.item_mut(item).first_option = below;
                        }
                        if let Some(below) = below {
                            self.instance_mut(below).above = above;
                        } else {
                            self.item_mut(item).last_option = above;
                        }
                        // Update the length of the vertical list.
                        self.item_mut(item).len -= 1;
                    }
                    // Continue to go rightwards.
                    cur_ix.increment()
                }
            };
        }
    }

    /// Undoes the updates made by the matching [hiding](`Self::hide`)
    /// operation. This step visits the siblings both to the left and to the
    /// right of the node at index `ix`, and puts them back into their
    /// corresponding vertical lists.
    fn unhide(&mut self, ix: InstIndex) {
        // See `Self::hide` for an explanation. There is an important difference
        // between these two methods, however: since the first spacer cannot
        // be referenced using an `InstIndex` and we traverse the table of
        // nodes in reverse order, we need to use raw indices.
        let ix = ix.get();
        let mut cur_ix = ix - 1;
        while cur_ix != ix {
            cur_ix = match self.nodes[cur_ix] {
                Node::Spacer { last_in_next, .. } => {
                    // Return to the last item in the row.
                    last_in_next
                        .expect("spacer should have a last_in_next link")
                        .get()
                }
                Node::Instance(Instance {
                    item,
                    above,
                    below,
                    wants_color,
                    ..
                }) => {
                    // Ignore the node if we know that it has the correct color.
                    if !wants_color {
                        // Reinsert the cell into its vertical list.
                        // SAFETY: the node is not a spacer, so `cur_ix > 0`.
                        let wrapped_ix = Some(InstIndex::new(cur_ix));
                        if let Some(above) = above {
                            self.instance_mut(above).below = wrapped_ix;
                        } else {
                            self.item_mut(item).first_option = wrapped_ix;
                        }
                        if let Some(below) = below {
                            self.instance_mut(below).above = wrapped_ix;
                        } else {
                            self.item_mut(item).last_option = wrapped_ix;
                        }
                        // Update the length of the vertical list.
                        self.item_mut(item).len += 1;
                    }
                    // Continue to go leftwards.
                    cur_ix - 1
                }
            };
        }
    }

    /// [Covers](`Self::cover`) the item of a secondary cell that has no color
    /// preference, claiming the item exclusively. Otherwise the given node
    /// has a color control, and we [purify](`Self::purify`) it to remove all
    /// rows with conflicting colors from the relevant vertical list.
    fn commit(&mut self, ix: InstIndex) {
        let inst = self.instance(ix);
        if let Some(color) = inst.color {
            // Don't purify a vertical list that has already been culled.
            if !inst.wants_color {
                self.purify(ix, color);
            }
        } else {
            self.cover(inst.item);
        }
    }

    /// Undoes the updates made by the matching ["commit"](`Self::commit`)
    /// operation.
    fn uncommit(&mut self, ix: InstIndex) {
        let inst = self.instance(ix);
        if let Some(color) = inst.color {
            // Don't unpurify an item that's already known to have the
            // correct color.
            if !inst.wants_color {
                self.unpurify(ix, color);
            }
        } else {
            self.uncover(inst.item);
        }
    }

    /// Removes all rows that are incompatible with the color constraint
    /// imposed by the given secondary item instance. The cells of all
    /// compatible rows in the relevant vertical list temporarily have their
    /// `wants_color` field set to `true` in order to prevent them from being
    /// repeatedly purified (because they already have the "correct" color).
    fn purify(&mut self, ix: InstIndex, color: C) {
        // We cannot use `debug_assert_eq` because `C` need not implement `Debug`.
        debug_assert!(
            self.instance(ix).color == Some(color),
            "cell has unexpected or missing color control"
        );
        let item_ix = self.instance(ix).item;
        // Hide all rows that contain the given item but with a color other
        // than `color`, from top to bottom. If a cell in the vertical list
        // has the "correct" color, mark it to avoid its repurification
        // in the future.
        let mut cur_ix = self.item(item_ix).first_option;
        while let Some(cur) = cur_ix {
            let inst = self.instance_mut(cur);
            if inst.color == Some(color) {
                inst.wants_color = true;
            } else {
                self.hide(cur);
            }
            cur_ix = self.instance(cur).below;
        }
    }

    /// Undoes the updates made by the matching ["purify"](`Self::purify`)
    /// operation. Puts back all the rows incompatible with the given
    /// secondary item into the corresponding vertical list, and resets the
    /// `wants_color` mark of every compatible cell.
    fn unpurify(&mut self, ix: InstIndex, color: C) {
        // Again, we use `debug_assert` rather than `debug_assert_eq` because
        // `C` might not implement `Debug`.
        debug_assert!(
            self.instance(ix).color == Some(color),
            "cell has unexpected or missing color control"
        );
        let item_ix = self.instance(ix).item;
        // Unhide all rows that contain the given item, from bottom to top.
        let mut cur_ix = self.item(item_ix).last_option;
        while let Some(cur) = cur_ix {
            let inst = self.instance_mut(cur);
            if inst.wants_color {
                inst.wants_color = false;
            } else {
                self.unhide(cur);
            }
            cur_ix = self.instance(cur).above;
        }
    }

    /// Removes the first candidate cell `ix` from the top of item `item_ix`'s
    /// column and hides its row, without covering the item. The branch keeps
    /// revisiting the item with one candidate fewer; the column is restored
    /// wholesale by [`untweak`](Self::untweak) when the branch is abandoned.
    fn tweak(&mut self, ix: InstIndex, item_ix: ItemIndex) {
        self.hide(ix);
        self.tweak_splice(ix, item_ix);
    }

    /// Like [`tweak`](Self::tweak) for a branch whose item just reached bound
    /// zero: covering the item already hid its rows, so only the column list
    /// shrinks.
    fn tweak_special(&mut self, ix: InstIndex, item_ix: ItemIndex) {
        self.tweak_splice(ix, item_ix);
    }

    /// Common part of the `tweak` operations: detaches the top cell of a
    /// column. The cell's own links are preserved, which lets `untweak` walk
    /// the chain of tweaked cells in order.
    fn tweak_splice(&mut self, ix: InstIndex, item_ix: ItemIndex) {
        debug_assert!(
            self.item(item_ix).first_option == Some(ix),
            "only the first cell of a column can be tweaked"
        );
        let below = self.instance(ix).below;
        let item = self.item_mut(item_ix);
        item.first_option = below;
        item.len -= 1;
        if let Some(below) = below {
            self.instance_mut(below).above = None;
        } else {
            self.item_mut(item_ix).last_option = None;
        }
    }

    /// Undoes the whole run of [`tweak`](Self::tweak) operations performed at
    /// the current level, restoring and unhiding the detached cells in the
    /// order they were removed.
    fn untweak(&mut self, item_ix: ItemIndex) {
        self.restore_tweaks(item_ix, false);
    }

    /// Undoes a run of [`tweak_special`](Self::tweak_special) operations. The
    /// rows of the detached cells were hidden by covering the item, so the
    /// matching [`uncover`](Self::uncover) reveals them again here.
    fn untweak_special(&mut self, item_ix: ItemIndex) {
        self.restore_tweaks(item_ix, true);
        self.uncover(item_ix);
    }

    /// Reattaches the cells tweaked out of `item_ix`'s column at the current
    /// level, starting from the recorded first tweak. When `covered` is
    /// false, each reattached cell's row is also unhidden.
    fn restore_tweaks(&mut self, item_ix: ItemIndex, covered: bool) {
        let first = self.ft[self.level].expect("level must have tweak bookkeeping to undo");
        let Choice::Cell(first) = first else {
            // The column was already empty when the branch began.
            return;
        };
        let stop = self.item(item_ix).first_option;
        let mut prev: Option<InstIndex> = None;
        let mut cur = Some(first);
        let mut count = 0;
        while cur != stop {
            let ix = cur.expect("chain of tweaked cells ends at the current column head");
            self.instance_mut(ix).above = prev;
            count += 1;
            if !covered {
                self.unhide(ix);
            }
            prev = Some(ix);
            cur = self.instance(ix).below;
        }
        // Reattach the run in front of the cells that were never tweaked.
        if let Some(stop) = stop {
            self.instance_mut(stop).above = prev;
        } else {
            self.item_mut(item_ix).last_option = prev;
        }
        self.item_mut(item_ix).first_option = Some(first);
        self.item_mut(item_ix).len += count;
    }

    /// Step M6 helper: commits every item other than the branch item in the
    /// row containing `ix`, cyclically from left to right. Each primary item
    /// consumes one unit of bound and is covered when none remains; secondary
    /// items go through [`commit`](Self::commit).
    fn commit_row_of(&mut self, ix: InstIndex) {
        let mut cur_ix = ix.increment();
        while cur_ix != ix {
            cur_ix = match *self.node(cur_ix.get()) {
                Node::Spacer { first_in_prev, .. } => {
                    first_in_prev.expect("spacer should have a first_in_prev link")
                }
                Node::Instance(Instance { item, .. }) => {
                    if self.is_primary(item) {
                        let entry = self.item_mut(item);
                        debug_assert!(entry.bound > 0, "an active cell implies a positive bound");
                        entry.bound -= 1;
                        if entry.bound == 0 {
                            self.cover(item);
                        }
                    } else {
                        self.commit(cur_ix);
                    }
                    cur_ix.increment()
                }
            }
        }
    }

    /// Step M7 helper: uncommits the items committed by
    /// [`commit_row_of`](Self::commit_row_of), cyclically from right to left.
    fn uncommit_row_of(&mut self, ix: InstIndex) {
        // As in `Self::unhide`, we must use raw node indices in case we visit
        // the first spacer.
        let ix = ix.get();
        let mut cur_ix = ix - 1;
        while cur_ix != ix {
            cur_ix = match *self.node(cur_ix) {
                Node::Spacer { last_in_next, .. } => last_in_next
                    .expect("spacer should have a last_in_next link")
                    .get(),
                Node::Instance(Instance { item, .. }) => {
                    if self.is_primary(item) {
                        let entry = self.item_mut(item);
                        entry.bound += 1;
                        if entry.bound == 1 {
                            self.uncover(item);
                        }
                    } else {
                        self.uncommit(InstIndex::new(cur_ix));
                    }
                    cur_ix - 1
                }
            }
        }
    }

    // The search driver.

    /// Runs the search until it either finds a solution (returning the
    /// selected rows) or exhausts the tree (returning [`None`], with the
    /// table restored to its pristine state).
    ///
    /// The caller picks the entry state: `ChooseOrAccept` to start from the
    /// root, or `Backtrack` to resume past the solution reported by the
    /// previous call, whose search state is still in `x`, `ft`, `level` and
    /// the link table itself.
    fn run(&mut self, mut state: State) -> Option<Vec<RowId>> {
        loop {
            state = match state {
                // M2: with no primary item awaiting selections, the rows
                // chosen so far are a solution.
                State::ChooseOrAccept => {
                    if self.primary_head().right == PRIMARY_HEADER {
                        return Some(self.chosen_rows());
                    }
                    State::SelectItem
                }
                // M3: pick the branch item. M4: prepare its first candidate.
                State::SelectItem => {
                    let item_ix = (self.choose)(self);
                    debug_assert!(
                        self.is_active_primary(item_ix),
                        "the branching strategy must return an active primary item"
                    );
                    if self.branch_degree(item_ix) == 0 {
                        State::Backtrack
                    } else {
                        self.cur_item = item_ix;
                        let choice = match self.item(item_ix).first_option {
                            Some(ix) => Choice::Cell(ix),
                            None => Choice::Header(item_ix),
                        };
                        self.record_choice(choice);
                        let item = self.item_mut(item_ix);
                        debug_assert!(item.bound > 0, "an active item has a positive bound");
                        item.bound -= 1;
                        let keep_ft = item.bound != 0 || item.slack != 0;
                        if self.item(item_ix).bound == 0 {
                            self.cover(item_ix);
                        }
                        self.record_first_tweak(keep_ft.then_some(choice));
                        State::TryOption
                    }
                }
                // M5: decide how to treat the current candidate.
                State::TryOption => {
                    let item_ix = self.cur_item;
                    let item = self.item(item_ix);
                    let (bound, slack, len) = (item.bound, item.slack, item.len);
                    let choice = self.x[self.level];
                    if bound == 0 && slack == 0 {
                        // The item admits no further selections and none may
                        // be skipped, exactly as in Algorithm C.
                        if choice == Choice::Header(item_ix) {
                            State::RestoreItem
                        } else {
                            State::Advance
                        }
                    } else if len + slack <= bound {
                        // Too few candidates remain to reach the lower bound.
                        State::RestoreItem
                    } else if let Choice::Cell(ix) = choice {
                        if bound == 0 {
                            self.tweak_special(ix, item_ix);
                        } else {
                            self.tweak(ix, item_ix);
                        }
                        State::Advance
                    } else {
                        // Null choice: the lower bound is already met, so
                        // stop selecting rows for this item. Withdraw it from
                        // the active list unless covering already did.
                        if bound != 0 {
                            self.deactivate(item_ix);
                        }
                        State::Advance
                    }
                }
                // M6: commit the candidate row, if any, and descend.
                State::Advance => {
                    if let Choice::Cell(ix) = self.x[self.level] {
                        self.commit_row_of(ix);
                    }
                    self.level += 1;
                    State::ChooseOrAccept
                }
                // M7: undo the commits of M6 and move down the column.
                State::Retreat => {
                    let Choice::Cell(ix) = self.x[self.level] else {
                        unreachable!("retreating requires a committed row")
                    };
                    self.uncommit_row_of(ix);
                    let item_ix = self.cur_item;
                    self.x[self.level] = match self.instance(ix).below {
                        Some(below) => Choice::Cell(below),
                        None => Choice::Header(item_ix),
                    };
                    State::TryOption
                }
                // M8: restore the branch item of this level.
                State::RestoreItem => {
                    let item_ix = self.cur_item;
                    let item = self.item(item_ix);
                    let (bound, slack) = (item.bound, item.slack);
                    if bound == 0 && slack == 0 {
                        self.uncover(item_ix);
                    } else if bound == 0 {
                        self.untweak_special(item_ix);
                    } else {
                        self.untweak(item_ix);
                    }
                    self.item_mut(item_ix).bound += 1;
                    State::Backtrack
                }
                // M9: leave the current level.
                State::Backtrack => {
                    if self.level == 0 {
                        State::Done
                    } else {
                        self.level -= 1;
                        match self.x[self.level] {
                            Choice::Header(item_ix) => {
                                // The level ended in a null choice; undo the
                                // withdrawal and restore the item.
                                self.cur_item = item_ix;
                                self.reactivate(item_ix);
                                State::RestoreItem
                            }
                            Choice::Cell(ix) => {
                                self.cur_item = self.instance(ix).item;
                                State::Retreat
                            }
                        }
                    }
                }
                State::Done => return None,
            };
        }
    }

    /// Returns the rows selected by the choices below the current level.
    /// Levels that ended in a null choice select no row.
    fn chosen_rows(&self) -> Vec<RowId> {
        self.x[..self.level]
            .iter()
            .filter_map(|choice| match *choice {
                Choice::Cell(ix) => Some(self.instance(ix).row),
                Choice::Header(_) => None,
            })
            .collect()
    }

    /// Records the choice for the current level.
    fn record_choice(&mut self, choice: Choice) {
        if self.level == self.x.len() {
            self.x.push(choice);
        } else {
            self.x[self.level] = choice;
        }
    }

    /// Records the first-tweak bookkeeping for the current level.
    fn record_first_tweak(&mut self, ft: Option<Choice>) {
        if self.level == self.ft.len() {
            self.ft.push(ft);
        } else {
            self.ft[self.level] = ft;
        }
    }

    // Enumeration interfaces.

    /// Finds the next solution, as the identifiers of its selected rows in
    /// the order the search chose them.
    ///
    /// The first call starts a resumable enumeration; each subsequent call
    /// continues it from where the previous solution was found, without
    /// revisiting explored branches. Once the search tree is exhausted the
    /// result is [`None`], the table is restored to its pristine state, and
    /// every later call keeps returning [`None`].
    pub fn next_solution(&mut self) -> Option<Vec<RowId>> {
        let entry = match self.phase {
            Phase::Fresh => {
                self.x.clear();
                self.ft.clear();
                self.level = 0;
                State::ChooseOrAccept
            }
            Phase::Suspended => State::Backtrack,
            Phase::Exhausted => return None,
        };
        match self.run(entry) {
            Some(rows) => {
                self.phase = Phase::Suspended;
                Some(rows)
            }
            None => {
                self.phase = Phase::Exhausted;
                None
            }
        }
    }

    /// Enumerates every solution to the problem, in the same order as
    /// repeated [`next_solution`](Self::next_solution) calls would produce
    /// them. When `verbose` is true each solution is logged as it is found.
    ///
    /// The table is fully restored afterwards: the solver may be reused,
    /// including for adding further rows.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SearchInProgress`] if a resumable enumeration is
    /// currently suspended on this solver.
    pub fn all_solutions(&mut self, verbose: bool) -> Result<Vec<Vec<RowId>>, Error> {
        if self.phase == Phase::Suspended {
            return Err(Error::SearchInProgress);
        }
        self.phase = Phase::Fresh;
        let mut solutions = Vec::new();
        while let Some(rows) = self.next_solution() {
            if verbose {
                info!(solution = ?rows, "found solution");
            } else {
                trace!(solution = ?rows, "found solution");
            }
            solutions.push(rows);
        }
        if verbose {
            info!(count = solutions.len(), "search exhausted");
        } else {
            debug!(count = solutions.len(), "search exhausted");
        }
        // Exhaustion restored the table, so the solver is as good as new.
        self.phase = Phase::Fresh;
        Ok(solutions)
    }

    /// Replaces the branching strategy consulted at every level of the
    /// search.
    ///
    /// The strategy is called with the solver and must return an active
    /// primary item; it is never called while no primary item is active. The
    /// accessors [`active_primary_items`], [`length`], [`bound`], [`slack`],
    /// [`branch_degree`] and [`is_covered`] expose the state a strategy may
    /// want to inspect. The default is [`Solver::min_length_item`].
    ///
    /// Swapping the strategy mid-enumeration only affects levels entered
    /// afterwards.
    ///
    /// [`active_primary_items`]: Self::active_primary_items
    /// [`length`]: Self::length
    /// [`bound`]: Self::bound
    /// [`slack`]: Self::slack
    /// [`branch_degree`]: Self::branch_degree
    /// [`is_covered`]: Self::is_covered
    pub fn set_choose_function(&mut self, choose: impl Fn(&Self) -> ItemIndex + 'static) {
        self.choose = Box::new(choose);
    }

    /// Returns the active primary item whose vertical list is shortest,
    /// preferring the earliest such item in the active list.
    ///
    /// Knuth found that branching on an item with few remaining candidates
    /// (the "minimum remaining values" heuristic) often works well in
    /// practice; see Section 7.2.2.3 of TAOCP for empirical results on
    /// standard exact cover problems.
    ///
    /// # Panics
    ///
    /// This function panics if no primary item is active.
    pub fn min_length_item(&self) -> ItemIndex {
        let mut min_len = usize::MAX;
        let mut min_ix = None;
        let mut cur_ix = self.primary_head().right;
        while cur_ix != PRIMARY_HEADER {
            let item = self.item(cur_ix);
            if item.len < min_len {
                // An empty vertical list cannot be beaten.
                if item.len == 0 {
                    return cur_ix;
                }
                min_len = item.len;
                min_ix = Some(cur_ix);
            }
            cur_ix = item.right;
        }
        min_ix.expect("at least one primary item must be active")
    }
}

impl<I, C> Solver<I, C> {
    // Accessor methods.

    /// Returns the positions of the active primary items, in list order.
    pub fn active_primary_items(&self) -> impl Iterator<Item = ItemIndex> + '_ {
        let mut cur_ix = self.primary_head().right;
        iter::from_fn(move || {
            if cur_ix == PRIMARY_HEADER {
                None
            } else {
                let ix = cur_ix;
                cur_ix = self.item(ix).right;
                Some(ix)
            }
        })
    }

    /// Returns the number of active rows containing the given item.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    pub fn length(&self, ix: ItemIndex) -> usize {
        self.item(ix).len
    }

    /// Returns the number of further rows that may select the given primary
    /// item at this point of the search.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    pub fn bound(&self, ix: ItemIndex) -> usize {
        self.item(ix).bound
    }

    /// Returns the slack of the given primary item: the width of its declared
    /// multiplicity range.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    pub fn slack(&self, ix: ItemIndex) -> usize {
        self.item(ix).slack
    }

    /// Returns the number of ways the search can branch on the given primary
    /// item: its remaining candidate rows, plus one for the null choice if
    /// the item's lower bound no longer requires every remaining selection.
    /// In Knuth's terms this is `monus(LEN + 1, monus(BOUND, SLACK))`.
    ///
    /// A zero branch degree means the item's lower bound has become
    /// unreachable and the current branch is dead.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    pub fn branch_degree(&self, ix: ItemIndex) -> usize {
        let item = self.item(ix);
        (item.len + 1).saturating_sub(item.bound.saturating_sub(item.slack))
    }

    /// Returns whether the given item is currently covered.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    pub fn is_covered(&self, ix: ItemIndex) -> bool {
        self.item(ix).covered
    }

    /// Returns the number of declared items, both primary and secondary.
    pub fn item_count(&self) -> usize {
        self.items.len() - 2
    }

    /// Returns the number of declared primary items.
    pub fn primary_count(&self) -> usize {
        self.n_primary
    }

    /// Returns the number of rows added so far.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the contents of a row exactly as it was declared: its primary
    /// item handles and its (secondary item, color) pairs.
    ///
    /// # Panics
    ///
    /// This function panics if no row with the given identifier exists.
    pub fn row_contents(&self, row: RowId) -> (&[I], &[(I, Option<C>)]) {
        let (primary, secondary) = &self.rows[row];
        (primary, secondary)
    }

    /// Returns whether the given position holds a primary item.
    fn is_primary(&self, ix: ItemIndex) -> bool {
        (1..=self.n_primary).contains(&ix.get())
    }

    /// Returns whether the given position holds a primary item that is in
    /// the active list. Intended for debug assertions; this walks the list.
    fn is_active_primary(&self, ix: ItemIndex) -> bool {
        self.is_primary(ix) && self.active_primary_items().any(|cur| cur == ix)
    }

    /// Returns a reference to the item at the given position.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    fn item(&self, ix: ItemIndex) -> &Item<I> {
        &self.items[ix.get()]
    }

    /// Returns a mutable reference to the item at the given position.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    fn item_mut(&mut self, ix: ItemIndex) -> &mut Item<I> {
        &mut self.items[ix.get()]
    }

    /// Returns a reference to the head of the list of active primary items.
    fn primary_head(&self) -> &Item<I> {
        self.item(PRIMARY_HEADER)
    }

    /// Returns a reference to the node at the given position.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds.
    fn node(&self, ix: NodeIndex) -> &Node<C> {
        &self.nodes[ix]
    }

    /// Returns a reference to the cell at the given position.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds, or if the node
    /// referenced is a [spacer](`Node::Spacer`) rather than an instance.
    fn instance(&self, ix: InstIndex) -> &Instance<C> {
        if let Node::Instance(inst) = self.node(ix.get()) {
            inst
        } else {
            panic!("node at index {ix:?} is not an item instance")
        }
    }

    /// Returns a mutable reference to the cell at the given position.
    ///
    /// # Panics
    ///
    /// This function panics if the index is out of bounds, or if the node
    /// referenced is a [spacer](`Node::Spacer`) rather than an instance.
    fn instance_mut(&mut self, ix: InstIndex) -> &mut Instance<C> {
        if let Node::Instance(inst) = &mut self.nodes[ix.get()] {
            inst
        } else {
            panic!("node at index {ix:?} is not an item instance")
        }
    }
}

impl<I: fmt::Debug, C: fmt::Debug> fmt::Debug for Solver<I, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("items", &self.items)
            .field("nodes", &self.nodes)
            .field("rows", &self.rows)
            .field("level", &self.level)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// The complete mutable state of the link table, for restoration checks.
    fn table_state<I: Clone, C: Clone>(solver: &Solver<I, C>) -> (Vec<Item<I>>, Vec<Node<C>>) {
        (solver.items.clone(), solver.nodes.clone())
    }

    fn assert_eq_item<I: fmt::Debug + Eq>(
        item: &Item<I>,
        label: I,
        left: ItemIndex,
        right: ItemIndex,
    ) {
        assert_eq!(item.label.as_ref(), Some(&label));
        assert_eq!(item.left, left);
        assert_eq!(item.right, right);
    }

    /// Sorts each solution and then the whole list, for set-level comparison.
    fn normalized(mut solutions: Vec<Vec<RowId>>) -> Vec<Vec<RowId>> {
        for solution in &mut solutions {
            solution.sort_unstable();
        }
        solutions.sort();
        solutions
    }

    #[test]
    fn new_table_with_primary_only() {
        let solver: Solver<u8, ()> = Solver::new(&[(1, 1, 1), (2, 0, 2), (3, 1, 3)], &[]).unwrap();
        assert_eq!(solver.items.len(), 5); // 2 headers + 3 items

        let primary_header = solver.primary_head();
        assert_eq!(primary_header.left, ItemIndex::new(3));
        assert_eq!(primary_header.right, ItemIndex::new(1));

        let one = solver.item(ItemIndex::new(1));
        assert_eq_item(one, 1, PRIMARY_HEADER, ItemIndex::new(2));
        assert_eq!((one.slack, one.bound), (0, 1));

        let two = solver.item(ItemIndex::new(2));
        assert_eq_item(two, 2, ItemIndex::new(1), ItemIndex::new(3));
        assert_eq!((two.slack, two.bound), (2, 2));

        let three = solver.item(ItemIndex::new(3));
        assert_eq_item(three, 3, ItemIndex::new(2), PRIMARY_HEADER);
        assert_eq!((three.slack, three.bound), (2, 3));
    }

    #[test]
    fn new_table_with_primary_and_secondary() {
        let solver: Solver<char, ()> =
            Solver::new(&[('a', 1, 1), ('b', 1, 1), ('c', 1, 1)], &['d', 'e', 'f']).unwrap();
        assert_eq!(solver.items.len(), 8); // 2 headers + 6 items

        // The left link of this header points to the last primary item,
        // because the secondary items do not appear in the active list
        // of primary items.
        let primary_header = solver.primary_head();
        assert_eq!(primary_header.left, ItemIndex::new(3));
        assert_eq!(primary_header.right, ItemIndex::new(1));

        let a = solver.item(ItemIndex::new(1));
        assert_eq_item(a, 'a', PRIMARY_HEADER, ItemIndex::new(2));

        // The right link of the last primary item points to the primary header.
        let c = solver.item(ItemIndex::new(3));
        assert_eq_item(c, 'c', ItemIndex::new(2), PRIMARY_HEADER);

        // The left link of the first secondary item points to the secondary header.
        let d = solver.item(ItemIndex::new(4));
        assert_eq_item(d, 'd', ItemIndex::new(7), ItemIndex::new(5));

        // The right link of the last secondary item points to the secondary header.
        let f = solver.item(ItemIndex::new(6));
        assert_eq_item(f, 'f', ItemIndex::new(5), ItemIndex::new(7));

        let secondary_header = solver.items.last().unwrap();
        assert_eq!(secondary_header.left, ItemIndex::new(6));
        assert_eq!(secondary_header.right, ItemIndex::new(4));
    }

    #[test]
    fn rejects_misdeclared_problems() {
        assert_eq!(
            Solver::<char, ()>::new(&[('a', 2, 1)], &[]).unwrap_err(),
            Error::InvalidBounds { lower: 2, upper: 1 }
        );
        assert_eq!(
            Solver::<char, ()>::new(&[('a', 1, 1), ('a', 1, 1)], &[]).unwrap_err(),
            Error::DuplicateItem
        );
        assert_eq!(
            Solver::<char, ()>::new(&[('a', 1, 1)], &['a']).unwrap_err(),
            Error::DuplicateItem
        );

        let mut solver: Solver<char, u8> = Solver::new(&[('a', 1, 1)], &['x']).unwrap();
        assert_eq!(solver.add_row(['b'], []).unwrap_err(), Error::UnknownItem);
        assert_eq!(
            solver.add_row([], [('y', Some(1))]).unwrap_err(),
            Error::UnknownItem
        );
        assert_eq!(
            solver.add_row::<[char; 0], [(char, Option<u8>); 0]>([], []).unwrap_err(),
            Error::EmptyRow
        );
        // Failed insertions leave no partial rows behind.
        assert_eq!(solver.row_count(), 0);
        assert_eq!(solver.nodes.len(), 1);
    }

    #[test]
    fn cover_uncover_round_trip() {
        let mut solver = Solver::new(&[('p', 1, 1), ('q', 1, 1)], &['x']).unwrap();
        solver.add_row(['p', 'q'], [('x', Some(0))]).unwrap();
        solver.add_row(['p'], [('x', Some(1))]).unwrap();
        solver.add_row(['q'], []).unwrap();

        let before = table_state(&solver);
        let p = ItemIndex::new(1);
        solver.cover(p);
        assert!(solver.is_covered(p));
        solver.uncover(p);
        assert_eq!(table_state(&solver), before);

        // Nested pairs unwind just as cleanly in reverse order.
        let q = ItemIndex::new(2);
        solver.cover(p);
        solver.cover(q);
        solver.uncover(q);
        solver.uncover(p);
        assert_eq!(table_state(&solver), before);
    }

    #[test]
    fn singleton_rows_yield_one_solution_each() {
        let mut solver: Solver<char, ()> = Solver::new(&[('p', 1, 1)], &[]).unwrap();
        for _ in 0..3 {
            solver.add_row(['p'], []).unwrap();
        }
        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(solutions, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn toy_problem_with_colors() {
        // A variation on the example problem of Section 7.2.2.1 of TAOCP,
        // with unit multiplicities throughout.
        let primary = [('p', 1, 1), ('q', 1, 1), ('r', 1, 1)];
        let secondary = ['x', 'y'];
        let mut solver = Solver::new(&primary, &secondary).unwrap();
        solver.add_row(['p', 'q'], [('x', None), ('y', Some(1))]).unwrap();
        solver.add_row(['p', 'r'], [('x', Some(1)), ('y', None)]).unwrap();
        solver.add_row(['p'], [('x', Some(2))]).unwrap();
        solver.add_row(['q'], [('x', Some(1))]).unwrap();
        solver.add_row(['r'], [('y', Some(1))]).unwrap();

        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(normalized(solutions), vec![vec![0, 4], vec![1, 3]]);
    }

    #[test]
    fn zero_lower_bound_admits_every_subset() {
        // With three interchangeable rows and bounds (0, 3), the search
        // enumerates all subsets in decreasing-prefix order.
        let mut solver: Solver<char, ()> = Solver::new(&[('x', 0, 3)], &[]).unwrap();
        for _ in 0..3 {
            solver.add_row(['x'], []).unwrap();
        }
        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(
            solutions,
            vec![
                vec![0, 1, 2],
                vec![0, 1],
                vec![0, 2],
                vec![0],
                vec![1, 2],
                vec![1],
                vec![2],
                vec![],
            ]
        );
    }

    #[test]
    fn multiplicity_bounds_cap_subset_sizes() {
        // Five interchangeable rows; the bounds select subsets by size.
        for (lower, upper, expected) in [(0, 5, 32), (0, 3, 26), (2, 3, 20), (5, 5, 1)] {
            let mut solver: Solver<char, ()> = Solver::new(&[('x', lower, upper)], &[]).unwrap();
            for _ in 0..5 {
                solver.add_row(['x'], []).unwrap();
            }
            let solutions = solver.all_solutions(false).unwrap();
            assert_eq!(solutions.len(), expected, "bounds ({lower}, {upper})");
            for solution in &solutions {
                assert!((lower..=upper).contains(&solution.len()));
            }
        }
    }

    #[test]
    fn empty_problem_has_the_empty_solution() {
        let mut solver: Solver<char, ()> = Solver::new(&[], &[]).unwrap();
        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(solutions, vec![Vec::<RowId>::new()]);
    }

    #[test]
    fn mixed_bounds_enumeration() {
        let mut solver: Solver<char, ()> =
            Solver::new(&[('a', 0, 1), ('b', 1, 1), ('c', 0, 1)], &[]).unwrap();
        solver.add_row(['a', 'b', 'c'], []).unwrap();
        solver.add_row(['b'], []).unwrap();
        solver.add_row(['c'], []).unwrap();

        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(normalized(solutions), vec![vec![0], vec![1], vec![1, 2]]);
    }

    #[test]
    fn uncolored_secondary_cells_are_exclusive() {
        // Both rows claim `e` outright, so they cannot appear together and
        // the two primary items can never both be selected.
        let mut solver: Solver<char, u8> =
            Solver::new(&[('a', 1, 1), ('b', 1, 1)], &['e']).unwrap();
        solver.add_row(['a'], [('e', None)]).unwrap();
        solver.add_row(['b'], [('e', None)]).unwrap();
        assert!(solver.all_solutions(false).unwrap().is_empty());
    }

    #[test]
    fn colored_cells_must_agree() {
        let mut solver = Solver::new(&[('a', 1, 1), ('b', 1, 1)], &['c']).unwrap();
        solver.add_row(['a'], [('c', None)]).unwrap();
        solver.add_row(['a'], [('c', Some(3))]).unwrap();
        solver.add_row(['b'], [('c', None)]).unwrap();
        solver.add_row(['b'], [('c', Some(3))]).unwrap();

        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(normalized(solutions), vec![vec![1, 3]]);
    }

    #[test]
    fn purely_secondary_rows_are_never_chosen() {
        let mut solver = Solver::new(&[('a', 1, 1)], &['x']).unwrap();
        solver.add_row(['a'], []).unwrap();
        solver.add_row([], [('x', Some(1))]).unwrap();
        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(solutions, vec![vec![0]]);
    }

    #[test]
    fn zero_upper_bound_items_are_born_satisfied() {
        // `z` never blocks the solution even though it is never covered, and
        // the row referencing it can never be selected.
        let mut solver: Solver<char, ()> =
            Solver::new(&[('p', 1, 1), ('z', 0, 0)], &[]).unwrap();
        solver.add_row(['p'], []).unwrap();
        solver.add_row(['p', 'z'], []).unwrap();
        assert!(solver.is_covered(ItemIndex::new(2)));
        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(solutions, vec![vec![0]]);
        // The dead row is still recorded for reconstruction.
        assert_eq!(solver.row_contents(1).0, &['p', 'z']);
    }

    #[test]
    fn next_solution_matches_eager_enumeration() {
        let build = || {
            let mut solver: Solver<char, ()> =
                Solver::new(&[('a', 0, 1), ('b', 1, 1), ('c', 0, 1)], &[]).unwrap();
            solver.add_row(['a', 'b', 'c'], []).unwrap();
            solver.add_row(['b'], []).unwrap();
            solver.add_row(['c'], []).unwrap();
            solver
        };
        let eager = build().all_solutions(false).unwrap();

        let mut solver = build();
        let mut lazy = Vec::new();
        while let Some(solution) = solver.next_solution() {
            lazy.push(solution);
        }
        assert_eq!(lazy, eager);
        // Exhaustion is sticky.
        assert_eq!(solver.next_solution(), None);
        assert_eq!(solver.next_solution(), None);
    }

    #[test]
    fn table_is_restored_after_enumeration() {
        let mut solver = Solver::new(&[('p', 1, 1), ('q', 0, 2)], &['x']).unwrap();
        solver.add_row(['p', 'q'], [('x', Some(1))]).unwrap();
        solver.add_row(['p'], [('x', Some(2))]).unwrap();
        solver.add_row(['q'], []).unwrap();

        let before = table_state(&solver);
        let first = solver.all_solutions(false).unwrap();
        assert_eq!(table_state(&solver), before);
        // A second run over the same table reproduces the same sequence.
        let second = solver.all_solutions(false).unwrap();
        assert_eq!(first, second);

        // The resumable variant restores the table at exhaustion too.
        while solver.next_solution().is_some() {}
        assert_eq!(table_state(&solver), before);
    }

    #[test]
    fn rows_freeze_while_a_search_is_suspended() {
        let mut solver: Solver<char, ()> = Solver::new(&[('p', 1, 1)], &[]).unwrap();
        solver.add_row(['p'], []).unwrap();
        solver.add_row(['p'], []).unwrap();

        assert!(solver.next_solution().is_some());
        assert_eq!(solver.add_row(['p'], []).unwrap_err(), Error::RowsFrozen);
        assert_eq!(solver.all_solutions(false).unwrap_err(), Error::SearchInProgress);

        // Once the stream is exhausted the solver can be extended again.
        while solver.next_solution().is_some() {}
        assert_eq!(solver.all_solutions(false).unwrap().len(), 2);
        let row = solver.add_row(['p'], []).unwrap();
        assert_eq!(row, 2);
        assert_eq!(solver.all_solutions(false).unwrap().len(), 3);
    }

    #[test]
    fn custom_branching_strategy_is_consulted() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let mut solver: Solver<char, ()> =
            Solver::new(&[('a', 1, 1), ('b', 1, 1)], &[]).unwrap();
        solver.add_row(['a'], []).unwrap();
        solver.add_row(['b'], []).unwrap();
        solver.add_row(['a', 'b'], []).unwrap();
        // Branch on the *last* active item instead of the shortest column.
        solver.set_choose_function(move |s: &Solver<char, ()>| {
            seen.set(seen.get() + 1);
            s.active_primary_items().last().unwrap()
        });

        let solutions = solver.all_solutions(false).unwrap();
        assert_eq!(normalized(solutions), vec![vec![0, 1], vec![2]]);
        assert!(calls.get() > 0);
    }

    #[test]
    fn row_contents_survive_searches() {
        let mut solver = Solver::new(&[('p', 1, 1), ('q', 1, 1)], &['x', 'y']).unwrap();
        solver.add_row(['p', 'q'], [('x', Some(1)), ('y', None)]).unwrap();
        solver.add_row(['p'], [('x', Some(2))]).unwrap();
        solver.add_row(['q'], [('x', Some(1))]).unwrap();
        solver.all_solutions(false).unwrap();

        assert_eq!(
            solver.row_contents(0),
            (&['p', 'q'][..], &[('x', Some(1)), ('y', None)][..])
        );
        assert_eq!(solver.row_contents(1), (&['p'][..], &[('x', Some(2))][..]));
        assert_eq!(solver.row_count(), 3);
    }
}
