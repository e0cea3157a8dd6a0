use crate::dl::Solver;
use crate::indices::ItemIndex;
use crate::{Error, RowId};
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;
use tracing::debug;

/// A group of items sharing one multiplicity range, declared by
/// [`Model::new_variable`] or [`Model::new_secondary_variable`]. The items
/// themselves are minted on demand by [`Model::item`], addressed by key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Variable(usize);

/// An opaque item handle minted by a [`Model`], which remembers the variable
/// and key behind each handle in a side table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ItemId(usize);

/// The items of one variable, in first-use order.
struct VarGroup<K> {
    lower: usize,
    upper: usize,
    secondary: bool,
    /// Resolves a key to the item minted for it, if any.
    by_key: HashMap<K, ItemId>,
    /// The minted items in first-use order. `HashMap` iteration order is
    /// arbitrary, so table compilation walks this list instead.
    order: Vec<ItemId>,
}

/// Declares an MCC problem in terms of _variables_ rather than a fixed item
/// list: a variable stands for a family of items addressed by an arbitrary
/// hashable key, and the item for a fresh key is allocated on first use.
/// This suits encodings where the item set is implicit in the problem data,
/// such as one item per cell of a grid or per symbol of a pattern.
///
/// The model compiles its declarations into a [`Solver`] when asked to
/// enumerate. [`all_solutions`](Self::all_solutions) builds a fresh table on
/// every call; [`next_solution`](Self::next_solution) compiles once, lazily,
/// and then resumes the same table until it is exhausted.
///
/// # Example
///
/// Select at most two of three interchangeable rows:
///
/// ```
/// use multicovers::Model;
///
/// let mut model: Model<char, u8> = Model::new();
/// let picks = model.new_variable(0, 2).unwrap();
/// let x = model.item(picks, 'x');
/// for _ in 0..3 {
///     model.add_row([x], []).unwrap();
/// }
/// // All subsets of size 0, 1 or 2.
/// assert_eq!(model.all_solutions(false).len(), 7);
/// ```
pub struct Model<K, C> {
    groups: Vec<VarGroup<K>>,
    /// The variable and key behind each handle, indexed by [`ItemId`].
    keys: Vec<(usize, K)>,
    rows: Vec<(Vec<ItemId>, Vec<(ItemId, Option<C>)>)>,
    /// The branching strategy to install into each compiled table, if any.
    choose: Option<Rc<dyn Fn(&Solver<ItemId, C>) -> ItemIndex>>,
    /// The live table of the resumable stream, compiled on first use.
    solver: Option<Solver<ItemId, C>>,
}

impl<K: Eq + Hash + Clone, C: Copy + Eq + 'static> Model<K, C> {
    /// Creates an empty model with no variables or rows.
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            keys: Vec::new(),
            rows: Vec::new(),
            choose: None,
            solver: None,
        }
    }

    /// Declares a group of primary items sharing the multiplicity range
    /// `lower..=upper`. No items exist until [`item`](Self::item) mints them.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidBounds`] if `lower > upper`.
    pub fn new_variable(&mut self, lower: usize, upper: usize) -> Result<Variable, Error> {
        if lower > upper {
            return Err(Error::InvalidBounds { lower, upper });
        }
        self.groups.push(VarGroup {
            lower,
            upper,
            secondary: false,
            by_key: HashMap::new(),
            order: Vec::new(),
        });
        Ok(Variable(self.groups.len() - 1))
    }

    /// Declares a group of secondary items.
    pub fn new_secondary_variable(&mut self) -> Variable {
        self.groups.push(VarGroup {
            lower: 0,
            upper: 0,
            secondary: true,
            by_key: HashMap::new(),
            order: Vec::new(),
        });
        Variable(self.groups.len() - 1)
    }

    /// Returns the item of `var` addressed by `key`, minting it on first use.
    ///
    /// # Panics
    ///
    /// This function panics if `var` was declared by a different model.
    pub fn item(&mut self, var: Variable, key: K) -> ItemId {
        let group = &mut self.groups[var.0];
        if let Some(&id) = group.by_key.get(&key) {
            return id;
        }
        let id = ItemId(self.keys.len());
        group.by_key.insert(key.clone(), id);
        group.order.push(id);
        self.keys.push((var.0, key));
        id
    }

    /// Appends a row to the model and returns its identifier.
    ///
    /// Rows may be added at any time: they become visible the next time a
    /// table is compiled. In particular, a resumable stream already in
    /// progress keeps searching the table it started with.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::EmptyRow`] if the row references no items, and
    /// with [`Error::UnknownItem`] if a handle is out of range for this
    /// model's items.
    pub fn add_row<P, S>(&mut self, primary: P, secondary: S) -> Result<RowId, Error>
    where
        P: AsRef<[ItemId]>,
        S: AsRef<[(ItemId, Option<C>)]>,
    {
        let primary = primary.as_ref();
        let secondary = secondary.as_ref();
        if primary.is_empty() && secondary.is_empty() {
            return Err(Error::EmptyRow);
        }
        for &id in primary {
            let is_secondary = self.kind_of(id).ok_or(Error::UnknownItem)?;
            debug_assert!(!is_secondary, "row's primary list must name primary items");
        }
        for &(id, _) in secondary {
            let is_secondary = self.kind_of(id).ok_or(Error::UnknownItem)?;
            debug_assert!(is_secondary, "row's secondary list must name secondary items");
        }
        let row = self.rows.len();
        self.rows.push((primary.to_vec(), secondary.to_vec()));
        Ok(row)
    }

    /// Returns whether the given item is secondary, or [`None`] if the handle
    /// is out of range.
    fn kind_of(&self, id: ItemId) -> Option<bool> {
        let &(group, _) = self.keys.get(id.0)?;
        Some(self.groups[group].secondary)
    }

    /// Builds a fresh link table for the resumable stream, replacing the one
    /// a previous stream may have been using and picking up any rows added
    /// in the meantime.
    pub fn compile(&mut self) {
        self.solver = Some(self.build_solver());
    }

    /// Enumerates every solution on a freshly compiled table. Any in-progress
    /// resumable stream is left untouched.
    ///
    /// When `verbose` is true each solution is logged as it is found.
    pub fn all_solutions(&self, verbose: bool) -> Vec<Vec<RowId>> {
        self.build_solver()
            .all_solutions(verbose)
            .expect("a freshly compiled table has no search in progress")
    }

    /// Finds the next solution of the resumable stream, compiling a table on
    /// first use.
    ///
    /// Once the stream reports exhaustion it stays exhausted;
    /// [`compile`](Self::compile) starts a new stream.
    pub fn next_solution(&mut self) -> Option<Vec<RowId>> {
        if self.solver.is_none() {
            self.compile();
        }
        self.solver
            .as_mut()
            .expect("table was compiled above")
            .next_solution()
    }

    /// Replaces the branching strategy of the live table, if one exists, and
    /// of every table compiled from now on.
    /// See [`Solver::set_choose_function`].
    pub fn set_choose_function(
        &mut self,
        choose: impl Fn(&Solver<ItemId, C>) -> ItemIndex + 'static,
    ) {
        let choose: Rc<dyn Fn(&Solver<ItemId, C>) -> ItemIndex> = Rc::new(choose);
        if let Some(solver) = &mut self.solver {
            let f = Rc::clone(&choose);
            solver.set_choose_function(move |s| f(s));
        }
        self.choose = Some(choose);
    }

    /// Compiles the declared items and rows into a solver. Items appear in
    /// variable declaration order and, within a variable, in the order their
    /// keys were first used, so identically declared models enumerate their
    /// solutions identically.
    fn build_solver(&self) -> Solver<ItemId, C> {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for group in &self.groups {
            for &id in &group.order {
                if group.secondary {
                    secondary.push(id);
                } else {
                    primary.push((id, group.lower, group.upper));
                }
            }
        }
        let mut solver = Solver::new(&primary, &secondary)
            .expect("the model mints unique items and validates bounds on declaration");
        for (p, s) in &self.rows {
            solver
                .add_row(p.as_slice(), s.as_slice())
                .expect("model rows are validated as they are added");
        }
        if let Some(choose) = &self.choose {
            let f = Rc::clone(choose);
            solver.set_choose_function(move |s| f(s));
        }
        debug!(
            items = self.keys.len(),
            rows = self.rows.len(),
            "compiled link table"
        );
        solver
    }

    /// Returns the key an item was minted under.
    ///
    /// # Panics
    ///
    /// This function panics if the handle is out of range for this model's
    /// items.
    pub fn key(&self, item: ItemId) -> &K {
        &self.keys[item.0].1
    }

    /// Returns the variable an item belongs to.
    ///
    /// # Panics
    ///
    /// This function panics if the handle is out of range for this model's
    /// items.
    pub fn variable(&self, item: ItemId) -> Variable {
        Variable(self.keys[item.0].0)
    }

    /// Returns the contents of a row as the handles it was declared with.
    ///
    /// # Panics
    ///
    /// This function panics if no row with the given identifier exists.
    pub fn row_items(&self, row: RowId) -> (&[ItemId], &[(ItemId, Option<C>)]) {
        let (primary, secondary) = &self.rows[row];
        (primary, secondary)
    }

    /// Returns the contents of a row as the keys of its items.
    ///
    /// # Panics
    ///
    /// This function panics if no row with the given identifier exists.
    pub fn row_keys(&self, row: RowId) -> (Vec<&K>, Vec<(&K, Option<C>)>) {
        let (primary, secondary) = &self.rows[row];
        (
            primary.iter().map(|&id| self.key(id)).collect(),
            secondary
                .iter()
                .map(|&(id, color)| (self.key(id), color))
                .collect(),
        )
    }

    /// Translates a solution into the keys of its rows' items, in the order
    /// the search chose the rows.
    pub fn solution_to_rows(&self, solution: &[RowId]) -> Vec<(Vec<&K>, Vec<(&K, Option<C>)>)> {
        solution.iter().map(|&row| self.row_keys(row)).collect()
    }

    /// Returns the number of items minted so far.
    pub fn item_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns the number of rows added so far.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl<K: Eq + Hash + Clone, C: Copy + Eq + 'static> Default for Model<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn items_are_minted_lazily_and_scoped_by_variable() {
        let mut model: Model<char, u8> = Model::new();
        let v = model.new_variable(1, 1).unwrap();
        let w = model.new_secondary_variable();
        let a1 = model.item(v, 'a');
        let a2 = model.item(v, 'a');
        assert_eq!(a1, a2);
        let b = model.item(v, 'b');
        assert_ne!(a1, b);
        // The same key under another variable is a distinct item.
        let a3 = model.item(w, 'a');
        assert_ne!(a1, a3);
        assert_eq!(model.item_count(), 3);
        assert_eq!(model.key(a1), &'a');
        assert_eq!(model.key(a3), &'a');
        assert_eq!(model.variable(a3), w);
    }

    #[test]
    fn rejects_misdeclared_models() {
        let mut model: Model<char, u8> = Model::new();
        assert_eq!(
            model.new_variable(3, 1).unwrap_err(),
            Error::InvalidBounds { lower: 3, upper: 1 }
        );
        let v = model.new_variable(1, 1).unwrap();
        let _x = model.item(v, 'x');
        assert_eq!(
            model
                .add_row::<[ItemId; 0], [(ItemId, Option<u8>); 0]>([], [])
                .unwrap_err(),
            Error::EmptyRow
        );
        // A handle beyond this model's items is rejected.
        let mut other: Model<char, u8> = Model::new();
        let vo = other.new_variable(1, 1).unwrap();
        other.item(vo, 'q');
        let foreign = other.item(vo, 'r');
        assert_eq!(model.add_row([foreign], []).unwrap_err(), Error::UnknownItem);
        assert_eq!(model.row_count(), 0);
    }

    #[test]
    fn toy_model_with_colors() {
        let mut model: Model<&str, u8> = Model::new();
        let need = model.new_variable(1, 1).unwrap();
        let mark = model.new_secondary_variable();
        let p = model.item(need, "p");
        let q = model.item(need, "q");
        let r = model.item(need, "r");
        let x = model.item(mark, "x");
        let y = model.item(mark, "y");
        model.add_row([p, q], [(x, None), (y, Some(1))]).unwrap();
        model.add_row([p, r], [(x, Some(1)), (y, None)]).unwrap();
        model.add_row([p], [(x, Some(2))]).unwrap();
        model.add_row([q], [(x, Some(1))]).unwrap();
        model.add_row([r], [(y, Some(1))]).unwrap();

        let mut solutions = model.all_solutions(false);
        for solution in &mut solutions {
            solution.sort_unstable();
        }
        solutions.sort();
        assert_eq!(solutions, [vec![0, 4], vec![1, 3]]);

        // Solutions translate back into the declared keys.
        let rows = model.solution_to_rows(&[1, 3]);
        assert_eq!(rows[0].0, [&"p", &"r"]);
        assert_eq!(rows[0].1, [(&"x", Some(1)), (&"y", None)]);
        assert_eq!(rows[1].0, [&"q"]);
    }

    #[test]
    fn eager_enumeration_does_not_disturb_a_stream() {
        let mut model: Model<char, u8> = Model::new();
        let v = model.new_variable(1, 1).unwrap();
        let p = model.item(v, 'p');
        for _ in 0..3 {
            model.add_row([p], []).unwrap();
        }
        assert_eq!(model.next_solution(), Some(vec![0]));
        // The eager call compiles its own table.
        assert_eq!(model.all_solutions(false).len(), 3);
        // The stream picks up where it left off.
        assert_eq!(model.next_solution(), Some(vec![1]));
        assert_eq!(model.next_solution(), Some(vec![2]));
        assert_eq!(model.next_solution(), None);
        assert_eq!(model.next_solution(), None);
    }

    #[test]
    fn late_rows_appear_after_recompilation() {
        let mut model: Model<char, u8> = Model::new();
        let v = model.new_variable(1, 1).unwrap();
        let p = model.item(v, 'p');
        model.add_row([p], []).unwrap();

        assert_eq!(model.next_solution(), Some(vec![0]));
        // The live stream never sees this row, but the next table will.
        model.add_row([p], []).unwrap();
        assert_eq!(model.next_solution(), None);
        assert_eq!(model.next_solution(), None);

        model.compile();
        assert_eq!(model.next_solution(), Some(vec![0]));
        assert_eq!(model.next_solution(), Some(vec![1]));
        assert_eq!(model.next_solution(), None);
    }

    #[test]
    fn identically_declared_models_enumerate_identically() {
        let build = || {
            let mut model: Model<(u8, u8), u8> = Model::new();
            let cell = model.new_variable(1, 1).unwrap();
            let load = model.new_variable(0, 2).unwrap();
            let a = model.item(cell, (0, 0));
            let b = model.item(cell, (0, 1));
            let w = model.item(load, (9, 9));
            model.add_row([a, w], []).unwrap();
            model.add_row([b, w], []).unwrap();
            model.add_row([a], []).unwrap();
            model.add_row([b], []).unwrap();
            model
        };
        let first = build().all_solutions(false);
        let second = build().all_solutions(false);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn strategy_applies_to_future_tables() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let mut model: Model<char, u8> = Model::new();
        let v = model.new_variable(1, 1).unwrap();
        let p = model.item(v, 'p');
        model.add_row([p], []).unwrap();
        model.set_choose_function(move |s| {
            seen.set(seen.get() + 1);
            s.min_length_item()
        });
        assert_eq!(model.next_solution(), Some(vec![0]));
        assert!(calls.get() > 0);
    }
}
