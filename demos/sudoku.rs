//! The following program solves a classic sudoku puzzle. The grid is encoded
//! as an exact cover problem in the usual way: placing digit `d` at row `r`
//! and column `c` selects four items, namely "cell (r, c) is filled",
//! "row r contains d", "column c contains d" and "box b contains d", each of
//! which must be covered exactly once. A given clue simply restricts its cell
//! to a single candidate digit.
//!
//! All multiplicity ranges are `1..=1` here, so this demonstrates the
//! item-minting convenience layer rather than the wider bounds; see the
//! `rota` program for those.

use multicovers::Model;

/// A puzzle with a unique solution; `.` marks a blank cell.
const GIVENS: [&str; 9] = [
    "53..7....",
    "6..195...",
    ".98....6.",
    "8...6...3",
    "4..8.3..1",
    "7...2...6",
    ".6....28.",
    "...419..5",
    "....8..79",
];

fn main() {
    let mut model: Model<(u8, u8), u8> = Model::new();
    let cell = model.new_variable(1, 1).expect("range 1..=1 is not inverted");
    let row_digit = model.new_variable(1, 1).expect("range 1..=1 is not inverted");
    let col_digit = model.new_variable(1, 1).expect("range 1..=1 is not inverted");
    let box_digit = model.new_variable(1, 1).expect("range 1..=1 is not inverted");

    let mut placements = Vec::new();
    for r in 0..9u8 {
        for c in 0..9u8 {
            let given = GIVENS[r as usize].as_bytes()[c as usize];
            let candidates = if given.is_ascii_digit() {
                given - b'0'..=given - b'0'
            } else {
                1..=9
            };
            for d in candidates {
                let b = r / 3 * 3 + c / 3;
                let items = [
                    model.item(cell, (r, c)),
                    model.item(row_digit, (r, d)),
                    model.item(col_digit, (c, d)),
                    model.item(box_digit, (b, d)),
                ];
                let row = model.add_row(items, []).expect("row uses freshly minted items");
                assert_eq!(row, placements.len());
                placements.push((r, c, d));
            }
        }
    }

    // One solution is enough; the stream stops without exploring further.
    match model.next_solution() {
        Some(solution) => {
            let mut grid = [[0u8; 9]; 9];
            for &row in &solution {
                let (r, c, d) = placements[row];
                grid[r as usize][c as usize] = d;
            }
            for (r, line) in grid.iter().enumerate() {
                if r % 3 == 0 && r > 0 {
                    println!("------+-------+------");
                }
                for (c, d) in line.iter().enumerate() {
                    if c % 3 == 0 && c > 0 {
                        print!("| ");
                    }
                    print!("{d} ");
                }
                println!();
            }
        }
        None => println!("no solution"),
    }
}
