//! The following program plans a week of duty shifts. Five weekday shifts
//! must each be staffed by exactly one person, nobody may work more than two
//! shifts, and whoever works does so at a single site for the whole week.
//!
//! The encoding uses every feature of covering with multiplicities and
//! colors: each shift is a primary item with multiplicity range `1..=1`,
//! each person a primary item with range `0..=2`, and each person's site a
//! secondary item whose color pins the person to one location. A candidate
//! row "person takes this shift at this site" selects the shift and the
//! person, and assigns the site code as a color.

use multicovers::Model;

const SHIFTS: [&str; 5] = ["mon", "tue", "wed", "thu", "fri"];
const STAFF: [&str; 3] = ["alice", "bert", "carol"];
const SITES: [char; 2] = ['N', 'S'];

fn main() {
    let mut model: Model<&str, char> = Model::new();
    let slot = model.new_variable(1, 1).expect("range 1..=1 is not inverted");
    let load = model.new_variable(0, 2).expect("range 0..=2 is not inverted");
    let site = model.new_secondary_variable();

    // One row per (shift, person, site) combination. `RowId`s are handed out
    // in insertion order, so this table decodes solutions back into triples.
    let mut rota = Vec::new();
    for shift in SHIFTS {
        for person in STAFF {
            for code in SITES {
                let s = model.item(slot, shift);
                let p = model.item(load, person);
                let loc = model.item(site, person);
                let row = model
                    .add_row([s, p], [(loc, Some(code))])
                    .expect("row references freshly minted items");
                assert_eq!(row, rota.len());
                rota.push((shift, person, code));
            }
        }
    }

    let solutions = model.all_solutions(false);
    println!("{} valid rotas", solutions.len());

    if let Some(solution) = solutions.first() {
        println!("for example:");
        let mut plan: Vec<_> = solution.iter().map(|&row| rota[row]).collect();
        plan.sort_by_key(|&(shift, ..)| SHIFTS.iter().position(|&s| s == shift));
        for (shift, person, code) in plan {
            println!("  {shift}: {person} at site {code}");
        }
    }
}
