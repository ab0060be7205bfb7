//! Feasibility pre-check: a cheap static analyzer that inspects a
//! [`SolveRequest`] and produces human-readable hints when the problem is
//! likely infeasible. It runs before the solver and its output rides on
//! error responses; an empty list proves nothing.

use crate::board::{Pos, FOYER, NUM_CELLS};
use crate::request::SolveRequest;
use crate::rules::{compat, RoomType, NO_SELF_ADJACENCY, REQUIRES_PATH_NEIGHBOR, UNIQUE_TYPES};

/// Run every check and collect the hints. `O(81 + |existing|^2)`.
pub fn feasibility_hints(req: &SolveRequest) -> Vec<String> {
    let mut hints = Vec::new();
    let architect = req.architect_pos();

    // (c) architect off-grid: everything else assumes a real position.
    if !architect.in_bounds() {
        hints.push(format!(
            "architect position ({}, {}) is outside the 9x9 grid",
            architect.x, architect.y
        ));
        return hints;
    }

    let existing_cells: Vec<Pos> = req
        .existing_rooms
        .iter()
        .map(|r| r.pos())
        .chain(req.existing_paths.iter().map(|p| p.pos()))
        .filter(|p| p.in_bounds())
        .collect();

    // (a) a locked room that needs a path neighbor, with no path budget
    // and no path tile already next to it.
    if req.max_paths == 0 && req.lock_existing {
        let path_like = |p: Pos| {
            p == FOYER
                || p == architect
                || req.existing_paths.iter().any(|q| q.pos() == p)
        };
        for r in &req.existing_rooms {
            if !REQUIRES_PATH_NEIGHBOR.contains(&r.room_type) {
                continue;
            }
            if !r.pos().neighbors().any(path_like) {
                hints.push(format!(
                    "{} requires a Path neighbor but max_paths=0",
                    r.room_type
                ));
            }
        }
    }

    // (b) minimum counts against remaining capacity. The snake estimate is
    // the same ceiling: a single corridor can visit at most every free
    // cell once.
    let capacity = (NUM_CELLS - 2) as u32; // foyer + architect are path tiles
    let wanted = req.min_spymasters + req.min_corruption_chambers;
    if wanted > capacity {
        let mode = if req.snake_mode { " (snake mode)" } else { "" };
        hints.push(format!(
            "minimum room counts ({wanted}) exceed remaining grid capacity ({capacity}){mode}"
        ));
    }

    // (d) locked existing cells too far from the architect to bridge with
    // the path budget.
    if req.lock_existing && !existing_cells.is_empty() {
        let nearest = existing_cells
            .iter()
            .map(|p| p.manhattan(architect))
            .min()
            .unwrap_or(0);
        if nearest > req.max_paths + 1 {
            hints.push(format!(
                "architect is {nearest} cells from the nearest existing cell but max_paths={} allows bridging at most {}",
                req.max_paths,
                req.max_paths + 1
            ));
        }
    }

    // (e) locked minimums against the cells that are still free.
    if req.lock_existing {
        let placed_spies = req
            .existing_rooms
            .iter()
            .filter(|r| r.room_type == RoomType::Spymaster)
            .count() as u32;
        let placed_corruption = req
            .existing_rooms
            .iter()
            .filter(|r| r.room_type == RoomType::CorruptionChamber)
            .count() as u32;
        let free = capacity.saturating_sub(existing_cells.len() as u32);
        let missing = req.min_spymasters.saturating_sub(placed_spies)
            + req.min_corruption_chambers.saturating_sub(placed_corruption);
        if missing > free {
            hints.push(format!(
                "locked layout leaves {free} free cells but still needs {missing} more required rooms"
            ));
        }
    }

    // (f) a unique room pre-placed more than once.
    for &t in UNIQUE_TYPES.iter() {
        let count = req
            .existing_rooms
            .iter()
            .filter(|r| r.room_type == t)
            .count();
        if count > 1 {
            hints.push(format!("{t} is unique but appears {count} times in existing_rooms"));
        }
    }

    // (g) locked self-adjacency violations.
    if req.lock_existing {
        for (i, a) in req.existing_rooms.iter().enumerate() {
            if !NO_SELF_ADJACENCY.contains(&a.room_type) {
                continue;
            }
            for b in req.existing_rooms.iter().skip(i + 1) {
                if b.room_type == a.room_type && a.pos().manhattan(b.pos()) == 1 {
                    hints.push(format!(
                        "two {} rooms are locked adjacent at ({}, {}) and ({}, {})",
                        a.room_type, a.x, a.y, b.x, b.y
                    ));
                }
            }
        }
    }

    // (h) a locked room walled in by incompatible locked neighbors can
    // never join the foyer's component.
    if req.lock_existing {
        let type_at = |p: Pos| -> Option<RoomType> {
            if p == FOYER || p == architect {
                return Some(RoomType::Path);
            }
            if let Some(r) = req.existing_rooms.iter().find(|r| r.pos() == p) {
                return Some(r.room_type);
            }
            if req.existing_paths.iter().any(|q| q.pos() == p) {
                return Some(RoomType::Path);
            }
            None
        };
        for r in &req.existing_rooms {
            let mut connectable = false;
            for n in r.pos().neighbors() {
                match type_at(n) {
                    Some(t) => {
                        if compat(r.room_type, t) {
                            connectable = true;
                            break;
                        }
                    }
                    // A free neighbor can always be filled with something
                    // compatible (at worst a path tile, budget permitting).
                    None => {
                        connectable = true;
                        break;
                    }
                }
            }
            if !connectable {
                hints.push(format!(
                    "locked {} at ({}, {}) cannot connect to any neighbor",
                    r.room_type, r.x, r.y
                ));
            }
        }
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ExistingRoom;

    fn room(t: RoomType, tier: u8, x: u8, y: u8) -> ExistingRoom {
        ExistingRoom {
            room_type: t,
            tier,
            x,
            y,
        }
    }

    #[test]
    fn clean_request_has_no_hints() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        assert!(feasibility_hints(&req).is_empty());
    }

    #[test]
    fn impossible_minimums_mention_capacity() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.min_spymasters = 99;
        req.min_corruption_chambers = 0;
        let hints = feasibility_hints(&req);
        assert!(hints.iter().any(|h| h.contains("capacity")), "{hints:?}");
    }

    #[test]
    fn locked_adjacent_garrisons_are_reported() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.existing_rooms = vec![
            room(RoomType::Garrison, 3, 5, 2),
            room(RoomType::Garrison, 3, 5, 3),
        ];
        let hints = feasibility_hints(&req);
        assert!(
            hints.iter().any(|h| h.contains("Garrison") && h.contains("adjacent")),
            "{hints:?}"
        );
    }

    #[test]
    fn generator_without_path_budget_is_reported() {
        let mut req = SolveRequest::new(Pos::new(9, 9));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_paths = 0;
        req.existing_rooms = vec![room(RoomType::Generator, 1, 4, 4)];
        let hints = feasibility_hints(&req);
        assert!(
            hints
                .iter()
                .any(|h| h.contains("Generator requires a Path neighbor but max_paths=0")),
            "{hints:?}"
        );
    }

    #[test]
    fn off_grid_architect_short_circuits() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.architect = [0, 7];
        let hints = feasibility_hints(&req);
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("outside"));
    }

    #[test]
    fn duplicate_unique_room_is_reported() {
        let mut req = SolveRequest::new(Pos::new(5, 5));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.existing_rooms = vec![
            room(RoomType::Commander, 1, 2, 2),
            room(RoomType::Commander, 1, 7, 7),
        ];
        let hints = feasibility_hints(&req);
        assert!(hints.iter().any(|h| h.contains("unique")), "{hints:?}");
    }

    #[test]
    fn architect_far_from_locked_cells_is_reported() {
        let mut req = SolveRequest::new(Pos::new(9, 9));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        req.max_paths = 0;
        req.existing_rooms = vec![room(RoomType::Garrison, 1, 1, 1)];
        let hints = feasibility_hints(&req);
        assert!(hints.iter().any(|h| h.contains("bridging")), "{hints:?}");
    }
}
