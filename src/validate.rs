//! Post-solve validation: the directional Commander-to-Spymaster
//! linear-chain check, foyer distance labelling, and the structural
//! invariant checker the tests run against returned layouts.
//!
//! The directional rule is deliberately *not* encoded in the model: it
//! would need order-aware variables across arbitrarily many hops, while a
//! BFS over the finished layout answers it in linear time. The driver
//! gates improving solutions through [`directional_violation`].

use std::collections::VecDeque;

use crate::board::{neighbor_table, Pos, FOYER, NUM_CELLS};
use crate::request::{PathOut, RoomOut, SolveRequest};
use crate::rules::{self, RoomType, DIRECTIONAL_PAIR, NO_SELF_ADJACENCY, UNIQUE_TYPES};

/// Cell types of one finished layout, indexable by [`Pos::idx`]; `None`
/// means empty.
pub type CellTypes = Vec<Option<RoomType>>;

/// Assemble the cell array from a result's room/path lists (the foyer and
/// architect are path tiles and implied by the wire format).
pub fn cells_of(rooms: &[RoomOut], paths: &[PathOut], architect: Pos) -> CellTypes {
    let mut cells: CellTypes = vec![None; NUM_CELLS];
    cells[FOYER.idx()] = Some(RoomType::Path);
    cells[architect.idx()] = Some(RoomType::Path);
    for p in paths {
        cells[Pos::new(p.x, p.y).idx()] = Some(RoomType::Path);
    }
    for r in rooms {
        cells[r.pos().idx()] = Some(r.room_type);
    }
    cells
}

/// Every auto-connection of the layout: adjacent in-temple cells with
/// compatible types. Placement implies connection; this *is* the edge set.
pub fn edges_of(cells: &CellTypes) -> Vec<(usize, usize)> {
    let neighbors = neighbor_table();
    let mut edges = Vec::new();
    for (i, &t) in cells.iter().enumerate() {
        let Some(ta) = t else { continue };
        for &j in &neighbors[i] {
            if j > i {
                if let Some(tb) = cells[j] {
                    if rules::compat(ta, tb) {
                        edges.push((i, j));
                    }
                }
            }
        }
    }
    edges
}

/// BFS distance from the foyer through the layout's edges; `None` for
/// empty or unreachable cells.
pub fn distances(cells: &CellTypes, edges: &[(usize, usize)]) -> Vec<Option<u32>> {
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); NUM_CELLS];
    for &(a, b) in edges {
        adj[a].push(b);
        adj[b].push(a);
    }
    let mut dist: Vec<Option<u32>> = vec![None; NUM_CELLS];
    if cells[FOYER.idx()].is_none() {
        return dist;
    }
    dist[FOYER.idx()] = Some(0);
    let mut queue = VecDeque::from([FOYER.idx()]);
    while let Some(cur) = queue.pop_front() {
        let d = dist[cur].unwrap_or(0);
        for &n in &adj[cur] {
            if dist[n].is_none() {
                dist[n] = Some(d + 1);
                queue.push_back(n);
            }
        }
    }
    dist
}

/// The directional rule: no `Commander -> ... -> Spymaster` walk leading
/// strictly away from the foyer through degree-2 interior cells. Returns
/// the violating path (commander first, spymaster last) when one exists.
pub fn directional_violation(cells: &CellTypes) -> Option<Vec<Pos>> {
    let (spy, cmd) = DIRECTIONAL_PAIR;
    if !cells.iter().flatten().any(|&t| t == spy) || !cells.iter().flatten().any(|&t| t == cmd) {
        return None;
    }
    let edges = edges_of(cells);
    let dist = distances(cells, &edges);
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); NUM_CELLS];
    for &(a, b) in &edges {
        adj[a].push(b);
        adj[b].push(a);
    }
    let degree: Vec<usize> = adj.iter().map(|ns| ns.len()).collect();

    for start in 0..NUM_CELLS {
        if cells[start] != Some(cmd) {
            continue;
        }
        // Walk strictly farther from the foyer; interiors must be plain
        // corridor cells (degree exactly 2).
        let mut parent: Vec<Option<usize>> = vec![None; NUM_CELLS];
        let mut stack = vec![start];
        let mut seen = vec![false; NUM_CELLS];
        seen[start] = true;
        while let Some(cur) = stack.pop() {
            let Some(dc) = dist[cur] else { continue };
            for &n in &adj[cur] {
                if seen[n] {
                    continue;
                }
                let Some(dn) = dist[n] else { continue };
                if dn <= dc {
                    continue;
                }
                if cells[n] == Some(spy) {
                    let mut path = vec![Pos::from_idx(n)];
                    let mut at = cur;
                    loop {
                        path.push(Pos::from_idx(at));
                        match parent[at] {
                            Some(p) => at = p,
                            None => break,
                        }
                    }
                    path.reverse();
                    return Some(path);
                }
                if degree[n] == 2 {
                    seen[n] = true;
                    parent[n] = Some(cur);
                    stack.push(n);
                }
            }
        }
    }
    None
}

/// Structural invariant checker for finished layouts; returns one message
/// per violated rule. Used by the test suite and for debugging, not on the
/// hot path.
pub fn check_invariants(
    req: &SolveRequest,
    rooms: &[RoomOut],
    paths: &[PathOut],
    reported_edges: &[(Pos, Pos)],
) -> Vec<String> {
    let architect = req.architect_pos();
    let cells = cells_of(rooms, paths, architect);
    let edges = edges_of(&cells);
    let mut violations = Vec::new();

    // Reported edges must coincide with the compatibility-derived set.
    let mut expected: Vec<(usize, usize)> = edges.clone();
    expected.sort_unstable();
    let mut got: Vec<(usize, usize)> = reported_edges
        .iter()
        .map(|&(a, b)| {
            let (i, j) = (a.idx(), b.idx());
            (i.min(j), i.max(j))
        })
        .collect();
    got.sort_unstable();
    got.dedup();
    if expected != got {
        violations.push(format!(
            "edge set mismatch: expected {} auto-connections, reported {}",
            expected.len(),
            got.len()
        ));
    }

    // Reachability of every in-temple cell.
    let dist = distances(&cells, &edges);
    for (i, t) in cells.iter().enumerate() {
        if t.is_some() && dist[i].is_none() {
            violations.push(format!(
                "cell ({}, {}) is not reachable from the foyer",
                Pos::from_idx(i).x,
                Pos::from_idx(i).y
            ));
        }
    }

    // Self-adjacency bans apply to grid adjacency, not just edges.
    let neighbors = neighbor_table();
    for (i, t) in cells.iter().enumerate() {
        let Some(ta) = *t else { continue };
        if !NO_SELF_ADJACENCY.contains(&ta) {
            continue;
        }
        for &j in &neighbors[i] {
            if j > i && cells[j] == Some(ta) {
                violations.push(format!("two {ta} cells are adjacent"));
            }
        }
    }

    // Forbidden length-3 chains through connected neighbors.
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); NUM_CELLS];
    for &(a, b) in &edges {
        adj[a].push(b);
        adj[b].push(a);
    }
    for (center, t) in cells.iter().enumerate() {
        let Some(tb) = *t else { continue };
        for &(a, b, c) in rules::FORBIDDEN_CHAINS.iter() {
            if tb != b {
                continue;
            }
            let has_a = adj[center].iter().any(|&n| cells[n] == Some(a));
            let has_c = adj[center].iter().any(|&n| cells[n] == Some(c));
            let distinct = a != c
                || adj[center].iter().filter(|&&n| cells[n] == Some(a)).count() >= 2;
            if has_a && has_c && distinct {
                violations.push(format!("forbidden chain {a}-{b}-{c} present"));
            }
        }
    }

    // Uniqueness.
    for &t in UNIQUE_TYPES.iter() {
        let count = cells.iter().flatten().filter(|&&x| x == t).count();
        if count > 1 {
            violations.push(format!("{t} occurs {count} times but must be unique"));
        }
    }

    // Architect degree.
    let arch_neighbors = architect
        .neighbors()
        .filter(|p| cells[p.idx()].is_some())
        .count();
    if arch_neighbors != 1 {
        violations.push(format!(
            "architect has {arch_neighbors} in-temple neighbors, wants exactly 1"
        ));
    }

    // Minimum counts.
    let spies = cells
        .iter()
        .flatten()
        .filter(|&&t| t == RoomType::Spymaster)
        .count() as u32;
    if spies < req.min_spymasters {
        violations.push(format!(
            "{spies} spymasters placed, {} required",
            req.min_spymasters
        ));
    }
    let corruption = cells
        .iter()
        .flatten()
        .filter(|&&t| t == RoomType::CorruptionChamber)
        .count() as u32;
    if corruption < req.min_corruption_chambers {
        violations.push(format!(
            "{corruption} corruption chambers placed, {} required",
            req.min_corruption_chambers
        ));
    }

    // The directional rule.
    if let Some(path) = directional_violation(&cells) {
        violations.push(format!(
            "commander-to-spymaster chain away from the foyer through {:?}",
            path.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()
        ));
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(t: RoomType, x: u8, y: u8) -> RoomOut {
        RoomOut {
            room_type: t,
            tier: 1,
            x,
            y,
            chain: None,
        }
    }

    fn path(x: u8, y: u8) -> PathOut {
        PathOut { x, y, chain: None }
    }

    #[test]
    fn distances_follow_edges() {
        // Foyer (5,1) - path (5,2) - garrison (5,3).
        let cells = cells_of(
            &[room(RoomType::Garrison, 5, 3)],
            &[path(5, 2)],
            Pos::new(9, 9),
        );
        let edges = edges_of(&cells);
        let dist = distances(&cells, &edges);
        assert_eq!(dist[Pos::new(5, 1).idx()], Some(0));
        assert_eq!(dist[Pos::new(5, 2).idx()], Some(1));
        assert_eq!(dist[Pos::new(5, 3).idx()], Some(2));
        assert_eq!(dist[Pos::new(9, 9).idx()], None, "architect is stranded here");
    }

    #[test]
    fn directional_chain_away_from_foyer_is_flagged() {
        // Foyer - Commander - Garrison - Spymaster in a straight line: the
        // garrison interior has degree 2 and the spymaster is farther out.
        let cells = cells_of(
            &[
                room(RoomType::Commander, 5, 2),
                room(RoomType::Garrison, 5, 3),
                room(RoomType::Spymaster, 5, 4),
            ],
            &[],
            Pos::new(9, 9),
        );
        let violation = directional_violation(&cells).expect("must be flagged");
        assert_eq!(violation.first(), Some(&Pos::new(5, 2)));
        assert_eq!(violation.last(), Some(&Pos::new(5, 4)));
    }

    #[test]
    fn spymaster_nearer_the_foyer_is_fine() {
        // Spymaster sits between the foyer and the commander: the walk away
        // from the foyer never reaches a spymaster.
        let cells = cells_of(
            &[
                room(RoomType::Spymaster, 5, 2),
                room(RoomType::Garrison, 5, 3),
                room(RoomType::Commander, 5, 4),
            ],
            &[],
            Pos::new(9, 9),
        );
        assert_eq!(directional_violation(&cells), None);
    }

    #[test]
    fn junction_interrupts_the_directional_chain() {
        // Same spine, but the garrison gains a third connection (a legion
        // barracks branch), so it is a junction and the chain is legal.
        let cells = cells_of(
            &[
                room(RoomType::Commander, 5, 2),
                room(RoomType::Garrison, 5, 3),
                room(RoomType::Spymaster, 5, 4),
                room(RoomType::LegionBarracks, 4, 3),
            ],
            &[],
            Pos::new(9, 9),
        );
        assert_eq!(directional_violation(&cells), None);
    }

    #[test]
    fn no_pair_no_violation() {
        let cells = cells_of(&[room(RoomType::Garrison, 5, 2)], &[], Pos::new(9, 9));
        assert_eq!(directional_violation(&cells), None);
    }

    #[test]
    fn invariant_checker_accepts_a_clean_layout() {
        let mut req = SolveRequest::new(Pos::new(5, 3));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        let rooms = vec![room(RoomType::Garrison, 5, 2)];
        let edges = vec![
            (Pos::new(5, 1), Pos::new(5, 2)),
            (Pos::new(5, 2), Pos::new(5, 3)),
        ];
        let violations = check_invariants(&req, &rooms, &[], &edges);
        assert!(violations.is_empty(), "unexpected: {violations:?}");
    }

    #[test]
    fn invariant_checker_flags_adjacent_garrisons() {
        let mut req = SolveRequest::new(Pos::new(9, 9));
        req.min_spymasters = 0;
        req.min_corruption_chambers = 0;
        let rooms = vec![
            room(RoomType::Garrison, 5, 2),
            room(RoomType::Garrison, 5, 3),
        ];
        let cells = cells_of(&rooms, &[], Pos::new(9, 9));
        let edges: Vec<(Pos, Pos)> = edges_of(&cells)
            .into_iter()
            .map(|(a, b)| (Pos::from_idx(a), Pos::from_idx(b)))
            .collect();
        let violations = check_invariants(&req, &rooms, &[], &edges);
        assert!(violations.iter().any(|v| v.contains("Garrison")));
    }
}
