//! Grid geometry: 1-indexed positions on the 9x9 board, cell indexing, and
//! neighbor iteration.

use serde::{Deserialize, Serialize};

/// Side length of the square grid.
pub const GRID_SIZE: u8 = 9;

/// Number of cells on the board.
pub const NUM_CELLS: usize = (GRID_SIZE as usize) * (GRID_SIZE as usize);

/// A 1-indexed grid position, `1 <= x, y <= 9`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pos {
    pub x: u8,
    pub y: u8,
}

/// The fixed root of connectivity; a path tile in every problem.
pub const FOYER: Pos = Pos { x: 5, y: 1 };

impl Pos {
    #[inline]
    pub fn new(x: u8, y: u8) -> Pos {
        Pos { x, y }
    }

    /// True iff the position lies on the board.
    #[inline]
    pub fn in_bounds(self) -> bool {
        (1..=GRID_SIZE).contains(&self.x) && (1..=GRID_SIZE).contains(&self.y)
    }

    /// Row-major cell index in `0..81`.
    #[inline]
    pub fn idx(self) -> usize {
        (self.y as usize - 1) * GRID_SIZE as usize + (self.x as usize - 1)
    }

    /// Inverse of [`Pos::idx`].
    #[inline]
    pub fn from_idx(i: usize) -> Pos {
        debug_assert!(i < NUM_CELLS);
        Pos {
            x: (i % GRID_SIZE as usize) as u8 + 1,
            y: (i / GRID_SIZE as usize) as u8 + 1,
        }
    }

    /// The up-to-four orthogonal neighbors on the board.
    pub fn neighbors(self) -> impl Iterator<Item = Pos> {
        const DELTAS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
        let (x, y) = (self.x as i8, self.y as i8);
        DELTAS.iter().filter_map(move |&(dx, dy)| {
            let p = Pos {
                x: (x + dx) as u8,
                y: (y + dy) as u8,
            };
            p.in_bounds().then_some(p)
        })
    }

    #[inline]
    pub fn manhattan(self, other: Pos) -> u32 {
        self.x.abs_diff(other.x) as u32 + self.y.abs_diff(other.y) as u32
    }
}

/// All unordered adjacent cell pairs `(a, b)` with `a < b` (144 of them).
pub fn adjacent_pairs() -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(2 * GRID_SIZE as usize * (GRID_SIZE as usize - 1));
    for i in 0..NUM_CELLS {
        let p = Pos::from_idx(i);
        for n in p.neighbors() {
            let j = n.idx();
            if i < j {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Neighbor cell indices for every cell, indexable by cell index.
pub fn neighbor_table() -> Vec<Vec<usize>> {
    (0..NUM_CELLS)
        .map(|i| Pos::from_idx(i).neighbors().map(|p| p.idx()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idx_round_trip() {
        for i in 0..NUM_CELLS {
            assert_eq!(Pos::from_idx(i).idx(), i);
        }
        assert_eq!(FOYER.idx(), 4);
    }

    #[test]
    fn corner_and_interior_neighbor_counts() {
        assert_eq!(Pos::new(1, 1).neighbors().count(), 2);
        assert_eq!(Pos::new(5, 1).neighbors().count(), 3);
        assert_eq!(Pos::new(5, 5).neighbors().count(), 4);
    }

    #[test]
    fn pair_count_matches_grid() {
        // 9 rows x 8 horizontal + 9 cols x 8 vertical.
        assert_eq!(adjacent_pairs().len(), 144);
    }

    #[test]
    fn neighbor_table_is_symmetric() {
        let table = neighbor_table();
        for (i, ns) in table.iter().enumerate() {
            for &j in ns {
                assert!(table[j].contains(&i));
            }
        }
    }
}
