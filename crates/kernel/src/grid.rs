use std::collections::{HashMap, HashSet};

use glam::{Vec2, Vec3};

/// Index of a cell of the world plane. Cell `(i, j)` is centred on
/// `(i * cell_size, j * cell_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Cell centre in world units: the coordinate rounded to the nearest
    /// multiple of `cell_size`.
    pub fn origin(self, cell_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * cell_size, self.y as f32 * cell_size)
    }
}

/// Round to the nearest cell index, halves toward +inf.
fn snap(value: f32, cell_size: f32) -> i32 {
    (value / cell_size + 0.5).floor() as i32
}

/// Compute the cell an (x, y) coordinate falls into. Z is ignored.
pub fn cell_key(coords: Vec3, cell_size: f32) -> CellCoord {
    CellCoord {
        x: snap(coords.x, cell_size),
        y: snap(coords.y, cell_size),
    }
}

/// Uniform grid bucketing object names by the cell of their coordinates.
///
/// Membership never changes once inserted: object coordinates are immutable,
/// so there is no move or remove operation.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, HashSet<String>>,
}

impl SpatialGrid {
    /// Create an empty grid with the given cell size.
    ///
    /// # Panics
    /// Panics if `cell_size` is not positive.
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cell_key(&self, coords: Vec3) -> CellCoord {
        cell_key(coords, self.cell_size)
    }

    /// Insert `name` into the cell for `coords`. Idempotent.
    pub fn insert(&mut self, name: &str, coords: Vec3) -> CellCoord {
        let cell = self.cell_key(coords);
        self.cells
            .entry(cell)
            .or_default()
            .insert(name.to_owned());
        cell
    }

    /// Full pass over every cell. Order across cells is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (CellCoord, &HashSet<String>)> + '_ {
        self.cells.iter().map(|(cell, names)| (*cell, names))
    }

    /// Names bucketed in a single cell.
    pub fn names_in_cell(&self, cell: CellCoord) -> Option<&HashSet<String>> {
        self.cells.get(&cell)
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Total number of names across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.values().map(|s| s.len()).sum()
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CELL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_rounds_to_nearest_multiple() {
        let cell = cell_key(Vec3::new(124.0, 76.0, 30.0), 50.0);
        assert_eq!(cell, CellCoord::new(2, 2));
        assert_eq!(cell.origin(50.0), Vec2::new(100.0, 100.0));

        let cell = cell_key(Vec3::new(24.9, -80.0, 0.0), 50.0);
        assert_eq!(cell, CellCoord::new(0, -2));
        assert_eq!(cell.origin(50.0), Vec2::new(0.0, -100.0));
    }

    #[test]
    fn halves_round_toward_positive() {
        assert_eq!(cell_key(Vec3::new(25.0, -25.0, 0.0), 50.0), CellCoord::new(1, 0));
        assert_eq!(cell_key(Vec3::new(-75.0, 0.0, 0.0), 50.0), CellCoord::new(-1, 0));
    }

    #[test]
    fn fractional_cell_size_keeps_exact_multiples() {
        let cell = cell_key(Vec3::new(37.0, 0.0, 0.0), 12.5);
        assert_eq!(cell, CellCoord::new(3, 0));
        assert_eq!(cell.origin(12.5), Vec2::new(37.5, 0.0));

        // sub-unit cells stay distinct
        let a = cell_key(Vec3::new(0.5, 0.0, 0.0), 0.5);
        let b = cell_key(Vec3::ZERO, 0.5);
        assert_ne!(a, b);
        assert_eq!(a.origin(0.5).x, 0.5);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut grid = SpatialGrid::new(50.0);
        grid.insert("lamp1", Vec3::new(10.0, 10.0, 0.0));
        grid.insert("lamp1", Vec3::new(10.0, 10.0, 0.0));
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.total_placements(), 1);
    }

    #[test]
    fn iter_visits_every_cell() {
        let mut grid = SpatialGrid::new(50.0);
        grid.insert("a", Vec3::new(0.0, 0.0, 0.0));
        grid.insert("b", Vec3::new(10.0, 5.0, 0.0));
        grid.insert("c", Vec3::new(500.0, 0.0, 0.0));

        let mut seen: Vec<&str> = grid
            .iter()
            .flat_map(|(_, names)| names.iter().map(String::as_str))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, ["a", "b", "c"]);
        assert_eq!(grid.cell_count(), 2);
    }

    #[test]
    fn empty_cell_is_none() {
        let grid = SpatialGrid::new(50.0);
        assert!(grid.names_in_cell(CellCoord::new(99, 99)).is_none());
    }

    #[test]
    #[should_panic(expected = "cell_size must be positive")]
    fn rejects_zero_cell_size() {
        let _ = SpatialGrid::new(0.0);
    }
}
