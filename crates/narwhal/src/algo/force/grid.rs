use nalgebra::Vector3;
use rustc_hash::FxHashMap;

/// Sparse uniform grid over node positions with cells as wide as the repulsion radius, so every
/// pair within range lives in the same or an adjacent cell.
#[derive(Debug, Clone)]
pub(super) struct RepulsionGrid {
    cell_size: f64,
    cells: FxHashMap<(i64, i64, i64), Vec<usize>>,
}

const NEIGHBOR_OFFSETS: [i64; 3] = [-1, 0, 1];

impl RepulsionGrid {
    pub(super) fn build(positions: &[Vector3<f64>], repulsion_range: f64) -> Option<Self> {
        if positions.is_empty() || !repulsion_range.is_finite() || repulsion_range <= 0.0 {
            return None;
        }
        let mut cells: FxHashMap<(i64, i64, i64), Vec<usize>> = FxHashMap::default();
        for (idx, p) in positions.iter().enumerate() {
            cells
                .entry(Self::cell_of(p, repulsion_range))
                .or_default()
                .push(idx);
        }
        Some(Self {
            cell_size: repulsion_range,
            cells,
        })
    }

    fn cell_of(p: &Vector3<f64>, cell_size: f64) -> (i64, i64, i64) {
        // `as` saturates, which keeps absurdly distant nodes in edge cells instead of wrapping.
        (
            (p.x / cell_size).floor() as i64,
            (p.y / cell_size).floor() as i64,
            (p.z / cell_size).floor() as i64,
        )
    }

    /// Calls `f(j)` for every node `j > i` in the 27 cells around node `i`, in a fixed order.
    pub(super) fn for_each_candidate(
        &self,
        i: usize,
        positions: &[Vector3<f64>],
        mut f: impl FnMut(usize),
    ) {
        let (cx, cy, cz) = Self::cell_of(&positions[i], self.cell_size);
        for dx in NEIGHBOR_OFFSETS {
            for dy in NEIGHBOR_OFFSETS {
                for dz in NEIGHBOR_OFFSETS {
                    let key = (
                        cx.saturating_add(dx),
                        cy.saturating_add(dy),
                        cz.saturating_add(dz),
                    );
                    let Some(members) = self.cells.get(&key) else {
                        continue;
                    };
                    for &j in members {
                        if j > i {
                            f(j);
                        }
                    }
                }
            }
        }
    }
}
