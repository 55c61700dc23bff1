//! Spatial indexing for agent neighbourhood queries.

use crate::geometry::{Rect, Vec2};
use anyhow::{Result, bail};

/// Largest number of grid cells along either axis.
const MAX_CELLS_PER_AXIS: usize = 1024;

/// What a neighbourhood query may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inclusion {
    /// Only agents that are alive.
    Living,
    /// Deceased agents too.
    All,
}

/// One indexed agent, addressed by its slot in the population.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexEntry {
    pub slot: usize,
    pub position: Vec2,
    pub deceased: bool,
}

/// Common behaviour exposed by neighbourhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from scratch.
    fn rebuild(&mut self, entries: &[IndexEntry]);

    /// Visit every entry within `radius` of `center` (inclusive) with its squared distance.
    fn visit_within(
        &self,
        center: Vec2,
        radius: f64,
        inclusion: Inclusion,
        visitor: &mut dyn FnMut(usize, f64),
    );

    /// Slots of the entries within `radius` of `center`, ascending.
    fn neighbors(&self, center: Vec2, radius: f64, inclusion: Inclusion) -> Vec<usize> {
        let mut slots = Vec::new();
        self.visit_within(center, radius, inclusion, &mut |slot, _| slots.push(slot));
        slots.sort_unstable();
        slots
    }
}

/// Uniform grid over the world rectangle with cells about one query radius wide.
///
/// Positions outside the rectangle are bucketed into the nearest border cell,
/// so every entry is always findable.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    bounds: Rect,
    cell_size: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<IndexEntry>>,
    len: usize,
}

impl UniformGrid {
    /// Create an empty grid covering `bounds`.
    ///
    /// The cell size is enlarged when needed to keep the grid at most
    /// [`MAX_CELLS_PER_AXIS`] cells wide and tall.
    pub fn new(bounds: Rect, cell_size: f64) -> Result<Self> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            bail!("cell size must be positive, but is {cell_size:?}");
        }
        if !(bounds.width > 0.0 && bounds.height > 0.0) {
            bail!("grid bounds must have a positive area, but are {bounds:?}");
        }
        let longest = bounds.width.max(bounds.height);
        let cell_size = cell_size.max(longest / MAX_CELLS_PER_AXIS as f64);
        let cols = ((bounds.width / cell_size).ceil() as usize).max(1);
        let rows = ((bounds.height / cell_size).ceil() as usize).max(1);

        let mut cells = Vec::new();
        cells.resize_with(cols * rows, Vec::new);

        Ok(Self {
            bounds,
            cell_size,
            cols,
            rows,
            cells,
            len: 0,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cell_coords(&self, p: Vec2) -> (usize, usize) {
        let cx = ((p.x - self.bounds.left()) / self.cell_size).floor();
        let cy = ((p.y - self.bounds.top()) / self.cell_size).floor();
        (
            (cx.max(0.0) as usize).min(self.cols - 1),
            (cy.max(0.0) as usize).min(self.rows - 1),
        )
    }
}

impl NeighborhoodIndex for UniformGrid {
    fn rebuild(&mut self, entries: &[IndexEntry]) {
        for cell in &mut self.cells {
            cell.clear();
        }
        for &entry in entries {
            let (cx, cy) = self.cell_coords(entry.position);
            self.cells[cy * self.cols + cx].push(entry);
        }
        self.len = entries.len();
    }

    fn visit_within(
        &self,
        center: Vec2,
        radius: f64,
        inclusion: Inclusion,
        visitor: &mut dyn FnMut(usize, f64),
    ) {
        if !(radius >= 0.0) {
            return;
        }
        let r_sq = radius * radius;
        let (x0, y0) = self.cell_coords(center - Vec2::new(radius, radius));
        let (x1, y1) = self.cell_coords(center + Vec2::new(radius, radius));

        for cy in y0..=y1 {
            for cx in x0..=x1 {
                for entry in &self.cells[cy * self.cols + cx] {
                    if entry.deceased && inclusion == Inclusion::Living {
                        continue;
                    }
                    let d_sq = (entry.position - center).length_squared();
                    if d_sq <= r_sq {
                        visitor(entry.slot, d_sq);
                    }
                }
            }
        }
    }
}
