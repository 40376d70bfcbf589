//! Dense 3D fields and the staggered MAC grid.

/// Cell classification for the pressure solve.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CellType {
    /// Inside a solid geom (no flow)
    Solid,
    /// Contains at least one fluid particle
    Fluid,
    /// Empty air
    #[default]
    Air,
}

/// Dense 3D array addressed by `(i, j, k)`.
///
/// Flat layout is `k * width * height + j * width + i` everywhere in this
/// crate. Reads with signed indices clamp to the nearest valid cell, so
/// out-of-bounds access never faults. Dimensions are fixed at construction.
#[derive(Clone)]
pub struct Grid3<T> {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub data: Vec<T>,
}

impl<T: Copy> Grid3<T> {
    /// Create a grid filled with `background`.
    pub fn new(width: usize, height: usize, depth: usize, background: T) -> Self {
        Self {
            width,
            height,
            depth,
            data: vec![background; width * height * depth],
        }
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.width * self.height + j * self.width + i
    }

    /// Inverse of [`index`](Self::index).
    #[inline]
    pub fn coords(&self, n: usize) -> (usize, usize, usize) {
        (
            n % self.width,
            (n / self.width) % self.height,
            n / (self.width * self.height),
        )
    }

    /// Read with clamped indices.
    #[inline]
    pub fn get(&self, i: i32, j: i32, k: i32) -> T {
        let i = i.clamp(0, self.width as i32 - 1) as usize;
        let j = j.clamp(0, self.height as i32 - 1) as usize;
        let k = k.clamp(0, self.depth as i32 - 1) as usize;
        self.data[self.index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: T) {
        let n = self.index(i, j, k);
        self.data[n] = value;
    }

    #[inline]
    pub fn in_bounds(&self, i: i32, j: i32, k: i32) -> bool {
        i >= 0
            && i < self.width as i32
            && j >= 0
            && j < self.height as i32
            && k >= 0
            && k < self.depth as i32
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 3D MAC grid with staggered velocities.
///
/// Velocity components live on cell faces:
/// - `u` (X-velocity) on YZ faces, sized (width+1) x height x depth
/// - `v` (Y-velocity) on XZ faces, sized width x (height+1) x depth
/// - `w` (Z-velocity) on XY faces, sized width x height x (depth+1)
///
/// Pressure, divergence, cell markers, and the liquid signed distance are
/// cell-centered. Positions are normalized to `[0,1]^3`; one cell is
/// `1 / max_dim()` wide in that space.
pub struct MacGrid {
    pub width: usize,
    pub height: usize,
    pub depth: usize,

    pub u: Grid3<f32>,
    pub v: Grid3<f32>,
    pub w: Grid3<f32>,

    pub pressure: Grid3<f32>,
    pub divergence: Grid3<f32>,
    pub cell_type: Grid3<CellType>,
    /// Liquid signed distance at cell centers, negative inside liquid.
    pub liquid_phi: Grid3<f32>,
}

impl MacGrid {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        let background_phi = 1.0 / width.max(height).max(depth) as f32;
        Self {
            width,
            height,
            depth,
            u: Grid3::new(width + 1, height, depth, 0.0),
            v: Grid3::new(width, height + 1, depth, 0.0),
            w: Grid3::new(width, height, depth + 1, 0.0),
            pressure: Grid3::new(width, height, depth, 0.0),
            divergence: Grid3::new(width, height, depth, 0.0),
            cell_type: Grid3::new(width, height, depth, CellType::Air),
            liquid_phi: Grid3::new(width, height, depth, background_phi),
        }
    }

    /// Largest logical dimension; positions scale by this to reach grid units.
    #[inline]
    pub fn max_dim(&self) -> usize {
        self.width.max(self.height).max(self.depth)
    }

    /// Cell width in normalized coordinates.
    #[inline]
    pub fn cell_width(&self) -> f32 {
        1.0 / self.max_dim() as f32
    }

    /// Copy the three face fields from `other` (previous-grid snapshot).
    pub fn store_velocities_from(&mut self, other: &MacGrid) {
        assert_eq!(
            (self.width, self.height, self.depth),
            (other.width, other.height, other.depth),
            "MAC grid dimension mismatch"
        );
        self.u.data.copy_from_slice(&other.u.data);
        self.v.data.copy_from_slice(&other.v.data);
        self.w.data.copy_from_slice(&other.w.data);
    }

    /// Replace the face fields with `other - self`, so this grid holds the
    /// per-face velocity delta accumulated since the snapshot.
    pub fn subtract_velocities_from(&mut self, other: &MacGrid) {
        assert_eq!(
            (self.width, self.height, self.depth),
            (other.width, other.height, other.depth),
            "MAC grid dimension mismatch"
        );
        for (dst, src) in self.u.data.iter_mut().zip(&other.u.data) {
            *dst = *src - *dst;
        }
        for (dst, src) in self.v.data.iter_mut().zip(&other.v.data) {
            *dst = *src - *dst;
        }
        for (dst, src) in self.w.data.iter_mut().zip(&other.w.data) {
            *dst = *src - *dst;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_sizes() {
        let grid = MacGrid::new(4, 5, 6);
        assert_eq!(grid.pressure.len(), 4 * 5 * 6);
        assert_eq!(grid.u.len(), 5 * 5 * 6);
        assert_eq!(grid.v.len(), 4 * 6 * 6);
        assert_eq!(grid.w.len(), 4 * 5 * 7);
    }

    #[test]
    fn test_flat_layout_roundtrip() {
        let grid = Grid3::new(4, 5, 6, 0.0f32);
        assert_eq!(grid.index(0, 0, 0), 0);
        assert_eq!(grid.index(1, 0, 0), 1);
        assert_eq!(grid.index(0, 1, 0), 4);
        assert_eq!(grid.index(0, 0, 1), 20);
        for n in [0, 1, 7, 63, 119] {
            let (i, j, k) = grid.coords(n);
            assert_eq!(grid.index(i, j, k), n);
        }
    }

    #[test]
    fn test_clamped_reads() {
        let mut grid = Grid3::new(3, 3, 3, 0.0f32);
        grid.set(0, 0, 0, 1.0);
        grid.set(2, 2, 2, 2.0);
        assert_eq!(grid.get(-5, -1, 0), 1.0);
        assert_eq!(grid.get(10, 3, 99), 2.0);
    }

    #[test]
    fn test_store_then_subtract_is_zero() {
        let mut a = MacGrid::new(4, 4, 4);
        let mut b = MacGrid::new(4, 4, 4);
        for (n, val) in a.u.data.iter_mut().enumerate() {
            *val = n as f32 * 0.25;
        }
        a.v.fill(3.0);
        a.w.fill(-1.5);

        b.store_velocities_from(&a);
        b.subtract_velocities_from(&a);

        assert!(b.u.data.iter().all(|x| *x == 0.0));
        assert!(b.v.data.iter().all(|x| *x == 0.0));
        assert!(b.w.data.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_cell_width() {
        let grid = MacGrid::new(16, 32, 8);
        assert_eq!(grid.max_dim(), 32);
        assert!((grid.cell_width() - 1.0 / 32.0).abs() < 1e-7);
    }
}
