//! Bucketed spatial index over particles.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{CellType, Grid3, MacGrid};
use crate::levelset::LevelSet;
use crate::particle::Particles;

/// Maps each grid cell to the particles currently inside it.
///
/// Rebuilt by [`sort`](Self::sort); reads are stable between sorts. Bucket
/// iteration order follows particle index order, so gathers built on top of
/// this index are deterministic.
pub struct ParticleGrid {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    max_dim: f32,
    buckets: Vec<Vec<u32>>,
}

impl ParticleGrid {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
            max_dim: width.max(height).max(depth) as f32,
            buckets: vec![Vec::new(); width * height * depth],
        }
    }

    #[inline]
    fn bucket_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.width * self.height + j * self.width + i
    }

    /// Cell containing a normalized position.
    #[inline]
    pub fn cell_of(&self, position: Vec3) -> (usize, usize, usize) {
        let scaled = position * self.max_dim;
        (
            (scaled.x as i32).clamp(0, self.width as i32 - 1) as usize,
            (scaled.y as i32).clamp(0, self.height as i32 - 1) as usize,
            (scaled.z as i32).clamp(0, self.depth as i32 - 1) as usize,
        )
    }

    /// Rebuild all buckets from the particle list.
    pub fn sort(&mut self, particles: &Particles) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        for (n, particle) in particles.list.iter().enumerate() {
            let (i, j, k) = self.cell_of(particle.position);
            let idx = self.bucket_index(i, j, k);
            self.buckets[idx].push(n as u32);
        }
    }

    /// All particle handles in cells within `radius` of `center` per axis.
    ///
    /// The result is unordered by contract; the actual order is the fixed
    /// bucket iteration order.
    pub fn cell_neighbors(&self, center: (i32, i32, i32), radius: i32) -> Vec<u32> {
        let mut out = Vec::new();
        self.for_neighbors(center, radius, |n| out.push(n));
        out
    }

    /// Allocation-free neighbor visit, used by the hot transfer loops.
    #[inline]
    pub fn for_neighbors(&self, center: (i32, i32, i32), radius: i32, mut visit: impl FnMut(u32)) {
        for k in center.2 - radius..=center.2 + radius {
            if k < 0 || k >= self.depth as i32 {
                continue;
            }
            for j in center.1 - radius..=center.1 + radius {
                if j < 0 || j >= self.height as i32 {
                    continue;
                }
                for i in center.0 - radius..=center.0 + radius {
                    if i < 0 || i >= self.width as i32 {
                        continue;
                    }
                    for &n in &self.buckets[self.bucket_index(i as usize, j as usize, k as usize)] {
                        visit(n);
                    }
                }
            }
        }
    }

    /// Classify cells: fluid-particle cells become `Fluid`, cells whose center
    /// lies inside the solid level set become `Solid`, the rest `Air`.
    pub fn mark_cell_types(
        &self,
        particles: &Particles,
        cell_type: &mut Grid3<CellType>,
        solid_phi: &LevelSet,
    ) {
        cell_type.fill(CellType::Air);
        for particle in particles.list.iter().filter(|p| p.is_fluid()) {
            let (i, j, k) = self.cell_of(particle.position);
            cell_type.set(i, j, k, CellType::Fluid);
        }
        let (w, h) = (cell_type.width, cell_type.height);
        cell_type
            .data
            .par_iter_mut()
            .enumerate()
            .for_each(|(n, cell)| {
                let i = n % w;
                let j = (n / w) % h;
                let k = n / (w * h);
                if solid_phi.get(i as i32, j as i32, k as i32) < 0.0 {
                    *cell = CellType::Solid;
                }
            });
    }

    /// Build the liquid SDF: distance from each cell center to the nearest
    /// fluid particle, minus a particle radius of `density` cells. Cells with
    /// no fluid particle in the one-ring keep a one-cell positive background.
    ///
    /// Cells marked fluid are clamped to a small negative value: the
    /// ghost-fluid weights divide by this field, and a fluid cell sampling
    /// positive (a lone particle far from the cell center) would flip the
    /// sign of a matrix diagonal.
    pub fn build_sdf(&self, particles: &Particles, mgrid: &mut MacGrid, density: f32) {
        let max_dim = self.max_dim;
        let h = 1.0 / max_dim;
        let radius = density * h;
        let list = &particles.list;
        let MacGrid {
            liquid_phi,
            cell_type,
            ..
        } = mgrid;
        let (w, hh) = (liquid_phi.width, liquid_phi.height);

        liquid_phi
            .data
            .par_iter_mut()
            .enumerate()
            .for_each(|(n, phi)| {
                let i = n % w;
                let j = (n / w) % hh;
                let k = n / (w * hh);
                let center = Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5) * h;
                let mut nearest = f32::MAX;
                self.for_neighbors((i as i32, j as i32, k as i32), 1, |p| {
                    let particle = &list[p as usize];
                    if particle.is_fluid() {
                        nearest = nearest.min(particle.position.distance(center));
                    }
                });
                let mut value = if nearest == f32::MAX {
                    h
                } else {
                    nearest - radius
                };
                if cell_type.data[n] == CellType::Fluid {
                    value = value.min(-0.1 * radius);
                }
                *phi = value;
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    fn grid_with_particles(positions: &[Vec3]) -> (ParticleGrid, Particles) {
        let mut particles = Particles::new();
        for &p in positions {
            particles.list.push(Particle::fluid(p, Vec3::ZERO));
        }
        let mut pgrid = ParticleGrid::new(8, 8, 8);
        pgrid.sort(&particles);
        (pgrid, particles)
    }

    #[test]
    fn test_sort_and_neighbors() {
        // Two particles in cell (4,4,4), one in (0,0,0) for an 8^3 grid.
        let (pgrid, _) = grid_with_particles(&[
            Vec3::splat(0.55),
            Vec3::splat(0.57),
            Vec3::splat(0.01),
        ]);
        let near = pgrid.cell_neighbors((4, 4, 4), 0);
        assert_eq!(near, vec![0, 1]);
        let far = pgrid.cell_neighbors((0, 0, 0), 1);
        assert_eq!(far, vec![2]);
    }

    #[test]
    fn test_neighbors_radius_spans_cells() {
        let (pgrid, _) = grid_with_particles(&[Vec3::splat(0.55), Vec3::splat(0.42)]);
        // (0.42 * 8).floor() = 3, adjacent to cell 4.
        let both = pgrid.cell_neighbors((4, 4, 4), 1);
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn test_mark_cell_types() {
        let (pgrid, particles) = grid_with_particles(&[Vec3::splat(0.55)]);
        let mut mgrid = MacGrid::new(8, 8, 8);
        // Solid slab across the bottom cell layer.
        let solid = LevelSet::build(8, 8, 8, |p| p.y - 1.0);
        pgrid.mark_cell_types(&particles, &mut mgrid.cell_type, &solid);

        assert_eq!(mgrid.cell_type.get(4, 4, 4), CellType::Fluid);
        assert_eq!(mgrid.cell_type.get(2, 0, 2), CellType::Solid);
        assert_eq!(mgrid.cell_type.get(2, 6, 2), CellType::Air);
    }

    #[test]
    fn test_build_sdf_sign() {
        let (pgrid, particles) = grid_with_particles(&[Vec3::new(0.5625, 0.5625, 0.5625)]);
        let mut mgrid = MacGrid::new(8, 8, 8);
        pgrid.build_sdf(&particles, &mut mgrid, 0.5);
        // Particle sits exactly on the center of cell (4,4,4).
        assert!(mgrid.liquid_phi.get(4, 4, 4) < 0.0);
        // Far corner has no particles nearby: positive background.
        assert!(mgrid.liquid_phi.get(0, 0, 0) > 0.0);
    }
}
