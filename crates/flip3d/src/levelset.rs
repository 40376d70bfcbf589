//! Signed distance fields sampled at cell centers.

use glam::Vec3;

use crate::grid::Grid3;
use crate::particle::Particle;

/// A scalar SDF on the simulation grid, negative inside.
///
/// Values and sample points are in grid units (one cell = 1.0); cell `(i,j,k)`
/// holds the distance at center `(i+0.5, j+0.5, k+0.5)`.
pub struct LevelSet {
    pub phi: Grid3<f32>,
}

impl LevelSet {
    pub fn new(width: usize, height: usize, depth: usize, background: f32) -> Self {
        Self {
            phi: Grid3::new(width, height, depth, background),
        }
    }

    /// Build by sampling `sdf` at every cell center.
    pub fn build(width: usize, height: usize, depth: usize, sdf: impl Fn(Vec3) -> f32) -> Self {
        let mut set = Self::new(width, height, depth, f32::MAX);
        set.rebuild(sdf);
        set
    }

    /// Resample in place, reusing the allocation.
    pub fn rebuild(&mut self, sdf: impl Fn(Vec3) -> f32) {
        let (w, h) = (self.phi.width, self.phi.height);
        for (n, value) in self.phi.data.iter_mut().enumerate() {
            let i = n % w;
            let j = (n / w) % h;
            let k = n / (w * h);
            *value = sdf(Vec3::new(
                i as f32 + 0.5,
                j as f32 + 0.5,
                k as f32 + 0.5,
            ));
        }
    }

    #[inline]
    pub fn get(&self, i: i32, j: i32, k: i32) -> f32 {
        self.phi.get(i, j, k)
    }

    /// Trilinear sample at a point in grid units.
    pub fn sample(&self, p: Vec3) -> f32 {
        let fx = p.x - 0.5;
        let fy = p.y - 0.5;
        let fz = p.z - 0.5;
        let i0 = fx.floor() as i32;
        let j0 = fy.floor() as i32;
        let k0 = fz.floor() as i32;
        let tx = fx - i0 as f32;
        let ty = fy - j0 as f32;
        let tz = fz - k0 as f32;

        let mut result = 0.0;
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    let wx = if di == 0 { 1.0 - tx } else { tx };
                    let wy = if dj == 0 { 1.0 - ty } else { ty };
                    let wz = if dk == 0 { 1.0 - tz } else { tz };
                    result += self.get(i0 + di, j0 + dj, k0 + dk) * wx * wy * wz;
                }
            }
        }
        result
    }

    /// Unit gradient by central differences; `+Y` when degenerate.
    pub fn gradient(&self, p: Vec3) -> Vec3 {
        let eps = 0.25;
        let dx = self.sample(p + Vec3::X * eps) - self.sample(p - Vec3::X * eps);
        let dy = self.sample(p + Vec3::Y * eps) - self.sample(p - Vec3::Y * eps);
        let dz = self.sample(p + Vec3::Z * eps) - self.sample(p - Vec3::Z * eps);
        let grad = Vec3::new(dx, dy, dz);
        let len = grad.length();
        if len > 1.0e-6 {
            grad / len
        } else {
            Vec3::Y
        }
    }

    /// Move each particle onto the zero isocontour.
    ///
    /// Positions are normalized; `max_dim` converts to grid units. A few
    /// Newton steps along the gradient are enough at grid-scale accuracy.
    pub fn project_points_to_surface(&self, particles: &mut [Particle], max_dim: f32) {
        for particle in particles.iter_mut() {
            let mut p = particle.position * max_dim;
            for _ in 0..3 {
                let d = self.sample(p);
                if d.abs() < 1.0e-4 {
                    break;
                }
                p -= self.gradient(p) * d;
            }
            particle.position = p / max_dim;
        }
    }
}
