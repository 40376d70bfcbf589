//! Particle-grid transfers.
//!
//! P2G is a per-face gather: each staggered face averages the velocities of
//! nearby fluid particles with a mass-weighted sharp kernel, pulling
//! candidates from the particle grid. Faces own their output, so the loop
//! parallelizes without atomics and the result is deterministic for a fixed
//! particle order. G2P and advection sampling are trilinear reads of the
//! three staggered fields.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{Grid3, MacGrid};
use crate::kernels::sharp_kernel;
use crate::particle::Particles;
use crate::particle_grid::ParticleGrid;

/// Support radius of the splat kernel, in cells.
const SPLAT_RADIUS: f32 = 1.0;

const MIN_WEIGHT: f32 = 1.0e-10;

/// Accumulate fluid-particle velocities onto the three face fields.
pub fn splat_particles_to_grid(pgrid: &ParticleGrid, particles: &Particles, mgrid: &mut MacGrid) {
    let max_dim = mgrid.max_dim() as f32;
    let list = &particles.list;

    // Component loops are identical up to the staggered offset; the closure
    // gathers the one-ring of the cell nearest the face.
    let gather = |face_pos: Vec3, axis: usize| -> f32 {
        let cell = (
            (face_pos.x as i32).min(pgrid.width as i32 - 1),
            (face_pos.y as i32).min(pgrid.height as i32 - 1),
            (face_pos.z as i32).min(pgrid.depth as i32 - 1),
        );
        let mut sum = 0.0f32;
        let mut weight = 0.0f32;
        pgrid.for_neighbors(cell, 1, |n| {
            let p = &list[n as usize];
            if !p.is_fluid() {
                return;
            }
            let r2 = (p.position * max_dim).distance_squared(face_pos);
            let w = p.mass * sharp_kernel(r2, SPLAT_RADIUS);
            sum += w * p.velocity[axis];
            weight += w;
        });
        if weight > MIN_WEIGHT {
            sum / weight
        } else {
            0.0
        }
    };

    let (uw, uh) = (mgrid.u.width, mgrid.u.height);
    mgrid.u.data.par_iter_mut().enumerate().for_each(|(n, out)| {
        let i = n % uw;
        let j = (n / uw) % uh;
        let k = n / (uw * uh);
        *out = gather(Vec3::new(i as f32, j as f32 + 0.5, k as f32 + 0.5), 0);
    });

    let (vw, vh) = (mgrid.v.width, mgrid.v.height);
    mgrid.v.data.par_iter_mut().enumerate().for_each(|(n, out)| {
        let i = n % vw;
        let j = (n / vw) % vh;
        let k = n / (vw * vh);
        *out = gather(Vec3::new(i as f32 + 0.5, j as f32, k as f32 + 0.5), 1);
    });

    let (ww, wh) = (mgrid.w.width, mgrid.w.height);
    mgrid.w.data.par_iter_mut().enumerate().for_each(|(n, out)| {
        let i = n % ww;
        let j = (n / ww) % wh;
        let k = n / (ww * wh);
        *out = gather(Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32), 2);
    });
}

/// Overwrite each fluid particle's velocity with the grid velocity at its
/// position.
pub fn splat_grid_to_particles(particles: &mut Particles, mgrid: &MacGrid) {
    particles
        .list
        .par_iter_mut()
        .filter(|p| p.is_fluid())
        .for_each(|p| {
            p.velocity = interpolate_velocity(p.position, mgrid);
        });
}

/// Trilinear sample of the staggered velocity at a normalized position.
pub fn interpolate_velocity(position: Vec3, mgrid: &MacGrid) -> Vec3 {
    let x = position * mgrid.max_dim() as f32;
    Vec3::new(
        trilinear(&mgrid.u, x - Vec3::new(0.0, 0.5, 0.5)),
        trilinear(&mgrid.v, x - Vec3::new(0.5, 0.0, 0.5)),
        trilinear(&mgrid.w, x - Vec3::new(0.5, 0.5, 0.0)),
    )
}

fn trilinear(field: &Grid3<f32>, pos: Vec3) -> f32 {
    let i0 = pos.x.floor() as i32;
    let j0 = pos.y.floor() as i32;
    let k0 = pos.z.floor() as i32;
    let tx = pos.x - i0 as f32;
    let ty = pos.y - j0 as f32;
    let tz = pos.z - k0 as f32;

    let mut result = 0.0;
    for dk in 0..2 {
        for dj in 0..2 {
            for di in 0..2 {
                let wx = if di == 0 { 1.0 - tx } else { tx };
                let wy = if dj == 0 { 1.0 - ty } else { ty };
                let wz = if dk == 0 { 1.0 - tz } else { tz };
                result += field.get(i0 + di, j0 + dj, k0 + dk) * wx * wy * wz;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    #[test]
    fn test_splat_single_particle() {
        let mut mgrid = MacGrid::new(8, 8, 8);
        let mut particles = Particles::new();
        // Particle exactly on the u face at (4, 4, 4): grid position (4, 4.5, 4.5).
        particles.list.push(Particle::fluid(
            Vec3::new(4.0, 4.5, 4.5) / 8.0,
            Vec3::new(2.0, 0.0, 0.0),
        ));
        let mut pgrid = ParticleGrid::new(8, 8, 8);
        pgrid.sort(&particles);

        splat_particles_to_grid(&pgrid, &particles, &mut mgrid);

        let n = mgrid.u.index(4, 4, 4);
        assert!((mgrid.u.data[n] - 2.0).abs() < 1.0e-5);
        // Faces far from any particle stay zero.
        assert_eq!(mgrid.u.data[mgrid.u.index(0, 0, 0)], 0.0);
        assert_eq!(mgrid.v.data[mgrid.v.index(0, 0, 0)], 0.0);
    }

    #[test]
    fn test_interpolate_uniform_field() {
        let mut mgrid = MacGrid::new(8, 8, 8);
        mgrid.u.fill(1.0);
        mgrid.v.fill(-2.0);
        mgrid.w.fill(0.5);
        for p in [Vec3::splat(0.5), Vec3::new(0.2, 0.7, 0.4)] {
            let vel = interpolate_velocity(p, &mgrid);
            assert!((vel - Vec3::new(1.0, -2.0, 0.5)).length() < 1.0e-5);
        }
    }

    #[test]
    fn test_grid_to_particles_overwrites_fluid_only() {
        let mut mgrid = MacGrid::new(8, 8, 8);
        mgrid.u.fill(3.0);
        let mut particles = Particles::new();
        particles.spawn_fluid(Vec3::splat(0.5), Vec3::ZERO);
        particles.spawn_solid(Vec3::splat(0.25), Vec3::Y);

        splat_grid_to_particles(&mut particles, &mgrid);

        assert!((particles.list[0].velocity.x - 3.0).abs() < 1.0e-5);
        assert_eq!(particles.list[1].velocity, Vec3::ZERO);
    }
}
