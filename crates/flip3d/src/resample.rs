//! Particle population control.
//!
//! Keeps every fluid cell between [`MIN_PER_CELL`] and [`MAX_PER_CELL`] fluid
//! particles. Overfull cells drop their surplus and hand the removed momentum
//! to the survivors; underfull cells split residents with halved mass, so
//! linear momentum is preserved exactly in both directions. Jitter comes from
//! the caller's seeded RNG, keeping runs reproducible.

use glam::Vec3;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::grid::{CellType, Grid3};
use crate::particle::{Particle, Particles};
use crate::particle_grid::ParticleGrid;

pub const MIN_PER_CELL: usize = 4;
pub const MAX_PER_CELL: usize = 8;

/// Rebalance particle counts per fluid cell. Sorts the particle grid before
/// and after, so the index is fresh for the next step.
pub fn resample_particles(
    pgrid: &mut ParticleGrid,
    particles: &mut Particles,
    cell_type: &Grid3<CellType>,
    rng: &mut ChaCha8Rng,
    cell_width: f32,
    density_threshold: f32,
) {
    pgrid.sort(particles);

    let mut remove = vec![false; particles.len()];
    let mut spawned: Vec<Particle> = Vec::new();

    for k in 0..cell_type.depth {
        for j in 0..cell_type.height {
            for i in 0..cell_type.width {
                let handles = pgrid.cell_neighbors((i as i32, j as i32, k as i32), 0);
                let fluid: Vec<usize> = handles
                    .iter()
                    .map(|&n| n as usize)
                    .filter(|&n| particles.list[n].is_fluid())
                    .collect();

                if fluid.len() > MAX_PER_CELL {
                    cull_surplus(particles, &fluid, &mut remove);
                } else if cell_type.data[cell_type.index(i, j, k)] == CellType::Fluid
                    && !fluid.is_empty()
                    && fluid.len() < MIN_PER_CELL
                {
                    split_residents(
                        particles,
                        &fluid,
                        &mut spawned,
                        rng,
                        cell_width,
                        density_threshold,
                    );
                }
            }
        }
    }

    let mut idx = 0;
    particles.list.retain(|_| {
        let dropped = remove[idx];
        idx += 1;
        !dropped
    });
    particles.list.extend(spawned);

    pgrid.sort(particles);
}

/// Drop everything beyond the cap (bucket order) and spread the removed
/// momentum over the kept particles.
fn cull_surplus(particles: &mut Particles, fluid: &[usize], remove: &mut [bool]) {
    let (keep, cut) = fluid.split_at(MAX_PER_CELL);
    let kept_mass: f32 = keep.iter().map(|&n| particles.list[n].mass).sum();
    let mut lost = Vec3::ZERO;
    for &n in cut {
        remove[n] = true;
        lost += particles.list[n].velocity * particles.list[n].mass;
    }
    if kept_mass > 0.0 {
        let dv = lost / kept_mass;
        for &n in keep {
            particles.list[n].velocity += dv;
        }
    }
}

/// Split residents until the cell reaches the minimum. Each split halves the
/// parent's mass and spawns a jittered copy carrying the other half. Sparse
/// spray (low smoothed density) is left alone.
fn split_residents(
    particles: &mut Particles,
    fluid: &[usize],
    spawned: &mut Vec<Particle>,
    rng: &mut ChaCha8Rng,
    cell_width: f32,
    density_threshold: f32,
) {
    let mut need = MIN_PER_CELL - fluid.len();
    let mut cursor = 0;
    let mut stalled = 0;
    while need > 0 && stalled < fluid.len() {
        let n = fluid[cursor % fluid.len()];
        cursor += 1;
        let parent = &mut particles.list[n];
        if parent.density < density_threshold {
            stalled += 1;
            continue;
        }
        stalled = 0;
        parent.mass *= 0.5;
        let mut child = *parent;
        let jitter = Vec3::new(
            rng.gen_range(-0.25..0.25),
            rng.gen_range(-0.25..0.25),
            rng.gen_range(-0.25..0.25),
        ) * cell_width;
        child.position = (child.position + jitter)
            .clamp(Vec3::splat(cell_width), Vec3::splat(1.0 - cell_width));
        spawned.push(child);
        need -= 1;
    }
}
