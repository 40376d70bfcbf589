//! The FLIP/PIC simulation loop.
//!
//! [`FlipSim::step`] advances the fluid by one timestep through a fixed
//! sequence of fork-join phases: emit, unstick, transfer to the grid,
//! classify, project pressure, extrapolate, blend back to particles, advect,
//! resolve solid constraints, resample. Phases are strictly ordered; inside a
//! phase, iterations are independent and run on the rayon pool.

use glam::Vec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::grid::{CellType, Grid3, MacGrid};
use crate::kernels::smooth_kernel;
use crate::particle::{Particle, ParticleKind, Particles};
use crate::particle_grid::ParticleGrid;
use crate::pressure;
use crate::resample::resample_particles;
use crate::scene::{Ray, Scene};
use crate::transfer;

/// Simulation parameters, fixed at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipConfig {
    /// Logical grid resolution.
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    /// Particle seeding density; the lattice spacing is `density / max_dim`.
    pub density: f32,
    /// Timestep in seconds.
    pub stepsize: f32,
    /// Ghost-fluid subcell handling in the pressure solve.
    pub subcell: bool,
    /// FLIP weight of the velocity blend; the PIC share is `1 - ratio`.
    pub pic_flip_ratio: f32,
    /// Smoothed density below which a particle counts as spray.
    pub density_threshold: f32,
    /// Seed for the resampling jitter.
    pub seed: u64,
    /// Log a summary line per step at info level instead of debug.
    pub verbose: bool,
}

impl Default for FlipConfig {
    fn default() -> Self {
        Self {
            width: 32,
            height: 32,
            depth: 32,
            density: 0.5,
            stepsize: 1.0 / 30.0,
            subcell: true,
            pic_flip_ratio: 0.95,
            density_threshold: 0.04,
            seed: 0,
            verbose: false,
        }
    }
}

impl FlipConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(SimError::InvalidDimensions {
                width: self.width,
                height: self.height,
                depth: self.depth,
            });
        }
        if self.density <= 0.0 {
            return Err(SimError::NonPositive("density", self.density));
        }
        if self.stepsize <= 0.0 {
            return Err(SimError::NonPositive("stepsize", self.stepsize));
        }
        if !(0.0..=1.0).contains(&self.pic_flip_ratio) {
            return Err(SimError::OutOfRange("pic_flip_ratio", self.pic_flip_ratio));
        }
        Ok(())
    }
}

/// Per-step workspaces keyed by particle index: the position and velocity at
/// the top of the step, and the blend buffer used by the PIC/FLIP
/// combination. Kept out of `Particle` so the particle carries only semantic
/// state.
#[derive(Default)]
struct StepScratch {
    prev_position: Vec<Vec3>,
    prev_velocity: Vec<Vec3>,
    blend: Vec<Vec3>,
}

impl StepScratch {
    fn store(&mut self, particles: &Particles) {
        self.prev_position.clear();
        self.prev_velocity.clear();
        self.prev_position
            .extend(particles.list.iter().map(|p| p.position));
        self.prev_velocity
            .extend(particles.list.iter().map(|p| p.velocity));
    }
}

/// The simulator: grids, particles, scene, and the step pipeline.
pub struct FlipSim {
    pub config: FlipConfig,
    pub mgrid: MacGrid,
    mgrid_prev: MacGrid,
    pub pgrid: ParticleGrid,
    pub particles: Particles,
    pub scene: Scene,
    scratch: StepScratch,
    max_density: f32,
    frame: u32,
    rng: ChaCha8Rng,
    last_solve: Option<pressure::SolveStats>,
}

impl FlipSim {
    pub fn new(config: FlipConfig, scene: Scene) -> Result<Self, SimError> {
        config.validate()?;
        let dims = (config.width, config.height, config.depth);
        if scene.dimensions() != dims {
            return Err(SimError::DimensionMismatch {
                sim: dims,
                scene: scene.dimensions(),
            });
        }
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            mgrid: MacGrid::new(dims.0, dims.1, dims.2),
            mgrid_prev: MacGrid::new(dims.0, dims.1, dims.2),
            pgrid: ParticleGrid::new(dims.0, dims.1, dims.2),
            particles: Particles::new(),
            scene,
            scratch: StepScratch::default(),
            max_density: 1.0,
            frame: 0,
            last_solve: None,
            config,
        })
    }

    #[inline]
    fn max_dim(&self) -> f32 {
        self.mgrid.max_dim() as f32
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Stats of the most recent pressure solve, if any fluid was present.
    pub fn last_solve(&self) -> Option<pressure::SolveStats> {
        self.last_solve
    }

    /// One-time setup: solid level set, density calibration, initial
    /// particles.
    pub fn init(&mut self) {
        self.scene.build_perma_solid_level_set();
        self.calibrate_max_density();
        self.scene.seed_solid_markers(&mut self.particles);
        self.scene
            .generate_particles(&mut self.particles, &self.pgrid, self.config.density, 0);
        self.pgrid.sort(&self.particles);
        self.pgrid.mark_cell_types(
            &self.particles,
            &mut self.mgrid.cell_type,
            self.scene.solid_level_set(),
        );
        log::debug!(
            "init: {} particles ({} fluid), max_density {:.4}",
            self.particles.len(),
            self.particles.fluid_count(),
            self.max_density
        );
    }

    /// Fill a reference block at the seeding spacing and record the highest
    /// smoothed density it produces; densities are reported relative to it.
    fn calibrate_max_density(&mut self) {
        let h = self.config.density / self.max_dim();
        let mut reference = Particles::new();
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    reference.spawn_fluid(
                        (Vec3::new(i as f32, j as f32, k as f32) + Vec3::splat(0.5)) * h,
                        Vec3::ZERO,
                    );
                }
            }
        }
        let mut pgrid = ParticleGrid::new(self.config.width, self.config.height, self.config.depth);
        pgrid.sort(&reference);
        density_pass(
            &mut reference,
            &pgrid,
            self.max_dim(),
            self.config.density,
            1.0,
        );
        self.max_density = reference
            .list
            .iter()
            .map(|p| p.density)
            .fold(0.0, f32::max)
            .max(f32::MIN_POSITIVE);
    }

    /// Advance one step.
    pub fn step(&mut self) {
        self.frame += 1;
        let frame = self.frame;
        let subcell = self.config.subcell;

        // Emit new particles and track moving solids.
        self.scene
            .generate_particles(&mut self.particles, &self.pgrid, self.config.density, frame);
        if self.scene.build_solid_level_set(frame) {
            self.scene.seed_solid_markers(&mut self.particles);
        }

        self.unstick_particles(frame);

        self.scratch.store(&self.particles);
        self.pgrid.sort(&self.particles);
        let max_dim = self.max_dim();
        density_pass(
            &mut self.particles,
            &self.pgrid,
            max_dim,
            self.config.density,
            self.max_density,
        );
        self.apply_external_forces();

        transfer::splat_particles_to_grid(&self.pgrid, &self.particles, &mut self.mgrid);
        self.pgrid.mark_cell_types(
            &self.particles,
            &mut self.mgrid.cell_type,
            self.scene.solid_level_set(),
        );
        self.mgrid_prev.store_velocities_from(&self.mgrid);
        pressure::enforce_boundary_velocity(&mut self.mgrid);

        self.project(subcell);

        pressure::enforce_boundary_velocity(&mut self.mgrid);
        extrapolate_velocity(&mut self.mgrid);
        self.mgrid_prev.subtract_velocities_from(&self.mgrid);

        self.solve_pic_flip();
        self.advect_particles();
        self.check_solid_constraints(frame);

        self.scratch.store(&self.particles);
        resample_particles(
            &mut self.pgrid,
            &mut self.particles,
            &self.mgrid.cell_type,
            &mut self.rng,
            self.mgrid.cell_width(),
            self.config.density_threshold,
        );

        let solve = self.last_solve;
        if self.config.verbose {
            log::info!(
                "step {}: {} particles, pressure {:?}",
                frame,
                self.particles.len(),
                solve
            );
        } else {
            log::debug!(
                "step {}: {} particles, pressure {:?}",
                frame,
                self.particles.len(),
                solve
            );
        }
    }

    /// Divergence, liquid SDF, PCG, gradient subtraction.
    fn project(&mut self, subcell: bool) {
        pressure::compute_divergence(&mut self.mgrid);
        self.pgrid
            .build_sdf(&self.particles, &mut self.mgrid, self.config.density);
        self.last_solve = Some(pressure::solve(&mut self.mgrid, subcell));
        pressure::subtract_pressure_gradient(&mut self.mgrid, subcell);
    }

    /// Move fluid particles that ended up inside a solid back outside.
    ///
    /// The solid level set gives the direction to the surface; a ray cast
    /// from the stuck position toward the projected surface point gives the
    /// precise exit, and the particle lands just past it.
    fn unstick_particles(&mut self, frame: u32) {
        let maxd = self.max_dim();
        let scene = &self.scene;
        let stuck: Vec<usize> = self
            .particles
            .list
            .par_iter()
            .enumerate()
            .filter(|(_, p)| {
                p.is_fluid() && scene.point_inside_solid(p.position * maxd, frame).is_some()
            })
            .map(|(n, _)| n)
            .collect();
        if stuck.is_empty() {
            return;
        }

        let originals: Vec<Vec3> = stuck.iter().map(|&n| self.particles.list[n].position).collect();
        let mut projected: Vec<Particle> =
            stuck.iter().map(|&n| self.particles.list[n]).collect();
        scene
            .solid_level_set()
            .project_points_to_surface(&mut projected, maxd);

        for (m, &n) in stuck.iter().enumerate() {
            let original = originals[m];
            let surface = projected[m].position;
            let offset = surface - original;
            let d = offset.length();
            if !offset.is_finite() || d < 1.0e-9 {
                // Degenerate direction; leave the particle for next step.
                continue;
            }
            let direction = offset / d;
            let ray = Ray {
                origin: original * maxd,
                direction,
            };
            let particle = &mut self.particles.list[n];
            if let Some(hit) = scene.intersect_solids(&ray, frame) {
                particle.position = (ray.origin + direction * 1.05 * hit.distance) / maxd;
            } else {
                particle.position = surface;
            }
            particle.velocity = direction * d;
        }
    }

    fn apply_external_forces(&mut self) {
        let impulse: Vec3 = self
            .scene
            .external_forces()
            .iter()
            .copied()
            .sum::<Vec3>()
            * self.config.stepsize;
        if impulse == Vec3::ZERO {
            return;
        }
        self.particles
            .list
            .par_iter_mut()
            .for_each(|p| p.velocity += impulse);
    }

    /// Blend grid velocities back onto the particles.
    ///
    /// `mgrid_prev` holds the per-face delta at this point, so sampling it
    /// gives the FLIP increment while sampling `mgrid` gives the PIC value.
    fn solve_pic_flip(&mut self) {
        let ratio = self.config.pic_flip_ratio;
        let count = self.particles.len();
        self.scratch.blend.resize(count, Vec3::ZERO);

        // blend <- current particle velocity
        self.scratch
            .blend
            .par_iter_mut()
            .zip(self.particles.list.par_iter())
            .for_each(|(t, p)| *t = p.velocity);

        // velocity <- grid delta; blend <- FLIP velocity
        transfer::splat_grid_to_particles(&mut self.particles, &self.mgrid_prev);
        self.scratch
            .blend
            .par_iter_mut()
            .zip(self.particles.list.par_iter())
            .for_each(|(t, p)| {
                if p.is_fluid() {
                    *t = p.velocity + *t;
                }
            });

        // velocity <- PIC velocity, then blend the two.
        transfer::splat_grid_to_particles(&mut self.particles, &self.mgrid);
        self.particles
            .list
            .par_iter_mut()
            .zip(self.scratch.blend.par_iter())
            .for_each(|(p, t)| {
                if p.is_fluid() {
                    p.velocity = (1.0 - ratio) * p.velocity + ratio * *t;
                }
            });
    }

    /// Euler advection, wall clamp, and grid-scale repulsion from solid
    /// marker particles.
    fn advect_particles(&mut self) {
        let dt = self.config.stepsize;
        let maxd = self.max_dim();
        let mgrid = &self.mgrid;
        self.particles
            .list
            .par_iter_mut()
            .filter(|p| p.is_fluid())
            .for_each(|p| {
                p.position += transfer::interpolate_velocity(p.position, mgrid) * dt;
            });

        self.pgrid.sort(&self.particles);

        let wall = 1.0 / maxd;
        let repel_radius = 1.5 * self.config.density / maxd;
        let snapshot = self.particles.list.clone();
        let pgrid = &self.pgrid;
        self.particles
            .list
            .par_iter_mut()
            .filter(|p| p.is_fluid())
            .for_each(|p| {
                p.position = p
                    .position
                    .clamp(Vec3::splat(wall), Vec3::splat(1.0 - wall));
                let (ci, cj, ck) = pgrid.cell_of(p.position);
                pgrid.for_neighbors((ci as i32, cj as i32, ck as i32), 1, |m| {
                    let marker = &snapshot[m as usize];
                    if marker.kind != ParticleKind::Solid {
                        return;
                    }
                    let dist = p.position.distance(marker.position);
                    if dist < repel_radius {
                        let mut normal = marker.normal;
                        if normal.length() < 1.0e-7 && dist > 0.0 {
                            normal = (p.position - marker.position) / dist;
                        }
                        p.position += (repel_radius - dist) * normal;
                        p.velocity -= p.velocity.dot(normal) * normal;
                    }
                });
            });
    }

    /// Ray-based collision against solids over the step's travel.
    ///
    /// A hit short of the travel distance parks the particle just before the
    /// surface and reflects its direction, keeping the pre-step speed. If it
    /// still ends up inside a solid, reverse and back off one step.
    fn check_solid_constraints(&mut self, frame: u32) {
        let maxd = self.max_dim();
        let dt = self.config.stepsize;
        let scene = &self.scene;
        let prev_position = &self.scratch.prev_position;
        let prev_velocity = &self.scratch.prev_velocity;

        self.particles
            .list
            .par_iter_mut()
            .enumerate()
            .for_each(|(n, p)| {
                if !p.is_fluid() {
                    return;
                }
                let prev = prev_position[n];
                let offset = p.position - prev;
                let d = offset.length();
                if !offset.is_finite() || d < 1.0e-9 {
                    return;
                }
                let direction = offset / d;
                let speed = prev_velocity[n].length();
                let ray = Ray {
                    origin: prev * maxd,
                    direction,
                };
                if let Some(hit) = scene.intersect_solids(&ray, frame) {
                    if hit.distance < d * maxd {
                        p.position = (ray.origin + direction * 0.90 * hit.distance) / maxd;
                        let bounced =
                            2.0 * direction.dot(hit.normal) * hit.normal - direction;
                        let len = bounced.length();
                        if len > 1.0e-6 {
                            p.velocity = bounced / len * speed;
                        }
                    }
                }
                if scene.point_inside_solid(p.position * maxd, frame).is_some() {
                    p.velocity = -direction * speed;
                    p.position = prev + p.velocity * dt;
                }
            });
    }
}

/// Push velocities one ring into faces walled in by solids.
///
/// `mark` faces touch at least one fluid cell and are left alone; faces that
/// touch only solid cells (or the domain edge) take the plain average of
/// their marked face neighbors. Marked faces are never written, so the pass
/// is order-independent and a second application changes nothing.
pub fn extrapolate_velocity(mgrid: &mut MacGrid) {
    let MacGrid {
        u, v, w, cell_type, ..
    } = mgrid;
    let cell_type: &Grid3<CellType> = cell_type;
    let (x, y, z) = (cell_type.width, cell_type.height, cell_type.depth);

    extrapolate_field(
        u,
        |i, j, k| {
            (i > 0 && cell_type.get(i as i32 - 1, j as i32, k as i32) == CellType::Fluid)
                || (i < x && cell_type.get(i as i32, j as i32, k as i32) == CellType::Fluid)
        },
        |i, j, k| {
            (i == 0 || cell_type.get(i as i32 - 1, j as i32, k as i32) == CellType::Solid)
                && (i == x || cell_type.get(i as i32, j as i32, k as i32) == CellType::Solid)
        },
    );
    extrapolate_field(
        v,
        |i, j, k| {
            (j > 0 && cell_type.get(i as i32, j as i32 - 1, k as i32) == CellType::Fluid)
                || (j < y && cell_type.get(i as i32, j as i32, k as i32) == CellType::Fluid)
        },
        |i, j, k| {
            (j == 0 || cell_type.get(i as i32, j as i32 - 1, k as i32) == CellType::Solid)
                && (j == y || cell_type.get(i as i32, j as i32, k as i32) == CellType::Solid)
        },
    );
    extrapolate_field(
        w,
        |i, j, k| {
            (k > 0 && cell_type.get(i as i32, j as i32, k as i32 - 1) == CellType::Fluid)
                || (k < z && cell_type.get(i as i32, j as i32, k as i32) == CellType::Fluid)
        },
        |i, j, k| {
            (k == 0 || cell_type.get(i as i32, j as i32, k as i32 - 1) == CellType::Solid)
                && (k == z || cell_type.get(i as i32, j as i32, k as i32) == CellType::Solid)
        },
    );
}

fn extrapolate_field(
    field: &mut Grid3<f32>,
    fluid_adjacent: impl Fn(usize, usize, usize) -> bool + Sync,
    walled: impl Fn(usize, usize, usize) -> bool + Sync,
) {
    let (fw, fh, fd) = (field.width, field.height, field.depth);
    let decompose = |n: usize| (n % fw, (n / fw) % fh, n / (fw * fh));

    let mark: Vec<bool> = (0..field.data.len())
        .map(|n| {
            let (i, j, k) = decompose(n);
            fluid_adjacent(i, j, k)
        })
        .collect();
    let wallmark: Vec<bool> = (0..field.data.len())
        .map(|n| {
            let (i, j, k) = decompose(n);
            walled(i, j, k)
        })
        .collect();
    // Reads come from the pre-pass snapshot; only unmarked faces are written.
    let src = field.data.clone();

    field.data.par_iter_mut().enumerate().for_each(|(n, out)| {
        if mark[n] || !wallmark[n] {
            return;
        }
        let (i, j, k) = decompose(n);
        let (i, j, k) = (i as i32, j as i32, k as i32);
        let neighbors = [
            (i - 1, j, k),
            (i + 1, j, k),
            (i, j - 1, k),
            (i, j + 1, k),
            (i, j, k - 1),
            (i, j, k + 1),
        ];
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for (qi, qj, qk) in neighbors {
            if qi < 0
                || qi >= fw as i32
                || qj < 0
                || qj >= fh as i32
                || qk < 0
                || qk >= fd as i32
            {
                continue;
            }
            let qn = qk as usize * fw * fh + qj as usize * fw + qi as usize;
            if mark[qn] {
                sum += src[qn];
                count += 1;
            }
        }
        if count > 0 {
            *out = sum / count as f32;
        }
    });
}

/// Smoothed neighborhood density for every particle, relative to
/// `max_density`. Solid markers report 1.
fn density_pass(
    particles: &mut Particles,
    pgrid: &ParticleGrid,
    max_dim: f32,
    density: f32,
    max_density: f32,
) {
    let radius = 4.0 * density / max_dim;
    let snapshot: Vec<(Vec3, f32)> = particles
        .list
        .iter()
        .map(|p| (p.position, p.mass))
        .collect();

    particles.list.par_iter_mut().for_each(|p| {
        if !p.is_fluid() {
            p.density = 1.0;
            return;
        }
        let (ci, cj, ck) = pgrid.cell_of(p.position);
        let mut weight = 0.0f32;
        pgrid.for_neighbors((ci as i32, cj as i32, ck as i32), 1, |m| {
            let (pos, mass) = snapshot[m as usize];
            let r2 = pos.distance_squared(p.position);
            weight += mass * smooth_kernel(r2, radius);
        });
        p.density = weight / max_density;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SceneBuilder, Shape};

    fn basic_scene(width: usize, height: usize, depth: usize) -> Scene {
        SceneBuilder::new()
            .liquid(Shape::Box {
                min: Vec3::ZERO,
                max: Vec3::new(1.0, 0.5, 1.0),
            })
            .gravity()
            .build(width, height, depth)
            .unwrap()
    }

    #[test]
    fn test_config_defaults_validate() {
        let config = FlipConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.pic_flip_ratio - 0.95).abs() < 1.0e-6);
        assert!((config.density_threshold - 0.04).abs() < 1.0e-6);
    }

    #[test]
    fn test_config_from_json_with_defaults() {
        let config: FlipConfig = serde_json::from_str(
            r#"{"width": 16, "height": 24, "depth": 16, "verbose": true}"#,
        )
        .unwrap();
        assert_eq!((config.width, config.height, config.depth), (16, 24, 16));
        assert!(config.verbose);
        // Unspecified fields come from the defaults.
        assert!((config.pic_flip_ratio - 0.95).abs() < 1.0e-6);
        assert!(config.subcell);
    }

    #[test]
    fn test_config_rejects_bad_ratio() {
        let config = FlipConfig {
            pic_flip_ratio: 1.5,
            ..FlipConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_rejects_dimension_mismatch() {
        let scene = basic_scene(8, 8, 8);
        let config = FlipConfig {
            width: 16,
            height: 8,
            depth: 8,
            ..FlipConfig::default()
        };
        assert!(FlipSim::new(config, scene).is_err());
    }

    #[test]
    fn test_init_seeds_and_calibrates() {
        let config = FlipConfig {
            width: 8,
            height: 8,
            depth: 8,
            ..FlipConfig::default()
        };
        let mut sim = FlipSim::new(config, basic_scene(8, 8, 8)).unwrap();
        sim.init();
        assert!(sim.particles.fluid_count() > 0);
        assert!(sim.max_density > 0.0);
        // Everything seeded in the lower half.
        assert!(sim.particles.list.iter().all(|p| p.position.y <= 0.5));
    }

    #[test]
    fn test_pic_flip_blend_endpoints() {
        let config = FlipConfig {
            width: 8,
            height: 8,
            depth: 8,
            ..FlipConfig::default()
        };
        // Uniform absolute field of 1.0 and delta field of 0.25; a particle
        // with old velocity 2.0 must read PIC = 1.0 and FLIP = 2.25.
        let setup = |ratio: f32| {
            let mut sim = FlipSim::new(
                FlipConfig {
                    pic_flip_ratio: ratio,
                    ..config.clone()
                },
                basic_scene(8, 8, 8),
            )
            .unwrap();
            sim.particles
                .spawn_fluid(Vec3::splat(0.5), Vec3::new(2.0, 0.0, 0.0));
            sim.mgrid.u.fill(1.0);
            sim.mgrid_prev.u.fill(0.25);
            sim.solve_pic_flip();
            sim.particles.list[0].velocity.x
        };

        assert!((setup(0.0) - 1.0).abs() < 1.0e-5, "pure PIC");
        assert!((setup(1.0) - 2.25).abs() < 1.0e-5, "pure FLIP");
        let blended = setup(0.95);
        assert!((blended - (0.05 * 1.0 + 0.95 * 2.25)).abs() < 1.0e-4);
    }

    #[test]
    fn test_extrapolation_idempotent() {
        let mut mgrid = MacGrid::new(8, 8, 8);
        // Solid floor, fluid above it, air on top.
        for k in 0..8 {
            for i in 0..8 {
                mgrid.cell_type.set(i, 0, k, CellType::Solid);
                for j in 1..4 {
                    mgrid.cell_type.set(i, j, k, CellType::Fluid);
                }
            }
        }
        for (n, val) in mgrid.u.data.iter_mut().enumerate() {
            *val = (n % 5) as f32;
        }
        mgrid.v.fill(2.0);

        extrapolate_velocity(&mut mgrid);
        let u_once = mgrid.u.data.clone();
        let v_once = mgrid.v.data.clone();
        let w_once = mgrid.w.data.clone();
        extrapolate_velocity(&mut mgrid);
        assert_eq!(u_once, mgrid.u.data);
        assert_eq!(v_once, mgrid.v.data);
        assert_eq!(w_once, mgrid.w.data);
    }

    #[test]
    fn test_density_pass_bulk_vs_lone() {
        let mut particles = Particles::new();
        // Dense cluster around one point plus a lone particle far away.
        for dx in 0..3 {
            for dy in 0..3 {
                for dz in 0..3 {
                    particles.spawn_fluid(
                        Vec3::new(0.5, 0.5, 0.5)
                            + Vec3::new(dx as f32, dy as f32, dz as f32) * 0.01,
                        Vec3::ZERO,
                    );
                }
            }
        }
        particles.spawn_fluid(Vec3::splat(0.1), Vec3::ZERO);
        let mut pgrid = ParticleGrid::new(8, 8, 8);
        pgrid.sort(&particles);
        density_pass(&mut particles, &pgrid, 8.0, 0.5, 1.0);

        let bulk = particles.list[13].density;
        let lone = particles.list.last().unwrap().density;
        assert!(bulk > lone, "bulk {} should exceed lone {}", bulk, lone);
    }
}
