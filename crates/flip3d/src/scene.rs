//! Scene state: solid geometry, liquid volumes, emitters, and the queries the
//! solver runs against them.
//!
//! A [`SceneBuilder`] assembles the description in normalized `[0,1]^3`
//! coordinates and hands the solver a fully-populated [`Scene`]; queries take
//! points and rays in grid units (normalized position times `max_dim`).

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::levelset::LevelSet;
use crate::particle::Particles;
use crate::particle_grid::ParticleGrid;

/// A ray in grid units with unit direction.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Nearest solid intersection along a ray.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub geom: usize,
}

const RAY_EPS: f32 = 1.0e-5;

/// Analytic primitive, ray-castable and SDF-sampleable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Shape {
    Sphere { center: Vec3, radius: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Shape {
    fn scaled(&self, s: f32) -> Shape {
        match *self {
            Shape::Sphere { center, radius } => Shape::Sphere {
                center: center * s,
                radius: radius * s,
            },
            Shape::Box { min, max } => Shape::Box {
                min: min * s,
                max: max * s,
            },
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        self.sdf(p) < 0.0
    }

    /// Signed distance, negative inside.
    pub fn sdf(&self, p: Vec3) -> f32 {
        match *self {
            Shape::Sphere { center, radius } => (p - center).length() - radius,
            Shape::Box { min, max } => {
                let center = (min + max) * 0.5;
                let half = (max - min) * 0.5;
                let d = (p - center).abs() - half;
                let outside = d.max(Vec3::ZERO).length();
                let inside = d.x.max(d.y).max(d.z).min(0.0);
                outside + inside
            }
        }
    }

    pub fn aabb(&self) -> (Vec3, Vec3) {
        match *self {
            Shape::Sphere { center, radius } => {
                (center - Vec3::splat(radius), center + Vec3::splat(radius))
            }
            Shape::Box { min, max } => (min, max),
        }
    }

    /// Nearest intersection with positive distance, so a ray starting inside
    /// the shape reports the exit point with an outward normal.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        match *self {
            Shape::Sphere { center, radius } => {
                let oc = ray.origin - center;
                let b = oc.dot(ray.direction);
                let c = oc.dot(oc) - radius * radius;
                let disc = b * b - c;
                if disc < 0.0 {
                    return None;
                }
                let sq = disc.sqrt();
                let t = if -b - sq > RAY_EPS { -b - sq } else { -b + sq };
                if t <= RAY_EPS {
                    return None;
                }
                let point = ray.origin + ray.direction * t;
                Some((t, (point - center) / radius))
            }
            Shape::Box { min, max } => {
                let mut t_enter = f32::NEG_INFINITY;
                let mut t_exit = f32::INFINITY;
                let mut enter_axis = 0;
                let mut exit_axis = 0;
                for axis in 0..3 {
                    let o = ray.origin[axis];
                    let d = ray.direction[axis];
                    if d.abs() < 1.0e-9 {
                        if o < min[axis] || o > max[axis] {
                            return None;
                        }
                        continue;
                    }
                    let inv = 1.0 / d;
                    let (t0, t1) = if inv >= 0.0 {
                        ((min[axis] - o) * inv, (max[axis] - o) * inv)
                    } else {
                        ((max[axis] - o) * inv, (min[axis] - o) * inv)
                    };
                    if t0 > t_enter {
                        t_enter = t0;
                        enter_axis = axis;
                    }
                    if t1 < t_exit {
                        t_exit = t1;
                        exit_axis = axis;
                    }
                }
                if t_exit < t_enter.max(RAY_EPS) {
                    return None;
                }
                let (t, axis, outward) = if t_enter > RAY_EPS {
                    (t_enter, enter_axis, -ray.direction[enter_axis].signum())
                } else {
                    (t_exit, exit_axis, ray.direction[exit_axis].signum())
                };
                let mut normal = Vec3::ZERO;
                normal[axis] = outward;
                Some((t, normal))
            }
        }
    }
}

/// A solid geom present over a frame range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolidGeom {
    pub shape: Shape,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl SolidGeom {
    #[inline]
    fn active(&self, frame: u32) -> bool {
        frame >= self.start_frame && frame <= self.end_frame
    }
}

/// Emits fluid particles with an initial velocity over a frame range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Inflow {
    pub shape: Shape,
    pub velocity: Vec3,
    pub start_frame: u32,
    pub end_frame: u32,
}

/// Immutable scene handed to the solver, with geometry in grid units.
pub struct Scene {
    width: usize,
    height: usize,
    depth: usize,
    max_dim: f32,
    solids: Vec<SolidGeom>,
    liquids: Vec<Shape>,
    inflows: Vec<Inflow>,
    external_forces: Vec<Vec3>,
    solid_phi: LevelSet,
    solid_active: Vec<bool>,
    has_animated_solids: bool,
}

impl Scene {
    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    /// Geom containing the point, if any.
    pub fn point_inside_solid(&self, p: Vec3, frame: u32) -> Option<usize> {
        self.solids
            .iter()
            .enumerate()
            .find(|(_, g)| g.active(frame) && g.shape.contains(p))
            .map(|(n, _)| n)
    }

    /// Nearest solid hit along the ray among geoms active at `frame`.
    pub fn intersect_solids(&self, ray: &Ray, frame: u32) -> Option<RayHit> {
        if !ray.direction.is_finite() || ray.direction.length_squared() < 1.0e-12 {
            return None;
        }
        let mut best: Option<RayHit> = None;
        for (n, geom) in self.solids.iter().enumerate() {
            if !geom.active(frame) {
                continue;
            }
            if let Some((t, normal)) = geom.shape.intersect(ray) {
                if best.map_or(true, |b| t < b.distance) {
                    best = Some(RayHit {
                        point: ray.origin + ray.direction * t,
                        normal,
                        distance: t,
                        geom: n,
                    });
                }
            }
        }
        best
    }

    pub fn solid_level_set(&self) -> &LevelSet {
        &self.solid_phi
    }

    pub fn external_forces(&self) -> &[Vec3] {
        &self.external_forces
    }

    fn rebuild_solid_phi(&mut self, frame: u32) {
        let solids = std::mem::take(&mut self.solids);
        let background = self.max_dim;
        self.solid_phi.rebuild(|p| {
            solids
                .iter()
                .filter(|g| g.active(frame))
                .map(|g| g.shape.sdf(p))
                .fold(background, f32::min)
        });
        self.solids = solids;
        self.solid_active = self
            .solids
            .iter()
            .map(|g| g.active(frame))
            .collect();
    }

    /// Build the level set for the always-present solids. Run once at init.
    pub fn build_perma_solid_level_set(&mut self) {
        self.rebuild_solid_phi(0);
    }

    /// Rebuild the solid level set if the set of active geoms changed for
    /// this frame. Returns whether a rebuild happened.
    pub fn build_solid_level_set(&mut self, frame: u32) -> bool {
        if !self.has_animated_solids {
            return false;
        }
        let active: Vec<bool> = self.solids.iter().map(|g| g.active(frame)).collect();
        if active == self.solid_active {
            return false;
        }
        self.rebuild_solid_phi(frame);
        true
    }

    /// Emit particles for a frame.
    ///
    /// Frame 0 fills the liquid volumes on a `density / max_dim` lattice;
    /// inflow emitters add particles on every active frame, skipping lattice
    /// points whose cell already holds a particle.
    pub fn generate_particles(
        &self,
        particles: &mut Particles,
        pgrid: &ParticleGrid,
        density: f32,
        frame: u32,
    ) {
        let spacing = density / self.max_dim;
        if frame == 0 {
            for shape in &self.liquids {
                self.fill_shape(particles, pgrid, shape, Vec3::ZERO, spacing, frame, false);
            }
        }
        for inflow in &self.inflows {
            if frame >= inflow.start_frame && frame <= inflow.end_frame {
                self.fill_shape(
                    particles,
                    pgrid,
                    &inflow.shape,
                    inflow.velocity,
                    spacing,
                    frame,
                    true,
                );
            }
        }
    }

    fn fill_shape(
        &self,
        particles: &mut Particles,
        pgrid: &ParticleGrid,
        shape: &Shape,
        velocity: Vec3,
        spacing: f32,
        frame: u32,
        dedupe: bool,
    ) {
        let (lo, hi) = shape.aabb();
        // The normalized domain spans dim / max_dim per axis.
        let extent = Vec3::new(
            self.width as f32,
            self.height as f32,
            self.depth as f32,
        ) / self.max_dim;
        let lo = (lo / self.max_dim).max(Vec3::ZERO);
        let hi = (hi / self.max_dim).min(extent);
        let mut z = lo.z + spacing * 0.5;
        while z < hi.z {
            let mut y = lo.y + spacing * 0.5;
            while y < hi.y {
                let mut x = lo.x + spacing * 0.5;
                while x < hi.x {
                    let p = Vec3::new(x, y, z);
                    let p_world = p * self.max_dim;
                    if shape.contains(p_world)
                        && self.point_inside_solid(p_world, frame).is_none()
                    {
                        let occupied = dedupe && {
                            let cell = pgrid.cell_of(p);
                            !pgrid
                                .cell_neighbors(
                                    (cell.0 as i32, cell.1 as i32, cell.2 as i32),
                                    0,
                                )
                                .is_empty()
                        };
                        if !occupied {
                            particles.spawn_fluid(p, velocity);
                        }
                    }
                    x += spacing;
                }
                y += spacing;
            }
            z += spacing;
        }
    }

    /// Drop existing solid markers and reseed them on the current solid
    /// surface: one marker per solid cell with a non-solid face neighbor,
    /// carrying the outward SDF gradient as its normal.
    pub fn seed_solid_markers(&self, particles: &mut Particles) {
        particles.list.retain(|p| p.is_fluid());
        for k in 0..self.depth as i32 {
            for j in 0..self.height as i32 {
                for i in 0..self.width as i32 {
                    if self.solid_phi.get(i, j, k) >= 0.0 {
                        continue;
                    }
                    let surface = [
                        (i - 1, j, k),
                        (i + 1, j, k),
                        (i, j - 1, k),
                        (i, j + 1, k),
                        (i, j, k - 1),
                        (i, j, k + 1),
                    ]
                    .iter()
                    .any(|&(qi, qj, qk)| self.solid_phi.get(qi, qj, qk) >= 0.0);
                    if surface {
                        let center =
                            Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5);
                        let normal = self.solid_phi.gradient(center);
                        particles.spawn_solid(center / self.max_dim, normal);
                    }
                }
            }
        }
    }
}

/// Assembles a [`Scene`] from a description in normalized coordinates.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct SceneBuilder {
    solids: Vec<SolidGeom>,
    liquids: Vec<Shape>,
    inflows: Vec<Inflow>,
    external_forces: Vec<Vec3>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solid present for the whole simulation.
    pub fn solid(mut self, shape: Shape) -> Self {
        self.solids.push(SolidGeom {
            shape,
            start_frame: 0,
            end_frame: u32::MAX,
        });
        self
    }

    /// Solid present only for `[start_frame, end_frame]`.
    pub fn animated_solid(mut self, shape: Shape, start_frame: u32, end_frame: u32) -> Self {
        self.solids.push(SolidGeom {
            shape,
            start_frame,
            end_frame,
        });
        self
    }

    /// Liquid volume filled at frame 0.
    pub fn liquid(mut self, shape: Shape) -> Self {
        self.liquids.push(shape);
        self
    }

    /// Emitter active over `[start_frame, end_frame]`.
    pub fn inflow(mut self, shape: Shape, velocity: Vec3, start_frame: u32, end_frame: u32) -> Self {
        self.inflows.push(Inflow {
            shape,
            velocity,
            start_frame,
            end_frame,
        });
        self
    }

    /// Constant body force, applied to particle velocities each step.
    pub fn external_force(mut self, force: Vec3) -> Self {
        self.external_forces.push(force);
        self
    }

    /// Standard downward gravity.
    pub fn gravity(self) -> Self {
        self.external_force(Vec3::new(0.0, -9.8, 0.0))
    }

    pub fn build(self, width: usize, height: usize, depth: usize) -> Result<Scene, SimError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(SimError::InvalidDimensions {
                width,
                height,
                depth,
            });
        }
        for geom in self.solids.iter().map(|g| &g.shape).chain(&self.liquids) {
            match *geom {
                Shape::Sphere { radius, .. } if radius <= 0.0 => {
                    return Err(SimError::DegenerateShape("sphere with non-positive radius"))
                }
                Shape::Box { min, max } if !(min.cmplt(max).all()) => {
                    return Err(SimError::DegenerateShape("box with inverted extents"))
                }
                _ => {}
            }
        }
        let max_dim = width.max(height).max(depth) as f32;
        let solid_count = self.solids.len();
        let has_animated_solids = self
            .solids
            .iter()
            .any(|g| g.start_frame > 0 || g.end_frame < u32::MAX);
        Ok(Scene {
            width,
            height,
            depth,
            max_dim,
            solids: self
                .solids
                .into_iter()
                .map(|g| SolidGeom {
                    shape: g.shape.scaled(max_dim),
                    ..g
                })
                .collect(),
            liquids: self
                .liquids
                .into_iter()
                .map(|s| s.scaled(max_dim))
                .collect(),
            inflows: self
                .inflows
                .into_iter()
                .map(|f| Inflow {
                    shape: f.shape.scaled(max_dim),
                    ..f
                })
                .collect(),
            external_forces: self.external_forces,
            solid_phi: LevelSet::new(width, height, depth, max_dim),
            solid_active: vec![false; solid_count],
            has_animated_solids,
        })
    }
}
