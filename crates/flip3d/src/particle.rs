//! Particle representation for the FLIP/PIC simulation.

use glam::Vec3;

/// What a particle represents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParticleKind {
    /// Liquid carrier particle, advected every step.
    Fluid,
    /// Static marker on a solid surface, used for grid-scale repulsion.
    Solid,
}

/// A single particle. Positions are normalized to `[0,1]^3`.
///
/// Per-step scratch state (previous position/velocity, blend buffer) lives in
/// solver-owned arrays keyed by particle index, not here.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    /// Smoothed neighborhood density relative to the calibrated maximum.
    pub density: f32,
    /// Outward surface normal; meaningful for solid markers only.
    pub normal: Vec3,
    pub kind: ParticleKind,
}

impl Particle {
    /// Create a fluid particle with unit mass.
    pub fn fluid(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            mass: 1.0,
            density: 1.0,
            normal: Vec3::ZERO,
            kind: ParticleKind::Fluid,
        }
    }

    /// Create a static solid marker carrying a surface normal.
    pub fn solid(position: Vec3, normal: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            mass: 1.0,
            density: 1.0,
            normal,
            kind: ParticleKind::Solid,
        }
    }

    #[inline]
    pub fn is_fluid(&self) -> bool {
        self.kind == ParticleKind::Fluid
    }
}

/// Collection of particles.
#[derive(Default)]
pub struct Particles {
    pub list: Vec<Particle>,
}

impl Particles {
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
        }
    }

    pub fn spawn_fluid(&mut self, position: Vec3, velocity: Vec3) {
        self.list.push(Particle::fluid(position, velocity));
    }

    pub fn spawn_solid(&mut self, position: Vec3, normal: Vec3) {
        self.list.push(Particle::solid(position, normal));
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn fluid_count(&self) -> usize {
        self.list.iter().filter(|p| p.is_fluid()).count()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_helpers() {
        let mut particles = Particles::new();
        particles.spawn_fluid(Vec3::splat(0.5), Vec3::ZERO);
        particles.spawn_solid(Vec3::splat(0.25), Vec3::Y);
        assert_eq!(particles.len(), 2);
        assert_eq!(particles.fluid_count(), 1);
        assert!(particles.list[0].is_fluid());
        assert_eq!(particles.list[1].normal, Vec3::Y);
    }
}
