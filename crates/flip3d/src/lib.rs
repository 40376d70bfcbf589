//! FLIP/PIC hybrid fluid simulation on a 3D staggered MAC grid.
//!
//! Particles carry the fluid; each step their momentum is splatted onto the
//! staggered grid, a ghost-fluid-aware PCG pressure solve projects the grid
//! field to divergence-free, and the result is blended back onto the
//! particles (95% FLIP / 5% PIC by default) before advection and collision
//! handling against ray-castable solids.
//!
//! # Example
//!
//! ```
//! use flip3d::{FlipConfig, FlipSim, SceneBuilder, Shape, Vec3};
//!
//! let scene = SceneBuilder::new()
//!     .liquid(Shape::Box {
//!         min: Vec3::ZERO,
//!         max: Vec3::new(1.0, 0.4, 1.0),
//!     })
//!     .gravity()
//!     .build(16, 16, 16)
//!     .unwrap();
//!
//! let config = FlipConfig {
//!     width: 16,
//!     height: 16,
//!     depth: 16,
//!     ..FlipConfig::default()
//! };
//! let mut sim = FlipSim::new(config, scene).unwrap();
//! sim.init();
//! sim.step();
//! assert!(sim.particles.fluid_count() > 0);
//! ```

pub mod error;
pub mod grid;
pub mod kernels;
pub mod levelset;
pub mod particle;
pub mod particle_grid;
pub mod pressure;
pub mod resample;
pub mod scene;
pub mod sim;
pub mod transfer;

pub use error::SimError;
pub use glam::Vec3;
pub use grid::{CellType, Grid3, MacGrid};
pub use levelset::LevelSet;
pub use particle::{Particle, ParticleKind, Particles};
pub use particle_grid::ParticleGrid;
pub use scene::{Ray, RayHit, Scene, SceneBuilder, Shape};
pub use sim::{FlipConfig, FlipSim};
