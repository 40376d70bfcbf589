//! End-to-end scenarios for the full step pipeline.

use flip3d::{FlipConfig, FlipSim, SceneBuilder, Shape, Vec3};

fn config(width: usize, height: usize, depth: usize) -> FlipConfig {
    FlipConfig {
        width,
        height,
        depth,
        ..FlipConfig::default()
    }
}

fn assert_particles_sane(sim: &FlipSim) {
    let h = 1.0 / sim.mgrid.max_dim() as f32;
    for p in sim.particles.list.iter().filter(|p| p.is_fluid()) {
        assert!(p.position.is_finite() && p.velocity.is_finite());
        for axis in 0..3 {
            assert!(
                p.position[axis] >= h - 1.0e-5 && p.position[axis] <= 1.0 - h + 1.0e-5,
                "particle escaped the domain at {:?}",
                p.position
            );
        }
    }
}

/// A half-filled box under gravity: the column must stay in the domain, keep
/// its fill level, and not blow up.
#[test]
fn test_hydrostatic_column() {
    let dims = (16, 16, 16);
    let scene = SceneBuilder::new()
        .liquid(Shape::Box {
            min: Vec3::ZERO,
            max: Vec3::new(1.0, 0.4, 1.0),
        })
        .gravity()
        .build(dims.0, dims.1, dims.2)
        .unwrap();
    let mut sim = FlipSim::new(config(dims.0, dims.1, dims.2), scene).unwrap();
    sim.init();
    let initial = sim.particles.fluid_count();
    assert!(initial > 0);

    for _ in 0..20 {
        sim.step();
    }

    assert_particles_sane(&sim);
    let max_speed = sim
        .particles
        .list
        .iter()
        .filter(|p| p.is_fluid())
        .map(|p| p.velocity.length())
        .fold(0.0f32, f32::max);
    assert!(max_speed < 10.0, "velocities exploded: {}", max_speed);

    let mean_height = sim
        .particles
        .list
        .iter()
        .filter(|p| p.is_fluid())
        .map(|p| p.position.y)
        .sum::<f32>()
        / sim.particles.fluid_count() as f32;
    assert!(
        (0.1..0.45).contains(&mean_height),
        "column drifted, mean height {}",
        mean_height
    );
}

/// Particle count is conserved to within resampling tolerance when nothing
/// emits or drains.
#[test]
fn test_particle_count_stays_bounded() {
    let scene = SceneBuilder::new()
        .liquid(Shape::Box {
            min: Vec3::ZERO,
            max: Vec3::new(1.0, 0.5, 1.0),
        })
        .gravity()
        .build(10, 10, 10)
        .unwrap();
    let mut sim = FlipSim::new(config(10, 10, 10), scene).unwrap();
    sim.init();
    let initial = sim.particles.fluid_count() as f32;

    for _ in 0..12 {
        sim.step();
    }

    let now = sim.particles.fluid_count() as f32;
    assert!(
        (now - initial).abs() / initial < 0.10,
        "count drifted from {} to {}",
        initial,
        now
    );
}

/// A released column spreads along the floor.
#[test]
fn test_dam_break_front_advances() {
    let dims = (16, 16, 16);
    let scene = SceneBuilder::new()
        .liquid(Shape::Box {
            min: Vec3::ZERO,
            max: Vec3::new(0.4, 0.8, 1.0),
        })
        .gravity()
        .build(dims.0, dims.1, dims.2)
        .unwrap();
    let mut sim = FlipSim::new(config(dims.0, dims.1, dims.2), scene).unwrap();
    sim.init();
    let initial = sim.particles.fluid_count() as f32;
    let initial_front = sim
        .particles
        .list
        .iter()
        .filter(|p| p.is_fluid())
        .map(|p| p.position.x)
        .fold(0.0f32, f32::max);

    for _ in 0..20 {
        sim.step();
    }

    assert_particles_sane(&sim);
    let front = sim
        .particles
        .list
        .iter()
        .filter(|p| p.is_fluid())
        .map(|p| p.position.x)
        .fold(0.0f32, f32::max);
    assert!(
        front > initial_front + 0.1,
        "front did not advance: {} -> {}",
        initial_front,
        front
    );

    let now = sim.particles.fluid_count() as f32;
    assert!(
        (now - initial).abs() / initial < 0.5,
        "count drifted from {} to {}",
        initial,
        now
    );
}

/// Water dropped on a solid sphere must not end up inside it.
#[test]
fn test_solid_sphere_keeps_fluid_out() {
    let dims = (16, 16, 16);
    let scene = SceneBuilder::new()
        .solid(Shape::Sphere {
            center: Vec3::splat(0.5),
            radius: 0.2,
        })
        .liquid(Shape::Box {
            min: Vec3::new(0.2, 0.72, 0.2),
            max: Vec3::new(0.8, 0.95, 0.8),
        })
        .gravity()
        .build(dims.0, dims.1, dims.2)
        .unwrap();
    let mut sim = FlipSim::new(config(dims.0, dims.1, dims.2), scene).unwrap();
    sim.init();

    for _ in 0..25 {
        sim.step();
    }

    // Tolerate half a cell of level-set slop, nothing deeper.
    let max_dim = sim.mgrid.max_dim() as f32;
    for p in sim.particles.list.iter().filter(|p| p.is_fluid()) {
        let phi = sim.scene.solid_level_set().sample(p.position * max_dim);
        assert!(
            phi > -0.5,
            "particle {} cells deep inside the sphere at {:?}",
            -phi,
            p.position
        );
    }
}

/// Same seed, same configuration: identical trajectories. The splat is a
/// gather with a fixed accumulation order, so this holds to bit precision;
/// the assertion allows FP-reordering slack anyway.
#[test]
fn test_determinism_same_seed() {
    let build = || {
        let scene = SceneBuilder::new()
            .liquid(Shape::Box {
                min: Vec3::ZERO,
                max: Vec3::new(1.0, 0.5, 1.0),
            })
            .gravity()
            .build(12, 12, 12)
            .unwrap();
        let mut sim = FlipSim::new(config(12, 12, 12), scene).unwrap();
        sim.init();
        sim
    };

    let mut a = build();
    let mut b = build();
    for _ in 0..5 {
        a.step();
        b.step();
    }

    assert_eq!(a.particles.len(), b.particles.len());
    let worst = a
        .particles
        .list
        .iter()
        .zip(&b.particles.list)
        .map(|(pa, pb)| (pa.position - pb.position).abs().max_element())
        .fold(0.0f32, f32::max);
    assert!(worst <= 1.0e-6, "runs diverged by {}", worst);
}

/// Inflow emitters add particles only over their active frames.
#[test]
fn test_inflow_emits_over_range() {
    let scene = SceneBuilder::new()
        .inflow(
            Shape::Sphere {
                center: Vec3::new(0.5, 0.8, 0.5),
                radius: 0.1,
            },
            Vec3::new(0.0, -0.5, 0.0),
            1,
            3,
        )
        .gravity()
        .build(10, 10, 10)
        .unwrap();
    let mut sim = FlipSim::new(config(10, 10, 10), scene).unwrap();
    sim.init();
    assert_eq!(sim.particles.fluid_count(), 0);

    sim.step();
    let after_one = sim.particles.fluid_count();
    assert!(after_one > 0, "inflow emitted nothing");

    for _ in 0..5 {
        sim.step();
    }
    // The emitter is closed after frame 3; dropping fluid just advects.
    assert!(sim.particles.fluid_count() > 0);
    assert_particles_sane(&sim);
}
