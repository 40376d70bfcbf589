//! Classic dam break: a water column collapses across the floor of a 32^3
//! tank and splashes off the far wall.
//!
//! Run with `cargo run --release --example dam_break`.

use flip3d::{FlipConfig, FlipSim, SceneBuilder, Shape, Vec3};

fn main() {
    let n = 32;
    let scene = SceneBuilder::new()
        .liquid(Shape::Box {
            min: Vec3::ZERO,
            max: Vec3::new(0.4, 0.8, 1.0),
        })
        .gravity()
        .build(n, n, n)
        .expect("valid scene");

    let config = FlipConfig {
        width: n,
        height: n,
        depth: n,
        verbose: true,
        ..FlipConfig::default()
    };
    let mut sim = FlipSim::new(config, scene).expect("valid config");
    sim.init();
    println!("seeded {} particles", sim.particles.fluid_count());

    for frame in 1..=60 {
        sim.step();
        let front = sim
            .particles
            .list
            .iter()
            .filter(|p| p.is_fluid())
            .map(|p| p.position.x)
            .fold(0.0f32, f32::max);
        let solve = sim.last_solve();
        println!(
            "frame {:3}: {:6} particles, front x = {:.3}, pressure iters = {:?}",
            frame,
            sim.particles.fluid_count(),
            front,
            solve.map(|s| s.iterations)
        );
    }
}
