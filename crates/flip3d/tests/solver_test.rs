//! Pressure solver correctness on hand-built grids.

use flip3d::grid::{CellType, Grid3, MacGrid};
use flip3d::pressure;

/// Fluid block with a free surface above it and Neumann walls: unit RHS must
/// solve to the tolerance well inside the iteration cap.
#[test]
fn test_pcg_unit_rhs_converges() {
    let mut mgrid = MacGrid::new(8, 9, 8);
    mgrid.liquid_phi.fill(-0.5);
    for k in 0..8 {
        for j in 0..8 {
            for i in 0..8 {
                mgrid.cell_type.set(i, j, k, CellType::Fluid);
            }
        }
    }
    // solve() negates the divergence into the RHS.
    mgrid.divergence.fill(-1.0);

    let stats = pressure::solve(&mut mgrid, false);
    assert!(stats.converged, "stalled at residual {}", stats.residual);
    assert!(stats.iterations <= 200, "took {} iterations", stats.iterations);

    let mut ax = Grid3::new(8, 9, 8, 0.0f32);
    pressure::compute_ax(
        &mgrid.cell_type,
        &mgrid.liquid_phi,
        &mgrid.pressure,
        &mut ax,
        false,
    );
    let mut worst = 0.0f32;
    for n in 0..ax.data.len() {
        if mgrid.cell_type.data[n] == CellType::Fluid {
            worst = worst.max((ax.data[n] - 1.0).abs());
        }
    }
    assert!(worst < 1.0e-3, "Ap - b infinity norm {}", worst);
}

/// The MIC(0) diagonal must stay strictly positive on every fluid cell, with
/// solids, air, and the subcell terms all in play.
#[test]
fn test_preconditioner_diagonals_positive() {
    let mut mgrid = MacGrid::new(10, 10, 10);
    // Liquid pool with a solid pillar and air above.
    for k in 0..10 {
        for j in 0..6 {
            for i in 0..10 {
                mgrid.cell_type.set(i, j, k, CellType::Fluid);
            }
        }
    }
    for j in 0..8 {
        mgrid.cell_type.set(5, j, 5, CellType::Solid);
    }
    // Signed distance rises through the surface.
    for k in 0..10 {
        for j in 0..10 {
            for i in 0..10 {
                let n = mgrid.liquid_phi.index(i, j, k);
                mgrid.liquid_phi.data[n] = (j as f32 - 5.5) * 0.1;
            }
        }
    }

    let mut pc = Grid3::new(10, 10, 10, 0.0f32);
    pressure::build_preconditioner(&mut pc, &mgrid, true);
    for n in 0..pc.data.len() {
        if mgrid.cell_type.data[n] == CellType::Fluid {
            assert!(
                pc.data[n] > 0.0,
                "preconditioner non-positive at flat index {}",
                n
            );
        }
    }
}

/// With no fluid cells the projection is a no-op and the step machinery must
/// treat it as converged.
#[test]
fn test_empty_fluid_projection_noop() {
    let mut mgrid = MacGrid::new(6, 6, 6);
    mgrid.divergence.fill(3.0);
    let stats = pressure::solve(&mut mgrid, true);
    assert!(stats.converged);
    assert_eq!(stats.iterations, 0);
}
