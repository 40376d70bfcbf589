//! Pressure projection.
//!
//! Solves the 7-point Poisson system on fluid cells with Neumann boundaries
//! at solids and Dirichlet zero at air, optionally sharpened by the
//! ghost-fluid subcell rule using the liquid level set. The solver is MIC(0)
//! preconditioned conjugate gradient, warm-started from the previous
//! pressure field.
//!
//! All stencil helpers are free functions over grid views so the solver has
//! no state of its own.

use rayon::prelude::*;

use crate::grid::{CellType, Grid3, MacGrid};

/// Residual infinity-norm target for the solve.
pub const PRESSURE_TOLERANCE: f32 = 1.0e-4;

/// Safeguard threshold of the modified incomplete Cholesky factorization.
const MIC_SIGMA: f32 = 0.25;

/// Outcome of a pressure solve.
#[derive(Clone, Copy, Debug)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f32,
    pub converged: bool,
}

/// Iteration cap: generous for small grids, scales with the cell count.
pub fn max_iterations(width: usize, height: usize, depth: usize) -> usize {
    let cells = (width * height * depth) as f32;
    100.max((cells.cbrt() * 10.0) as usize)
}

/// Divergence per fluid cell, `(du + dv + dw) / h`; zero elsewhere.
pub fn compute_divergence(mgrid: &mut MacGrid) {
    let h = mgrid.cell_width();
    let MacGrid {
        u,
        v,
        w,
        divergence,
        cell_type,
        ..
    } = mgrid;
    let (cw, ch) = (divergence.width, divergence.height);

    divergence
        .data
        .par_iter_mut()
        .enumerate()
        .for_each(|(n, out)| {
            if cell_type.data[n] != CellType::Fluid {
                *out = 0.0;
                return;
            }
            let i = n % cw;
            let j = (n / cw) % ch;
            let k = n / (cw * ch);
            let du = u.data[u.index(i + 1, j, k)] - u.data[u.index(i, j, k)];
            let dv = v.data[v.index(i, j + 1, k)] - v.data[v.index(i, j, k)];
            let dw = w.data[w.index(i, j, k + 1)] - w.data[w.index(i, j, k)];
            *out = (du + dv + dw) / h;
        });
}

/// Zero the normal velocity on domain-boundary faces and on faces between a
/// fluid and a solid cell.
pub fn enforce_boundary_velocity(mgrid: &mut MacGrid) {
    let MacGrid {
        u, v, w, cell_type, ..
    } = mgrid;
    let blocked = |a: CellType, b: CellType| {
        (a == CellType::Solid && b == CellType::Fluid)
            || (a == CellType::Fluid && b == CellType::Solid)
    };

    let (uw, uh) = (u.width, u.height);
    u.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % uw;
        let j = (n / uw) % uh;
        let k = n / (uw * uh);
        if i == 0 || i == uw - 1 {
            *val = 0.0;
        } else if blocked(
            cell_type.get(i as i32 - 1, j as i32, k as i32),
            cell_type.get(i as i32, j as i32, k as i32),
        ) {
            *val = 0.0;
        }
    });

    let (vw, vh) = (v.width, v.height);
    v.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % vw;
        let j = (n / vw) % vh;
        let k = n / (vw * vh);
        if j == 0 || j == vh - 1 {
            *val = 0.0;
        } else if blocked(
            cell_type.get(i as i32, j as i32 - 1, k as i32),
            cell_type.get(i as i32, j as i32, k as i32),
        ) {
            *val = 0.0;
        }
    });

    let (ww, wh, wd) = (w.width, w.height, w.depth);
    w.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % ww;
        let j = (n / ww) % wh;
        let k = n / (ww * wh);
        if k == 0 || k == wd - 1 {
            *val = 0.0;
        } else if blocked(
            cell_type.get(i as i32, j as i32, k as i32 - 1),
            cell_type.get(i as i32, j as i32, k as i32),
        ) {
            *val = 0.0;
        }
    });
}

/// Off-diagonal coefficient between two cells: -1 when both are fluid.
#[inline]
fn a_ref(cell_type: &Grid3<CellType>, i: i32, j: i32, k: i32, qi: i32, qj: i32, qk: i32) -> f32 {
    if !cell_type.in_bounds(i, j, k) || cell_type.get(i, j, k) != CellType::Fluid {
        return 0.0;
    }
    if !cell_type.in_bounds(qi, qj, qk) || cell_type.get(qi, qj, qk) != CellType::Fluid {
        return 0.0;
    }
    -1.0
}

/// Matrix diagonal at a fluid cell: 6 minus closed neighbors, with the
/// ghost-fluid weight `L[q] / min(1e-6, L[c])` for air neighbors when
/// subcell handling is on. The `min` keeps the near-zero denominator away
/// from zero without changing its sign.
fn a_diag(
    cell_type: &Grid3<CellType>,
    phi: &Grid3<f32>,
    i: i32,
    j: i32,
    k: i32,
    subcell: bool,
) -> f32 {
    let mut diag = 6.0;
    if cell_type.get(i, j, k) != CellType::Fluid {
        return diag;
    }
    let neighbors = [
        (i - 1, j, k),
        (i + 1, j, k),
        (i, j - 1, k),
        (i, j + 1, k),
        (i, j, k - 1),
        (i, j, k + 1),
    ];
    for (qi, qj, qk) in neighbors {
        if !cell_type.in_bounds(qi, qj, qk) || cell_type.get(qi, qj, qk) == CellType::Solid {
            diag -= 1.0;
        } else if cell_type.get(qi, qj, qk) == CellType::Air && subcell {
            diag -= phi.get(qi, qj, qk) / phi.get(i, j, k).min(1.0e-6);
        }
    }
    diag
}

/// Preconditioner entry, zero outside fluid cells.
#[inline]
fn precon_ref(pc: &Grid3<f32>, cell_type: &Grid3<CellType>, i: i32, j: i32, k: i32) -> f32 {
    if !cell_type.in_bounds(i, j, k) || cell_type.get(i, j, k) != CellType::Fluid {
        return 0.0;
    }
    pc.get(i, j, k)
}

/// Build the MIC(0) preconditioner, lexicographic over fluid cells.
pub fn build_preconditioner(pc: &mut Grid3<f32>, mgrid: &MacGrid, subcell: bool) {
    pc.fill(0.0);
    let cell_type = &mgrid.cell_type;
    let phi = &mgrid.liquid_phi;
    let (w, h) = (pc.width, pc.height);
    for n in 0..pc.data.len() {
        if cell_type.data[n] != CellType::Fluid {
            continue;
        }
        let i = (n % w) as i32;
        let j = ((n / w) % h) as i32;
        let k = (n / (w * h)) as i32;
        let left = a_ref(cell_type, i - 1, j, k, i, j, k) * precon_ref(pc, cell_type, i - 1, j, k);
        let bottom = a_ref(cell_type, i, j - 1, k, i, j, k) * precon_ref(pc, cell_type, i, j - 1, k);
        let back = a_ref(cell_type, i, j, k - 1, i, j, k) * precon_ref(pc, cell_type, i, j, k - 1);
        let diag = a_diag(cell_type, phi, i, j, k, subcell);
        if diag > 0.0 {
            let mut e = diag - left * left - bottom * bottom - back * back;
            if e < MIC_SIGMA * diag {
                e = diag;
            }
            pc.data[n] = 1.0 / e.sqrt();
        }
    }
}

/// Apply the MIC(0) preconditioner: `z = M^-1 r` via forward then backward
/// substitution with the incomplete factor. Sequential, the sweeps carry a
/// lexicographic dependency.
fn apply_preconditioner(
    z: &mut Grid3<f32>,
    r: &Grid3<f32>,
    pc: &Grid3<f32>,
    q: &mut Grid3<f32>,
    cell_type: &Grid3<CellType>,
) {
    let (w, h) = (z.width, z.height);
    q.fill(0.0);
    for n in 0..z.data.len() {
        if cell_type.data[n] != CellType::Fluid {
            continue;
        }
        let i = (n % w) as i32;
        let j = ((n / w) % h) as i32;
        let k = (n / (w * h)) as i32;
        let t = r.data[n]
            - a_ref(cell_type, i - 1, j, k, i, j, k)
                * precon_ref(pc, cell_type, i - 1, j, k)
                * precon_ref(q, cell_type, i - 1, j, k)
            - a_ref(cell_type, i, j - 1, k, i, j, k)
                * precon_ref(pc, cell_type, i, j - 1, k)
                * precon_ref(q, cell_type, i, j - 1, k)
            - a_ref(cell_type, i, j, k - 1, i, j, k)
                * precon_ref(pc, cell_type, i, j, k - 1)
                * precon_ref(q, cell_type, i, j, k - 1);
        q.data[n] = t * pc.data[n];
    }
    z.fill(0.0);
    for n in (0..z.data.len()).rev() {
        if cell_type.data[n] != CellType::Fluid {
            continue;
        }
        let i = (n % w) as i32;
        let j = ((n / w) % h) as i32;
        let k = (n / (w * h)) as i32;
        let t = q.data[n]
            - a_ref(cell_type, i + 1, j, k, i, j, k)
                * pc.data[n]
                * precon_ref(z, cell_type, i + 1, j, k)
            - a_ref(cell_type, i, j + 1, k, i, j, k)
                * pc.data[n]
                * precon_ref(z, cell_type, i, j + 1, k)
            - a_ref(cell_type, i, j, k + 1, i, j, k)
                * pc.data[n]
                * precon_ref(z, cell_type, i, j, k + 1);
        z.data[n] = t * pc.data[n];
    }
}

/// Read a neighbor value for the matrix application.
///
/// Fluid reads the neighbor, solid reflects the center (Neumann), air reads
/// zero (Dirichlet) unless subcell handling scales the center value by the
/// level-set ratio. Indices clamp to the domain like every other grid read.
fn x_ref(
    cell_type: &Grid3<CellType>,
    phi: &Grid3<f32>,
    x: &Grid3<f32>,
    center: (i32, i32, i32),
    neighbor: (i32, i32, i32),
    subcell: bool,
) -> f32 {
    let (fi, fj, fk) = center;
    let (i, j, k) = neighbor;
    match cell_type.get(i, j, k) {
        CellType::Fluid => x.get(i, j, k),
        CellType::Solid => x.get(fi, fj, fk),
        CellType::Air => {
            if subcell {
                phi.get(i, j, k) / phi.get(fi, fj, fk).min(1.0e-6) * x.get(fi, fj, fk)
            } else {
                0.0
            }
        }
    }
}

/// `target = A x` on fluid cells (zero elsewhere), scaled by `1/h^2`.
pub fn compute_ax(
    cell_type: &Grid3<CellType>,
    phi: &Grid3<f32>,
    x: &Grid3<f32>,
    target: &mut Grid3<f32>,
    subcell: bool,
) {
    let (w, h) = (target.width, target.height);
    let max_dim = w.max(h).max(target.depth) as f32;
    let inv_h2 = max_dim * max_dim;
    target.data.par_iter_mut().enumerate().for_each(|(n, out)| {
        if cell_type.data[n] != CellType::Fluid {
            *out = 0.0;
            return;
        }
        let i = (n % w) as i32;
        let j = ((n / w) % h) as i32;
        let k = (n / (w * h)) as i32;
        let c = (i, j, k);
        *out = (6.0 * x.data[n]
            - x_ref(cell_type, phi, x, c, (i + 1, j, k), subcell)
            - x_ref(cell_type, phi, x, c, (i - 1, j, k), subcell)
            - x_ref(cell_type, phi, x, c, (i, j + 1, k), subcell)
            - x_ref(cell_type, phi, x, c, (i, j - 1, k), subcell)
            - x_ref(cell_type, phi, x, c, (i, j, k + 1), subcell)
            - x_ref(cell_type, phi, x, c, (i, j, k - 1), subcell))
            * inv_h2;
    });
}

fn dot(cell_type: &Grid3<CellType>, a: &Grid3<f32>, b: &Grid3<f32>) -> f64 {
    let mut sum = 0.0f64;
    for n in 0..a.data.len() {
        if cell_type.data[n] == CellType::Fluid {
            sum += a.data[n] as f64 * b.data[n] as f64;
        }
    }
    sum
}

fn residual_norm(cell_type: &Grid3<CellType>, r: &Grid3<f32>) -> f32 {
    let mut norm = 0.0f32;
    for n in 0..r.data.len() {
        if cell_type.data[n] == CellType::Fluid {
            norm = norm.max(r.data[n].abs());
        }
    }
    norm
}

/// Solve the pressure system into `mgrid.pressure`.
///
/// Negates the divergence in place to form the right-hand side, builds the
/// MIC(0) preconditioner, then runs PCG. On non-convergence the best-so-far
/// pressure stays in place and a warning is logged.
pub fn solve(mgrid: &mut MacGrid, subcell: bool) -> SolveStats {
    // RHS is the negated divergence.
    mgrid.divergence.data.par_iter_mut().for_each(|d| *d = -*d);

    let mut pc = Grid3::new(mgrid.width, mgrid.height, mgrid.depth, 0.0f32);
    build_preconditioner(&mut pc, mgrid, subcell);

    let cell_type = &mgrid.cell_type;
    let phi = &mgrid.liquid_phi;
    let rhs = &mgrid.divergence;
    let pressure = &mut mgrid.pressure;

    // Warm start from the previous pressure, restricted to fluid cells.
    for n in 0..pressure.data.len() {
        if cell_type.data[n] != CellType::Fluid {
            pressure.data[n] = 0.0;
        }
    }

    let fluid_cells = cell_type
        .data
        .iter()
        .filter(|c| **c == CellType::Fluid)
        .count();
    if fluid_cells == 0 {
        return SolveStats {
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let dims = (pressure.width, pressure.height, pressure.depth);
    let mut r = Grid3::new(dims.0, dims.1, dims.2, 0.0f32);
    let mut z = Grid3::new(dims.0, dims.1, dims.2, 0.0f32);
    let mut q = Grid3::new(dims.0, dims.1, dims.2, 0.0f32);
    let mut s = Grid3::new(dims.0, dims.1, dims.2, 0.0f32);
    let mut ax = Grid3::new(dims.0, dims.1, dims.2, 0.0f32);

    // r = b - A x
    compute_ax(cell_type, phi, pressure, &mut ax, subcell);
    for n in 0..r.data.len() {
        if cell_type.data[n] == CellType::Fluid {
            r.data[n] = rhs.data[n] - ax.data[n];
        }
    }

    let mut residual = residual_norm(cell_type, &r);
    if residual <= PRESSURE_TOLERANCE {
        return SolveStats {
            iterations: 0,
            residual,
            converged: true,
        };
    }

    apply_preconditioner(&mut z, &r, &pc, &mut q, cell_type);
    s.data.copy_from_slice(&z.data);
    let mut sigma = dot(cell_type, &z, &r);

    let limit = max_iterations(dims.0, dims.1, dims.2);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < limit {
        iterations += 1;
        compute_ax(cell_type, phi, &s, &mut ax, subcell);
        let s_dot_as = dot(cell_type, &s, &ax);
        if s_dot_as.abs() < f64::MIN_POSITIVE {
            break;
        }
        let alpha = (sigma / s_dot_as) as f32;
        for n in 0..r.data.len() {
            if cell_type.data[n] == CellType::Fluid {
                pressure.data[n] += alpha * s.data[n];
                r.data[n] -= alpha * ax.data[n];
            }
        }
        residual = residual_norm(cell_type, &r);
        if residual <= PRESSURE_TOLERANCE {
            converged = true;
            break;
        }
        apply_preconditioner(&mut z, &r, &pc, &mut q, cell_type);
        let sigma_new = dot(cell_type, &z, &r);
        let beta = (sigma_new / sigma) as f32;
        for n in 0..s.data.len() {
            if cell_type.data[n] == CellType::Fluid {
                s.data[n] = z.data[n] + beta * s.data[n];
            }
        }
        sigma = sigma_new;
    }

    if !converged {
        log::warn!(
            "pressure solve stopped at residual {:.3e} after {} iterations (tolerance {:.1e})",
            residual,
            iterations,
            PRESSURE_TOLERANCE
        );
    }
    SolveStats {
        iterations,
        residual,
        converged,
    }
}

/// Subtract the pressure gradient from each interior face.
///
/// Across a sign change of the liquid level set the pressure on the air side
/// is replaced by the ghost value scaled from the fluid side. The clamp is
/// asymmetric, `1e-3` for the front sample and `1e-6` for the back; the
/// front side tolerates a larger ghost weight before saturating.
pub fn subtract_pressure_gradient(mgrid: &mut MacGrid, subcell: bool) {
    let h = mgrid.cell_width();
    let MacGrid {
        u,
        v,
        w,
        pressure,
        liquid_phi,
        ..
    } = mgrid;

    // Ghost-corrected (front, back) pressure pair across a face.
    let face_pressures = |c: (i32, i32, i32), b: (i32, i32, i32)| -> (f32, f32) {
        let p_c = pressure.get(c.0, c.1, c.2);
        let p_b = pressure.get(b.0, b.1, b.2);
        let l_c = liquid_phi.get(c.0, c.1, c.2);
        let l_b = liquid_phi.get(b.0, b.1, b.2);
        if !(subcell && l_c * l_b < 0.0) {
            return (p_c, p_b);
        }
        let pf = if l_c < 0.0 {
            p_c
        } else {
            l_c / l_b.min(1.0e-3) * p_b
        };
        let pb = if l_b < 0.0 {
            p_b
        } else {
            l_b / l_c.min(1.0e-6) * p_c
        };
        (pf, pb)
    };

    let (uw, uh) = (u.width, u.height);
    u.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % uw;
        let j = (n / uw) % uh;
        let k = n / (uw * uh);
        if i > 0 && i < uw - 1 {
            let (pf, pb) =
                face_pressures((i as i32, j as i32, k as i32), (i as i32 - 1, j as i32, k as i32));
            *val -= (pf - pb) / h;
        }
    });

    let (vw, vh) = (v.width, v.height);
    v.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % vw;
        let j = (n / vw) % vh;
        let k = n / (vw * vh);
        if j > 0 && j < vh - 1 {
            let (pf, pb) =
                face_pressures((i as i32, j as i32, k as i32), (i as i32, j as i32 - 1, k as i32));
            *val -= (pf - pb) / h;
        }
    });

    let (ww, wh, wd) = (w.width, w.height, w.depth);
    w.data.par_iter_mut().enumerate().for_each(|(n, val)| {
        let i = n % ww;
        let j = (n / ww) % wh;
        let k = n / (ww * wh);
        if k > 0 && k < wd - 1 {
            let (pf, pb) =
                face_pressures((i as i32, j as i32, k as i32), (i as i32, j as i32, k as i32 - 1));
            *val -= (pf - pb) / h;
        }
    });
}
