//! Construction-time error types.
//!
//! Runtime trouble inside the step (degenerate rays, out-of-range indices,
//! a pressure solve that runs out of iterations) is handled locally: skip,
//! clamp, or keep the best answer and warn. Errors here cover configuration
//! and scene assembly, where failing fast is the right call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("grid dimensions must be non-zero, got {width}x{height}x{depth}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        depth: usize,
    },

    #[error("{0} must lie in [0, 1], got {1}")]
    OutOfRange(&'static str, f32),

    #[error("{0} must be positive, got {1}")]
    NonPositive(&'static str, f32),

    #[error("degenerate scene geometry: {0}")]
    DegenerateShape(&'static str),

    #[error("simulation is {sim:?} but the scene was built for {scene:?}")]
    DimensionMismatch {
        sim: (usize, usize, usize),
        scene: (usize, usize, usize),
    },
}
