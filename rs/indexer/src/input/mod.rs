pub mod vecs;

use crate::error::Result;

/// Streaming source of point vectors. Byte-encoded points are widened to f32
/// by the reader, so downstream code only sees float coordinates.
pub trait PointInput {
    // Return true if there are more points to read
    fn has_next(&self) -> bool;

    // Return the next point's coordinates
    fn next(&mut self) -> Result<Vec<f32>>;

    // Number of points this input will yield (after any cap)
    fn num_points(&self) -> usize;
}
