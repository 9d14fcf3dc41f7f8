use crate::DistanceCalculator;

pub struct L2DistanceCalculator {}

impl L2DistanceCalculator {
    pub fn new() -> Self {
        Self {}
    }

    /// Squared L2 distance. Nearest-centroid search only needs the ordering,
    /// so the square root is skipped.
    pub fn calculate_squared(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| (x - y).powi(2))
            .sum::<f32>()
    }
}

impl Default for L2DistanceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceCalculator for L2DistanceCalculator {
    fn calculate(&self, a: &[f32], b: &[f32]) -> f32 {
        self.calculate_squared(a, b).sqrt()
    }
}
