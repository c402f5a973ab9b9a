//! Per-depth subdivision thresholds
//!
//! Distances are configured coarsest level first. They are folded into a
//! threshold table indexed by quadtree depth:
//!
//! - `threshold[i] = min(distance[i - 1], distance[i])` for `i < n`
//!   (with `distance[-1]` read as `distance[0]`)
//! - `threshold[n] = 0`, so the deepest level never subdivides
//!
//! A leaf at depth `d` subdivides when the camera is closer than
//! `threshold[d]`; an interior node collapses once the camera is further
//! than `threshold[d] + hysteresis`.

/// Threshold table plus collapse hysteresis
#[derive(Clone, Debug, PartialEq)]
pub struct LodThresholds {
    thresholds: Vec<f64>,
    hysteresis: f64,
}

impl LodThresholds {
    /// Build the table from configured LOD distances
    ///
    /// # Examples
    /// ```
    /// use terrastream::quadtree::LodThresholds;
    ///
    /// let lod = LodThresholds::new(&[1000.0, 600.0, 300.0], 2.0);
    /// assert_eq!(lod.max_depth(), 3);
    /// assert_eq!(lod.threshold(0), 1000.0);
    /// assert_eq!(lod.threshold(1), 600.0);
    /// assert_eq!(lod.threshold(3), 0.0);
    /// ```
    pub fn new(lod_distances: &[f32], hysteresis: f32) -> Self {
        let n = lod_distances.len();
        let mut thresholds = Vec::with_capacity(n + 1);
        for i in 0..n {
            let prev = lod_distances[i.saturating_sub(1)] as f64;
            thresholds.push(prev.min(lod_distances[i] as f64));
        }
        thresholds.push(0.0);

        Self {
            thresholds,
            hysteresis: hysteresis.max(0.0) as f64,
        }
    }

    /// Deepest depth a node may reach
    pub fn max_depth(&self) -> u32 {
        (self.thresholds.len() - 1) as u32
    }

    /// Subdivision threshold at `depth` (0 beyond the deepest level)
    pub fn threshold(&self, depth: u32) -> f64 {
        self.thresholds.get(depth as usize).copied().unwrap_or(0.0)
    }

    pub fn hysteresis(&self) -> f64 {
        self.hysteresis
    }

    /// Whether a leaf at `depth` should split at this camera distance
    pub fn should_subdivide(&self, depth: u32, distance: f64) -> bool {
        depth < self.max_depth() && distance < self.threshold(depth)
    }

    /// Whether an interior node at `depth` should fold its children back in
    pub fn should_collapse(&self, depth: u32, distance: f64) -> bool {
        distance > self.threshold(depth) + self.hysteresis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_table_is_folded() {
        let lod = LodThresholds::new(&[500.0, 800.0, 200.0], 0.0);
        assert_eq!(lod.threshold(0), 500.0);
        assert_eq!(lod.threshold(1), 500.0);
        assert_eq!(lod.threshold(2), 200.0);
        assert_eq!(lod.threshold(3), 0.0);
        assert_eq!(lod.threshold(9), 0.0);
    }

    #[test]
    fn test_deepest_level_never_subdivides() {
        let lod = LodThresholds::new(&[1000.0, 600.0, 300.0], 2.0);
        assert!(lod.should_subdivide(2, 0.0));
        assert!(!lod.should_subdivide(3, 0.0));
    }

    #[test]
    fn test_hysteresis_band() {
        let lod = LodThresholds::new(&[1000.0, 600.0, 300.0], 2.0);
        // Inside the band neither transition fires
        assert!(!lod.should_subdivide(1, 601.0));
        assert!(!lod.should_collapse(1, 601.0));
        assert!(lod.should_collapse(1, 602.5));
        assert!(lod.should_subdivide(1, 599.0));
    }

    #[test]
    fn test_negative_hysteresis_is_clamped() {
        let lod = LodThresholds::new(&[100.0], -5.0);
        assert_eq!(lod.hysteresis(), 0.0);
        assert_eq!(lod.max_depth(), 1);
    }
}
