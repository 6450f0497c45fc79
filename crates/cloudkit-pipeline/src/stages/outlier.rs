use cloudkit_geometry::GeometryBuffer;
use glam::Vec3;

use super::neighbors::PointIndex;
use super::{expect_f32, expect_usize, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "OutlierFilter";

/// Statistical outlier removal.
///
/// For every point the mean distance to its `sample_size` nearest neighbours
/// is computed. Points whose mean distance is above
/// `mean + threshold * stddev` of all those means are removed. The standard
/// deviation is the population one, and points exactly on the bound stay.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierParams {
    pub sample_size: usize,
    pub threshold: f32,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            sample_size: 8,
            threshold: 1.0,
        }
    }
}

impl OutlierParams {
    pub fn new(sample_size: usize, threshold: f32) -> Self {
        Self {
            sample_size,
            threshold,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_size == 0 {
            return Err(PipelineError::invalid(NAME, "sample_size must be at least 1"));
        }
        if !self.threshold.is_finite() {
            return Err(PipelineError::invalid(NAME, "threshold must be finite"));
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "sample_size" => self.sample_size = expect_usize(NAME, key, value)?,
            "threshold" => self.threshold = expect_f32(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;
        let count = input.point_count();
        if self.sample_size >= count {
            return Err(PipelineError::invalid(
                NAME,
                format!(
                    "sample_size {} needs more than {count} points",
                    self.sample_size
                ),
            ));
        }

        let positions: Vec<Vec3> = input.positions().collect();
        let index = PointIndex::new(&positions);
        let mean_distances: Vec<f64> = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let neighbors = index.nearest(p, self.sample_size, Some(i));
                let sum: f64 = neighbors.iter().map(|n| f64::from(n.distance)).sum();
                sum / neighbors.len() as f64
            })
            .collect();

        let n = mean_distances.len() as f64;
        let mean = mean_distances.iter().sum::<f64>() / n;
        let variance = mean_distances
            .iter()
            .map(|d| (d - mean).powi(2))
            .sum::<f64>()
            / n;
        let bound = mean + f64::from(self.threshold) * variance.sqrt();

        let points: Vec<_> = input
            .points()
            .iter()
            .zip(&mean_distances)
            .filter(|&(_, &d)| d <= bound)
            .map(|(p, _)| *p)
            .collect();

        log::debug!(
            "Outlier filter kept {} of {count} points (bound {bound:.4})",
            points.len()
        );
        Ok(GeometryBuffer::from_points(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit_geometry::Point;

    fn grid_with_outlier() -> GeometryBuffer {
        let mut points: Vec<Point> = (0..25)
            .map(|i| Point::from_xyz((i % 5) as f32, (i / 5) as f32, 0.0))
            .collect();
        points.push(Point::from_xyz(40.0, 40.0, 40.0));
        GeometryBuffer::from_points(points)
    }

    #[test]
    fn removes_far_point() {
        let out = OutlierParams::new(4, 1.0).run(&grid_with_outlier()).unwrap();
        assert_eq!(out.point_count(), 25);
        assert!(out.positions().all(|p| p.z == 0.0));
    }

    #[test]
    fn sample_size_one_below_count_keeps_points() {
        let input = grid_with_outlier();
        let n = input.point_count();
        let out = OutlierParams::new(n - 1, 100.0).run(&input).unwrap();
        assert_eq!(out.point_count(), n);
    }

    #[test]
    fn evenly_spaced_points_sit_on_the_bound() {
        // Every point has the same mean distance, stddev is zero, and every
        // point is exactly on the bound.
        let input = GeometryBuffer::from_points(vec![
            Point::from_xyz(0.0, 0.0, 0.0),
            Point::from_xyz(1.0, 0.0, 0.0),
            Point::from_xyz(0.0, 1.0, 0.0),
            Point::from_xyz(1.0, 1.0, 0.0),
        ]);
        let out = OutlierParams::new(2, 0.0).run(&input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn sample_size_must_be_below_count() {
        let input = grid_with_outlier();
        let n = input.point_count();
        assert!(matches!(
            OutlierParams::new(n, 1.0).run(&input),
            Err(PipelineError::InvalidParameter { .. })
        ));
        assert!(matches!(
            OutlierParams::new(0, 1.0).validate(),
            Err(PipelineError::InvalidParameter { .. })
        ));
    }
}
