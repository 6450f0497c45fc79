use std::collections::HashSet;

use cloudkit_geometry::GeometryBuffer;
use glam::Vec3;

use super::{expect_f32, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "Quantizer";

/// Snap points to a uniform grid, keeping one point per grid node.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizerParams {
    pub step: f32,
}

impl Default for QuantizerParams {
    fn default() -> Self {
        Self { step: 1.0 }
    }
}

/// Grid node of `position`. Halfway cases round to even so a node's own
/// position always maps back to it.
fn grid_node(position: Vec3, step: f32) -> [i64; 3] {
    (position / step)
        .to_array()
        .map(|v| v.round_ties_even() as i64)
}

impl QuantizerParams {
    pub fn new(step: f32) -> Self {
        Self { step }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.step.is_finite() && self.step > 0.0 {
            Ok(())
        } else {
            Err(PipelineError::invalid(
                NAME,
                format!("step must be positive, got {}", self.step),
            ))
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "step" => self.step = expect_f32(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;
        let step = self.step;
        let mut seen = HashSet::with_capacity(input.point_count());
        let points = input
            .points()
            .iter()
            .filter_map(|p| {
                let node = grid_node(p.position, step);
                // First point in input order wins the node.
                seen.insert(node).then(|| {
                    let snapped = glam::vec3(node[0] as f32, node[1] as f32, node[2] as f32) * step;
                    p.moved_to(snapped)
                })
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Quantized {} points to {} with step {step}",
            input.point_count(),
            points.len()
        );
        Ok(GeometryBuffer::from_points(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit_geometry::Point;

    fn unit_square() -> GeometryBuffer {
        GeometryBuffer::from_points(vec![
            Point::from_xyz(0.0, 0.0, 0.0),
            Point::from_xyz(1.0, 0.0, 0.0),
            Point::from_xyz(1.0, 1.0, 0.0),
            Point::from_xyz(0.0, 1.0, 0.0),
        ])
    }

    #[test]
    fn unit_square_collapses_to_origin() {
        let out = QuantizerParams::new(2.0).run(&unit_square()).unwrap();
        assert_eq!(out.point_count(), 1);
        assert_eq!(out.point(0).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn keeps_first_point_per_node() {
        let input = GeometryBuffer::from_points(vec![
            Point::from_xyz(0.1, 0.0, 0.0).with_scalar(1.0),
            Point::from_xyz(5.0, 5.0, 5.0),
            Point::from_xyz(-0.1, 0.0, 0.0).with_scalar(2.0),
        ]);
        let out = QuantizerParams::new(1.0).run(&input).unwrap();
        assert_eq!(out.point_count(), 2);
        assert_eq!(out.point(0).unwrap().scalar, Some(1.0));
        assert_eq!(out.point(1).unwrap().position, glam::vec3(5.0, 5.0, 5.0));
    }

    #[test]
    fn idempotent() {
        let input = GeometryBuffer::from_points(
            (0..50)
                .map(|i| {
                    let f = i as f32 * 0.37;
                    Point::from_xyz(f.sin() * 3.0, f.cos() * 2.0, f * 0.1)
                })
                .collect(),
        );
        let params = QuantizerParams::new(0.3);
        let once = params.run(&input).unwrap();
        let twice = params.run(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cells_are_dropped() {
        let mesh = GeometryBuffer::new(unit_square().points().to_vec(), vec![vec![0, 1, 2]]).unwrap();
        assert!(!QuantizerParams::new(0.5).run(&mesh).unwrap().has_cells());
    }

    #[test]
    fn step_must_be_positive() {
        for step in [0.0, -1.0, f32::NAN] {
            assert!(matches!(
                QuantizerParams::new(step).validate(),
                Err(PipelineError::InvalidParameter { .. })
            ));
        }
    }
}
