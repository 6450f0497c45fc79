use cloudkit_geometry::GeometryBuffer;

use super::{expect_usize, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "Mask";

/// Keep every `ratio`-th point, starting with the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskParams {
    pub ratio: usize,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self { ratio: 2 }
    }
}

impl MaskParams {
    pub fn new(ratio: usize) -> Self {
        Self { ratio }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.ratio == 0 {
            return Err(PipelineError::invalid(NAME, "ratio must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "ratio" => self.ratio = expect_usize(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;
        let points = input.points().iter().step_by(self.ratio).copied().collect();
        Ok(GeometryBuffer::from_points(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit_geometry::Point;

    #[test]
    fn keeps_every_nth_from_zero() {
        let input = GeometryBuffer::from_points(
            (0..10).map(|i| Point::from_xyz(i as f32, 0.0, 0.0)).collect(),
        );
        let out = MaskParams::new(3).run(&input).unwrap();
        let xs: Vec<f32> = out.positions().map(|p| p.x).collect();
        assert_eq!(xs, [0.0, 3.0, 6.0, 9.0]);

        assert_eq!(MaskParams::new(1).run(&input).unwrap(), input);
        assert!(MaskParams::new(0).validate().is_err());
    }
}
