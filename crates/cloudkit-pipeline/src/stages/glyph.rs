use cloudkit_geometry::GeometryBuffer;
use glam::Vec3;

use super::{expect_bool, expect_f32, expect_usize, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "GlyphExpander";

/// Replace every point with a small UV sphere so a bare cloud renders as
/// solid geometry.
///
/// This multiplies memory use: the output holds
/// `point_count * glyph_point_count()` points and
/// `point_count * glyph_triangle_count()` triangles. Keep the resolutions
/// low for large clouds.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphParams {
    pub radius: f32,
    /// Subdivisions around the axis.
    pub theta_resolution: usize,
    /// Subdivisions from pole to pole.
    pub phi_resolution: usize,
    /// Multiply the radius by each point's scalar (1.0 when it has none).
    pub scale_by_attribute: bool,
}

impl Default for GlyphParams {
    fn default() -> Self {
        Self {
            radius: 0.01,
            theta_resolution: 8,
            phi_resolution: 8,
            scale_by_attribute: false,
        }
    }
}

impl GlyphParams {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            ..Default::default()
        }
    }

    pub fn glyph_point_count(&self) -> usize {
        2 + self.theta_resolution * self.phi_resolution.saturating_sub(2)
    }

    pub fn glyph_triangle_count(&self) -> usize {
        2 * self.theta_resolution * self.phi_resolution.saturating_sub(2)
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(PipelineError::invalid(
                NAME,
                format!("radius must be positive, got {}", self.radius),
            ));
        }
        if self.theta_resolution < 3 || self.phi_resolution < 3 {
            return Err(PipelineError::invalid(
                NAME,
                "theta_resolution and phi_resolution must be at least 3",
            ));
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "radius" => self.radius = expect_f32(NAME, key, value)?,
            "theta_resolution" => self.theta_resolution = expect_usize(NAME, key, value)?,
            "phi_resolution" => self.phi_resolution = expect_usize(NAME, key, value)?,
            "scale_by_attribute" => self.scale_by_attribute = expect_bool(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    /// Unit sphere directions: north pole, south pole, then the rings from
    /// north to south.
    fn prototype(&self) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let (nt, np) = (self.theta_resolution, self.phi_resolution);
        let rings = np - 2;

        let mut dirs = vec![Vec3::Z, Vec3::NEG_Z];
        for ring in 1..=rings {
            let phi = std::f32::consts::PI * ring as f32 / (np - 1) as f32;
            for t in 0..nt {
                let theta = std::f32::consts::TAU * t as f32 / nt as f32;
                dirs.push(glam::vec3(
                    phi.sin() * theta.cos(),
                    phi.sin() * theta.sin(),
                    phi.cos(),
                ));
            }
        }

        let at = |ring: usize, t: usize| (2 + ring * nt + t % nt) as u32;
        let mut triangles = Vec::with_capacity(self.glyph_triangle_count());
        for t in 0..nt {
            triangles.push([0, at(0, t), at(0, t + 1)]);
        }
        for ring in 0..rings - 1 {
            for t in 0..nt {
                let (a, b) = (at(ring, t), at(ring, t + 1));
                let (c, d) = (at(ring + 1, t), at(ring + 1, t + 1));
                triangles.push([a, c, b]);
                triangles.push([b, c, d]);
            }
        }
        for t in 0..nt {
            triangles.push([1, at(rings - 1, t + 1), at(rings - 1, t)]);
        }
        (dirs, triangles)
    }

    /// Vertex count of the expanded output. Cells index points with `u32`,
    /// so outputs past that range are refused.
    fn output_point_count(&self, input_points: usize) -> Result<usize, PipelineError> {
        input_points
            .checked_mul(self.glyph_point_count())
            .filter(|&n| u32::try_from(n).is_ok())
            .ok_or_else(|| {
                PipelineError::invalid(
                    NAME,
                    format!(
                        "{input_points} points with {} vertices per glyph exceed the 32 bit index range",
                        self.glyph_point_count()
                    ),
                )
            })
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;
        let total = self.output_point_count(input.point_count())?;
        let (dirs, triangles) = self.prototype();

        let mut out = GeometryBuffer::with_capacity(
            total,
            input.point_count().saturating_mul(triangles.len()),
        );
        for p in input.points() {
            // The magnitude scales, a negative scalar doesn't turn the glyph inside out.
            let scale = if self.scale_by_attribute {
                p.scalar.map_or(1.0, f32::abs)
            } else {
                1.0
            };
            let radius = self.radius * scale;
            let base = u32::try_from(out.point_count())
                .map_err(|_e| PipelineError::invalid(NAME, "glyph output exceeds 32 bit indices"))?;
            for &dir in &dirs {
                out.add_point(p.moved_to(p.position + dir * radius).with_normal(dir));
            }
            for tri in &triangles {
                out.add_cell(tri.map(|v| base + v).to_vec())?;
            }
        }

        log::debug!(
            "Expanded {} points into {} glyph vertices",
            input.point_count(),
            out.point_count()
        );
        Ok(out)
    }
}
