use cloudkit_geometry::{BoundingBox, GeometryBuffer, Point};
use fast_surface_nets::ndshape::{RuntimeShape, Shape};
use fast_surface_nets::{SurfaceNetsBuffer, surface_nets};
use glam::{DVec3, Vec3};

use super::neighbors::PointIndex;
use super::{expect_f32, expect_usize, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "SurfaceReconstructor";

/// Below this many points there is no surface worth extracting.
pub const MIN_RECONSTRUCTION_POINTS: usize = 8;

/// Grids larger than this are refused instead of exhausting memory.
const MAX_GRID_SAMPLES: f64 = 256.0 * 256.0 * 256.0;

/// Mesh an oriented point cloud.
///
/// Samples a signed distance field on a grid of `resolution` sized voxels:
/// each sample takes the distance to its nearest point measured along that
/// point's normal. The zero level set is extracted with surface nets.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructParams {
    pub resolution: f32,
    /// Empty voxels added around the bounds so the surface can close.
    pub padding: usize,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self {
            resolution: 0.05,
            padding: 2,
        }
    }
}

impl ReconstructParams {
    pub fn new(resolution: f32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(PipelineError::invalid(
                NAME,
                format!("resolution must be positive, got {}", self.resolution),
            ));
        }
        if self.padding == 0 {
            return Err(PipelineError::invalid(NAME, "padding must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "resolution" => self.resolution = expect_f32(NAME, key, value)?,
            "padding" => self.padding = expect_usize(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;
        if input.point_count() < MIN_RECONSTRUCTION_POINTS {
            return Err(PipelineError::insufficient(
                NAME,
                format!(
                    "{} points, at least {MIN_RECONSTRUCTION_POINTS} are needed",
                    input.point_count()
                ),
            ));
        }
        if !input.has_normals() {
            return Err(PipelineError::insufficient(
                NAME,
                "every point needs a normal, add a NormalEstimator upstream",
            ));
        }
        if let Some(i) = input.points().iter().position(|p| !p.is_finite()) {
            return Err(PipelineError::insufficient(
                NAME,
                format!("point {i} has a non-finite position, normal or scalar"),
            ));
        }

        let positions: Vec<Vec3> = input.positions().collect();
        let normals: Vec<Vec3> = input
            .points()
            .iter()
            .map(|p| p.normal.unwrap_or_default().normalize_or_zero())
            .collect();
        let bounds = BoundingBox::from_points(positions.iter().copied())
            .ok_or_else(|| PipelineError::insufficient(NAME, "input has no points"))?;

        let res = self.resolution;
        let grid = bounds.expand(res * self.padding as f32);
        let origin = grid.min;
        // Sized in f64 so tiny resolutions can't overflow before the check.
        let samples = (grid.extent().as_dvec3() / f64::from(res)).ceil() + DVec3::ONE;
        let total = samples.x * samples.y * samples.z;
        if total.is_nan() || total > MAX_GRID_SAMPLES {
            return Err(PipelineError::invalid(
                NAME,
                format!(
                    "resolution {res} needs a {}x{}x{} grid, use a coarser resolution",
                    samples.x, samples.y, samples.z
                ),
            ));
        }
        let dims = samples.to_array().map(|d| d as u32);

        let shape = RuntimeShape::<u32, 3>::new(dims);
        let index = PointIndex::new(&positions);
        let sdf: Vec<f32> = (0..shape.size())
            .map(|i| {
                let [x, y, z] = shape.delinearize(i);
                let sample = origin + glam::vec3(x as f32, y as f32, z as f32) * res;
                index.nearest(sample, 1, None)
                    .first()
                    .map_or(f32::MAX, |n| (sample - positions[n.index]).dot(normals[n.index]))
            })
            .collect();

        let mut mesh = SurfaceNetsBuffer::default();
        surface_nets(&sdf, &shape, [0; 3], dims.map(|d| d - 1), &mut mesh);

        let points = mesh
            .positions
            .iter()
            .zip(&mesh.normals)
            .map(|(p, n)| {
                Point::new(origin + Vec3::from_array(*p) * res)
                    .with_normal(Vec3::from_array(*n).normalize_or_zero())
            })
            .collect();
        let cells = mesh.indices.chunks_exact(3).map(<[u32]>::to_vec).collect();

        log::info!(
            "Reconstructed {} triangles from {} points on a {}x{}x{} grid",
            mesh.indices.len() / 3,
            input.point_count(),
            dims[0],
            dims[1],
            dims[2]
        );
        Ok(GeometryBuffer::new(points, cells)?)
    }
}
