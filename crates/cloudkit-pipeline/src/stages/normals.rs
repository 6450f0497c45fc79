use cloudkit_geometry::GeometryBuffer;
use glam::{DVec3, Vec3};

use super::neighbors::PointIndex;
use super::{expect_usize, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "NormalEstimator";

/// Estimate a normal per point from the principal axes of its neighbourhood.
///
/// The normal is the direction of least variance among the `sample_size`
/// nearest points (the point itself included), flipped to face away from
/// the centroid of the whole cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalParams {
    pub sample_size: usize,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self { sample_size: 10 }
    }
}

type Mat = [[f64; 3]; 3];

fn covariance(points: impl Iterator<Item = Vec3> + Clone) -> Mat {
    let n = points.clone().count() as f64;
    let mean = points.clone().map(|p| p.as_dvec3()).sum::<DVec3>() / n;
    let mut cov = [[0.0; 3]; 3];
    for p in points {
        let d = (p.as_dvec3() - mean).to_array();
        for r in 0..3 {
            for c in 0..3 {
                cov[r][c] += d[r] * d[c] / n;
            }
        }
    }
    cov
}

/// Eigenvector of the smallest eigenvalue of a symmetric matrix, by cyclic
/// Jacobi rotations.
fn smallest_eigenvector(mut a: Mat) -> DVec3 {
    let mut v: Mat = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..32 {
        let off = a[0][1].powi(2) + a[0][2].powi(2) + a[1][2].powi(2);
        if off < 1e-30 {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            if a[p][q] == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for k in 0..3 {
                let (akp, akq) = (a[k][p], a[k][q]);
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let (apk, aqk) = (a[p][k], a[q][k]);
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for k in 0..3 {
                let (vkp, vkq) = (v[k][p], v[k][q]);
                v[k][p] = c * vkp - s * vkq;
                v[k][q] = s * vkp + c * vkq;
            }
        }
    }

    let m = (0..3)
        .min_by(|&i, &j| a[i][i].total_cmp(&a[j][j]))
        .unwrap_or(0);
    DVec3::new(v[0][m], v[1][m], v[2][m]).normalize_or_zero()
}

impl NormalParams {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_size < 3 {
            return Err(PipelineError::invalid(
                NAME,
                format!("sample_size must be at least 3, got {}", self.sample_size),
            ));
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "sample_size" => self.sample_size = expect_usize(NAME, key, value)?,
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
        let centroid = positions.iter().map(|p| p.as_dvec3()).sum::<DVec3>() / count as f64;
        let index = PointIndex::new(&positions);

        let points = input
            .points()
            .iter()
            .map(|p| {
                let neighbors = index.nearest(p.position, self.sample_size, None);
                let cov = covariance(neighbors.iter().map(|n| positions[n.index]));
                let mut normal = smallest_eigenvector(cov);
                if normal.dot(p.position.as_dvec3() - centroid) < 0.0 {
                    normal = -normal;
                }
                p.with_normal(normal.as_vec3())
            })
            .collect();

        Ok(GeometryBuffer::new(points, input.cells().to_vec())?)
    }
}
