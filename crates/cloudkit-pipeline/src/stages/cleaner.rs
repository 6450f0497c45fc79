use std::collections::HashMap;

use cloudkit_geometry::{Cell, GeometryBuffer};
use glam::Vec3;

use super::{expect_f32, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "Cleaner";

/// Merge coincident points and drop the cells that collapse as a result.
///
/// With a zero tolerance only exact duplicates merge. Otherwise points that
/// fall into the same `tolerance` sized cell merge into the first of them.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanerParams {
    pub tolerance: f32,
}

impl Default for CleanerParams {
    fn default() -> Self {
        Self { tolerance: 0.0 }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum MergeKey {
    Exact([u32; 3]),
    Cell([i64; 3]),
}

impl CleanerParams {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.tolerance.is_finite() && self.tolerance >= 0.0 {
            Ok(())
        } else {
            Err(PipelineError::invalid(
                NAME,
                format!("tolerance must be zero or positive, got {}", self.tolerance),
            ))
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "tolerance" => self.tolerance = expect_f32(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    fn key(&self, position: Vec3) -> MergeKey {
        if self.tolerance == 0.0 {
            // +0.0 so that -0.0 and 0.0 merge.
            MergeKey::Exact((position + Vec3::ZERO).to_array().map(f32::to_bits))
        } else {
            MergeKey::Cell(
                (position / self.tolerance)
                    .floor()
                    .to_array()
                    .map(|v| v as i64),
            )
        }
    }

    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<GeometryBuffer, PipelineError> {
        self.validate()?;

        let mut lookup = HashMap::with_capacity(input.point_count());
        let mut points = Vec::new();
        let remap: Vec<u32> = input
            .points()
            .iter()
            .map(|p| {
                *lookup.entry(self.key(p.position)).or_insert_with(|| {
                    points.push(*p);
                    (points.len() - 1) as u32
                })
            })
            .collect();

        let cells: Vec<Cell> = input
            .cells()
            .iter()
            .filter_map(|cell| {
                let mut merged: Cell = Vec::with_capacity(cell.len());
                for &i in cell {
                    let j = remap[i as usize];
                    if merged.last() != Some(&j) {
                        merged.push(j);
                    }
                }
                if merged.len() > 1 && merged.first() == merged.last() {
                    merged.pop();
                }
                // A polygon needs three distinct corners, a line two.
                (merged.len() >= cell.len().min(3)).then_some(merged)
            })
            .collect();

        log::debug!(
            "Cleaner merged {} points into {}, kept {} of {} cells",
            input.point_count(),
            points.len(),
            cells.len(),
            input.cell_count()
        );
        Ok(GeometryBuffer::new(points, cells)?)
    }
}
