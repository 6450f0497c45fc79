use glam::Vec3;

use crate::{BoundingBox, GeometryError, Point};

/// A polygon, line or vertex cell: indices into the points of its buffer.
pub type Cell = Vec<u32>;

/// Layout of an externally supplied packed float buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedLayout {
    /// `x y z` per element.
    Position,
    /// `x y z r g b` per element, colors in `0..=1`. This is the layout of the
    /// capture particle buffer.
    PositionColor,
}

impl PackedLayout {
    pub fn stride(self) -> usize {
        match self {
            Self::Position => 3,
            Self::PositionColor => 6,
        }
    }
}

/// Ordered points plus optional topology.
///
/// A point's index is its identity within the buffer. Stages never mutate a
/// buffer they received, they build a new one. Once a buffer is handed out
/// as a stage output it is shared behind an `Arc` and read-only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeometryBuffer {
    points: Vec<Point>,
    cells: Vec<Cell>,
}

impl GeometryBuffer {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_capacity(points: usize, cells: usize) -> Self {
        Self {
            points: Vec::with_capacity(points),
            cells: Vec::with_capacity(cells),
        }
    }

    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            cells: Vec::new(),
        }
    }

    /// Create a buffer from points and cells, checking that every cell only
    /// references existing points.
    pub fn new(points: Vec<Point>, cells: Vec<Cell>) -> Result<Self, GeometryError> {
        if points.is_empty() && !cells.is_empty() {
            return Err(GeometryError::CellsWithoutPoints);
        }
        for (i, cell) in cells.iter().enumerate() {
            validate_cell(i, cell, points.len())?;
        }
        Ok(Self { points, cells })
    }

    /// Import `count` elements from a packed float buffer.
    pub fn from_packed(
        data: &[f32],
        count: usize,
        layout: PackedLayout,
    ) -> Result<Self, GeometryError> {
        let stride = layout.stride();
        let short = |needed| GeometryError::ShortBuffer {
            len: data.len(),
            needed,
            count,
        };
        let needed = count.checked_mul(stride).ok_or_else(|| short(usize::MAX))?;
        if data.len() < needed {
            return Err(short(needed));
        }

        let points = data[..needed]
            .chunks_exact(stride)
            .map(|el| {
                let point = Point::from_xyz(el[0], el[1], el[2]);
                match layout {
                    PackedLayout::Position => point,
                    PackedLayout::PositionColor => {
                        point.with_color([unit_to_u8(el[3]), unit_to_u8(el[4]), unit_to_u8(el[5])])
                    }
                }
            })
            .collect();
        Ok(Self::from_points(points))
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, index: usize) -> Result<&Point, GeometryError> {
        self.points.get(index).ok_or(GeometryError::OutOfRange {
            index,
            len: self.points.len(),
        })
    }

    /// Append a point, returning its index.
    pub fn add_point(&mut self, point: Point) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Result<&[u32], GeometryError> {
        self.cells
            .get(index)
            .map(Vec::as_slice)
            .ok_or(GeometryError::OutOfRange {
                index,
                len: self.cells.len(),
            })
    }

    /// Append a cell, returning its index. Fails if the cell references a
    /// point that doesn't exist (yet).
    pub fn add_cell(&mut self, cell: Cell) -> Result<usize, GeometryError> {
        if self.points.is_empty() {
            return Err(GeometryError::CellsWithoutPoints);
        }
        validate_cell(self.cells.len(), &cell, self.points.len())?;
        self.cells.push(cell);
        Ok(self.cells.len() - 1)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.points.iter().map(|p| p.position)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_cells(&self) -> bool {
        !self.cells.is_empty()
    }

    /// Whether every point carries a normal. False for an empty buffer.
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    pub fn has_colors(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.color.is_some())
    }

    pub fn has_scalars(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.scalar.is_some())
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.positions())
    }

    /// Same points, topology removed.
    #[must_use]
    pub fn without_cells(&self) -> Self {
        Self::from_points(self.points.clone())
    }
}

fn validate_cell(cell_index: usize, cell: &[u32], point_count: usize) -> Result<(), GeometryError> {
    if cell.is_empty() {
        return Err(GeometryError::EmptyCell(cell_index));
    }
    if let Some(&index) = cell.iter().find(|&&i| i as usize >= point_count) {
        return Err(GeometryError::InvalidTopology {
            cell: cell_index,
            index,
            point_count,
        });
    }
    Ok(())
}

fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::from_xyz(0.0, 0.0, 0.0),
            Point::from_xyz(1.0, 0.0, 0.0),
            Point::from_xyz(1.0, 1.0, 0.0),
            Point::from_xyz(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn point_access_and_range() {
        let mut buffer = GeometryBuffer::from_points(square());
        assert_eq!(buffer.point_count(), 4);
        assert_eq!(buffer.point(2).unwrap().position, glam::vec3(1.0, 1.0, 0.0));
        assert_eq!(
            buffer.point(4),
            Err(GeometryError::OutOfRange { index: 4, len: 4 })
        );

        let index = buffer.add_point(Point::from_xyz(5.0, 5.0, 5.0));
        assert_eq!(index, 4);
        assert!(buffer.point(4).is_ok());
    }

    #[test]
    fn topology_is_validated() {
        let buffer = GeometryBuffer::new(square(), vec![vec![0, 1, 2, 3]]).unwrap();
        assert_eq!(buffer.cell_count(), 1);
        assert_eq!(buffer.cell(0).unwrap(), &[0, 1, 2, 3]);
        assert!(matches!(
            buffer.cell(1),
            Err(GeometryError::OutOfRange { index: 1, len: 1 })
        ));

        let bad = GeometryBuffer::new(square(), vec![vec![0, 1, 4]]);
        assert_eq!(
            bad,
            Err(GeometryError::InvalidTopology {
                cell: 0,
                index: 4,
                point_count: 4
            })
        );

        let empty_cell = GeometryBuffer::new(square(), vec![vec![]]);
        assert_eq!(empty_cell, Err(GeometryError::EmptyCell(0)));

        let no_points = GeometryBuffer::new(vec![], vec![vec![0]]);
        assert_eq!(no_points, Err(GeometryError::CellsWithoutPoints));
    }

    #[test]
    fn add_cell_checks_indices() {
        let mut buffer = GeometryBuffer::from_points(square());
        assert_eq!(buffer.add_cell(vec![0, 1, 2]), Ok(0));
        assert!(buffer.add_cell(vec![3, 9]).is_err());
        assert_eq!(buffer.cell_count(), 1);
    }

    #[test]
    fn structural_equality() {
        let a = GeometryBuffer::new(square(), vec![vec![0, 1, 2]]).unwrap();
        let b = GeometryBuffer::new(square(), vec![vec![0, 1, 2]]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, a.without_cells());
    }

    #[test]
    fn packed_position_color() {
        let data = [
            1.0, 2.0, 3.0, 1.0, 0.0, 0.5, //
            4.0, 5.0, 6.0, 0.0, 1.0, 0.0,
        ];
        let buffer = GeometryBuffer::from_packed(&data, 2, PackedLayout::PositionColor).unwrap();
        assert_eq!(buffer.point_count(), 2);
        let p = buffer.point(0).unwrap();
        assert_eq!(p.position, glam::vec3(1.0, 2.0, 3.0));
        assert_eq!(p.color, Some([255, 0, 128]));
        assert!(buffer.has_colors());
        assert!(!buffer.has_normals());
    }

    #[test]
    fn packed_count_limits_elements() {
        let data = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let buffer = GeometryBuffer::from_packed(&data, 2, PackedLayout::Position).unwrap();
        assert_eq!(buffer.point_count(), 2);

        let short = GeometryBuffer::from_packed(&data, 4, PackedLayout::Position);
        assert_eq!(
            short,
            Err(GeometryError::ShortBuffer {
                len: 9,
                needed: 12,
                count: 4
            })
        );
    }

    #[test]
    fn packed_count_overflow_is_short_buffer() {
        let data = [0.0; 6];
        let huge = usize::MAX / 2;
        assert_eq!(
            GeometryBuffer::from_packed(&data, huge, PackedLayout::PositionColor),
            Err(GeometryError::ShortBuffer {
                len: 6,
                needed: usize::MAX,
                count: huge
            })
        );
    }
}
