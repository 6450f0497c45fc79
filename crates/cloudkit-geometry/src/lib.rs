pub mod bounding_box;
mod buffer;
mod point;

pub use bounding_box::BoundingBox;
pub use buffer::{Cell, GeometryBuffer, PackedLayout};
pub use point::Point;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Index {index} is out of range (len {len}).")]
    OutOfRange { index: usize, len: usize },

    #[error("Cell {cell} references point {index}, but the buffer only has {point_count} points.")]
    InvalidTopology {
        cell: usize,
        index: u32,
        point_count: usize,
    },

    #[error("Cell {0} has no indices.")]
    EmptyCell(usize),

    #[error("Buffer has cells but no points.")]
    CellsWithoutPoints,

    #[error("Packed buffer holds {len} floats, {needed} needed for {count} elements.")]
    ShortBuffer {
        len: usize,
        needed: usize,
        count: usize,
    },
}
