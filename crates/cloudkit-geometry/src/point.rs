use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A point in 3D space with optional per-point attributes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub position: Vec3,
    pub normal: Option<Vec3>,
    pub color: Option<[u8; 3]>,
    pub scalar: Option<f32>,
}

impl Point {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::new(glam::vec3(x, y, z))
    }

    #[must_use]
    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = Some(normal);
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    #[must_use]
    pub fn with_scalar(mut self, scalar: f32) -> Self {
        self.scalar = Some(scalar);
        self
    }

    /// Same attributes, different position.
    #[must_use]
    pub fn moved_to(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.normal.is_none_or(|n| n.is_finite())
            && self.scalar.is_none_or(f32::is_finite)
    }
}
