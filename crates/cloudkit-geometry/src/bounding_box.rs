use glam::Vec3;

/// Axis aligned bounds of a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of the given positions, or `None` when there are none.
    pub fn from_points(positions: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = positions.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::from_min_max(first, first), |b, p| {
            Self::from_min_max(b.min.min(p), b.max.max(p))
        }))
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grow the box by `amount` on every side.
    #[must_use]
    pub fn expand(&self, amount: f32) -> Self {
        Self::from_min_max(self.min - Vec3::splat(amount), self.max + Vec3::splat(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_of_points() {
        let bounds = BoundingBox::from_points([
            glam::vec3(1.0, -2.0, 0.5),
            glam::vec3(-1.0, 3.0, 0.0),
            glam::vec3(0.0, 0.0, 4.0),
        ])
        .expect("Non-empty input");

        assert_eq!(bounds.min, glam::vec3(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, glam::vec3(1.0, 3.0, 4.0));
        assert_eq!(bounds.extent(), glam::vec3(2.0, 5.0, 4.0));

        let grown = bounds.expand(0.5);
        assert_eq!(grown.min, glam::vec3(-1.5, -2.5, -0.5));
        assert_eq!(grown.extent(), glam::vec3(3.0, 6.0, 5.0));
    }

    #[test]
    fn no_points_no_bounds() {
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }
}
