use nalgebra::{ClosedSub, Point3, Scalar, Vector3};

/// Axis-aligned box spanned by two corner points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB<T: Scalar + PartialOrd> {
    min: Point3<T>,
    max: Point3<T>,
}

impl<T: Scalar + ClosedSub + PartialOrd + Copy> AABB<T> {
    /// Box with the corners `min` and `max`. The caller guarantees `min <= max` on every axis
    pub fn from_min_max_unchecked(min: Point3<T>, max: Point3<T>) -> Self {
        Self { min, max }
    }

    /// Lower corner
    pub fn min(&self) -> &Point3<T> {
        &self.min
    }

    /// Upper corner
    pub fn max(&self) -> &Point3<T> {
        &self.max
    }

    /// Side lengths along X, Y and Z
    /// ```
    /// # use sylva_core::math::AABB;
    /// # use sylva_core::nalgebra::{Point3, Vector3};
    /// let plot = AABB::from_min_max_unchecked(Point3::new(10.0, 20.0, 300.0), Point3::new(60.0, 45.0, 330.0));
    /// assert_eq!(plot.extent(), Vector3::new(50.0, 25.0, 30.0));
    /// ```
    pub fn extent(&self) -> Vector3<T> {
        self.max - self.min
    }

    /// Smallest box enclosing both `bounds` and `point`
    pub fn extend_with_point(bounds: &AABB<T>, point: &Point3<T>) -> AABB<T> {
        let lower = |a: T, b: T| if b < a { b } else { a };
        let upper = |a: T, b: T| if b > a { b } else { a };
        Self {
            min: Point3::new(
                lower(bounds.min.x, point.x),
                lower(bounds.min.y, point.y),
                lower(bounds.min.z, point.z),
            ),
            max: Point3::new(
                upper(bounds.max.x, point.x),
                upper(bounds.max.y, point.y),
                upper(bounds.max.z, point.z),
            ),
        }
    }

    /// Tight bounds of a point set, `None` for an empty set
    /// ```
    /// # use sylva_core::math::AABB;
    /// # use sylva_core::nalgebra::Point3;
    /// let stem = vec![
    ///     Point3::new(4.2, 1.0, 101.5),
    ///     Point3::new(4.0, 1.3, 100.7),
    ///     Point3::new(4.1, 0.9, 103.2),
    /// ];
    /// let bounds = AABB::from_points(stem.iter()).unwrap();
    /// assert_eq!(*bounds.min(), Point3::new(4.0, 0.9, 100.7));
    /// assert_eq!(*bounds.max(), Point3::new(4.2, 1.3, 103.2));
    /// assert!(AABB::<f64>::from_points(std::iter::empty()).is_none());
    /// ```
    pub fn from_points<'a, I: IntoIterator<Item = &'a Point3<T>>>(points: I) -> Option<AABB<T>>
    where
        T: 'a,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let initial = Self::from_min_max_unchecked(*first, *first);
        Some(iter.fold(initial, |bounds, point| {
            Self::extend_with_point(&bounds, point)
        }))
    }
}
