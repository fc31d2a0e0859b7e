use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in slide pixel coordinates at a given downsample
/// level. Constructed once, read thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

impl BoundingBox {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Expand a point annotation at level-0 coordinates `(x, y)` into a square
    /// of the given radius, scaled down to the level described by
    /// `down_factor`. Every edge is truncated toward zero.
    pub fn from_spot(x: f64, y: f64, radius: f64, down_factor: f64) -> Self {
        let d = 2.0 * radius / down_factor;
        let x_min = (x - radius) / down_factor;
        let y_min = (y - radius) / down_factor;
        let x_max = x_min + d;
        let y_max = y_min + d;

        Self::new(x_min as i64, y_min as i64, x_max as i64, y_max as i64)
    }

    pub fn left(&self) -> i64 {
        self.left
    }

    pub fn top(&self) -> i64 {
        self.top
    }

    pub fn right(&self) -> i64 {
        self.right
    }

    pub fn bottom(&self) -> i64 {
        self.bottom
    }

    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (i64, i64) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    /// True when the box lies strictly inside the patch whose top-left corner
    /// is `(x_start, y_start)`.
    pub fn within_patch(&self, x_start: i64, y_start: i64, width: i64, height: i64) -> bool {
        self.left > x_start
            && self.right < x_start + width
            && self.top > y_start
            && self.bottom < y_start + height
    }

    pub fn translate(&self, dx: i64, dy: i64) -> Self {
        Self::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spot_at_full_resolution() {
        let bbox = BoundingBox::from_spot(100.0, 200.0, 25.0, 1.0);
        assert_eq!(bbox, BoundingBox::new(75, 175, 125, 225));
        assert_eq!(bbox.width(), 50);
        assert_eq!(bbox.height(), 50);
        assert_eq!(bbox.center(), (100, 200));
    }

    #[test]
    fn test_from_spot_truncates_scaled_edges() {
        // (101 - 25) / 4 = 19.0, 19.0 + 12.5 = 31.5 -> 31
        let bbox = BoundingBox::from_spot(101.0, 53.0, 25.0, 4.0);
        assert_eq!(bbox.left(), 19);
        assert_eq!(bbox.top(), 7);
        assert_eq!(bbox.right(), 31);
        assert_eq!(bbox.bottom(), 19);
    }

    #[test]
    fn test_from_spot_near_origin_truncates_toward_zero() {
        // (10 - 25) / 2 = -7.5 -> -7, not -8
        let bbox = BoundingBox::from_spot(10.0, 10.0, 25.0, 2.0);
        assert_eq!(bbox.left(), -7);
        assert_eq!(bbox.right(), 17);
    }

    #[test]
    fn test_within_patch_is_strict() {
        let bbox = BoundingBox::new(10, 10, 20, 20);
        assert!(bbox.within_patch(0, 0, 32, 32));
        assert!(bbox.within_patch(9, 9, 12, 12));
        assert!(!bbox.within_patch(10, 0, 32, 32));
        assert!(!bbox.within_patch(0, 0, 20, 32));
        assert!(!bbox.within_patch(0, 0, 32, 20));
    }

    #[test]
    fn test_translate() {
        let bbox = BoundingBox::new(10, 20, 30, 40).translate(-10, -5);
        assert_eq!(bbox, BoundingBox::new(0, 15, 20, 35));
    }
}
