use imageproc::geometric_transformations::Projection;

use super::ClipPolicy;
use crate::plate::BoundingBox;

/// Row-major 2x3 affine matrix `[a b c; d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Affine {
    m: [f32; 6],
}

impl Affine {
    #[cfg(test)]
    pub(crate) fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub(crate) fn translation(tx: f32, ty: f32) -> Self {
        Self {
            m: [1.0, 0.0, tx, 0.0, 1.0, ty],
        }
    }

    pub(crate) fn rotation(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            m: [cos, -sin, 0.0, sin, cos, 0.0],
        }
    }

    pub(crate) fn shear_x(degrees: f32) -> Self {
        Self {
            m: [1.0, degrees.to_radians().tan(), 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub(crate) fn scale(sx: f32, sy: f32) -> Self {
        Self {
            m: [sx, 0.0, 0.0, 0.0, sy, 0.0],
        }
    }

    /// `self * other`: `other` is applied first.
    pub(crate) fn compose(&self, other: &Affine) -> Affine {
        let [a, b, c, d, e, f] = self.m;
        let [g, h, i, j, k, l] = other.m;
        Affine {
            m: [
                a * g + b * j,
                a * h + b * k,
                a * i + b * l + c,
                d * g + e * j,
                d * h + e * k,
                d * i + e * l + f,
            ],
        }
    }

    /// Re-centres the transform so it pivots around `(cx, cy)`.
    pub(crate) fn about(&self, cx: f32, cy: f32) -> Affine {
        Affine::translation(cx, cy)
            .compose(self)
            .compose(&Affine::translation(-cx, -cy))
    }

    pub(crate) fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.m;
        (a * x + b * y + c, d * x + e * y + f)
    }

    pub(crate) fn to_projection(self) -> Option<Projection> {
        let [a, b, c, d, e, f] = self.m;
        Projection::from_matrix([a, b, c, d, e, f, 0.0, 0.0, 1.0])
    }
}

/// Smallest axis-aligned box enclosing the transformed corners.
pub(crate) fn transform_box(bbox: &BoundingBox, affine: &Affine) -> BoundingBox {
    let corners = [
        affine.apply(bbox.x_min, bbox.y_min),
        affine.apply(bbox.x_max, bbox.y_min),
        affine.apply(bbox.x_min, bbox.y_max),
        affine.apply(bbox.x_max, bbox.y_max),
    ];
    let mut x_min = f32::INFINITY;
    let mut y_min = f32::INFINITY;
    let mut x_max = f32::NEG_INFINITY;
    let mut y_max = f32::NEG_INFINITY;
    for (x, y) in corners {
        x_min = x_min.min(x);
        y_min = y_min.min(y);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }
    BoundingBox::new(x_min, y_min, x_max, y_max, bbox.label.clone())
}

pub(crate) fn is_fully_outside(bbox: &BoundingBox, width: u32, height: u32) -> bool {
    bbox.x_max <= 0.0
        || bbox.y_max <= 0.0
        || bbox.x_min >= width as f32
        || bbox.y_min >= height as f32
}

/// Applies the frame policy after augmentation.
///
/// `Clip` drops boxes entirely outside the frame and cuts the rest to it.
pub(crate) fn clip_boxes(
    boxes: Vec<BoundingBox>,
    width: u32,
    height: u32,
    policy: ClipPolicy,
) -> Vec<BoundingBox> {
    match policy {
        ClipPolicy::Keep => boxes,
        ClipPolicy::Clip => boxes
            .into_iter()
            .filter(|bbox| !is_fully_outside(bbox, width, height))
            .map(|bbox| {
                BoundingBox::new(
                    bbox.x_min.clamp(0.0, width as f32),
                    bbox.y_min.clamp(0.0, height as f32),
                    bbox.x_max.clamp(0.0, width as f32),
                    bbox.y_max.clamp(0.0, height as f32),
                    bbox.label,
                )
            })
            .filter(BoundingBox::is_valid)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn rotation_about_centre_keeps_the_pivot() {
        let affine = Affine::rotation(90.0).about(50.0, 20.0);
        let (x, y) = affine.apply(50.0, 20.0);
        assert!(close(x, 50.0) && close(y, 20.0));
        let (x, y) = affine.apply(60.0, 20.0);
        assert!(close(x, 50.0) && close(y, 30.0), "{x} {y}");
    }

    #[test]
    fn transformed_box_encloses_rotated_corners() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0, "A");
        let rotated = transform_box(&bbox, &Affine::rotation(45.0).about(5.0, 5.0));
        let half_diag = 50f32.sqrt();
        assert!(close(rotated.x_min, 5.0 - half_diag));
        assert!(close(rotated.x_max, 5.0 + half_diag));
        assert_eq!(rotated.label, "A");

        let scaled = transform_box(&bbox, &Affine::scale(2.0, 0.5));
        assert_eq!(scaled, BoundingBox::new(0.0, 0.0, 20.0, 5.0, "A"));
        let same = transform_box(&bbox, &Affine::identity());
        assert_eq!(same, bbox);
    }

    #[test]
    fn clip_cuts_partial_boxes_and_drops_outside_ones() {
        let boxes = vec![
            BoundingBox::new(-5.0, 2.0, 10.0, 8.0, "A"),
            BoundingBox::new(120.0, 2.0, 130.0, 8.0, "B"),
            BoundingBox::new(90.0, 40.0, 110.0, 60.0, "C"),
        ];
        let clipped = clip_boxes(boxes.clone(), 100, 50, ClipPolicy::Clip);
        assert_eq!(
            clipped,
            vec![
                BoundingBox::new(0.0, 2.0, 10.0, 8.0, "A"),
                BoundingBox::new(90.0, 40.0, 100.0, 50.0, "C"),
            ]
        );
        assert_eq!(clip_boxes(boxes.clone(), 100, 50, ClipPolicy::Keep), boxes);
    }

    #[test]
    fn invertible_transforms_convert_to_projections() {
        assert!(Affine::rotation(12.0).to_projection().is_some());
        assert!(Affine::scale(0.0, 1.0).to_projection().is_none());
    }
}
