use serde::Serialize;

/// Bounding box in original image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Minimum x coordinate of the bounding box.
    pub xmin: f32,
    /// Minimum y coordinate of the bounding box.
    pub ymin: f32,
    /// Maximum x coordinate of the bounding box.
    pub xmax: f32,
    /// Maximum y coordinate of the bounding box.
    pub ymax: f32,
    /// Confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Class index predicted by the model.
    pub class: u32,
}

impl BoundingBox {
    /// Restrict the box corners to an image of the given size.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            xmin: self.xmin.clamp(0.0, max_x),
            ymin: self.ymin.clamp(0.0, max_y),
            xmax: self.xmax.clamp(0.0, max_x),
            ymax: self.ymax.clamp(0.0, max_y),
            ..*self
        }
    }

    /// Corners truncated to whole pixels, `[x1, y1, x2, y2]`.
    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.xmin as i32,
            self.ymin as i32,
            self.xmax as i32,
            self.ymax as i32,
        ]
    }
}

/// Intersection over union of two bounding boxes.
fn iou(b1: &BoundingBox, b2: &BoundingBox) -> f32 {
    let b1_area = (b1.xmax - b1.xmin + 1.) * (b1.ymax - b1.ymin + 1.);
    let b2_area = (b2.xmax - b2.xmin + 1.) * (b2.ymax - b2.ymin + 1.);
    let i_xmin = b1.xmin.max(b2.xmin);
    let i_xmax = b1.xmax.min(b2.xmax);
    let i_ymin = b1.ymin.max(b2.ymin);
    let i_ymax = b1.ymax.min(b2.ymax);
    let i_area = (i_xmax - i_xmin + 1.).max(0.) * (i_ymax - i_ymin + 1.).max(0.);
    i_area / (b1_area + b2_area - i_area)
}

/// Non-maximum suppression for bounding boxes grouped by class.
///
/// Each inner vector holds the candidates of one class. Boxes are sorted by
/// descending confidence and a box is dropped when its IoU with an already
/// kept box of the same class exceeds `threshold`.
pub fn non_maximum_suppression(bboxes: &mut [Vec<BoundingBox>], threshold: f32) {
    for bboxes_for_class in bboxes.iter_mut() {
        bboxes_for_class.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));
        let mut current_index = 0;
        for index in 0..bboxes_for_class.len() {
            let drop = (0..current_index)
                .any(|prev| iou(&bboxes_for_class[prev], &bboxes_for_class[index]) > threshold);
            if !drop {
                bboxes_for_class.swap(current_index, index);
                current_index += 1;
            }
        }
        bboxes_for_class.truncate(current_index);
    }
}
