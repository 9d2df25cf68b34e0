use image::RgbImage;
use kornia_image::{Image, ImageSize};
use serde::Serialize;

use crate::bounding_box::BoundingBox;
use crate::labels::ClassLabels;
use crate::yolov8::{YoloV8, YoloV8Error};

/// One detected object, shaped for display and JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Human readable class name.
    pub class_name: String,
    /// Confidence as a percentage rounded to two decimals.
    pub confidence: f64,
    /// Pixel corners `[x1, y1, x2, y2]` in the input image.
    pub bbox: [i32; 4],
}

impl Detection {
    /// Build a record from a raw model box, clamping it to the image.
    pub fn from_bbox(bbox: &BoundingBox, labels: &ClassLabels, width: u32, height: u32) -> Self {
        Self {
            class_name: labels.name(bbox.class),
            confidence: confidence_percent(bbox.confidence),
            bbox: bbox.clamp_to(width, height).to_pixels(),
        }
    }

    /// Text drawn next to the box, e.g. `Pizza: 87.5%`. Whole percentages
    /// keep one decimal, `Pizza: 87.0%`, matching the JSON value.
    pub fn label(&self) -> String {
        format!("{}: {:?}%", self.class_name, self.confidence)
    }
}

fn confidence_percent(confidence: f32) -> f64 {
    (confidence as f64 * 100.0 * 100.0).round() / 100.0
}

/// Detections found in one image. The count always matches the list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    total_detections: usize,
    detections: Vec<Detection>,
}

impl DetectionReport {
    /// Wrap a list of detections.
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            total_detections: detections.len(),
            detections,
        }
    }

    /// Number of detections.
    pub fn total_detections(&self) -> usize {
        self.total_detections
    }

    /// The detections, highest confidence first.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

/// Summary of the loaded model, shown in the page sidebar.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Model family and size, e.g. `YOLOv8n`.
    pub model: String,
    /// Where the weights came from.
    pub model_source: String,
    /// Minimum confidence of reported detections, in `[0, 1]`.
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes are suppressed.
    pub nms_threshold: f32,
    /// Class names the model predicts.
    pub classes: Vec<String>,
}

/// Object detection over decoded RGB images.
pub trait ObjectDetector: Send + Sync {
    /// Detect objects above the confidence threshold.
    fn detect(&self, image: &RgbImage) -> Result<DetectionReport, YoloV8Error>;

    /// Describe the loaded model.
    fn info(&self) -> ModelInfo;
}

impl ObjectDetector for YoloV8 {
    fn detect(&self, image: &RgbImage) -> Result<DetectionReport, YoloV8Error> {
        let (width, height) = image.dimensions();
        let input = Image::<u8, 3>::new(
            ImageSize {
                width: width as usize,
                height: height as usize,
            },
            image.as_raw().clone(),
        )?;

        let mut bboxes = self.inference(&input)?;
        bboxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let detections = bboxes
            .iter()
            .map(|bbox| Detection::from_bbox(bbox, self.labels(), width, height))
            .collect::<Vec<_>>();
        tracing::debug!(width, height, found = detections.len(), "inference done");

        Ok(DetectionReport::new(detections))
    }

    fn info(&self) -> ModelInfo {
        let config = self.config();
        ModelInfo {
            model: format!("YOLOv8{}", config.size),
            model_source: self.source().to_string(),
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
            classes: self.labels().names().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_from_bbox() {
        let bbox = BoundingBox {
            xmin: 10.6,
            ymin: -3.0,
            xmax: 250.2,
            ymax: 40.9,
            confidence: 0.87654,
            class: 5,
        };
        let detection = Detection::from_bbox(&bbox, &ClassLabels::food(), 200, 100);
        assert_eq!(detection.class_name, "Pizza");
        assert_eq!(detection.confidence, 87.65);
        assert_eq!(detection.bbox, [10, 0, 199, 40]);
        assert_eq!(detection.label(), "Pizza: 87.65%");
    }

    #[test]
    fn test_whole_confidence_label_keeps_a_decimal() {
        let detection = Detection {
            class_name: "Pizza".to_string(),
            confidence: 87.0,
            bbox: [0, 0, 1, 1],
        };
        assert_eq!(detection.label(), "Pizza: 87.0%");
    }

    #[test]
    fn test_report_count_matches_list() -> Result<(), Box<dyn std::error::Error>> {
        let detection = Detection {
            class_name: "tacos".to_string(),
            confidence: 51.0,
            bbox: [0, 0, 5, 5],
        };
        let report = DetectionReport::new(vec![detection.clone(), detection]);
        assert_eq!(report.total_detections(), report.detections().len());

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["total_detections"], 2);
        assert_eq!(json["detections"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["detections"][0]["class_name"], "tacos");
        Ok(())
    }
}
