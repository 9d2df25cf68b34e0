#![deny(missing_docs)]

//! Food detection web service on top of YOLOv8
//!
//! This crate loads a YOLOv8 detector (custom food weights when present,
//! the pretrained COCO checkpoint otherwise), runs it on uploaded images,
//! draws the detections and serves the results over HTTP.
//!
//! # Examples
//!
//! ```no_run
//! use food_detect::{Annotator, ModelOptions, ObjectDetector, load_model};
//!
//! let model = load_model(&ModelOptions::default()).expect("Failed to load model");
//!
//! let image = image::open("path/to/dinner.jpg")
//!     .expect("Failed to read image")
//!     .to_rgb8();
//!
//! let report = model.detect(&image).expect("Failed to run inference");
//! for detection in report.detections() {
//!     println!("{}", detection.label());
//! }
//!
//! let annotated = Annotator::discover(None).annotate(&image, report.detections());
//! annotated.save("annotated.png").expect("Failed to save image");
//! ```

/// Drawing detections onto images
mod annotate;

/// Bounding box module with non-maximum suppression
mod bounding_box;

/// Deployment validation
mod check;

/// Service configuration
mod config;

/// Inference adapter between decoded images and detection records
mod detector;

/// Image download for URL uploads
mod fetch;

/// Class label sets
mod labels;

/// Custom weights discovery and pretrained fallback
mod loader;

/// YOLOv8 model definition in candle
mod model;

/// HTTP front-end
pub mod server;

/// Annotated image storage
mod storage;

/// YOLOv8 high level interface
mod yolov8;

pub use annotate::{AnnotateError, Annotator, DEFAULT_FONT_PATHS, encode_png};
pub use bounding_box::{BoundingBox, non_maximum_suppression};
pub use check::{CheckItem, CheckStatus, passed, run_checks};
pub use config::{ALLOWED_EXTENSIONS, AppConfig, ConfigError, has_allowed_extension};
pub use detector::{Detection, DetectionReport, ModelInfo, ObjectDetector};
pub use fetch::{FetchError, ImageFetcher};
pub use labels::{COCO_CLASSES, ClassLabels, FOOD_CLASSES};
pub use loader::{CUSTOM_WEIGHT_CANDIDATES, ModelOptions, load_model};
pub use storage::{ResultStore, StorageError};
pub use yolov8::{ModelSource, PRETRAINED_REPO, YoloV8, YoloV8Config, YoloV8Error, YoloV8Size};
