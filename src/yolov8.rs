use std::path::{Path, PathBuf};

use super::{
    bounding_box::{BoundingBox, non_maximum_suppression},
    labels::ClassLabels,
    model::{Multiples, YoloV8 as YoloV8Model},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder};
use kornia_image::{Image, ImageSize};

/// Hub repository holding the pretrained YOLOv8 checkpoints.
pub const PRETRAINED_REPO: &str = "lmz/candle-yolo-v8";

/// Longest side of the network input, in pixels.
const INPUT_SIDE: usize = 640;

/// Network stride; input sides must be multiples of it.
const STRIDE: usize = 32;

/// YOLOv8 error enum.
#[derive(thiserror::Error, Debug)]
pub enum YoloV8Error {
    /// Failed to load YOLOv8 model.
    #[error("Failed to load YOLOv8 model: {0}")]
    LoadModelError(String),

    /// Internal candle error.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Kornia image error.
    #[error(transparent)]
    KorniaImageError(#[from] kornia_image::ImageError),

    /// Hugging Face API error.
    #[error(transparent)]
    ApiError(#[from] hf_hub::api::sync::ApiError),
}

/// YOLOv8 model size enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoloV8Size {
    /// N model size.
    N,
    /// S model size.
    S,
    /// M model size.
    M,
    /// L model size.
    L,
    /// X model size.
    X,
}

impl YoloV8Size {
    fn multiples(&self) -> Multiples {
        match self {
            YoloV8Size::N => Multiples::n(),
            YoloV8Size::S => Multiples::s(),
            YoloV8Size::M => Multiples::m(),
            YoloV8Size::L => Multiples::l(),
            YoloV8Size::X => Multiples::x(),
        }
    }

    /// File name of the pretrained checkpoint for this size.
    pub fn checkpoint_name(&self) -> String {
        format!("yolov8{self}.safetensors")
    }
}

impl TryFrom<String> for YoloV8Size {
    type Error = YoloV8Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_from(s.as_str())
    }
}

impl TryFrom<&str> for YoloV8Size {
    type Error = YoloV8Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Ok(match s {
            "n" => YoloV8Size::N,
            "s" => YoloV8Size::S,
            "m" => YoloV8Size::M,
            "l" => YoloV8Size::L,
            "x" => YoloV8Size::X,
            _ => return Err(YoloV8Error::LoadModelError(format!("Invalid size: {s}"))),
        })
    }
}

impl std::fmt::Display for YoloV8Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                YoloV8Size::N => "n",
                YoloV8Size::S => "s",
                YoloV8Size::M => "m",
                YoloV8Size::L => "l",
                YoloV8Size::X => "x",
            }
        )
    }
}

/// YOLOv8 configuration struct.
#[derive(Debug, Clone)]
pub struct YoloV8Config {
    /// The size of the model to use: n, s, m, l, x
    pub size: YoloV8Size,
    /// The confidence threshold for the model
    pub confidence_threshold: f32,
    /// The non-maximum suppression threshold for the model
    pub nms_threshold: f32,
    /// Whether to use the CPU or GPU
    pub use_cpu: bool,
}

/// Default configuration for YOLOv8.
impl Default for YoloV8Config {
    fn default() -> Self {
        Self {
            size: YoloV8Size::N,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            use_cpu: true,
        }
    }
}

/// Where the weights of a loaded model came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Custom weights read from a local safetensors file.
    Custom(PathBuf),
    /// Generic checkpoint fetched from the model hub.
    Pretrained {
        /// Hub repository id.
        repo: String,
        /// Checkpoint file name in the repository.
        file: String,
    },
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Custom(path) => write!(f, "custom weights {}", path.display()),
            ModelSource::Pretrained { repo, file } => write!(f, "pretrained {repo}/{file}"),
        }
    }
}

/// YOLOv8 high level interface.
pub struct YoloV8 {
    config: YoloV8Config,
    device: Device,
    model: YoloV8Model,
    labels: ClassLabels,
    source: ModelSource,
}

impl YoloV8 {
    /// Create a YOLOv8 instance from the pretrained COCO checkpoint,
    /// downloading it from the hub on first use.
    pub fn new(config: YoloV8Config) -> Result<Self, YoloV8Error> {
        let file = config.size.checkpoint_name();
        let model_path = hf_hub::api::sync::Api::new()?
            .model(PRETRAINED_REPO.to_string())
            .get(&file)?;
        let source = ModelSource::Pretrained {
            repo: PRETRAINED_REPO.to_string(),
            file,
        };
        Self::load(config, &model_path, ClassLabels::coco(), source)
    }

    /// Create a YOLOv8 instance from a local safetensors file whose head
    /// predicts `labels.len()` classes.
    pub fn from_weights(
        config: YoloV8Config,
        weights: &Path,
        labels: ClassLabels,
    ) -> Result<Self, YoloV8Error> {
        if labels.is_empty() {
            return Err(YoloV8Error::LoadModelError(
                "custom weights need at least one class label".to_string(),
            ));
        }
        let source = ModelSource::Custom(weights.to_path_buf());
        Self::load(config, weights, labels, source)
    }

    fn load(
        config: YoloV8Config,
        weights: &Path,
        labels: ClassLabels,
        source: ModelSource,
    ) -> Result<Self, YoloV8Error> {
        let device = if config.use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)
                .map_err(|_| YoloV8Error::LoadModelError("cuda:0 error".to_string()))?
        };

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)?
        };
        let model = YoloV8Model::load(vb, config.size.multiples(), labels.len())?;

        tracing::debug!(%source, size = %config.size, classes = labels.len(), "yolov8 loaded");

        Ok(Self {
            config,
            device,
            model,
            labels,
            source,
        })
    }

    /// The configuration the model runs with.
    pub fn config(&self) -> &YoloV8Config {
        &self.config
    }

    /// Class names predicted by the model head.
    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Where the weights were loaded from.
    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    /// Perform inference on an rgb8 image.
    ///
    /// Returned boxes are in the pixel coordinates of `image`.
    pub fn inference(&self, image: &Image<u8, 3>) -> Result<Vec<BoundingBox>, YoloV8Error> {
        let (image_t, w_ratio, h_ratio) = self.preprocess_image(image)?;

        let pred = self.model.forward(&image_t)?.squeeze(0)?;

        self.postprocess_predictions(&pred, w_ratio, h_ratio)
    }

    fn preprocess_image(&self, image: &Image<u8, 3>) -> Result<(Tensor, f32, f32), YoloV8Error> {
        let (width, height) = network_input_size(image.width(), image.height());

        let w_ratio = image.width() as f32 / width as f32;
        let h_ratio = image.height() as f32 / height as f32;

        let mut image_resized = Image::from_size_val(ImageSize { width, height }, 0)?;
        kornia_imgproc::resize::resize_fast(
            image,
            &mut image_resized,
            kornia_imgproc::interpolation::InterpolationMode::Nearest,
        )?;

        let image_resized = image_resized.map(|&x| x as f32 / 255.0);

        let image_t =
            Tensor::from_vec::<_, f32>(image_resized.into_vec(), (height, width, 3), &self.device)?
                .permute((2, 0, 1))?
                .unsqueeze(0)?;

        Ok((image_t, w_ratio, h_ratio))
    }

    fn postprocess_predictions(
        &self,
        pred: &Tensor,
        w_ratio: f32,
        h_ratio: f32,
    ) -> Result<Vec<BoundingBox>, YoloV8Error> {
        // one row per anchor: cx, cy, w, h, class scores...
        let rows = pred.t()?.contiguous()?.to_vec2::<f32>()?;
        let mut bboxes = decode_predictions(
            &rows,
            self.labels.len(),
            self.config.confidence_threshold,
            w_ratio,
            h_ratio,
        );
        non_maximum_suppression(&mut bboxes, self.config.nms_threshold);

        Ok(bboxes.into_iter().flatten().collect())
    }
}

/// Network input size for an image: the long side becomes 640 and both
/// sides are rounded down to a multiple of the stride, never below it.
fn network_input_size(width: usize, height: usize) -> (usize, usize) {
    let fit = |side: usize| (side / STRIDE * STRIDE).max(STRIDE);
    if width < height {
        (fit(width * INPUT_SIDE / height.max(1)), INPUT_SIDE)
    } else {
        (INPUT_SIDE, fit(height * INPUT_SIDE / width.max(1)))
    }
}

/// Turn raw prediction rows into per-class candidate boxes scaled back to
/// the original image.
fn decode_predictions(
    rows: &[Vec<f32>],
    nclasses: usize,
    confidence_threshold: f32,
    w_ratio: f32,
    h_ratio: f32,
) -> Vec<Vec<BoundingBox>> {
    let mut bboxes: Vec<Vec<BoundingBox>> = (0..nclasses).map(|_| Vec::new()).collect();
    for pred in rows.iter().filter(|row| row.len() >= 4 + nclasses) {
        let scores = &pred[4..4 + nclasses];
        let Some((class_index, &confidence)) = scores
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.total_cmp(y))
        else {
            continue;
        };
        if confidence > confidence_threshold {
            bboxes[class_index].push(BoundingBox {
                xmin: (pred[0] - pred[2] / 2.0) * w_ratio,
                ymin: (pred[1] - pred[3] / 2.0) * h_ratio,
                xmax: (pred[0] + pred[2] / 2.0) * w_ratio,
                ymax: (pred[1] + pred[3] / 2.0) * h_ratio,
                confidence,
                class: class_index as u32,
            });
        }
    }
    bboxes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_input_size_keeps_aspect() {
        assert_eq!(network_input_size(1280, 720), (640, 352));
        assert_eq!(network_input_size(480, 640), (480, 640));
        assert_eq!(network_input_size(640, 640), (640, 640));
        // tiny sides never collapse below one stride
        assert_eq!(network_input_size(1000, 10), (640, 32));
    }

    #[test]
    fn test_decode_predictions_thresholds_and_scales() {
        let rows = vec![
            // centered at (100, 50), 20x10, class 1 at 0.9
            vec![100.0, 50.0, 20.0, 10.0, 0.1, 0.9],
            // below threshold
            vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.1],
        ];
        let bboxes = decode_predictions(&rows, 2, 0.25, 2.0, 1.0);
        assert!(bboxes[0].is_empty());
        assert_eq!(bboxes[1].len(), 1);
        let b = bboxes[1][0];
        assert_eq!(b.class, 1);
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (180.0, 45.0, 220.0, 55.0));
    }

    #[test]
    fn test_size_parsing() -> Result<(), YoloV8Error> {
        assert_eq!(YoloV8Size::try_from("s")?, YoloV8Size::S);
        assert_eq!(YoloV8Size::X.checkpoint_name(), "yolov8x.safetensors");
        assert!(YoloV8Size::try_from("q".to_string()).is_err());
        Ok(())
    }

    #[test]
    #[ignore = "downloads the pretrained checkpoint from the hub"]
    fn test_yolov8_pretrained_inference() -> Result<(), Box<dyn std::error::Error>> {
        let yolov8 = YoloV8::new(YoloV8Config::default())?;
        let image = Image::<u8, 3>::from_size_val(
            ImageSize {
                width: 320,
                height: 240,
            },
            127,
        )?;
        let detections = yolov8.inference(&image)?;
        assert!(detections.iter().all(|d| d.confidence > 0.25));
        assert!(matches!(yolov8.source(), ModelSource::Pretrained { .. }));
        Ok(())
    }
}
