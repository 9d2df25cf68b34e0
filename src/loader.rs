use std::path::{Path, PathBuf};

use crate::labels::ClassLabels;
use crate::yolov8::{YoloV8, YoloV8Config, YoloV8Error};

/// Custom weight locations, relative to the search root, in priority order.
pub const CUSTOM_WEIGHT_CANDIDATES: [&str; 5] = [
    "runs/detect/yolov8n_food101/weights/best.safetensors",
    "best.safetensors",
    "model.safetensors",
    "yolov8n_food101.safetensors",
    "food_detection_model.safetensors",
];

/// Where and how to look for model weights.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Runtime options of the network.
    pub yolo: YoloV8Config,
    /// Explicit weights path, tried before the default candidates.
    pub weights: Option<PathBuf>,
    /// Directory the default candidates are resolved against.
    pub search_root: PathBuf,
    /// Class names of the custom weights; the food classes when unset.
    pub labels: Option<PathBuf>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            yolo: YoloV8Config::default(),
            weights: None,
            search_root: PathBuf::from("."),
            labels: None,
        }
    }
}

impl ModelOptions {
    /// Existing custom weight files, explicit path first.
    pub fn custom_weights(&self) -> Vec<PathBuf> {
        self.weights
            .iter()
            .cloned()
            .chain(
                CUSTOM_WEIGHT_CANDIDATES
                    .iter()
                    .map(|c| self.search_root.join(c)),
            )
            .filter(|p| p.is_file())
            .collect()
    }

    fn custom_labels(&self) -> Result<ClassLabels, YoloV8Error> {
        match &self.labels {
            Some(path) => ClassLabels::from_file(path).map_err(|e| {
                YoloV8Error::LoadModelError(format!("labels {}: {e}", path.display()))
            }),
            None => Ok(ClassLabels::food()),
        }
    }
}

/// Load the first custom weights that work, falling back to the pretrained
/// checkpoint when there are none.
pub fn load_model(options: &ModelOptions) -> Result<YoloV8, YoloV8Error> {
    load_model_with(options, YoloV8::from_weights, YoloV8::new)
}

fn load_model_with<M>(
    options: &ModelOptions,
    custom: impl Fn(YoloV8Config, &Path, ClassLabels) -> Result<M, YoloV8Error>,
    pretrained: impl FnOnce(YoloV8Config) -> Result<M, YoloV8Error>,
) -> Result<M, YoloV8Error> {
    let candidates = options.custom_weights();
    if !candidates.is_empty() {
        match options.custom_labels() {
            Ok(labels) => {
                for path in &candidates {
                    match custom(options.yolo.clone(), path, labels.clone()) {
                        Ok(model) => {
                            tracing::info!(weights = %path.display(), "custom model loaded");
                            return Ok(model);
                        }
                        Err(e) => {
                            tracing::warn!(weights = %path.display(), "failed to load custom model: {e}")
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }
    }

    tracing::warn!(
        size = %options.yolo.size,
        "no custom model found, using the pretrained {} checkpoint",
        options.yolo.size.checkpoint_name()
    );
    pretrained(options.yolo.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Loaded {
        Custom(PathBuf, usize),
        Pretrained,
    }

    fn temp_root(name: &str) -> std::io::Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("food-detect-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn load(options: &ModelOptions) -> Result<Loaded, YoloV8Error> {
        load_model_with(
            options,
            |_, path, labels| {
                let bytes = std::fs::read(path)
                    .map_err(|e| YoloV8Error::LoadModelError(e.to_string()))?;
                if bytes.starts_with(b"broken") {
                    return Err(YoloV8Error::LoadModelError("broken".to_string()));
                }
                Ok(Loaded::Custom(path.to_path_buf(), labels.len()))
            },
            |_| Ok(Loaded::Pretrained),
        )
    }

    #[test]
    fn test_missing_weights_fall_back_to_pretrained() -> Result<(), Box<dyn std::error::Error>> {
        let root = temp_root("loader-empty")?;
        let options = ModelOptions {
            search_root: root.clone(),
            ..Default::default()
        };
        assert!(options.custom_weights().is_empty());
        assert_eq!(load(&options)?, Loaded::Pretrained);
        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_broken_weights_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let root = temp_root("loader-broken")?;
        std::fs::write(root.join("best.safetensors"), b"broken")?;
        std::fs::write(root.join("model.safetensors"), b"ok")?;
        let options = ModelOptions {
            search_root: root.clone(),
            ..Default::default()
        };

        assert_eq!(
            load(&options)?,
            Loaded::Custom(root.join("model.safetensors"), 10)
        );
        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_explicit_weights_and_labels_win() -> Result<(), Box<dyn std::error::Error>> {
        let root = temp_root("loader-explicit")?;
        std::fs::write(root.join("best.safetensors"), b"ok")?;
        std::fs::write(root.join("mine.safetensors"), b"ok")?;
        std::fs::write(root.join("labels.txt"), b"ramen\nudon\n")?;
        let options = ModelOptions {
            weights: Some(root.join("mine.safetensors")),
            labels: Some(root.join("labels.txt")),
            search_root: root.clone(),
            ..Default::default()
        };

        assert_eq!(
            load(&options)?,
            Loaded::Custom(root.join("mine.safetensors"), 2)
        );
        std::fs::remove_dir_all(&root)?;
        Ok(())
    }
}
