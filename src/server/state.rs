use std::path::PathBuf;
use std::sync::Arc;

use crate::annotate::Annotator;
use crate::config::AppConfig;
use crate::detector::ObjectDetector;
use crate::fetch::ImageFetcher;
use crate::storage::ResultStore;

/// Shared state of the HTTP handlers. The detector is loaded once and
/// shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Inference adapter.
    pub detector: Arc<dyn ObjectDetector>,
    /// Draws boxes and labels.
    pub annotator: Arc<Annotator>,
    /// Where annotated images go.
    pub store: Arc<ResultStore>,
    /// Downloads images for URL uploads.
    pub fetcher: ImageFetcher,
    /// Directory uploaded model weights are saved to.
    pub model_dir: PathBuf,
    /// Largest accepted image upload, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Assemble the state from loaded components and the configuration.
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        annotator: Annotator,
        store: ResultStore,
        config: &AppConfig,
    ) -> Self {
        Self {
            detector,
            annotator: Arc::new(annotator),
            store: Arc::new(store),
            fetcher: ImageFetcher::new(config.fetch_timeout, config.max_upload_bytes),
            model_dir: config.model.search_root.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}
