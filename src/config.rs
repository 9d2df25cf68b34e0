use std::path::PathBuf;
use std::time::Duration;

use crate::loader::ModelOptions;

/// Upload extensions accepted by the web handlers.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Configuration error enum.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    /// A threshold outside `[0, 1]`.
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange {
        /// Option name.
        name: &'static str,
        /// Rejected value.
        value: f32,
    },

    /// A zero upload limit.
    #[error("max upload size must be positive")]
    ZeroUploadLimit,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Directory annotated images are written to.
    pub results_dir: PathBuf,
    /// Model loading options.
    pub model: ModelOptions,
    /// Font used for labels; common system fonts are tried when unset.
    pub font: Option<PathBuf>,
    /// Largest accepted upload or fetched image, in bytes.
    pub max_upload_bytes: usize,
    /// Timeout of URL uploads.
    pub fetch_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            results_dir: PathBuf::from("results"),
            model: ModelOptions::default(),
            font: None,
            max_upload_bytes: 16 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let yolo = &self.model.yolo;
        for (name, value) in [
            ("confidence threshold", yolo.confidence_threshold),
            ("nms threshold", yolo.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Whether a file name carries an accepted image extension.
pub fn has_allowed_extension(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
