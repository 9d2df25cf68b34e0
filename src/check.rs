use std::fmt;
use std::path::Path;

use crate::annotate::DEFAULT_FONT_PATHS;
use crate::config::AppConfig;
use crate::yolov8::PRETRAINED_REPO;

/// Outcome of one deployment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Ready.
    Pass,
    /// Works, with a degraded fallback.
    Warn,
    /// The service cannot run.
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "FAIL",
        })
    }
}

/// One line of the deployment report.
#[derive(Debug, Clone)]
pub struct CheckItem {
    /// What was checked.
    pub name: &'static str,
    /// Result.
    pub status: CheckStatus,
    /// Explanation.
    pub detail: String,
}

impl CheckItem {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>4}] {}: {}", self.status, self.name, self.detail)
    }
}

/// Verify that the configured deployment can start and serve requests.
pub fn run_checks(config: &AppConfig) -> Vec<CheckItem> {
    vec![
        check_config(config),
        check_results_dir(&config.results_dir),
        check_weights(config),
        check_font(config.font.as_deref()),
    ]
}

/// Whether the report allows the service to start.
pub fn passed(report: &[CheckItem]) -> bool {
    report.iter().all(|item| item.status != CheckStatus::Fail)
}

fn check_config(config: &AppConfig) -> CheckItem {
    match config.validate() {
        Ok(()) => CheckItem::new("configuration", CheckStatus::Pass, "valid"),
        Err(e) => CheckItem::new("configuration", CheckStatus::Fail, e.to_string()),
    }
}

fn check_results_dir(dir: &Path) -> CheckItem {
    let name = "results directory";
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckItem::new(name, CheckStatus::Fail, format!("{}: {e}", dir.display()));
    }
    let probe = dir.join(".write-check");
    match std::fs::write(&probe, b"ok").and_then(|_| std::fs::remove_file(&probe)) {
        Ok(()) => CheckItem::new(name, CheckStatus::Pass, format!("{} is writable", dir.display())),
        Err(e) => CheckItem::new(
            name,
            CheckStatus::Fail,
            format!("{} is not writable: {e}", dir.display()),
        ),
    }
}

fn check_weights(config: &AppConfig) -> CheckItem {
    let name = "model weights";
    if let Some(path) = config.model.custom_weights().first() {
        return CheckItem::new(name, CheckStatus::Pass, format!("custom weights {}", path.display()));
    }
    let file = config.model.yolo.size.checkpoint_name();
    let cached = hf_hub::Cache::default()
        .model(PRETRAINED_REPO.to_string())
        .get(&file);
    match cached {
        Some(path) => CheckItem::new(
            name,
            CheckStatus::Warn,
            format!("no custom weights, cached fallback {}", path.display()),
        ),
        None => CheckItem::new(
            name,
            CheckStatus::Warn,
            format!("no custom weights, {PRETRAINED_REPO}/{file} is downloaded on first start"),
        ),
    }
}

fn check_font(configured: Option<&Path>) -> CheckItem {
    let name = "label font";
    if let Some(path) = configured {
        return if path.is_file() {
            CheckItem::new(name, CheckStatus::Pass, path.display().to_string())
        } else {
            CheckItem::new(name, CheckStatus::Fail, format!("{} not found", path.display()))
        };
    }
    match DEFAULT_FONT_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
        Some(path) => CheckItem::new(name, CheckStatus::Pass, path.display().to_string()),
        None => CheckItem::new(name, CheckStatus::Warn, "no font found, labels are not drawn"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("food-detect-check-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_missing_weights_only_warn() -> Result<(), Box<dyn std::error::Error>> {
        let root = temp_dir("weights");
        std::fs::create_dir_all(&root)?;
        let mut config = AppConfig {
            results_dir: root.join("results"),
            ..Default::default()
        };
        config.model.search_root = root.clone();

        let report = run_checks(&config);
        let weights = report
            .iter()
            .find(|item| item.name == "model weights")
            .ok_or("missing weights check")?;
        assert_eq!(weights.status, CheckStatus::Warn);
        assert!(passed(&report));
        assert!(root.join("results").is_dir());

        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_custom_weights_and_bad_font() -> Result<(), Box<dyn std::error::Error>> {
        let root = temp_dir("font");
        std::fs::create_dir_all(&root)?;
        std::fs::write(root.join("best.safetensors"), b"w")?;
        let mut config = AppConfig {
            results_dir: root.join("results"),
            font: Some(root.join("missing.ttf")),
            ..Default::default()
        };
        config.model.search_root = root.clone();

        let report = run_checks(&config);
        assert_eq!(report[2].status, CheckStatus::Pass);
        assert_eq!(report[3].status, CheckStatus::Fail);
        assert!(!passed(&report));
        assert!(report[3].to_string().starts_with("[FAIL] label font"));

        std::fs::remove_dir_all(&root)?;
        Ok(())
    }

    #[test]
    fn test_invalid_threshold_fails() {
        let mut config = AppConfig::default();
        config.model.yolo.confidence_threshold = -0.1;
        assert_eq!(check_config(&config).status, CheckStatus::Fail);
    }
}
