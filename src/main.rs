use argh::FromArgs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use food_detect::{
    AppConfig, Annotator, ModelOptions, ObjectDetector, ResultStore, YoloV8Config, YoloV8Size,
    load_model, passed, run_checks,
    server::{self, AppState},
};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Food detection with YOLOv8
struct Args {
    /// the size of the model to use: n, s, m, l, x
    #[argh(option, default = "\"n\".to_string()")]
    size: String,

    /// the confidence threshold for the model
    #[argh(option, default = "0.25")]
    confidence_threshold: f32,

    /// the nms threshold for the model
    #[argh(option, default = "0.45")]
    nms_threshold: f32,

    /// run the model on the first cuda device when available
    #[argh(switch)]
    gpu: bool,

    /// custom safetensors weights, tried before the default locations
    #[argh(option)]
    weights: Option<PathBuf>,

    /// class names of the custom weights, one per line
    #[argh(option)]
    labels: Option<PathBuf>,

    /// directory searched for custom weights and receiving uploaded ones
    #[argh(option, default = "PathBuf::from(\".\")")]
    model_dir: PathBuf,

    /// font used to draw labels
    #[argh(option)]
    font: Option<PathBuf>,

    /// directory annotated images are written to
    #[argh(option, default = "PathBuf::from(\"results\")")]
    results_dir: PathBuf,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Serve(ServeArgs),
    Detect(DetectArgs),
    Check(CheckArgs),
}

#[derive(FromArgs)]
/// run the web server
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    /// address to bind
    #[argh(option, default = "\"0.0.0.0\".to_string()")]
    host: String,

    /// port to bind
    #[argh(option, default = "5000")]
    port: u16,

    /// largest accepted upload in MiB
    #[argh(option, default = "16")]
    max_upload_mb: usize,

    /// timeout of url uploads in seconds
    #[argh(option, default = "10")]
    fetch_timeout: u64,
}

#[derive(FromArgs)]
/// detect objects in one image and write the annotated copy
#[argh(subcommand, name = "detect")]
struct DetectArgs {
    /// path to an input image
    #[argh(option)]
    image: PathBuf,

    /// where to write the annotated image
    #[argh(option, default = "PathBuf::from(\"annotated_food_detection.png\")")]
    output: PathBuf,
}

#[derive(FromArgs)]
/// validate the deployment before starting the server
#[argh(subcommand, name = "check")]
struct CheckArgs {}

impl Args {
    fn config(&self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let yolo = YoloV8Config {
            size: YoloV8Size::try_from(self.size.as_str())?,
            confidence_threshold: self.confidence_threshold,
            nms_threshold: self.nms_threshold,
            use_cpu: !self.gpu,
        };
        let mut config = AppConfig {
            results_dir: self.results_dir.clone(),
            model: ModelOptions {
                yolo,
                weights: self.weights.clone(),
                search_root: self.model_dir.clone(),
                labels: self.labels.clone(),
            },
            font: self.font.clone(),
            ..Default::default()
        };
        if let Command::Serve(serve) = &self.command {
            config.host = serve.host.clone();
            config.port = serve.port;
            config.max_upload_bytes = serve.max_upload_mb * 1024 * 1024;
            config.fetch_timeout = Duration::from_secs(serve.fetch_timeout);
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Args = argh::from_env();
    let config = args.config()?;

    match args.command {
        Command::Serve(_) => serve(config),
        Command::Detect(detect_args) => detect(&config, &detect_args),
        Command::Check(_) => check(&config),
    }
}

fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let model = load_model(&config.model)?;
    tracing::info!(source = %model.source(), "model ready");

    let annotator = Annotator::discover(config.font.as_deref());
    tracing::info!(labels = annotator.has_font(), "annotator ready");
    let store = ResultStore::open(&config.results_dir)?;
    let state = AppState::new(Arc::new(model), annotator, store, &config);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(server::serve(&config, state))?;
    Ok(())
}

fn detect(config: &AppConfig, args: &DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let model = load_model(&config.model)?;
    let image = image::open(&args.image)?.to_rgb8();

    let report = model.detect(&image)?;
    println!("Found {} items", report.total_detections());
    println!("{:<20} {:>10}  Bounding Box", "Item", "Confidence");
    for d in report.detections() {
        let [x1, y1, x2, y2] = d.bbox;
        println!(
            "{:<20} {:>9}%  ({x1}, {y1}) to ({x2}, {y2})",
            d.class_name, d.confidence
        );
    }

    let annotated =
        Annotator::discover(config.font.as_deref()).annotate(&image, report.detections());
    annotated.save(&args.output)?;
    tracing::info!(output = %args.output.display(), "annotated image written");
    Ok(())
}

fn check(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = run_checks(config);
    for item in &report {
        println!("{item}");
    }
    if !passed(&report) {
        return Err("deployment check failed".into());
    }
    println!("deployment ready");
    Ok(())
}
