// National ID card field extraction
// Command-line front end over the extraction pipeline

use clap::{Parser, Subcommand};
use nidscan::{
    models::{CropMap, DetectionMap},
    processing::{BoxFileDetector, RegionDetector},
    utils::{ExtractError, ExtractorConfig},
    IdCardExtractor,
};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "nidscan", version, about = "Extract text fields from national ID card photos")]
struct Cli {
    /// JSON config file; keys left out keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tesseract traineddata directory (overrides TESSDATA_PREFIX)
    #[arg(long, global = true)]
    tessdata: Option<PathBuf>,

    /// Directory for uploads, crops and preprocessed images
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the checked field boxes for a card photo
    Detect {
        #[arg(long)]
        image: PathBuf,
        /// Boxes file; defaults to the image path with a .json extension
        #[arg(long)]
        boxes: Option<PathBuf>,
    },
    /// Cut the detected regions out of a card photo
    Crop {
        #[arg(long)]
        image: PathBuf,
        /// JSON file mapping field labels to [x1, y1, x2, y2]
        #[arg(long)]
        boxes: PathBuf,
    },
    /// Recognize text in existing crops
    Recognize {
        /// JSON file mapping field labels to crop image paths
        #[arg(long)]
        crops: PathBuf,
        /// One string per field instead of a list of lines
        #[arg(long)]
        flat: bool,
    },
    /// Crop, recognize and decode one card photo
    Run {
        #[arg(long)]
        image: PathBuf,
        /// Boxes file; defaults to the image path with a .json extension
        #[arg(long)]
        boxes: Option<PathBuf>,
        #[arg(long)]
        flat: bool,
        /// Print boxes and crop references along with the record
        #[arg(long, conflicts_with = "flat")]
        report: bool,
    },
    /// Store a card photo as an upload and run the full pipeline on it
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        boxes: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<ExtractorConfig, ExtractError> {
    let mut config = match &cli.config {
        Some(path) => ExtractorConfig::from_file(path)?,
        None => ExtractorConfig::default(),
    }
    .with_env_overrides();

    if let Some(tessdata) = &cli.tessdata {
        config.tessdata = Some(tessdata.clone());
    }
    if let Some(root) = &cli.storage_root {
        config.storage_root = root.clone();
    }
    config.validated()
}

fn detector_for(boxes: Option<&Path>) -> BoxFileDetector {
    match boxes {
        Some(path) => BoxFileDetector::new(path),
        None => BoxFileDetector::sidecar(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ExtractError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), ExtractError> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Detect { image, boxes } => {
            let extractor = IdCardExtractor::new(config, detector_for(boxes.as_deref()))?;
            let boxes = extractor.detect(&image)?;
            print_json(&json!({
                "boxes": boxes,
                "image_url": extractor.store().public_url(&image),
            }))
        }
        Command::Crop { image, boxes } => {
            let detections = BoxFileDetector::new(&boxes).detect(&image)?;
            let extractor = IdCardExtractor::new(config, DetectionMap::new())?;
            let crop_map = extractor.crop(&image, &detections)?;
            print_json(&json!({
                "crops": extractor.public_crops(&crop_map),
                "crop_map": crop_map,
            }))
        }
        Command::Recognize { crops, flat } => {
            let raw = fs::read_to_string(&crops)?;
            let crop_map: CropMap = serde_json::from_str(&raw)?;
            let extractor = IdCardExtractor::new(config, DetectionMap::new())?;
            let record = extractor.recognize(&crop_map)?;
            if flat {
                print_json(&record.flattened())
            } else {
                print_json(&record)
            }
        }
        Command::Run {
            image,
            boxes,
            flat,
            report,
        } => {
            let extractor = IdCardExtractor::new(config, detector_for(boxes.as_deref()))?;
            let run = extractor.run_report(&image)?;
            if report {
                print_json(&run)
            } else if flat {
                print_json(&run.record.flattened())
            } else {
                print_json(&run.record)
            }
        }
        Command::Upload { file, boxes } => {
            let bytes = fs::read(&file)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.jpg".to_string());
            // The stored upload gets a new name, so a sidecar lookup would miss the boxes
            let boxes = boxes.unwrap_or_else(|| file.with_extension("json"));
            let extractor = IdCardExtractor::new(config, BoxFileDetector::new(boxes))?;
            print_json(&extractor.run_upload(&name, &bytes)?)
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        log::error!("{}", err);
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
