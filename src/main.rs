//! skill-scan - Camera region text recognition and skill matching
//!
//! Command-line shell around the scan pipeline. Still images and image
//! directories stand in for the live camera.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use skill_scan::auto_capture::{AutoCaptureRunner, AutoCaptureSpeed};
use skill_scan::capture::{DirectorySource, DisplayRect, FrameSource, ImageFileSource, NormalizedRegion};
use skill_scan::config::{self, AppConfig};
use skill_scan::matching::{Vocabularies, WaitDetector};
use skill_scan::pipeline::{CaptureTarget, ManualAction, ScanPipeline};
use skill_scan::shared::AutoCaptureEvent;
use skill_scan::storage::MemoryRecordStore;
use skill_scan::vision::{PercentCallback, Preprocessor, RecognitionAdapter, TesseractFactory};

/// skill-scan - Camera region OCR with fuzzy skill matching
#[derive(Parser, Debug)]
#[command(name = "skill-scan")]
#[command(about = "Recognize skill names in a region of a camera image")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Normalized region as x,y,width,height (each 0-1)
    #[arg(short, long, value_parser = parse_region)]
    region: NormalizedRegion,

    /// Display container size as WIDTHxHEIGHT; defaults to the video size
    #[arg(short, long, value_parser = parse_display, default_value = "0x0")]
    display: DisplayRect,

    /// Record table the results belong to
    #[arg(short, long, default_value = "default")]
    table: String,

    /// Vocabulary TOML file (overrides the config)
    #[arg(long)]
    vocabulary: Option<PathBuf>,

    /// Binarization threshold (overrides the config)
    #[arg(long)]
    threshold: Option<u8>,

    /// Skip GPU binarization
    #[arg(long)]
    cpu: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a region of one image
    Scan {
        /// Image to scan
        image: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Also write the result as a new record
        #[arg(long)]
        record: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the auto-capture loop over an image or a directory of frames
    Auto {
        /// Image file or directory of frames
        source: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Sampling speed (overrides the config)
        #[arg(long, value_enum)]
        speed: Option<SpeedArg>,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        duration: u64,
    },
    /// List the recognition languages installed for tesseract
    Languages,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SpeedArg {
    Slow,
    Normal,
    Fast,
}

impl From<SpeedArg> for AutoCaptureSpeed {
    fn from(speed: SpeedArg) -> Self {
        match speed {
            SpeedArg::Slow => AutoCaptureSpeed::Slow,
            SpeedArg::Normal => AutoCaptureSpeed::Normal,
            SpeedArg::Fast => AutoCaptureSpeed::Fast,
        }
    }
}

fn parse_region(s: &str) -> Result<NormalizedRegion, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("invalid number '{}': {}", p, e)))
        .collect::<Result<_, _>>()?;

    match parts.as_slice() {
        [x, y, w, h] => Ok(NormalizedRegion::new(*x, *y, *w, *h)),
        _ => Err("expected x,y,width,height".to_string()),
    }
}

fn parse_display(s: &str) -> Result<DisplayRect, String> {
    let (w, h) = s
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let w: f32 = w.trim().parse().map_err(|e| format!("invalid width: {}", e))?;
    let h: f32 = h.trim().parse().map_err(|e| format!("invalid height: {}", e))?;
    Ok(DisplayRect::new(w, h))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    match args.command {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Languages => {
            let config = config::load_or_default(&config_path)?;
            list_languages(&config).await
        }
        Command::Scan {
            image,
            target,
            record,
            json,
        } => {
            let config = config::load_or_default(&config_path)?;
            run_scan(&config, &image, &target, record, json).await
        }
        Command::Auto {
            source,
            target,
            speed,
            duration,
        } => {
            let config = config::load_or_default(&config_path)?;
            let speed = speed.map(Into::into).unwrap_or(config.auto_capture.speed);
            run_auto(&config, &source, &target, speed, Duration::from_secs(duration)).await
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_config(&AppConfig::default(), path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn list_languages(config: &AppConfig) -> Result<()> {
    let languages = TesseractFactory::new(config.recognition.clone())
        .list_languages()
        .await
        .context("Failed to query tesseract")?;

    for language in languages {
        println!("{}", language);
    }
    Ok(())
}

/// Build the shared pipeline from config and command-line overrides
async fn build_pipeline(config: &AppConfig, target: &TargetArgs) -> Result<Arc<ScanPipeline>> {
    let vocabulary_path = target
        .vocabulary
        .clone()
        .or_else(|| config.matching.vocabulary_path.clone())
        .context("No vocabulary file given (use --vocabulary or matching.vocabulary_path)")?;
    let vocabularies = Vocabularies::load(&vocabulary_path)?;

    let mut preprocess = config.preprocess.clone();
    if let Some(threshold) = target.threshold {
        preprocess.threshold = threshold;
    }
    if target.cpu {
        preprocess.use_gpu = false;
    }
    let preprocessor = Preprocessor::detect(&preprocess).await;

    let factory = TesseractFactory::new(config.recognition.clone());
    let adapter = Arc::new(RecognitionAdapter::new(Arc::new(factory)));

    Ok(Arc::new(
        ScanPipeline::new(adapter, vocabularies)
            .with_capture_settings(config.capture.clone())
            .with_preprocessor(preprocessor)
            .with_wait_detector(WaitDetector::new(config.wait.clone()))
            .with_gate(config.matching.gate.clone()),
    ))
}

fn capture_target(target: &TargetArgs) -> CaptureTarget {
    CaptureTarget::new(target.region, target.display, target.table.clone())
}

async fn run_scan(
    config: &AppConfig,
    image: &Path,
    target: &TargetArgs,
    record: bool,
    json: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config, target).await?;

    let source = ImageFileSource::new(image);
    source.start(None).await?;
    let frame = source.latest_frame()?.context("Image has no frame")?;

    let on_progress: PercentCallback = Arc::new(|pct| tracing::debug!("Recognizing... {}%", pct));
    let outcome = pipeline
        .scan_once(&frame, &capture_target(target), Some(on_progress))
        .await;
    pipeline.adapter().teardown().await;

    let Some(outcome) = outcome? else {
        bail!("Capture skipped: the region is too small or outside the image");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("Text:   {}", outcome.raw_text.replace('\n', " "));
        match &outcome.pair {
            None => println!("Result: still loading"),
            Some(pair) => {
                println!(
                    "Series: {} ({}, score {})",
                    pair.series.skill, pair.series.mode, pair.series.score
                );
                println!(
                    "Group:  {} ({}, score {})",
                    pair.group.skill, pair.group.mode, pair.group.score
                );
            }
        }
    }

    if record {
        let Some(pair) = &outcome.pair else {
            bail!("Not recording a loading placeholder");
        };
        let store = MemoryRecordStore::new();
        if let ManualAction::Created(created) = pipeline
            .apply_manual(&store, &target.table, pair, None)
            .await?
        {
            println!("Record: #{} ({})", created.position, created.id);
        }
    }

    Ok(())
}

async fn run_auto(
    config: &AppConfig,
    source_path: &Path,
    target: &TargetArgs,
    speed: AutoCaptureSpeed,
    duration: Duration,
) -> Result<()> {
    let pipeline = build_pipeline(config, target).await?;

    let source: Arc<dyn FrameSource> = if source_path.is_dir() {
        Arc::new(DirectorySource::new(source_path))
    } else {
        Arc::new(ImageFileSource::new(source_path))
    };
    source.start(None).await?;

    let store = Arc::new(MemoryRecordStore::new());
    let (tx, rx) = unbounded();

    let printer = std::thread::spawn(move || {
        for event in rx {
            match event {
                AutoCaptureEvent::StateChanged(state) => println!("[state] {}", state),
                AutoCaptureEvent::Waiting { .. } => println!("[wait] still loading"),
                AutoCaptureEvent::Locked { pair, record, .. } => println!(
                    "[lock] #{} {} / {}",
                    record.position, pair.series.skill, pair.group.skill
                ),
                AutoCaptureEvent::Unconfident { pair, .. } => println!(
                    "[weak] {} ({}) / {} ({})",
                    pair.series.skill, pair.series.mode, pair.group.skill, pair.group.mode
                ),
                AutoCaptureEvent::RecognitionFailed(e) => println!("[error] {}", e),
                AutoCaptureEvent::RecordFailed(e) => println!("[error] record: {}", e),
                AutoCaptureEvent::CameraError(e) => println!("[camera] {}", e),
                AutoCaptureEvent::Running(_) | AutoCaptureEvent::Progress(_) => {}
            }
        }
    });

    let runner = AutoCaptureRunner::new(
        pipeline.clone(),
        source.clone(),
        store.clone(),
        capture_target(target),
        tx,
    )
    .with_speed(speed);

    runner.start();
    let deadline = Instant::now() + duration;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
        if !runner.is_running() {
            warn!("Auto-capture stopped on its own");
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    runner.stop();
    drop(runner);
    source.stop().await;
    pipeline.adapter().teardown().await;

    // In-flight samples hold event senders until they finish
    let _ = tokio::task::spawn_blocking(move || printer.join()).await;

    let records = store.records(&target.table);
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
