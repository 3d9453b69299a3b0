//! Quadcam command-line front end.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quadcam_mux::preview::{multipart_chunk, unavailable_frame};
use quadcam_mux::{spawn_preview, CameraManager, CameraSelector, CaptureStore, Config};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type RigManager = CameraManager<linux_embedded_hal::I2cdev, quadcam_mux::V4L2Device>;

#[derive(Parser)]
#[command(name = "quadcam")]
#[command(about = "Capture from four cameras behind an I2C multiplexer")]
#[command(version)]
struct Cli {
    /// JSON configuration file; defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the manager status as JSON
    Status,

    /// Route one camera (0-3) or "all" for the composite view
    Select {
        /// Camera index or "all"
        camera: CameraSelector,
    },

    /// Switch to the four-in-one preview
    StartPreview,

    /// Leave the four-in-one preview and select one camera
    StopPreview {
        /// Camera to select
        #[arg(long, default_value = "0")]
        camera: u8,
    },

    /// Take one full-resolution capture
    Capture {
        /// Camera index or "all"; defaults to the current camera
        #[arg(long)]
        camera: Option<CameraSelector>,

        /// Output file (default: next capture number in the capture directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture every camera, save the images and their grid
    CaptureAll {
        /// Center-crop each image to the configured crop resolution
        #[arg(long)]
        crop: bool,
    },

    /// Write the live preview as an MJPEG multipart stream
    Preview {
        /// Number of frames to record
        #[arg(short = 'n', long, default_value = "30")]
        frames: usize,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the path of the most recent grid image
    Latest,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    let store = CaptureStore::new(&config.capture_dir)
        .with_context(|| format!("failed to open {}", config.capture_dir.display()))?;

    if matches!(cli.command, Commands::Latest) {
        return print_latest(&store);
    }

    let manager = match CameraManager::open(&config) {
        Ok(manager) => Arc::new(manager),
        Err(err) => {
            if let Commands::Preview { output, .. } = &cli.command {
                if let Err(write_err) = write_unavailable(output) {
                    warn!("no unavailable frame written: {write_err:#}");
                }
            }
            return Err(err).context("camera manager unavailable");
        }
    };
    let result = dispatch(cli.command, &manager, &config, &store);
    manager.shutdown();
    result
}

fn print_latest(store: &CaptureStore) -> Result<()> {
    match store.latest_grid()? {
        Some(path) => println!("{}", path.display()),
        None => bail!("no captures found in {}", store.dir().display()),
    }
    Ok(())
}

/// Leave one service-unavailable frame in the preview output.
fn write_unavailable(path: &Path) -> Result<()> {
    let jpeg = unavailable_frame()?;
    fs::write(path, multipart_chunk(&jpeg))
        .with_context(|| format!("failed to write {}", path.display()))
}

fn dispatch(
    command: Commands,
    manager: &Arc<RigManager>,
    config: &Config,
    store: &CaptureStore,
) -> Result<()> {
    match command {
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Commands::Select { camera } => {
            if !manager.select_camera(camera) {
                bail!("failed to select camera {camera}");
            }
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Commands::StartPreview => {
            if !manager.start_composite_preview() {
                bail!("failed to start the composite preview");
            }
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Commands::StopPreview { camera } => {
            if !manager.stop_composite_preview(camera) {
                bail!("failed to select camera {camera}");
            }
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Commands::Capture { camera, output } => {
            let captured = manager.capture_image(camera)?;
            if let Some(err) = captured.error() {
                warn!(%err, "capture failed, saving placeholder");
            }
            let path = match output {
                Some(path) => path,
                None => {
                    let number = store.next_capture_number()?;
                    let label = captured
                        .camera
                        .map_or_else(|| "unknown".to_owned(), |camera| camera.to_string());
                    store.dir().join(format!("capture_{number}_cam{label}.jpg"))
                }
            };
            store
                .save_image(&path, &captured.image)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::CaptureAll { crop } => {
            let images = if crop {
                manager.capture_all_cropped()
            } else {
                manager.capture_all_cameras()
            };
            let grid = manager.build_grid(&images);
            if let Err(err) = &grid {
                warn!(%err, "grid not saved");
            }
            let saved = store.save_burst(&images, grid.as_ref().ok())?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        Commands::Preview { frames, output } => {
            let file = File::create(&output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            let mut writer = BufWriter::new(file);

            let mut handle = spawn_preview(Arc::clone(manager), &config.preview);
            let mut written = 0;
            for frame in handle.by_ref().take(frames) {
                writer.write_all(&multipart_chunk(&frame.jpeg))?;
                written += 1;
            }
            if !handle.stop(Duration::from_secs(5)) {
                warn!("preview loop still busy, detaching");
            }
            writer.flush()?;
            info!(written, path = %output.display(), "preview recorded");
        }
        Commands::Latest => print_latest(store)?,
    }
    Ok(())
}
