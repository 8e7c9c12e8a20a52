use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use securecam_core::{EmbeddingStore, FaceDetector, FaceRecognizer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod flow;

use config::Config;

#[derive(Parser)]
#[command(name = "securecam", about = "SecureCam face check-in CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a user from one or more face images
    Enroll {
        /// Numeric user id (re-enrolling an id adds another face row)
        #[arg(short, long)]
        id: i64,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Face image paths
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Run recognition over a directory of frames
    Recognize {
        /// Directory of frame images, consumed in sorted order
        #[arg(long)]
        frames: PathBuf,
        /// Directory for annotated output frames
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List enrolled users
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { id, name, images } => {
            let mut store = open_store(&config)?;
            let mut detector = FaceDetector::load_with_config(
                &config.detector_model_path(),
                config.detector_config(),
            )?;
            let mut recognizer = FaceRecognizer::load(&config.embedder_model_path())?;

            let enrolled =
                flow::enroll_images(&mut detector, &mut recognizer, &mut store, id, &name, &images);
            if enrolled == 0 {
                bail!("no image enrolled for user {name}");
            }

            store
                .save(&config.data_dir)
                .context("failed to save store")?;
            println!("Enrolled {enrolled} face(s) for {name} (id {id})");
        }
        Commands::Recognize { frames, out } => {
            let store = open_store(&config)?;
            if store.is_empty() {
                tracing::warn!("store is empty; every face will be reported as unknown");
            }
            let mut detector = FaceDetector::load_with_config(
                &config.detector_model_path(),
                config.detector_config(),
            )?;
            let mut recognizer = FaceRecognizer::load(&config.embedder_model_path())?;

            flow::recognize_frames(
                &mut detector,
                &mut recognizer,
                &store,
                &frames,
                out.as_deref(),
                config.match_threshold,
            )?;
        }
        Commands::List => {
            let store = open_store(&config)?;
            if store.is_empty() {
                println!("No users enrolled");
            } else {
                for user in store.users() {
                    println!("{:>6}  {}", user.id, user.name);
                }
            }
        }
    }

    Ok(())
}

/// Load the persisted store from the data directory, or start a fresh one if
/// none exists yet.
fn open_store(config: &Config) -> Result<EmbeddingStore> {
    if EmbeddingStore::exists_at(&config.data_dir) {
        EmbeddingStore::load(&config.data_dir)
            .with_context(|| format!("failed to load store from {}", config.data_dir.display()))
    } else {
        tracing::info!(path = %config.data_dir.display(), "no persisted store, starting empty");
        Ok(EmbeddingStore::default())
    }
}
