use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use animegan_rs::{stylize, Config, InferenceSession, PixelBuffer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input.exists(), "Input path does not exist");

    let session = InferenceSession::create_with_options(
        &config.model_descriptor(),
        config.backend_preference(),
        &config.session_options(),
    )
    .context("Failed to load model")?;

    let image_paths = collect_images(&config.input);
    info!(count = image_paths.len(), "images found");

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let mut failed = 0usize;
    for path in &image_paths {
        if let Err(e) = process_image(&session, path, &config).await {
            // one bad image must not stop the batch
            warn!(path = %path.display(), error = ?e, "skipping image");
            failed += 1;
        }
        progress_bar.inc(1);
    }
    progress_bar.finish();
    session.shutdown();

    ensure!(
        failed == 0,
        "{} of {} images failed",
        failed,
        image_paths.len()
    );
    Ok(())
}

async fn process_image(session: &InferenceSession, path: &Path, config: &Config) -> Result<()> {
    let image =
        image::open(path).with_context(|| format!("Failed to open image: {}", path.display()))?;
    let frame = PixelBuffer::from(image);

    let styled = stylize(session, &frame)
        .await
        .with_context(|| format!("Failed to stylize image: {}", path.display()))?;

    let output_path = construct_output_path(path, config)?;
    // the generator output is opaque, so alpha is dropped for every format
    styled
        .to_dynamic_image()?
        .to_rgb8()
        .save_with_format(&output_path, config.output_format())
        .with_context(|| format!("Failed to save image: {}", output_path.display()))
}

fn collect_images(input: &Path) -> Vec<PathBuf> {
    WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| ImageFormat::from_path(e.path()).is_ok())
        .map(|e| e.into_path())
        .collect()
}

fn construct_output_path(path: &Path, config: &Config) -> Result<PathBuf> {
    let relative = if config.input.is_dir() {
        path.strip_prefix(&config.input)?.to_path_buf()
    } else {
        PathBuf::from(path.file_name().context("Input path has no file name")?)
    };

    let output_path = config.output_dir.join(relative);
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(output_path.with_extension(&config.format))
}
