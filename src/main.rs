use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use eeg_encoding_data::nn::CpuBackend;
use eeg_encoding_data::{
    build_dataloaders, load_image_corpus, load_signal_corpus, EncodingConfig, ImagePreprocessor,
    ModeledTimePoints, SignalLayout,
};

/// Load stimulus images and EEG responses and build train/val/test loaders
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing image_set/ and eeg_dataset/
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Subject number
    #[arg(long, default_value_t = 1)]
    sub: u32,

    /// Model a single EEG time point or the whole time course
    #[arg(long, value_enum, default_value_t = ModeledTimePoints::Single)]
    modeled_time_points: ModeledTimePoints,

    #[arg(long, default_value_t = eeg_encoding_data::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Modeled time index (required with --modeled-time-points single)
    #[arg(long)]
    time_point: Option<usize>,

    #[arg(long)]
    shuffle_seed: Option<u64>,

    /// Read options from a JSON config file instead of the flags above
    #[arg(long, conflicts_with = "project_dir")]
    config: Option<PathBuf>,

    /// Write the effective config as JSON
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Args {
    fn encoding_config(&self) -> Result<EncodingConfig> {
        if let Some(path) = &self.config {
            return EncodingConfig::load(path)
                .map_err(|e| anyhow!("failed to load config {}: {}", path.display(), e));
        }
        let project_dir = self
            .project_dir
            .clone()
            .context("either --project-dir or --config is required")?;
        Ok(EncodingConfig::new(project_dir, self.sub)
            .with_modeled_time_points(self.modeled_time_points)
            .with_batch_size(self.batch_size)
            .with_time_point(self.time_point)
            .with_shuffle_seed(self.shuffle_seed))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.encoding_config()?;

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("failed to save config to {}", path.display()))?;
        tracing::info!("Config saved to {}", path.display());
    }

    let images = load_image_corpus(&config.project_dir, &ImagePreprocessor::default())
        .context("failed to load stimulus images")?;
    let signals = load_signal_corpus(&config.project_dir, config.sub, &SignalLayout::default())
        .context("failed to load EEG responses")?;

    let device = Default::default();
    let loaders = build_dataloaders::<CpuBackend>(&config, images, &signals, &device)
        .context("failed to build data loaders")?;

    tracing::info!(
        "Train: {} examples in {} batches of up to {}",
        loaders.train_len,
        loaders.train_len.div_ceil(config.batch_size),
        config.batch_size
    );
    tracing::info!("Val: {} examples, Test: {} examples", loaders.val_len, loaders.test_len);

    if let Some(batch) = loaders.val.iter().next() {
        tracing::info!(
            "Validation batch: images {:?}, targets {:?}",
            batch.images.dims(),
            batch.targets.dims()
        );
    }

    Ok(())
}
