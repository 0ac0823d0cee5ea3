//! Image and EEG data preparation for end-to-end encoding models.
//!
//! Stimulus images and repetition-averaged EEG responses are loaded
//! independently, split with a fixed held-out rule (every 10th training
//! stimulus goes to validation), paired index by index, and served as burn
//! data loaders.

pub mod config;
pub mod data;
pub mod error;
pub mod nn;

pub use config::{EncodingConfig, ModeledTimePoints, TargetSelection};
pub use data::eeg::{load_signal_corpus, SignalLayout};
pub use data::images::{load_image_corpus, ImagePreprocessor};
pub use data::models::{ChannelMetadata, ImageCorpus, ImageSample, Partition, SignalCorpus};
pub use error::{EncodingError, Result};
pub use nn::dataset::{
    build_dataloaders, build_datasets, EncodingBatch, EncodingDataloaders, EncodingDataset,
    EncodingSample,
};
