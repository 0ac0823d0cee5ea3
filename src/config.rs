use std::path::PathBuf;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// Stimulus image side length after resizing
pub const IMAGE_SIZE: u32 = 224;

/// Number of color channels fed to the encoder (RGB)
pub const IMAGE_CHANNELS: usize = 3;

/// ImageNet channel statistics used for normalization
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Recognized stimulus file extensions (matched exactly)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg"];

/// Every image (and response) at a position divisible by this stride is held out for validation
pub const HOLDOUT_STRIDE: usize = 10;

/// Image corpus layout under the project directory
pub const IMAGE_SET_DIR: &str = "image_set";
pub const TRAINING_IMAGES_DIR: &str = "training_images";
pub const TEST_IMAGES_DIR: &str = "test_images";

/// EEG corpus layout under the project directory
pub const EEG_DATA_DIR: &str = "eeg_dataset/preprocessed_data";
pub const EEG_TRAINING_FILE: &str = "preprocessed_eeg_training.npy";
pub const EEG_TEST_FILE: &str = "preprocessed_eeg_test.npy";

/// Default training batch size
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Which part of the EEG time course a target covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeledTimePoints {
    /// One time slice: target shape [channels]
    Single,
    /// The full series flattened channel-major: target shape [channels * timepoints]
    All,
}

impl std::fmt::Display for ModeledTimePoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeledTimePoints::Single => write!(f, "single"),
            ModeledTimePoints::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for ModeledTimePoints {
    type Err = EncodingError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "single" => Ok(ModeledTimePoints::Single),
            "all" => Ok(ModeledTimePoints::All),
            other => Err(EncodingError::InvalidConfiguration(format!(
                "unsupported modeled_time_points '{other}' (expected 'single' or 'all')"
            ))),
        }
    }
}

/// Options consumed by the data pipeline
#[derive(Config, Debug)]
pub struct EncodingConfig {
    /// Root holding `image_set/` and `eeg_dataset/`
    pub project_dir: PathBuf,
    /// Subject number, formatted as `sub-NN`
    pub sub: u32,
    #[config(default = "ModeledTimePoints::Single")]
    pub modeled_time_points: ModeledTimePoints,
    #[config(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    /// Modeled time index, only read in `single` mode
    pub time_point: Option<usize>,
    /// Seed for the training loader's shuffle; drawn at random when absent
    pub shuffle_seed: Option<u64>,
}

/// Validated target choice: one in-range time index, or the whole time course
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSelection {
    TimePoint(usize),
    TimeCourse,
}

impl EncodingConfig {
    /// Check the options against the number of recorded time points and
    /// resolve which part of each response becomes the target.
    pub fn validate(&self, num_timepoints: usize) -> crate::error::Result<TargetSelection> {
        if self.batch_size == 0 {
            return Err(EncodingError::InvalidConfiguration(
                "batch_size must be positive".into(),
            ));
        }
        match self.modeled_time_points {
            ModeledTimePoints::All => Ok(TargetSelection::TimeCourse),
            ModeledTimePoints::Single => {
                let t = self.time_point.ok_or_else(|| {
                    EncodingError::InvalidConfiguration(
                        "time_point is required when modeled_time_points is 'single'".into(),
                    )
                })?;
                if t >= num_timepoints {
                    return Err(EncodingError::InvalidConfiguration(format!(
                        "time_point {t} out of range for {num_timepoints} recorded time points"
                    )));
                }
                Ok(TargetSelection::TimePoint(t))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EncodingConfig::new(PathBuf::from("/data"), 1);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.modeled_time_points, ModeledTimePoints::Single);
        assert!(config.time_point.is_none());
    }

    #[test]
    fn test_single_requires_time_point() {
        let config = EncodingConfig::new(PathBuf::from("/data"), 1);
        assert!(matches!(
            config.validate(100),
            Err(EncodingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_time_point_range() {
        let config = EncodingConfig::new(PathBuf::from("/data"), 1).with_time_point(Some(3));
        assert_eq!(config.validate(100).unwrap(), TargetSelection::TimePoint(3));

        let config = config.with_time_point(Some(100));
        assert!(config.validate(100).is_err());
    }

    #[test]
    fn test_all_ignores_time_point() {
        let config = EncodingConfig::new(PathBuf::from("/data"), 1)
            .with_modeled_time_points(ModeledTimePoints::All)
            .with_time_point(Some(1000));
        assert_eq!(config.validate(100).unwrap(), TargetSelection::TimeCourse);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = EncodingConfig::new(PathBuf::from("/data"), 1)
            .with_time_point(Some(0))
            .with_batch_size(0);
        assert!(config.validate(10).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("all".parse::<ModeledTimePoints>().unwrap(), ModeledTimePoints::All);
        assert!("some".parse::<ModeledTimePoints>().is_err());
    }
}
