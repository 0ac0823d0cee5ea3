use std::sync::Arc;

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// One preprocessed stimulus: a [channels, height, width] tensor.
///
/// Storage is shared, so clones are cheap and the pixels never change after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pixels: Arc<Array3<f32>>,
}

impl ImageSample {
    pub fn new(pixels: Array3<f32>) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.pixels.view()
    }

    /// [channels, height, width]
    pub fn shape(&self) -> [usize; 3] {
        let (c, h, w) = self.pixels.dim();
        [c, h, w]
    }

    /// Values in row-major (CHW) order
    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.pixels.iter()
    }
}

/// Preprocessed stimuli for the three partitions
#[derive(Debug, Clone, Default)]
pub struct ImageCorpus {
    pub train: Vec<ImageSample>,
    pub val: Vec<ImageSample>,
    pub test: Vec<ImageSample>,
}

/// Channel names and sampled time points, shared by every partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub ch_names: Vec<String>,
    pub times: Vec<f64>,
}

impl ChannelMetadata {
    pub fn num_channels(&self) -> usize {
        self.ch_names.len()
    }

    pub fn num_timepoints(&self) -> usize {
        self.times.len()
    }
}

/// Repetition-averaged responses, [stimuli, channels, timepoints] per partition
#[derive(Debug, Clone)]
pub struct SignalCorpus {
    pub train: Array3<f32>,
    pub val: Array3<f32>,
    pub test: Array3<f32>,
    pub metadata: ChannelMetadata,
}

impl SignalCorpus {
    pub fn num_channels(&self) -> usize {
        self.train.dim().1
    }

    pub fn num_timepoints(&self) -> usize {
        self.train.dim().2
    }
}

/// Named data split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Train, Partition::Val, Partition::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ImageCorpus {
    pub fn partition(&self, partition: Partition) -> &[ImageSample] {
        match partition {
            Partition::Train => &self.train,
            Partition::Val => &self.val,
            Partition::Test => &self.test,
        }
    }
}

impl SignalCorpus {
    pub fn partition(&self, partition: Partition) -> &Array3<f32> {
        match partition {
            Partition::Train => &self.train,
            Partition::Val => &self.val,
            Partition::Test => &self.test,
        }
    }
}
