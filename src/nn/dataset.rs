use std::sync::Arc;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::{backend::Backend, Tensor},
};
use ndarray::{Array2, Array3, Axis};

use crate::config::{EncodingConfig, TargetSelection};
use crate::data::models::{ImageCorpus, ImageSample, Partition, SignalCorpus};
use crate::error::{EncodingError, Result};

/// A single paired example: a stimulus image and the EEG response it evoked
#[derive(Debug, Clone)]
pub struct EncodingSample {
    /// [3, height, width]
    pub image: ImageSample,
    /// [channels] in `single` mode, [channels * timepoints] in `all` mode
    pub target: Vec<f32>,
}

pub type ImageTransform = Arc<dyn Fn(ImageSample) -> ImageSample + Send + Sync>;
pub type TargetTransform = Arc<dyn Fn(Vec<f32>) -> Vec<f32> + Send + Sync>;

/// Turn [stimuli, channels, timepoints] responses into one target row per stimulus.
///
/// `TimePoint` slices that time index; `TimeCourse` flattens channel-major so
/// a row reshaped to [channels, timepoints] gives back each channel's series.
///
/// # Panics
///
/// If a `TimePoint` index is not below the number of time points. Obtain the
/// selection from [`EncodingConfig::validate`] to rule that out.
pub fn select_targets(responses: &Array3<f32>, selection: TargetSelection) -> Array2<f32> {
    let (stimuli, channels, timepoints) = responses.dim();
    match selection {
        TargetSelection::TimePoint(t) => responses.index_axis(Axis(2), t).to_owned(),
        TargetSelection::TimeCourse => Array2::from_shape_fn((stimuli, channels * timepoints), |(s, j)| {
            responses[[s, j / timepoints, j % timepoints]]
        }),
    }
}

/// Random-access (image, target) pairs for one partition.
///
/// Owns its partition's image list and target rows; index `i` of one always
/// pairs with index `i` of the other.
#[derive(Clone)]
pub struct EncodingDataset {
    partition: Partition,
    images: Vec<ImageSample>,
    targets: Array2<f32>,
    image_transform: Option<ImageTransform>,
    target_transform: Option<TargetTransform>,
}

impl EncodingDataset {
    pub fn new(partition: Partition, images: Vec<ImageSample>, targets: Array2<f32>) -> Result<Self> {
        if images.len() != targets.nrows() {
            return Err(EncodingError::ShapeMismatch {
                partition,
                images: images.len(),
                responses: targets.nrows(),
            });
        }
        Ok(Self {
            partition,
            images,
            targets,
            image_transform: None,
            target_transform: None,
        })
    }

    /// Applied to the image on every `get`
    pub fn with_image_transform(
        mut self,
        transform: impl Fn(ImageSample) -> ImageSample + Send + Sync + 'static,
    ) -> Self {
        self.image_transform = Some(Arc::new(transform));
        self
    }

    /// Applied to the target on every `get`
    pub fn with_target_transform(
        mut self,
        transform: impl Fn(Vec<f32>) -> Vec<f32> + Send + Sync + 'static,
    ) -> Self {
        self.target_transform = Some(Arc::new(transform));
        self
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Length of each (untransformed) target vector
    pub fn target_size(&self) -> usize {
        self.targets.ncols()
    }
}

impl std::fmt::Debug for EncodingDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingDataset")
            .field("partition", &self.partition)
            .field("len", &self.images.len())
            .field("target_size", &self.targets.ncols())
            .field("image_transform", &self.image_transform.is_some())
            .field("target_transform", &self.target_transform.is_some())
            .finish()
    }
}

impl Dataset<EncodingSample> for EncodingDataset {
    fn get(&self, index: usize) -> Option<EncodingSample> {
        let image = self.images.get(index)?.clone();
        let target = self.targets.row(index).to_vec();

        let image = match &self.image_transform {
            Some(transform) => transform(image),
            None => image,
        };
        let target = match &self.target_transform {
            Some(transform) => transform(target),
            None => target,
        };
        Some(EncodingSample { image, target })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Train, validation and test datasets, each bound to its own images
#[derive(Debug, Clone)]
pub struct EncodingDatasets {
    pub train: EncodingDataset,
    pub val: EncodingDataset,
    pub test: EncodingDataset,
}

/// Every partition must have as many images as response rows.
pub fn check_alignment(images: &ImageCorpus, signals: &SignalCorpus) -> Result<()> {
    for partition in Partition::ALL {
        let n_images = images.partition(partition).len();
        let n_responses = signals.partition(partition).dim().0;
        if n_images != n_responses {
            return Err(EncodingError::ShapeMismatch {
                partition,
                images: n_images,
                responses: n_responses,
            });
        }
    }
    Ok(())
}

/// Pair images with targets for all three partitions.
///
/// Configuration and stimulus counts are validated before anything is built.
pub fn build_datasets(
    config: &EncodingConfig,
    images: ImageCorpus,
    signals: &SignalCorpus,
) -> Result<EncodingDatasets> {
    let selection = config.validate(signals.num_timepoints())?;
    check_alignment(&images, signals)?;

    let ImageCorpus { train, val, test } = images;
    let datasets = EncodingDatasets {
        train: EncodingDataset::new(Partition::Train, train, select_targets(&signals.train, selection))?,
        val: EncodingDataset::new(Partition::Val, val, select_targets(&signals.val, selection))?,
        test: EncodingDataset::new(Partition::Test, test, select_targets(&signals.test, selection))?,
    };

    tracing::info!(
        "Built {} datasets: {} train, {} val, {} test, target size {}",
        config.modeled_time_points,
        datasets.train.len(),
        datasets.val.len(),
        datasets.test.len(),
        datasets.train.target_size()
    );
    Ok(datasets)
}

/// Batcher that stacks encoding samples into tensors
#[derive(Clone, Debug)]
pub struct EncodingBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> EncodingBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Batched data for an encoding model
#[derive(Debug, Clone)]
pub struct EncodingBatch<B: Backend> {
    pub images: Tensor<B, 4>,  // [batch_size, 3, height, width]
    pub targets: Tensor<B, 2>, // [batch_size, target_size]
}

impl<B: Backend> Batcher<EncodingSample, EncodingBatch<B>> for EncodingBatcher<B> {
    fn batch(&self, items: Vec<EncodingSample>) -> EncodingBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = items.first().map(|s| s.image.shape()).unwrap_or_default();
        let target_size = items.first().map(|s| s.target.len()).unwrap_or(0);

        let mut image_data = Vec::with_capacity(batch_size * channels * height * width);
        let mut target_data = Vec::with_capacity(batch_size * target_size);

        for sample in &items {
            image_data.extend(sample.image.iter().copied());
            target_data.extend_from_slice(&sample.target);
        }

        let images = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([batch_size, channels, height, width]);

        let targets = Tensor::<B, 1>::from_floats(target_data.as_slice(), &self.device)
            .reshape([batch_size, target_size]);

        EncodingBatch { images, targets }
    }
}

pub type EncodingDataLoader<B> = Arc<dyn DataLoader<EncodingBatch<B>>>;

/// Train / validation / test loaders plus the number of examples behind each
pub struct EncodingDataloaders<B: Backend> {
    pub train: EncodingDataLoader<B>,
    pub val: EncodingDataLoader<B>,
    pub test: EncodingDataLoader<B>,
    pub train_len: usize,
    pub val_len: usize,
    pub test_len: usize,
}

/// Build the three batch loaders.
///
/// The training loader reshuffles on every pass and yields `batch_size`
/// batches (the last one may be short). Validation and test loaders are not
/// shuffled and yield the whole partition as a single batch.
pub fn build_dataloaders<B: Backend>(
    config: &EncodingConfig,
    images: ImageCorpus,
    signals: &SignalCorpus,
    device: &B::Device,
) -> Result<EncodingDataloaders<B>> {
    let datasets = build_datasets(config, images, signals)?;
    let seed = config.shuffle_seed.unwrap_or_else(rand::random);
    tracing::debug!("Training loader shuffle seed: {}", seed);

    let train_len = datasets.train.len();
    let val_len = datasets.val.len();
    let test_len = datasets.test.len();

    let train = DataLoaderBuilder::new(EncodingBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(seed)
        .build(datasets.train);

    Ok(EncodingDataloaders {
        train,
        val: full_batch_loader(datasets.val, device),
        test: full_batch_loader(datasets.test, device),
        train_len,
        val_len,
        test_len,
    })
}

fn full_batch_loader<B: Backend>(dataset: EncodingDataset, device: &B::Device) -> EncodingDataLoader<B> {
    // An empty partition still needs a positive batch size; it simply yields nothing
    let batch_size = dataset.len().max(1);
    tracing::debug!("{} loader: {} examples in one batch", dataset.partition(), dataset.len());
    DataLoaderBuilder::new(EncodingBatcher::<B>::new(device.clone()))
        .batch_size(batch_size)
        .build(dataset)
}
