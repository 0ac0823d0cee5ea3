use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, ImageError, ImageReader};
use ndarray::Array3;
use walkdir::WalkDir;

use crate::config;
use crate::data::models::{ImageCorpus, ImageSample};
use crate::data::split::split_holdout;
use crate::error::{EncodingError, Result};

/// Fixed preprocessing applied to every stimulus.
///
/// Built once and handed to the loader; there is no global transform state.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePreprocessor {
    /// Target image size (width, height)
    pub size: (u32, u32),
    /// Per-channel normalization mean (RGB)
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation (RGB)
    pub std: [f32; 3],
    /// Applied to raw 8-bit values before normalization
    pub rescale_factor: f32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            size: (config::IMAGE_SIZE, config::IMAGE_SIZE),
            mean: config::IMAGENET_MEAN,
            std: config::IMAGENET_STD,
            rescale_factor: 1.0 / 255.0,
        }
    }
}

impl ImagePreprocessor {
    /// Decode a file as RGB and preprocess it.
    ///
    /// The format is sniffed from the file contents, not the extension.
    pub fn preprocess(&self, path: impl AsRef<Path>) -> Result<ImageSample> {
        let path = path.as_ref();
        let unreadable = |source: ImageError| EncodingError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        };

        let img = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| unreadable(ImageError::IoError(e)))?
            .decode()
            .map_err(unreadable)?;

        Ok(self.process_image(&img))
    }

    /// Resize with bilinear filtering, convert to CHW, rescale and normalize.
    pub fn process_image(&self, img: &DynamicImage) -> ImageSample {
        let (width, height) = self.size;
        let rgb = img
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgb8();

        let pixels = Array3::from_shape_fn(
            (config::IMAGE_CHANNELS, height as usize, width as usize),
            |(c, y, x)| {
                let value = rgb.get_pixel(x as u32, y as u32)[c] as f32;
                (value * self.rescale_factor - self.mean[c]) / self.std[c]
            },
        );

        ImageSample::new(pixels)
    }
}

/// Recursively enumerated stimulus files, sorted lexicographically by full path.
///
/// The sort order is what ties image `i` to response `i`. Walking an
/// unchanged tree twice yields the same sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusPaths {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl StimulusPaths {
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(EncodingError::MissingDirectory(root));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = entry?;
            // Symlinked files count, symlinked directories are not descended into
            let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
            if is_file && has_image_extension(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        // Byte-wise string order, not component-wise PathBuf order
        paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

        tracing::debug!("Found {} stimulus files under {}", paths.len(), root.display());
        Ok(Self { root, paths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.paths.iter()
    }

    /// Decode and preprocess every file in order. The first failure aborts the load.
    pub fn load(&self, preprocessor: &ImagePreprocessor) -> Result<Vec<ImageSample>> {
        let mut samples = Vec::with_capacity(self.paths.len());
        for (i, path) in self.paths.iter().enumerate() {
            samples.push(preprocessor.preprocess(path)?);
            if (i + 1) % 1000 == 0 {
                tracing::debug!("Preprocessed {}/{} images", i + 1, self.paths.len());
            }
        }
        tracing::debug!("Loaded {} images from {}", samples.len(), self.root.display());
        Ok(samples)
    }
}

impl<'a> IntoIterator for &'a StimulusPaths {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn has_image_extension(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    config::IMAGE_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(&format!(".{ext}")))
}

/// Load and preprocess the training, validation and test stimuli.
///
/// Every 10th sorted training image (positions 0, 10, 20, ...) goes to
/// validation; the test set is used as is.
pub fn load_image_corpus(
    project_dir: impl AsRef<Path>,
    preprocessor: &ImagePreprocessor,
) -> Result<ImageCorpus> {
    let image_set = project_dir.as_ref().join(config::IMAGE_SET_DIR);

    let training_paths = StimulusPaths::scan(image_set.join(config::TRAINING_IMAGES_DIR))?;
    tracing::info!("Loading {} training images", training_paths.len());
    let (train, val) = split_holdout(training_paths.load(preprocessor)?);

    let test_paths = StimulusPaths::scan(image_set.join(config::TEST_IMAGES_DIR))?;
    tracing::info!("Loading {} test images", test_paths.len());
    let test = test_paths.load(preprocessor)?;

    tracing::info!(
        "Image corpus ready: {} train, {} val, {} test",
        train.len(),
        val.len(),
        test.len()
    );
    Ok(ImageCorpus { train, val, test })
}
