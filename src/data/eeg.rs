use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, Axis};

use crate::config;
use crate::data::archive::ResponseArchive;
use crate::data::models::{ChannelMetadata, SignalCorpus};
use crate::data::split::split_holdout_axis0;
use crate::error::{EncodingError, Result};

/// Where a subject's response archives live under the project directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalLayout {
    pub data_dir: PathBuf,
    pub training_file: String,
    pub test_file: String,
}

impl Default for SignalLayout {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(config::EEG_DATA_DIR),
            training_file: config::EEG_TRAINING_FILE.to_string(),
            test_file: config::EEG_TEST_FILE.to_string(),
        }
    }
}

impl SignalLayout {
    /// `<root>/<data_dir>/sub-NN`
    pub fn subject_dir(&self, project_dir: &Path, sub: u32) -> PathBuf {
        project_dir.join(&self.data_dir).join(subject_label(sub))
    }

    pub fn training_path(&self, project_dir: &Path, sub: u32) -> PathBuf {
        self.subject_dir(project_dir, sub).join(&self.training_file)
    }

    pub fn test_path(&self, project_dir: &Path, sub: u32) -> PathBuf {
        self.subject_dir(project_dir, sub).join(&self.test_file)
    }
}

/// Subject directory name, zero-padded to width 2
pub fn subject_label(sub: u32) -> String {
    format!("sub-{:02}", sub)
}

/// Average repeated trials: [stimuli, repetitions, channels, timepoints] -> [stimuli, channels, timepoints]
///
/// Returns `None` when there are no repetitions to average.
pub fn average_repetitions(data: &Array4<f64>) -> Option<Array3<f64>> {
    data.mean_axis(Axis(1))
}

fn load_averaged(path: &Path) -> Result<(Array3<f64>, ResponseArchive)> {
    let archive = ResponseArchive::load(path)?;
    let averaged = average_repetitions(&archive.preprocessed_eeg_data)
        .ok_or_else(|| EncodingError::corrupt(path, "repetitions axis is empty"))?;
    Ok((averaged, archive))
}

/// Load a subject's EEG responses for all three partitions.
///
/// The training archive is averaged over repetitions and split with the same
/// held-out rule as the training images; the test archive is averaged and
/// kept whole. Values are cast to `f32`.
pub fn load_signal_corpus(
    project_dir: impl AsRef<Path>,
    sub: u32,
    layout: &SignalLayout,
) -> Result<SignalCorpus> {
    let project_dir = project_dir.as_ref();

    let training_path = layout.training_path(project_dir, sub);
    tracing::info!("Loading EEG training data from {}", training_path.display());
    let (training, archive) = load_averaged(&training_path)?;
    let (train, val) = split_holdout_axis0(&training);
    let metadata = ChannelMetadata {
        ch_names: archive.ch_names,
        times: archive.times,
    };

    let test_path = layout.test_path(project_dir, sub);
    tracing::info!("Loading EEG test data from {}", test_path.display());
    let (test, test_archive) = load_averaged(&test_path)?;
    if test.dim().1 != training.dim().1 || test.dim().2 != training.dim().2 {
        return Err(EncodingError::corrupt(
            &test_path,
            format!(
                "test responses have {} channels x {} time points, training has {} x {}",
                test.dim().1,
                test.dim().2,
                training.dim().1,
                training.dim().2
            ),
        ));
    }
    if test_archive.ch_names != metadata.ch_names {
        tracing::warn!("Test archive channel names differ from training; using training names");
    }

    let corpus = SignalCorpus {
        train: train.mapv(|v| v as f32),
        val: val.mapv(|v| v as f32),
        test: test.mapv(|v| v as f32),
        metadata,
    };
    tracing::info!(
        "EEG corpus ready for {}: {} train, {} val, {} test ({} channels x {} time points)",
        subject_label(sub),
        corpus.train.dim().0,
        corpus.val.dim().0,
        corpus.test.dim().0,
        corpus.metadata.num_channels(),
        corpus.metadata.num_timepoints()
    );
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::split::holdout_indices;

    fn write_archive(path: &Path, stimuli: usize, repetitions: usize) -> ResponseArchive {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let data = Array4::from_shape_fn((stimuli, repetitions, 2, 3), |(s, r, c, t)| {
            s as f64 * 100.0 + r as f64 + c as f64 * 10.0 + t as f64 * 0.5
        });
        let archive = ResponseArchive::new(
            data,
            vec!["O1".into(), "O2".into()],
            vec![0.0, 0.01, 0.02],
        )
        .unwrap();
        archive.save(path).unwrap();
        archive
    }

    #[test]
    fn test_subject_label_padding() {
        assert_eq!(subject_label(1), "sub-01");
        assert_eq!(subject_label(10), "sub-10");
        let layout = SignalLayout::default();
        assert_eq!(
            layout.training_path(Path::new("/proj"), 3),
            PathBuf::from("/proj/eeg_dataset/preprocessed_data/sub-03/preprocessed_eeg_training.npy")
        );
    }

    #[test]
    fn test_average_repetitions() {
        let data = Array4::from_shape_fn((2, 4, 1, 1), |(s, r, _, _)| (s * 10 + r) as f64);
        let avg = average_repetitions(&data).unwrap();
        assert_eq!(avg.dim(), (2, 1, 1));
        assert_eq!(avg[[0, 0, 0]], 1.5);
        assert_eq!(avg[[1, 0, 0]], 11.5);
    }

    #[test]
    fn test_average_idempotent_for_single_repetition() {
        let avg = average_repetitions(&Array4::from_shape_fn((3, 5, 2, 4), |(s, r, c, t)| {
            (s + r * c + t) as f64
        }))
        .unwrap();
        let again = average_repetitions(&avg.clone().insert_axis(Axis(1))).unwrap();
        assert_eq!(again, avg);
    }

    #[test]
    fn test_empty_repetitions_rejected() {
        assert!(average_repetitions(&Array4::<f64>::zeros((3, 0, 2, 2))).is_none());
    }

    #[test]
    fn test_load_signal_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SignalLayout::default();
        write_archive(&layout.training_path(dir.path(), 1), 12, 4);
        write_archive(&layout.test_path(dir.path(), 1), 3, 2);

        let corpus = load_signal_corpus(dir.path(), 1, &layout).unwrap();
        assert_eq!(corpus.train.dim(), (10, 2, 3));
        assert_eq!(corpus.val.dim(), (2, 2, 3));
        assert_eq!(corpus.test.dim(), (3, 2, 3));
        assert_eq!(corpus.metadata.ch_names, vec!["O1", "O2"]);
        assert_eq!(corpus.metadata.times, vec![0.0, 0.01, 0.02]);

        // Validation rows are stimuli 0 and 10; mean over r in 0..4 adds 1.5
        let val_stimuli: Vec<usize> = corpus
            .val
            .outer_iter()
            .map(|m| ((m[[0, 0]] - 1.5) / 100.0).round() as usize)
            .collect();
        assert_eq!(val_stimuli, holdout_indices(12));
        assert_eq!(corpus.train[[0, 1, 2]], 100.0 + 1.5 + 10.0 + 1.0);
    }

    #[test]
    fn test_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_signal_corpus(dir.path(), 1, &SignalLayout::default()).unwrap_err();
        assert!(matches!(err, EncodingError::CorruptArchive { .. }));
    }
}
