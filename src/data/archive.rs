//! Per-subject EEG response archives.
//!
//! An archive is a zip container of `.npy` members, the layout `numpy.savez`
//! produces:
//!
//! - `preprocessed_eeg_data.npy`: `[stimuli, repetitions, channels, timepoints]`, `f64` or `f32`
//! - `ch_names.npy`: 1-D little-endian unicode (`<U*`) array
//! - `times.npy`: 1-D `f64` or `f32` array
//!
//! Everything is parsed into a typed [`ResponseArchive`] and checked for
//! consistency at load time.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use ndarray::{Array, Array1, Array4, Dimension};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EncodingError, Result};

const DATA_MEMBER: &str = "preprocessed_eeg_data.npy";
const CH_NAMES_MEMBER: &str = "ch_names.npy";
const TIMES_MEMBER: &str = "times.npy";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Recorded responses of one subject to one stimulus set
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseArchive {
    /// [stimuli, repetitions, channels, timepoints]
    pub preprocessed_eeg_data: Array4<f64>,
    pub ch_names: Vec<String>,
    pub times: Vec<f64>,
}

impl ResponseArchive {
    /// Build an archive, checking that channel names and times match the data axes.
    pub fn new(
        preprocessed_eeg_data: Array4<f64>,
        ch_names: Vec<String>,
        times: Vec<f64>,
    ) -> std::result::Result<Self, String> {
        let (_, _, channels, timepoints) = preprocessed_eeg_data.dim();
        if ch_names.len() != channels {
            return Err(format!(
                "{} channel names for {} data channels",
                ch_names.len(),
                channels
            ));
        }
        if times.len() != timepoints {
            return Err(format!(
                "{} time points for {} data samples per channel",
                times.len(),
                timepoints
            ));
        }
        Ok(Self {
            preprocessed_eeg_data,
            ch_names,
            times,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let corrupt = |reason: String| EncodingError::corrupt(path, reason);

        let file = File::open(path).map_err(|e| corrupt(format!("cannot open: {e}")))?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| {
            if starts_with_npy_magic(path) {
                corrupt(
                    "a single pickled numpy record, not an npz container; \
                     re-save it with np.savez(path, **record)"
                        .into(),
                )
            } else {
                corrupt(format!("not an npz container: {e}"))
            }
        })?;

        let data_bytes = read_member(&mut zip, DATA_MEMBER).map_err(&corrupt)?;
        let data = read_float_array::<ndarray::Ix4>(&data_bytes)
            .map_err(|e| corrupt(format!("{DATA_MEMBER}: {e}")))?;

        let names_bytes = read_member(&mut zip, CH_NAMES_MEMBER).map_err(&corrupt)?;
        let ch_names =
            read_unicode_npy(&names_bytes).map_err(|e| corrupt(format!("{CH_NAMES_MEMBER}: {e}")))?;

        let times_bytes = read_member(&mut zip, TIMES_MEMBER).map_err(&corrupt)?;
        let times = read_float_array::<ndarray::Ix1>(&times_bytes)
            .map_err(|e| corrupt(format!("{TIMES_MEMBER}: {e}")))?
            .to_vec();

        let archive = Self::new(data, ch_names, times).map_err(corrupt)?;
        tracing::debug!(
            "Loaded {} with shape {:?}",
            path.display(),
            archive.preprocessed_eeg_data.shape()
        );
        Ok(archive)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let corrupt = |reason: String| EncodingError::corrupt(path, reason);

        let file = File::create(path)?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let data_bytes = self.preprocessed_eeg_data.len() * std::mem::size_of::<f64>();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(data_bytes >= u32::MAX as usize);

        zip.start_file(DATA_MEMBER, options)
            .map_err(|e| corrupt(e.to_string()))?;
        self.preprocessed_eeg_data
            .write_npy(&mut zip)
            .map_err(|e| corrupt(format!("{DATA_MEMBER}: {e}")))?;

        zip.start_file(CH_NAMES_MEMBER, options)
            .map_err(|e| corrupt(e.to_string()))?;
        write_unicode_npy(&self.ch_names, &mut zip)?;

        zip.start_file(TIMES_MEMBER, options)
            .map_err(|e| corrupt(e.to_string()))?;
        Array1::from_vec(self.times.clone())
            .write_npy(&mut zip)
            .map_err(|e| corrupt(format!("{TIMES_MEMBER}: {e}")))?;

        zip.finish()
            .map_err(|e| corrupt(e.to_string()))?
            .flush()?;
        Ok(())
    }

    pub fn num_stimuli(&self) -> usize {
        self.preprocessed_eeg_data.dim().0
    }
}

fn starts_with_npy_magic(path: &Path) -> bool {
    let mut magic = [0u8; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok_and(|()| magic[..] == *NPY_MAGIC)
}

fn read_member<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> std::result::Result<Vec<u8>, String> {
    let mut member = zip
        .by_name(name)
        .map_err(|e| format!("missing member {name}: {e}"))?;
    // The size in the zip header is not trusted for preallocation
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|e| format!("reading {name}: {e}"))?;
    Ok(bytes)
}

/// Read a float array stored as either `f64` or `f32`.
fn read_float_array<D: Dimension>(bytes: &[u8]) -> std::result::Result<Array<f64, D>, String> {
    Array::<f64, D>::read_npy(bytes).or_else(|f64_err| {
        Array::<f32, D>::read_npy(bytes)
            .map(|a| a.mapv(f64::from))
            .map_err(|_| f64_err.to_string())
    })
}

/// Parse a 1-D `<U*` npy array (fixed-width UTF-32LE) into strings.
fn read_unicode_npy(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("missing npy magic".into());
    }
    let (header_start, header_len): (usize, usize) = match bytes[6] {
        1 => (10, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated npy header".into());
            }
            (12, u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize)
        }
        v => return Err(format!("unsupported npy version {v}")),
    };
    let data_start = header_start
        .checked_add(header_len)
        .ok_or("npy header length overflows")?;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or("truncated npy header")?;

    let descr = header_value(header, "descr").ok_or("header has no descr")?;
    let width: usize = descr
        .trim_matches(|c| c == '\'' || c == '"')
        .strip_prefix("<U")
        .and_then(|w| w.parse().ok())
        .ok_or_else(|| format!("expected a little-endian unicode dtype, found {descr}"))?;

    let shape = header_value(header, "shape").ok_or("header has no shape")?;
    let dims: Vec<usize> = shape
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| format!("bad shape {shape}")))
        .collect::<std::result::Result<_, _>>()?;
    let &[count] = dims.as_slice() else {
        return Err(format!("expected a 1-D array, found shape {shape}"));
    };

    if width == 0 {
        return Err(format!("zero-width unicode dtype {descr}"));
    }
    let item_bytes = width
        .checked_mul(4)
        .ok_or_else(|| format!("unicode width {width} overflows"))?;
    let expected = count
        .checked_mul(item_bytes)
        .ok_or_else(|| format!("{count} items of {item_bytes} bytes overflow"))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(format!("expected {expected} data bytes, found {}", data.len()));
    }

    data.chunks_exact(item_bytes)
        .map(|item| {
            item.chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .take_while(|&code| code != 0)
                .map(|code| char::from_u32(code).ok_or(format!("invalid code point {code:#x}")))
                .collect::<std::result::Result<String, String>>()
        })
        .collect()
}

/// Value text for `key` in an npy header dict, e.g. `'<U5'` or `(17,)`.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(&format!("'{key}':"))? + key.len() + 3;
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(',').unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

fn write_unicode_npy<W: Write>(names: &[String], writer: &mut W) -> Result<()> {
    let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0).max(1);
    let mut header = format!(
        "{{'descr': '<U{width}', 'fortran_order': False, 'shape': ({},), }}",
        names.len()
    );
    // magic(6) + version(2) + len(2) + header + '\n' padded to the alignment
    let unpadded = NPY_MAGIC.len() + 4 + header.len() + 1;
    header.extend(std::iter::repeat(' ').take((NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN));
    header.push('\n');

    writer.write_all(NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for name in names {
        let mut written = 0;
        for c in name.chars() {
            writer.write_all(&(c as u32).to_le_bytes())?;
            written += 1;
        }
        for _ in written..width {
            writer.write_all(&0u32.to_le_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> ResponseArchive {
        let data = Array4::from_shape_fn((4, 2, 3, 5), |(s, r, c, t)| {
            (s * 1000 + r * 100 + c * 10 + t) as f64
        });
        let names = vec!["Fp1".to_string(), "Oz".to_string(), "PO8".to_string()];
        let times = (0..5).map(|t| -0.2 + 0.01 * t as f64).collect();
        ResponseArchive::new(data, names, times).unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessed_eeg_training.npy");
        let archive = sample_archive();
        archive.save(&path).unwrap();

        let loaded = ResponseArchive::load(&path).unwrap();
        assert_eq!(loaded, archive);
        assert_eq!(loaded.num_stimuli(), 4);
    }

    #[test]
    fn test_unicode_header_alignment() {
        let mut buf = Vec::new();
        write_unicode_npy(&["O1".to_string(), "Iz".to_string()], &mut buf).unwrap();
        let header_len = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);
        assert_eq!(read_unicode_npy(&buf).unwrap(), vec!["O1", "Iz"]);
    }

    #[test]
    fn test_numpy_style_unicode_header() {
        // Header layout as written by numpy for np.array(['Fz', 'Cz3'])
        let header = "{'descr': '<U3', 'fortran_order': False, 'shape': (2,), }";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        let padded = format!("{:<width$}\n", header, width = 128 - 10 - 1);
        bytes.extend_from_slice(&(padded.len() as u16).to_le_bytes());
        bytes.extend_from_slice(padded.as_bytes());
        for name in ["Fz\0", "Cz3"] {
            for c in name.chars() {
                bytes.extend_from_slice(&(c as u32).to_le_bytes());
            }
        }
        assert_eq!(read_unicode_npy(&bytes).unwrap(), vec!["Fz", "Cz3"]);
    }

    #[test]
    fn test_f32_data_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.npy");
        let file = File::create(&path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        zip.start_file(DATA_MEMBER, options).unwrap();
        Array4::<f32>::from_elem((2, 1, 1, 2), 1.5).write_npy(&mut zip).unwrap();
        zip.start_file(CH_NAMES_MEMBER, options).unwrap();
        write_unicode_npy(&["Pz".to_string()], &mut zip).unwrap();
        zip.start_file(TIMES_MEMBER, options).unwrap();
        Array1::<f32>::from_vec(vec![0.0, 0.5]).write_npy(&mut zip).unwrap();
        zip.finish().unwrap();

        let archive = ResponseArchive::load(&path).unwrap();
        assert!(archive.preprocessed_eeg_data.iter().all(|&v| v == 1.5));
        assert_eq!(archive.times, vec![0.0, 0.5]);
    }

    #[test]
    fn test_missing_file_is_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResponseArchive::load(dir.path().join("absent.npy")).unwrap_err();
        assert!(matches!(err, EncodingError::CorruptArchive { .. }));
    }

    #[test]
    fn test_not_a_container_is_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.npy");
        std::fs::write(&path, b"not a zip file").unwrap();
        match ResponseArchive::load(&path).unwrap_err() {
            EncodingError::CorruptArchive { reason, .. } => {
                assert!(reason.contains("not an npz container"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pickled_record_points_to_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessed_eeg_training.npy");
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(b"\x01\x00v\x00{'descr': '|O', 'fortran_order': False, 'shape': (), }");
        std::fs::write(&path, bytes).unwrap();
        match ResponseArchive::load(&path).unwrap_err() {
            EncodingError::CorruptArchive { reason, .. } => {
                assert!(reason.contains("pickled"), "{reason}");
                assert!(reason.contains("np.savez"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn unicode_npy_with_header(header: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_oversized_unicode_width_rejected() {
        let header = "{'descr': '<U4611686018427387905', 'fortran_order': False, 'shape': (2,), }\n";
        let bytes = unicode_npy_with_header(header, &[0; 16]);
        let err = read_unicode_npy(&bytes).unwrap_err();
        assert!(err.contains("overflow"), "{err}");

        let header = "{'descr': '<U4', 'fortran_order': False, 'shape': (4611686018427387905,), }\n";
        let bytes = unicode_npy_with_header(header, &[0; 16]);
        assert!(read_unicode_npy(&bytes).unwrap_err().contains("overflow"));
    }

    #[test]
    fn test_zero_width_unicode_rejected() {
        let header = "{'descr': '<U0', 'fortran_order': False, 'shape': (1000000000000,), }\n";
        let bytes = unicode_npy_with_header(header, &[]);
        assert!(read_unicode_npy(&bytes).is_err());
    }

    #[test]
    fn test_metadata_mismatch_rejected() {
        let data = Array4::<f64>::zeros((2, 1, 3, 4));
        assert!(ResponseArchive::new(data.clone(), vec!["a".into()], vec![0.0; 4]).is_err());
        assert!(ResponseArchive::new(data, vec!["a".into(); 3], vec![0.0; 5]).is_err());
    }
}
