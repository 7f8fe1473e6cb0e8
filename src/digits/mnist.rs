use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use ndarray::Array3;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const IMAGE_SIDE: usize = 28;
pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
pub const DEFAULT_DATA_DIR: &str = "data/mnist";

const IMAGE_MAGIC: i32 = 2051;
const LABEL_MAGIC: i32 = 2049;
const MAX_LABEL: u8 = 9;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte.gz";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte.gz";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

/// Where the gzipped IDX files are cached and where missing ones are fetched from.
#[derive(Debug, Clone)]
pub struct MnistSource {
    pub data_dir: PathBuf,
    pub base_url: String,
}

impl Default for MnistSource {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Raw images (`n x 28 x 28`, 0-255) and their digit labels.
#[derive(Debug, Clone)]
pub struct MnistSplit {
    pub images: Array3<u8>,
    pub labels: Vec<u8>,
}

impl MnistSplit {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Loads the train and test splits, downloading any file missing from the cache.
pub fn load_data(source: &MnistSource) -> Result<(MnistSplit, MnistSplit)> {
    let train = load_split(source, TRAIN_IMAGES, TRAIN_LABELS)?;
    let test = load_split(source, TEST_IMAGES, TEST_LABELS)?;

    info!(
        train = train.len(),
        test = test.len(),
        "loaded mnist from {}",
        source.data_dir.display()
    );

    Ok((train, test))
}

fn load_split(source: &MnistSource, images_name: &str, labels_name: &str) -> Result<MnistSplit> {
    let images_path = fetch(source, images_name)?;
    let labels_path = fetch(source, labels_name)?;

    let images = read_images(&images_path)?;
    let labels = read_labels(&labels_path)?;

    if images.dim().0 != labels.len() {
        return Err(Error::InvalidIdx {
            path: images_path,
            reason: format!(
                "{} images but {} labels in {}",
                images.dim().0,
                labels.len(),
                labels_path.display()
            ),
        });
    }

    Ok(MnistSplit { images, labels })
}

fn fetch(source: &MnistSource, name: &str) -> Result<PathBuf> {
    let path = source.data_dir.join(name);
    if path.exists() {
        debug!("using cached {}", path.display());
        return Ok(path);
    }

    fs::create_dir_all(&source.data_dir)?;

    let url = format!("{}/{}", source.base_url.trim_end_matches('/'), name);
    info!("downloading {url}");

    let response = ureq::get(&url).call().map_err(|error| Error::Download {
        url: url.clone(),
        reason: error.to_string(),
    })?;

    // partial downloads never land under the final name
    let partial = path.with_extension("part");
    let mut file = File::create(&partial)?;
    let bytes = io::copy(&mut response.into_reader(), &mut file)?;
    fs::rename(&partial, &path)?;

    debug!(bytes, "saved {}", path.display());
    Ok(path)
}

fn open_gz(path: &Path) -> Result<GzDecoder<BufReader<File>>> {
    Ok(GzDecoder::new(BufReader::new(File::open(path)?)))
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidIdx {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_header_value(reader: &mut impl Read, path: &Path, what: &str) -> Result<usize> {
    let value = reader
        .read_i32::<BigEndian>()
        .map_err(|error| invalid(path, format!("reading {what}: {error}")))?;

    usize::try_from(value).map_err(|_| invalid(path, format!("negative {what} {value}")))
}

fn read_payload(reader: &mut impl Read, path: &Path, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0; len];
    reader
        .read_exact(&mut data)
        .map_err(|error| invalid(path, format!("truncated payload: {error}")))?;

    Ok(data)
}

pub fn read_images(path: &Path) -> Result<Array3<u8>> {
    let mut reader = open_gz(path)?;

    let magic = reader
        .read_i32::<BigEndian>()
        .map_err(|error| invalid(path, format!("reading magic: {error}")))?;
    if magic != IMAGE_MAGIC {
        return Err(invalid(path, format!("expected image magic {IMAGE_MAGIC}, got {magic}")));
    }

    let count = read_header_value(&mut reader, path, "image count")?;
    let rows = read_header_value(&mut reader, path, "row count")?;
    let cols = read_header_value(&mut reader, path, "column count")?;

    if (rows, cols) != (IMAGE_SIDE, IMAGE_SIDE) {
        return Err(Error::Shape(format!(
            "{}: images are {rows}x{cols}, expected {IMAGE_SIDE}x{IMAGE_SIDE}",
            path.display()
        )));
    }

    let data = read_payload(&mut reader, path, count * rows * cols)?;

    Ok(Array3::from_shape_vec((count, rows, cols), data)?)
}

pub fn read_labels(path: &Path) -> Result<Vec<u8>> {
    let mut reader = open_gz(path)?;

    let magic = reader
        .read_i32::<BigEndian>()
        .map_err(|error| invalid(path, format!("reading magic: {error}")))?;
    if magic != LABEL_MAGIC {
        return Err(invalid(path, format!("expected label magic {LABEL_MAGIC}, got {magic}")));
    }

    let count = read_header_value(&mut reader, path, "label count")?;
    let labels = read_payload(&mut reader, path, count)?;

    if let Some(label) = labels.iter().find(|&&label| label > MAX_LABEL) {
        return Err(invalid(path, format!("label {label} is not a digit")));
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn write_gz(path: &Path, header: &[i32], payload: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::fast());
        for &value in header {
            encoder.write_i32::<BigEndian>(value).unwrap();
        }
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap();
    }

    fn write_split(dir: &Path, images: &str, labels: &str, count: usize) {
        let pixels: Vec<u8> = (0..count * IMAGE_SIDE * IMAGE_SIDE)
            .map(|i| (i % 256) as u8)
            .collect();
        let digits: Vec<u8> = (0..count).map(|i| (i % 10) as u8).collect();

        write_gz(
            &dir.join(images),
            &[IMAGE_MAGIC, count as i32, IMAGE_SIDE as i32, IMAGE_SIDE as i32],
            &pixels,
        );
        write_gz(&dir.join(labels), &[LABEL_MAGIC, count as i32], &digits);
    }

    fn offline_source(dir: &Path) -> MnistSource {
        MnistSource {
            data_dir: dir.to_path_buf(),
            base_url: "http://127.0.0.1:9/unreachable".to_string(),
        }
    }

    #[test]
    fn loads_cached_splits_with_matching_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 12);
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 3);

        let (train, test) = load_data(&offline_source(dir.path())).unwrap();

        assert_eq!(train.images.dim(), (12, IMAGE_SIDE, IMAGE_SIDE));
        assert_eq!(train.len(), 12);
        assert_eq!(test.images.dim(), (3, IMAGE_SIDE, IMAGE_SIDE));
        assert_eq!(test.labels, vec![0, 1, 2]);
        assert_eq!(train.images[(0, 0, 5)], 5);
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.gz");
        write_gz(&path, &[IMAGE_MAGIC, 1], &[3]);

        assert!(matches!(read_labels(&path), Err(Error::InvalidIdx { .. })));
    }

    #[test]
    fn rejects_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.gz");
        write_gz(&path, &[IMAGE_MAGIC, 2, 28, 28], &[0; 28 * 28]);

        assert!(matches!(read_images(&path), Err(Error::InvalidIdx { .. })));
    }

    #[test]
    fn rejects_non_mnist_image_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.gz");
        write_gz(&path, &[IMAGE_MAGIC, 1, 32, 32], &[0; 32 * 32]);

        assert!(matches!(read_images(&path), Err(Error::Shape(_))));
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.gz");
        write_gz(&path, &[LABEL_MAGIC, 2], &[1, 12]);

        assert!(matches!(read_labels(&path), Err(Error::InvalidIdx { .. })));
    }

    #[test]
    fn rejects_count_mismatch_between_images_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 4);
        write_gz(&dir.path().join(TRAIN_LABELS), &[LABEL_MAGIC, 3], &[0, 1, 2]);
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 1);

        assert!(matches!(
            load_data(&offline_source(dir.path())),
            Err(Error::InvalidIdx { .. })
        ));
    }

    #[test]
    fn unreachable_source_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            load_data(&offline_source(dir.path())),
            Err(Error::Download { .. })
        ));
    }
}
