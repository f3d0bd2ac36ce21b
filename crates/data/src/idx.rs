//! Decoding of the IDX files MNIST ships in.
//!
//! Layout: a big-endian `u32` magic number, one big-endian `u32` per
//! dimension, then the `u8` payload in row-major order.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use ndarray::Array3;

use dp_mnist_core::{DpError, Result};

/// Magic number of an IDX file holding `u8` images (3 dimensions).
pub const IMAGES_MAGIC: u32 = 0x0000_0803;
/// Magic number of an IDX file holding `u8` labels (1 dimension).
pub const LABELS_MAGIC: u32 = 0x0000_0801;

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            DpError::data("IDX payload is truncated")
        } else {
            DpError::Io(e)
        }
    })
}

fn expect_magic<R: Read>(reader: &mut R, expected: u32) -> Result<()> {
    let magic = read_u32(reader)?;
    if magic != expected {
        return Err(DpError::data(format!(
            "bad IDX magic {magic:#010x}, expected {expected:#010x}"
        )));
    }
    Ok(())
}

/// Read an IDX image file into an `(n, rows, cols)` array.
pub fn read_idx_images<R: Read>(mut reader: R) -> Result<Array3<u8>> {
    expect_magic(&mut reader, IMAGES_MAGIC)?;
    let count = read_u32(&mut reader)? as usize;
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;

    let len = count
        .checked_mul(rows)
        .and_then(|v| v.checked_mul(cols))
        .ok_or_else(|| DpError::data("IDX dimensions overflow"))?;
    let mut pixels = vec![0u8; len];
    read_exact(&mut reader, &mut pixels)?;

    Array3::from_shape_vec((count, rows, cols), pixels)
        .map_err(|e| DpError::data(format!("IDX image payload: {e}")))
}

/// Read an IDX label file.
pub fn read_idx_labels<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    expect_magic(&mut reader, LABELS_MAGIC)?;
    let count = read_u32(&mut reader)? as usize;
    let mut labels = vec![0u8; count];
    read_exact(&mut reader, &mut labels)?;
    Ok(labels)
}

/// Load an image file and its label file, checking the counts agree.
pub fn load_idx_pair(
    images_path: impl AsRef<Path>,
    labels_path: impl AsRef<Path>,
) -> Result<(Array3<u8>, Vec<u8>)> {
    let images_path = images_path.as_ref();
    let labels_path = labels_path.as_ref();
    let images = read_idx_images(BufReader::new(File::open(images_path)?))?;
    let labels = read_idx_labels(BufReader::new(File::open(labels_path)?))?;
    if images.shape()[0] != labels.len() {
        return Err(DpError::data(format!(
            "{} images but {} labels",
            images.shape()[0],
            labels.len()
        )));
    }
    tracing::info!(
        images = %images_path.display(),
        count = labels.len(),
        rows = images.shape()[1],
        cols = images.shape()[2],
        "loaded IDX dataset"
    );
    Ok((images, labels))
}

/// Encode images as an IDX file body.
pub fn encode_idx_images(images: &Array3<u8>) -> Vec<u8> {
    let (n, rows, cols) = images.dim();
    let mut out = Vec::with_capacity(16 + images.len());
    out.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
    for d in [n, rows, cols] {
        out.extend_from_slice(&(d as u32).to_be_bytes());
    }
    out.extend(images.iter().copied());
    out
}

/// Encode labels as an IDX file body.
pub fn encode_idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + labels.len());
    out.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend_from_slice(labels);
    out
}
