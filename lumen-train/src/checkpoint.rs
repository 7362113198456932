//! Parameter checkpoints: a JSON manifest plus a raw `f32` blob

use crate::error::CheckpointError;
use crate::model::Parameter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const MANIFEST_FILE: &str = "params.json";
pub const BLOB_FILE: &str = "params.bin";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: Vec<Entry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    name: String,
    shape: Vec<usize>,
    /// Offset into the blob, in `f32` elements.
    offset: usize,
}

/// Write every parameter tensor into `dir`.
pub fn save_parameters(dir: &Path, params: &[Parameter]) -> Result<(), CheckpointError> {
    fs::create_dir_all(dir)?;
    let mut blob: Vec<f32> = Vec::with_capacity(params.iter().map(Parameter::len).sum());
    let mut entries = Vec::with_capacity(params.len());
    for p in params {
        entries.push(Entry {
            name: p.name().to_string(),
            shape: p.shape().to_vec(),
            offset: blob.len(),
        });
        blob.extend_from_slice(p.value());
    }

    let manifest = Manifest {
        version: FORMAT_VERSION,
        entries,
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
    fs::write(dir.join(BLOB_FILE), bytemuck::cast_slice::<f32, u8>(&blob))?;
    info!("Saved {} parameter tensors to {}", params.len(), dir.display());
    Ok(())
}

/// Overwrite `params` with the values stored in `dir`.
///
/// Names and shapes must match exactly; nothing is modified on mismatch.
pub fn load_parameters(dir: &Path, params: &mut [Parameter]) -> Result<(), CheckpointError> {
    let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
    if manifest.version != FORMAT_VERSION {
        return Err(CheckpointError::Mismatch(format!(
            "unsupported checkpoint version {}",
            manifest.version
        )));
    }
    let bytes = fs::read(dir.join(BLOB_FILE))?;
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(CheckpointError::Mismatch("blob is not a whole number of f32 values".into()));
    }
    let blob: Vec<f32> = bytes
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();

    if manifest.entries.len() != params.len() {
        return Err(CheckpointError::Mismatch(format!(
            "checkpoint has {} tensors, model has {}",
            manifest.entries.len(),
            params.len()
        )));
    }
    for (entry, p) in manifest.entries.iter().zip(params.iter()) {
        if entry.name != p.name() || entry.shape != p.shape() {
            return Err(CheckpointError::Mismatch(format!(
                "tensor {} {:?} does not match {} {:?}",
                entry.name,
                entry.shape,
                p.name(),
                p.shape()
            )));
        }
        if entry.offset + p.len() > blob.len() {
            return Err(CheckpointError::Mismatch(format!("tensor {} runs past the blob", entry.name)));
        }
    }

    for (entry, p) in manifest.entries.iter().zip(params.iter_mut()) {
        let len = p.len();
        p.value_mut().copy_from_slice(&blob[entry.offset..entry.offset + len]);
    }
    info!("Loaded {} parameter tensors from {}", params.len(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<Parameter> {
        vec![
            Parameter::new("density.weight", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]),
            Parameter::new("color.bias", vec![3], vec![-0.5, 0.0, 0.5]),
        ]
    }

    #[test]
    fn test_restores_values() {
        let dir = tempfile::tempdir().unwrap();
        save_parameters(dir.path(), &params()).unwrap();

        let mut restored: Vec<Parameter> = params()
            .into_iter()
            .map(|p| Parameter::zeros(p.name(), p.shape().to_vec()))
            .collect();
        load_parameters(dir.path(), &mut restored).unwrap();
        assert_eq!(restored, params());
    }

    #[test]
    fn test_shape_mismatch_leaves_params_untouched() {
        let dir = tempfile::tempdir().unwrap();
        save_parameters(dir.path(), &params()).unwrap();

        let mut other = vec![
            Parameter::zeros("density.weight", vec![4]),
            Parameter::zeros("color.bias", vec![3]),
        ];
        let err = load_parameters(dir.path(), &mut other);
        assert!(matches!(err, Err(CheckpointError::Mismatch(_))));
        assert!(other.iter().all(|p| p.value().iter().all(|&v| v == 0.0)));
    }
}
