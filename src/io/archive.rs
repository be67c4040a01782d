//! NumPy `.npz` persistence for patch datasets and network weights

use crate::data::axes::Axes;
use crate::data::patches::PatchDataset;
use crate::io::configuration::{ARCHIVE_AXES_MEMBER, ARCHIVE_SOURCE_MEMBER, ARCHIVE_TARGET_MEMBER};
use crate::io::error::{PipelineError, Result, WithPath, invalid_source};
use crate::model::network::NetworkWeights;
use ndarray::{Array, Array1, Dimension};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, ReadableElement, WriteNpzError};
use std::fs::File;
use std::path::Path;

const WEIGHTS_MEMBER: &str = "weights";
const BIAS_MEMBER: &str = "bias";
const SCALE_MEMBER: &str = "scale";

/// Write a patch dataset as an `.npz` archive with members `X`, `Y` and `axes`
///
/// The axis label is stored as its UTF-8 bytes. Missing parent directories
/// are created and an existing archive is replaced.
///
/// # Errors
///
/// Returns an error if the dataset violates its pairing invariant, or the
/// archive cannot be created or written
pub fn save_training_data(path: &Path, dataset: &PatchDataset) -> Result<()> {
    dataset.validate()?;

    let mut npz = create_archive(path)?;
    let write_err = |source: WriteNpzError| PipelineError::ArchiveWrite {
        path: path.to_path_buf(),
        source,
    };

    let axes_bytes = Array1::from(dataset.axes().as_str().as_bytes().to_vec());
    npz.add_array(ARCHIVE_SOURCE_MEMBER, dataset.x())
        .map_err(write_err)?;
    npz.add_array(ARCHIVE_TARGET_MEMBER, dataset.y())
        .map_err(write_err)?;
    npz.add_array(ARCHIVE_AXES_MEMBER, &axes_bytes)
        .map_err(write_err)?;
    npz.finish().map_err(write_err)?;

    log::debug!(
        "Wrote {} patch pairs with axes {} to {}",
        dataset.len(),
        dataset.axes(),
        path.display()
    );
    Ok(())
}

/// Read a patch dataset written by [`save_training_data`]
///
/// # Errors
///
/// Returns an error if the archive cannot be opened, a member is missing or
/// has the wrong rank, or the stored arrays violate the pairing invariant
pub fn load_patch_dataset(path: &Path) -> Result<PatchDataset> {
    let mut npz = open_archive(path)?;
    let names = member_names(&mut npz, path)?;

    let x = read_member(&mut npz, &names, ARCHIVE_SOURCE_MEMBER, path)?;
    let y = read_member(&mut npz, &names, ARCHIVE_TARGET_MEMBER, path)?;
    let axes_bytes: Array1<u8> = read_member(&mut npz, &names, ARCHIVE_AXES_MEMBER, path)?;

    let label = String::from_utf8(axes_bytes.to_vec()).map_err(|utf8_error| {
        invalid_source(&format!(
            "axes member of '{}' is not UTF-8: {utf8_error}",
            path.display()
        ))
    })?;

    PatchDataset::new(x, y, Axes::parse(&label)?)
}

/// Write network parameters as an `.npz` archive
///
/// # Errors
///
/// Returns an error if the archive cannot be created or written
pub fn save_weights(path: &Path, weights: &NetworkWeights) -> Result<()> {
    let mut npz = create_archive(path)?;
    let write_err = |source: WriteNpzError| PipelineError::ArchiveWrite {
        path: path.to_path_buf(),
        source,
    };

    npz.add_array(WEIGHTS_MEMBER, &weights.kernels)
        .map_err(write_err)?;
    npz.add_array(BIAS_MEMBER, &weights.bias).map_err(write_err)?;
    if let Some(ref scale) = weights.scale {
        npz.add_array(SCALE_MEMBER, scale).map_err(write_err)?;
    }
    npz.finish().map_err(write_err)?;
    Ok(())
}

/// Read network parameters written by [`save_weights`]
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or a required member is
/// missing or malformed
pub fn load_weights(path: &Path) -> Result<NetworkWeights> {
    let mut npz = open_archive(path)?;
    let names = member_names(&mut npz, path)?;

    let kernels = read_member(&mut npz, &names, WEIGHTS_MEMBER, path)?;
    let bias = read_member(&mut npz, &names, BIAS_MEMBER, path)?;
    let scale = if resolve_member(&names, SCALE_MEMBER).is_some() {
        Some(read_member(&mut npz, &names, SCALE_MEMBER, path)?)
    } else {
        None
    };

    Ok(NetworkWeights {
        kernels,
        bias,
        scale,
    })
}

fn create_archive(path: &Path) -> Result<NpzWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_path(parent, "create directory")?;
    }
    let file = File::create(path).with_path(path, "create archive")?;
    Ok(NpzWriter::new(file))
}

fn open_archive(path: &Path) -> Result<NpzReader<File>> {
    let file = File::open(path).with_path(path, "open archive")?;
    NpzReader::new(file).map_err(|source| PipelineError::ArchiveRead {
        path: path.to_path_buf(),
        source,
    })
}

fn member_names(npz: &mut NpzReader<File>, path: &Path) -> Result<Vec<String>> {
    npz.names().map_err(|source| PipelineError::ArchiveRead {
        path: path.to_path_buf(),
        source,
    })
}

// Members are stored as `<name>.npy`; accept either spelling
fn resolve_member<'a>(names: &'a [String], member: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|name| {
            name.as_str() == member
                || name
                    .strip_suffix(".npy")
                    .is_some_and(|stem| stem == member)
        })
        .map(String::as_str)
}

fn read_member<A, D>(
    npz: &mut NpzReader<File>,
    names: &[String],
    member: &str,
    path: &Path,
) -> Result<Array<A, D>>
where
    A: ReadableElement,
    D: Dimension,
{
    let name = resolve_member(names, member).ok_or_else(|| {
        invalid_source(&format!(
            "archive '{}' has no member '{member}'",
            path.display()
        ))
    })?;

    npz.by_name(name)
        .map_err(|source: ReadNpzError| PipelineError::ArchiveRead {
            path: path.to_path_buf(),
            source,
        })
}
