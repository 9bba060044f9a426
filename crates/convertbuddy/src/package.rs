//! Turns a conversion's outputs into exactly one deliverable.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackageError;

/// One output is returned untouched; several are zipped into
/// `<dir>/<archive_stem>.zip` with entries in the given order, named by
/// their base names.
///
/// The archive is staged in a temporary file inside `dir` and renamed into
/// place only once complete, so a failure never leaves a partial zip behind.
pub fn package_outputs(
    dir: &Path,
    outputs: &[PathBuf],
    archive_stem: &str,
) -> Result<PathBuf, PackageError> {
    match outputs {
        [] => Err(PackageError::NoOutputs),
        [single] => Ok(single.clone()),
        many => {
            let archive = dir.join(format!("{}.zip", archive_stem));
            write_archive(dir, &archive, many)?;
            log::debug!(
                "Packaged {} outputs into {}",
                many.len(),
                crate::sanitize::redact_path(&archive)
            );
            Ok(archive)
        }
    }
}

fn write_archive(dir: &Path, archive: &Path, outputs: &[PathBuf]) -> Result<(), PackageError> {
    let staged = NamedTempFile::new_in(dir).map_err(|e| PackageError::CreateArchive {
        path: archive.to_path_buf(),
        source: e,
    })?;

    let handle = staged.reopen().map_err(|e| PackageError::CreateArchive {
        path: archive.to_path_buf(),
        source: e,
    })?;
    let mut writer = ZipWriter::new(handle);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for output in outputs {
        let name = output
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PackageError::InvalidEntry(output.clone()))?;

        writer
            .start_file(name, options)
            .map_err(|e| PackageError::WriteEntry {
                path: output.clone(),
                message: e.to_string(),
            })?;

        let mut source = File::open(output).map_err(|e| PackageError::WriteEntry {
            path: output.clone(),
            message: e.to_string(),
        })?;
        io::copy(&mut source, &mut writer).map_err(|e| PackageError::WriteEntry {
            path: output.clone(),
            message: e.to_string(),
        })?;
    }

    writer.finish().map_err(|e| PackageError::Finalize {
        path: archive.to_path_buf(),
        message: e.to_string(),
    })?;

    // Dropping `staged` on any error above removes the temp file
    staged.persist(archive).map_err(|e| PackageError::Finalize {
        path: archive.to_path_buf(),
        message: e.error.to_string(),
    })?;
    Ok(())
}
