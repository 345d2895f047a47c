//! Rebuilds a source archive from individually stored published files.

use std::io::{Cursor, Write};

use apihub_common::{
    catalog::{PublishedFile, VersionKey},
    error::BuildSourceError,
};
use zip::{ZipWriter, write::SimpleFileOptions};

/// Entry name of a file inside the archive.
fn entry_name(file: &PublishedFile) -> &str {
    let name = if file.path.trim().is_empty() {
        &file.file_id
    } else {
        &file.path
    };

    name.trim_start_matches('/')
}

/// Zips `files` in the given order.
/// ---
/// Entries carry the fixed DOS epoch timestamp so the same files
/// always produce the same bytes.
pub fn build_archive(
    files: &[PublishedFile],
    target: &VersionKey,
) -> Result<Vec<u8>, BuildSourceError> {
    if files.is_empty() {
        return Err(BuildSourceError::NoFiles(target.as_source_ref()));
    }

    let archive_err = |reason: String| BuildSourceError::Archive {
        target: target.as_source_ref(),
        reason,
    };

    let mut archive = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut archive));
        let options = SimpleFileOptions::default()
            .last_modified_time(zip::DateTime::default())
            .compression_method(zip::CompressionMethod::Deflated);

        for file in files {
            let name = entry_name(file);
            if name.is_empty() {
                return Err(archive_err(format!(
                    "file {} has no usable name",
                    file.file_id
                )));
            }

            zip.start_file(name, options)
                .map_err(|e| archive_err(format!("failed to add {}: {}", name, e)))?;
            zip.write_all(&file.data)
                .map_err(|e| archive_err(format!("failed to write {}: {}", name, e)))?;
        }

        zip.finish()
            .map_err(|e| archive_err(format!("failed to finalize archive: {}", e)))?;
    }

    Ok(archive)
}
