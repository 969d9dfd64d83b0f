#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! ZIP archives of student submissions.

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use tracing::info;
use zip::ZipArchive;

/// Unpacks `archive` into `dest` and returns the number of entries.
///
/// Entries keep their relative paths, so notebooks at the archive root land
/// directly in `dest`.
pub fn unpack_submissions(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)
        .with_context(|| format!("Could not open archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("{} is not a ZIP archive", archive.display()))?;

    zip.extract(dest).with_context(|| {
        format!(
            "Could not unpack {} into {}",
            archive.display(),
            dest.display()
        )
    })?;

    info!(
        "Unpacked {} entries from {} into {}",
        zip.len(),
        archive.display(),
        dest.display()
    );
    Ok(zip.len())
}
