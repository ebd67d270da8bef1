//! Capability-scoped file helpers shared by the key, artifact and state
//! writers.
//!
//! Every helper opens the parent directory as a [`Dir`] and operates on the
//! file name inside it, so callers never touch ambient paths beyond the
//! parent lookup.

use std::io::{self, Write};
use cap_std::fs::OpenOptionsExt;

use camino::Utf8Path;
use cap_std::fs::OpenOptions;
use cap_std::fs_utf8::File;
use cap_std::{ambient_authority, fs_utf8::Dir};
use uuid::Uuid;

const DEFAULT_FILE_MODE: u32 = 0o666;

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path '{path}' is missing a file name"),
        )
    })?;
    Ok((parent, file_name))
}

/// Returns `true` when `path` exists. A missing parent counts as absent.
pub(crate) fn exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Reads `path`, returning `None` when it does not exist.
pub(crate) fn read_optional(path: &Utf8Path) -> io::Result<Option<String>> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Writes `contents` to `path` through a temporary sibling and a rename, so
/// readers see either the old file or the complete new one.
///
/// Missing parent directories are created. When `mode` is given the
/// temporary file is created with it, so the contents are never readable
/// under wider permissions.
pub(crate) fn write_atomic(path: &Utf8Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;

    let temp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4().simple());
    let result = write_then_rename(&dir, &temp_name, file_name, contents, mode);
    if result.is_err() {
        if let Err(cleanup) = dir.remove_file(&temp_name) {
            tracing::debug!(path = %temp_name, error = %cleanup, "temporary file not removed");
        }
    }
    result
}

fn write_then_rename(
    dir: &Dir,
    temp_name: &str,
    file_name: &str,
    contents: &[u8],
    mode: Option<u32>,
) -> io::Result<()> {
    let mut file = create_new(dir, temp_name, mode.unwrap_or(DEFAULT_FILE_MODE))?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    dir.rename(temp_name, dir, file_name)
}

/// Creates `name` exclusively with permission bits `mode`, subject to the
/// process umask.
fn create_new(dir: &Dir, name: &str, mode: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(mode);
    dir.open_with(name, &options)
}

/// Removes `path`, treating an already missing file as success.
pub(crate) fn remove_if_exists(path: &Utf8Path) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    match dir.remove_file(file_name) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
